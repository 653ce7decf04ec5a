// Repository layer
// Data access over the local SQLite cache

pub mod api_key_repo;
pub mod thread_repo;

pub use api_key_repo::ApiKeyRepository;
pub use thread_repo::{ThreadRecord, ThreadRepository, ThreadSnapshot};
