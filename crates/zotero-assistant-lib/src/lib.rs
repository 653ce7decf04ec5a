// Zotero Assistant - agent run core
// Streaming run state, proposed actions and the annotation workflow behind
// the Zotero research assistant sidebar.

pub mod error;
pub mod models;
pub mod repositories;
pub mod services;
pub mod utils;

#[cfg(test)]
mod testing;

pub use error::{AssistantError, AssistantErrorCode, AssistantResult};
pub use models::*;
