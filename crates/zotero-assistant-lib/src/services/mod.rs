// Services module
// Reducers, the thread dispatcher, the chat session and host contracts

pub mod actions;
pub mod annotations;
pub mod citations;
pub mod credentials;
pub mod crypto;
pub mod host;
pub mod request_builder;
pub mod run_reducer;
pub mod session;
pub mod thread;

pub use annotations::{AnnotationState, AnnotationWorkflow, ApplyOutcome, BatchOutcome, BusyGroup, DeleteOutcome};
pub use credentials::{CredentialStore, EncryptedKeyStore};
pub use host::{
    ActionAck, AgentTransport, AnnotationHost, BackendClient, CitationFormatter, HttpBackendClient, ItemStore,
    RegenerateConfirmer,
};
pub use session::{ChatSession, SessionDeps};
pub use thread::{ErrorNotice, EventOutcome, ThreadState, WarningNotice};
