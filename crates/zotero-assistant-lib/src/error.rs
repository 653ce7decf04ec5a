// Assistant Error Types
// Errors returned by the session, reducers, repositories and host bindings.

use thiserror::Error;

use crate::models::action::ActionStatus;

/// Assistant core error
#[derive(Error, Debug)]
pub enum AssistantError {
    /// A run is already streaming for this thread
    #[error("A request is already in progress")]
    RunInProgress,

    /// Run id is neither active nor in the thread history
    #[error("Run not found: {0}")]
    RunNotFound(String),

    /// Proposed action id is unknown to the thread
    #[error("Proposed action not found: {0}")]
    ActionNotFound(String),

    /// Resume requested for a run whose error is not resumable
    #[error("Run cannot be resumed: {0}")]
    NotResumable(String),

    /// User declined deleting applied annotations before regenerating
    #[error("Regeneration canceled by user")]
    RegenerationDeclined,

    /// Proposed action status change not allowed by the state machine
    #[error("Invalid action transition: {from} -> {to}")]
    InvalidTransition { from: ActionStatus, to: ActionStatus },

    /// Request could not be built (no user, no model, missing key)
    #[error("Request preparation failed: {0}")]
    Preparation(String),

    /// Transport could not be opened or failed mid-stream
    #[error("Cannot connect to assistant backend: {0}")]
    Connection(String),

    /// Target document is not open in the reader
    #[error("Document is not loaded: {0}")]
    DocumentNotLoaded(String),

    /// Host application call failed
    #[error("Zotero error: {0}")]
    Host(String),

    /// Backend rejected an HTTP call
    #[error("Backend error: {0}")]
    Backend(String),

    /// Payload did not match the expected shape
    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    /// JSON parsing error
    #[error("Response parse error: {0}")]
    Parse(String),

    /// Storage error
    #[error("Storage error: {0}")]
    Storage(String),

    /// Encryption error
    #[error("Encryption error: {0}")]
    Encryption(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(String),
}

impl From<reqwest::Error> for AssistantError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_connect() || err.is_timeout() {
            AssistantError::Connection(err.to_string())
        } else {
            AssistantError::Backend(err.to_string())
        }
    }
}

impl From<serde_json::Error> for AssistantError {
    fn from(err: serde_json::Error) -> Self {
        AssistantError::Parse(err.to_string())
    }
}

impl From<std::io::Error> for AssistantError {
    fn from(err: std::io::Error) -> Self {
        AssistantError::Io(err.to_string())
    }
}

/// Result type for assistant operations
pub type AssistantResult<T> = Result<T, AssistantError>;

/// Stable error codes for the host UI
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssistantErrorCode {
    RunInProgress,
    RunNotFound,
    ActionNotFound,
    NotResumable,
    RegenerationDeclined,
    InvalidTransition,
    Preparation,
    Connection,
    DocumentNotLoaded,
    Host,
    Backend,
    InvalidPayload,
    Parse,
    Storage,
    Encryption,
    InvalidConfig,
    Io,
}

impl AssistantErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            AssistantErrorCode::RunInProgress => "RUN_IN_PROGRESS",
            AssistantErrorCode::RunNotFound => "RUN_NOT_FOUND",
            AssistantErrorCode::ActionNotFound => "ACTION_NOT_FOUND",
            AssistantErrorCode::NotResumable => "RUN_NOT_RESUMABLE",
            AssistantErrorCode::RegenerationDeclined => "REGENERATION_DECLINED",
            AssistantErrorCode::InvalidTransition => "ACTION_INVALID_TRANSITION",
            AssistantErrorCode::Preparation => "PREPARATION_FAILED",
            AssistantErrorCode::Connection => "CONNECTION_FAILED",
            AssistantErrorCode::DocumentNotLoaded => "DOCUMENT_NOT_LOADED",
            AssistantErrorCode::Host => "HOST_ERROR",
            AssistantErrorCode::Backend => "BACKEND_ERROR",
            AssistantErrorCode::InvalidPayload => "INVALID_PAYLOAD",
            AssistantErrorCode::Parse => "PARSE_ERROR",
            AssistantErrorCode::Storage => "STORAGE_ERROR",
            AssistantErrorCode::Encryption => "ENCRYPTION_ERROR",
            AssistantErrorCode::InvalidConfig => "INVALID_CONFIG",
            AssistantErrorCode::Io => "IO_ERROR",
        }
    }
}

impl AssistantError {
    pub fn code(&self) -> AssistantErrorCode {
        match self {
            AssistantError::RunInProgress => AssistantErrorCode::RunInProgress,
            AssistantError::RunNotFound(_) => AssistantErrorCode::RunNotFound,
            AssistantError::ActionNotFound(_) => AssistantErrorCode::ActionNotFound,
            AssistantError::NotResumable(_) => AssistantErrorCode::NotResumable,
            AssistantError::RegenerationDeclined => AssistantErrorCode::RegenerationDeclined,
            AssistantError::InvalidTransition { .. } => AssistantErrorCode::InvalidTransition,
            AssistantError::Preparation(_) => AssistantErrorCode::Preparation,
            AssistantError::Connection(_) => AssistantErrorCode::Connection,
            AssistantError::DocumentNotLoaded(_) => AssistantErrorCode::DocumentNotLoaded,
            AssistantError::Host(_) => AssistantErrorCode::Host,
            AssistantError::Backend(_) => AssistantErrorCode::Backend,
            AssistantError::InvalidPayload(_) => AssistantErrorCode::InvalidPayload,
            AssistantError::Parse(_) => AssistantErrorCode::Parse,
            AssistantError::Storage(_) => AssistantErrorCode::Storage,
            AssistantError::Encryption(_) => AssistantErrorCode::Encryption,
            AssistantError::InvalidConfig(_) => AssistantErrorCode::InvalidConfig,
            AssistantError::Io(_) => AssistantErrorCode::Io,
        }
    }
}

impl From<AssistantError> for String {
    fn from(err: AssistantError) -> Self {
        err.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_str() {
        assert_eq!(AssistantError::RunInProgress.code().as_str(), "RUN_IN_PROGRESS");
        assert_eq!(
            AssistantError::NotResumable("r1".to_string()).code().as_str(),
            "RUN_NOT_RESUMABLE"
        );
    }

    #[test]
    fn test_transition_message() {
        let err = AssistantError::InvalidTransition {
            from: ActionStatus::Applied,
            to: ActionStatus::Rejected,
        };
        assert_eq!(err.to_string(), "Invalid action transition: applied -> rejected");
    }

    #[test]
    fn test_serde_error_maps_to_parse() {
        let err: AssistantError = serde_json::from_str::<u32>("nope").unwrap_err().into();
        assert_eq!(err.code(), AssistantErrorCode::Parse);
    }
}
