// Agent run models
// One conversational turn: streamed model messages, tool calls, usage and
// the error taxonomy surfaced to the user.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::action::ProposedAction;
use super::citation::CitationMetadata;
use super::item::ItemReference;
use super::request::UserPrompt;

// ============================================================================
// Status Enums
// ============================================================================

/// Run lifecycle status
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    #[default]
    InProgress,
    Thinking,
    Completed,
    Error,
    Canceled,
}

impl RunStatus {
    /// Finalized runs live in the thread history and never change again
    pub fn is_final(&self) -> bool {
        matches!(self, RunStatus::Completed | RunStatus::Error | RunStatus::Canceled)
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunStatus::InProgress => write!(f, "in_progress"),
            RunStatus::Thinking => write!(f, "thinking"),
            RunStatus::Completed => write!(f, "completed"),
            RunStatus::Error => write!(f, "error"),
            RunStatus::Canceled => write!(f, "canceled"),
        }
    }
}

impl std::str::FromStr for RunStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "in_progress" => Ok(RunStatus::InProgress),
            "thinking" => Ok(RunStatus::Thinking),
            "completed" => Ok(RunStatus::Completed),
            "error" => Ok(RunStatus::Error),
            "canceled" | "cancelled" => Ok(RunStatus::Canceled),
            _ => Err(format!("Invalid run status: {}", s)),
        }
    }
}

/// Tool call status; only ever moves forward
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ToolCallStatus {
    #[default]
    InProgress,
    Completed,
    Error,
}

impl ToolCallStatus {
    pub fn is_final(&self) -> bool {
        !matches!(self, ToolCallStatus::InProgress)
    }

    pub fn can_advance_to(&self, next: ToolCallStatus) -> bool {
        matches!(
            (self, next),
            (ToolCallStatus::InProgress, ToolCallStatus::Completed)
                | (ToolCallStatus::InProgress, ToolCallStatus::Error)
        )
    }
}

impl std::fmt::Display for ToolCallStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ToolCallStatus::InProgress => write!(f, "in_progress"),
            ToolCallStatus::Completed => write!(f, "completed"),
            ToolCallStatus::Error => write!(f, "error"),
        }
    }
}

// ============================================================================
// Messages and Parts
// ============================================================================

/// Response returned to the model for a tool call
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ToolResponse {
    #[serde(default)]
    pub content: serde_json::Value,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<ItemReference>,
}

/// Function invocation proposed by the model
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolCallPart {
    pub tool_call_id: String,
    pub tool_name: String,
    #[serde(default)]
    pub args: serde_json::Value,
    #[serde(default)]
    pub status: ToolCallStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<ToolResponse>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<String>,
    /// Ids into the thread's proposed-action collection
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub annotation_ids: Vec<String>,
}

impl ToolCallPart {
    pub fn new(tool_call_id: impl Into<String>, tool_name: impl Into<String>, args: serde_json::Value) -> Self {
        Self {
            tool_call_id: tool_call_id.into(),
            tool_name: tool_name.into(),
            args,
            status: ToolCallStatus::InProgress,
            response: None,
            progress: None,
            annotation_ids: Vec::new(),
        }
    }
}

/// Tool result echoed inside a request message
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolReturnPart {
    pub tool_call_id: String,
    pub tool_name: String,
    #[serde(default)]
    pub content: serde_json::Value,
}

/// Fragment of a model message
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "part_kind", rename_all = "kebab-case")]
pub enum MessagePart {
    Text {
        content: String,
    },
    Thinking {
        content: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        signature: Option<String>,
    },
    ToolCall(ToolCallPart),
    ToolReturn(ToolReturnPart),
    /// Slot reserved for a part that has not arrived yet
    Placeholder,
}

impl MessagePart {
    pub fn text(content: impl Into<String>) -> Self {
        MessagePart::Text {
            content: content.into(),
        }
    }

    pub fn is_placeholder(&self) -> bool {
        matches!(self, MessagePart::Placeholder)
    }
}

/// Who produced a model message
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    Request,
    #[default]
    Response,
}

/// One model message: ordered parts
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ModelMessage {
    #[serde(default)]
    pub kind: MessageKind,
    #[serde(default)]
    pub parts: Vec<MessagePart>,
}

// ============================================================================
// Usage and Retry
// ============================================================================

/// Token usage reported on completion
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct Usage {
    #[serde(default)]
    pub input_tokens: u64,
    #[serde(default)]
    pub output_tokens: u64,
    #[serde(default)]
    pub cache_read_tokens: u64,
    #[serde(default)]
    pub requests: u32,
}

/// Backend-driven retry in progress
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetryState {
    pub attempt: u32,
    pub max_attempts: u32,
    pub reason: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wait_seconds: Option<f64>,
}

// ============================================================================
// Errors
// ============================================================================

/// User-visible error classes
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ErrorType {
    ConnectionError,
    PreparationError,
    RegenerationError,
    ResumeError,
    RateLimit,
    Auth,
    AppKeyLimitExceeded,
    ContentFiltered,
    ServerError,
    InvalidRequest,
    #[serde(other)]
    Unknown,
}

impl std::fmt::Display for ErrorType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ErrorType::ConnectionError => "connection_error",
            ErrorType::PreparationError => "preparation_error",
            ErrorType::RegenerationError => "regeneration_error",
            ErrorType::ResumeError => "resume_error",
            ErrorType::RateLimit => "rate_limit",
            ErrorType::Auth => "auth",
            ErrorType::AppKeyLimitExceeded => "app_key_limit_exceeded",
            ErrorType::ContentFiltered => "content_filtered",
            ErrorType::ServerError => "server_error",
            ErrorType::InvalidRequest => "invalid_request",
            ErrorType::Unknown => "unknown",
        };
        write!(f, "{}", s)
    }
}

/// Contextual action offered next to an error banner
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ErrorAction {
    OpenSettings,
    Retry,
    Resume,
}

/// Error details attached to a run
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunError {
    #[serde(rename = "type")]
    pub error_type: ErrorType,
    pub message: String,
    #[serde(default)]
    pub is_retryable: bool,
    #[serde(default)]
    pub is_resumable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl RunError {
    pub fn new(error_type: ErrorType, message: impl Into<String>) -> Self {
        Self {
            error_type,
            message: message.into(),
            is_retryable: false,
            is_resumable: false,
            details: None,
        }
    }

    /// Transport failure; the user may simply try again
    pub fn connection(message: impl Into<String>) -> Self {
        Self {
            is_retryable: true,
            ..Self::new(ErrorType::ConnectionError, message)
        }
    }

    pub fn suggested_action(&self) -> Option<ErrorAction> {
        match self.error_type {
            ErrorType::Auth | ErrorType::AppKeyLimitExceeded => Some(ErrorAction::OpenSettings),
            _ if self.is_resumable => Some(ErrorAction::Resume),
            _ if self.is_retryable => Some(ErrorAction::Retry),
            _ => None,
        }
    }
}

// ============================================================================
// Agent Run
// ============================================================================

/// One user-turn-to-assistant-turn streaming session
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentRun {
    pub id: String,
    pub user_id: String,
    pub thread_id: Option<String>,
    pub prompt: UserPrompt,
    #[serde(default)]
    pub model_messages: Vec<ModelMessage>,
    pub status: RunStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_cost: Option<f64>,
    #[serde(default)]
    pub citations: Vec<CitationMetadata>,
    #[serde(default)]
    pub agent_actions: Vec<ProposedAction>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RunError>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry: Option<RetryState>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_run_id: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl AgentRun {
    /// Optimistic run created before anything is sent
    pub fn shell(user_id: impl Into<String>, thread_id: Option<String>, prompt: UserPrompt) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.into(),
            thread_id,
            prompt,
            model_messages: Vec::new(),
            status: RunStatus::InProgress,
            model_name: None,
            usage: None,
            total_cost: None,
            citations: Vec::new(),
            agent_actions: Vec::new(),
            error: None,
            retry: None,
            retry_run_id: None,
            created_at: Utc::now(),
            completed_at: None,
        }
    }

    pub fn is_final(&self) -> bool {
        self.status.is_final()
    }

    pub fn is_resume(&self) -> bool {
        self.prompt.is_resume
    }

    pub fn tool_calls(&self) -> impl Iterator<Item = &ToolCallPart> {
        self.model_messages
            .iter()
            .flat_map(|m| m.parts.iter())
            .filter_map(|p| match p {
                MessagePart::ToolCall(call) => Some(call),
                _ => None,
            })
    }

    pub fn find_tool_call(&self, tool_call_id: &str) -> Option<&ToolCallPart> {
        self.tool_calls().find(|c| c.tool_call_id == tool_call_id)
    }

    pub fn find_tool_call_mut(&mut self, tool_call_id: &str) -> Option<&mut ToolCallPart> {
        self.model_messages
            .iter_mut()
            .flat_map(|m| m.parts.iter_mut())
            .find_map(|p| match p {
                MessagePart::ToolCall(call) if call.tool_call_id == tool_call_id => Some(call),
                _ => None,
            })
    }

    /// Concatenated text parts of all response messages
    pub fn response_text(&self) -> String {
        self.model_messages
            .iter()
            .filter(|m| m.kind == MessageKind::Response)
            .flat_map(|m| m.parts.iter())
            .filter_map(|p| match p {
                MessagePart::Text { content } => Some(content.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_part_wire_format() {
        let part: MessagePart = serde_json::from_value(json!({
            "part_kind": "tool-call",
            "tool_call_id": "tc1",
            "tool_name": "search_library",
            "args": {"query": "ribosomes"}
        }))
        .unwrap();

        match part {
            MessagePart::ToolCall(call) => {
                assert_eq!(call.status, ToolCallStatus::InProgress);
                assert_eq!(call.args["query"], "ribosomes");
            }
            other => panic!("unexpected part {:?}", other),
        }

        let text: MessagePart = serde_json::from_str(r#"{"part_kind":"text","content":"Hi"}"#).unwrap();
        assert_eq!(text, MessagePart::text("Hi"));
    }

    #[test]
    fn test_unknown_error_type_falls_back() {
        let err: RunError = serde_json::from_value(json!({
            "type": "quantum_flux",
            "message": "?"
        }))
        .unwrap();
        assert_eq!(err.error_type, ErrorType::Unknown);
        assert!(!err.is_retryable);
    }

    #[test]
    fn test_suggested_actions() {
        assert_eq!(
            RunError::new(ErrorType::Auth, "bad key").suggested_action(),
            Some(ErrorAction::OpenSettings)
        );
        assert_eq!(RunError::connection("down").suggested_action(), Some(ErrorAction::Retry));

        let mut resumable = RunError::new(ErrorType::ServerError, "overloaded");
        resumable.is_resumable = true;
        resumable.is_retryable = true;
        assert_eq!(resumable.suggested_action(), Some(ErrorAction::Resume));

        assert_eq!(RunError::new(ErrorType::ContentFiltered, "no").suggested_action(), None);
    }

    #[test]
    fn test_tool_call_status_is_forward_only() {
        assert!(ToolCallStatus::InProgress.can_advance_to(ToolCallStatus::Completed));
        assert!(!ToolCallStatus::Completed.can_advance_to(ToolCallStatus::InProgress));
        assert!(!ToolCallStatus::Error.can_advance_to(ToolCallStatus::Completed));
    }

    #[test]
    fn test_response_text_skips_requests() {
        let mut run = AgentRun::shell("u1", None, UserPrompt::default());
        run.model_messages = vec![
            ModelMessage {
                kind: MessageKind::Response,
                parts: vec![MessagePart::text("Hello "), MessagePart::Placeholder],
            },
            ModelMessage {
                kind: MessageKind::Request,
                parts: vec![MessagePart::text("ignored")],
            },
            ModelMessage {
                kind: MessageKind::Response,
                parts: vec![MessagePart::text("world")],
            },
        ];
        assert_eq!(run.response_text(), "Hello world");
    }
}
