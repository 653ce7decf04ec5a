// Streaming event models
// Closed set of events delivered for a run, parsed once at the socket boundary.

use serde::{Deserialize, Serialize};

use super::action::RawAgentAction;
use super::citation::CitationMetadata;
use super::item::ItemReference;
use super::run::{ErrorType, MessagePart, RunError, Usage};
use crate::error::AssistantResult;

// ============================================================================
// Event Payloads
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ReadyEvent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_version: Option<String>,
}

/// Backend accepted the request (phase two of the optimistic send)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RequestAckEvent {
    pub run_id: String,
    #[serde(default)]
    pub thread_id: Option<String>,
    #[serde(default)]
    pub model_name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PartEvent {
    pub run_id: String,
    pub message_index: usize,
    pub part_index: usize,
    pub part: MessagePart,
}

/// Annotation validation data carried by a tool return
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ToolReturnMetadata {
    #[serde(default)]
    pub annotations: Vec<RawAgentAction>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolReturnEvent {
    pub run_id: String,
    pub tool_call_id: String,
    #[serde(default)]
    pub tool_name: Option<String>,
    #[serde(default)]
    pub content: serde_json::Value,
    #[serde(default)]
    pub is_error: bool,
    #[serde(default)]
    pub attachments: Vec<ItemReference>,
    #[serde(default)]
    pub metadata: ToolReturnMetadata,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolCallProgressEvent {
    pub run_id: String,
    pub tool_call_id: String,
    pub progress: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunCompleteEvent {
    pub run_id: String,
    #[serde(default)]
    pub usage: Option<Usage>,
    #[serde(default)]
    pub cost: Option<f64>,
    #[serde(default)]
    pub citations: Vec<CitationMetadata>,
    #[serde(default)]
    pub agent_actions: Vec<RawAgentAction>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ThreadEvent {
    pub thread_id: String,
    #[serde(default)]
    pub title: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DoneEvent {
    pub run_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ErrorEvent {
    #[serde(default)]
    pub run_id: Option<String>,
    pub error_type: ErrorType,
    pub message: String,
    #[serde(default)]
    pub is_retryable: bool,
    #[serde(default)]
    pub is_resumable: bool,
    #[serde(default)]
    pub details: Option<serde_json::Value>,
}

impl ErrorEvent {
    pub fn to_run_error(&self) -> RunError {
        RunError {
            error_type: self.error_type,
            message: self.message.clone(),
            is_retryable: self.is_retryable,
            is_resumable: self.is_resumable,
            details: self.details.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WarningEvent {
    #[serde(default)]
    pub run_id: Option<String>,
    pub warning_type: String,
    pub message: String,
    #[serde(default)]
    pub data: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetryEvent {
    pub run_id: String,
    pub attempt: u32,
    pub max_attempts: u32,
    pub reason: String,
    #[serde(default)]
    pub wait_seconds: Option<f64>,
    /// Discard streamed content; the retried attempt re-streams from scratch
    #[serde(default)]
    pub reset: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentActionsEvent {
    pub run_id: String,
    #[serde(default)]
    pub actions: Vec<RawAgentAction>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MissingZoteroDataEvent {
    pub run_id: String,
    #[serde(default)]
    pub items: Vec<ItemReference>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct CloseEvent {
    #[serde(default)]
    pub code: Option<u16>,
    #[serde(default)]
    pub reason: Option<String>,
}

// ============================================================================
// Stream Event
// ============================================================================

/// Every event the run dispatcher handles. `Open` and `Close` come from the
/// transport itself; the rest arrive as JSON frames.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    Open,
    Ready(ReadyEvent),
    RequestAck(RequestAckEvent),
    Part(PartEvent),
    ToolReturn(ToolReturnEvent),
    ToolCallProgress(ToolCallProgressEvent),
    RunComplete(RunCompleteEvent),
    Thread(ThreadEvent),
    Done(DoneEvent),
    Error(ErrorEvent),
    Warning(WarningEvent),
    Retry(RetryEvent),
    AgentActions(AgentActionsEvent),
    MissingZoteroData(MissingZoteroDataEvent),
    Close(CloseEvent),
}

impl StreamEvent {
    /// Parse one JSON frame from the backend
    pub fn from_json(frame: &str) -> AssistantResult<Self> {
        Ok(serde_json::from_str(frame)?)
    }

    /// Run the event refers to, if any
    pub fn run_id(&self) -> Option<&str> {
        match self {
            StreamEvent::RequestAck(e) => Some(&e.run_id),
            StreamEvent::Part(e) => Some(&e.run_id),
            StreamEvent::ToolReturn(e) => Some(&e.run_id),
            StreamEvent::ToolCallProgress(e) => Some(&e.run_id),
            StreamEvent::RunComplete(e) => Some(&e.run_id),
            StreamEvent::Done(e) => Some(&e.run_id),
            StreamEvent::Error(e) => e.run_id.as_deref(),
            StreamEvent::Warning(e) => e.run_id.as_deref(),
            StreamEvent::Retry(e) => Some(&e.run_id),
            StreamEvent::AgentActions(e) => Some(&e.run_id),
            StreamEvent::MissingZoteroData(e) => Some(&e.run_id),
            StreamEvent::Open
            | StreamEvent::Ready(_)
            | StreamEvent::Thread(_)
            | StreamEvent::Close(_) => None,
        }
    }

    /// Wire name, for logging
    pub fn name(&self) -> &'static str {
        match self {
            StreamEvent::Open => "open",
            StreamEvent::Ready(_) => "ready",
            StreamEvent::RequestAck(_) => "request_ack",
            StreamEvent::Part(_) => "part",
            StreamEvent::ToolReturn(_) => "tool_return",
            StreamEvent::ToolCallProgress(_) => "tool_call_progress",
            StreamEvent::RunComplete(_) => "run_complete",
            StreamEvent::Thread(_) => "thread",
            StreamEvent::Done(_) => "done",
            StreamEvent::Error(_) => "error",
            StreamEvent::Warning(_) => "warning",
            StreamEvent::Retry(_) => "retry",
            StreamEvent::AgentActions(_) => "agent_actions",
            StreamEvent::MissingZoteroData(_) => "missing_zotero_data",
            StreamEvent::Close(_) => "close",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_part_frame() {
        let event = StreamEvent::from_json(
            r#"{"type":"part","run_id":"r1","message_index":0,"part_index":2,
                "part":{"part_kind":"text","content":"Hello"}}"#,
        )
        .unwrap();

        assert_eq!(event.name(), "part");
        assert_eq!(event.run_id(), Some("r1"));
        match event {
            StreamEvent::Part(p) => {
                assert_eq!(p.part_index, 2);
                assert_eq!(p.part, MessagePart::text("Hello"));
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn test_parse_error_frame() {
        let event = StreamEvent::from_json(
            r#"{"type":"error","run_id":"r1","error_type":"rate_limit",
                "message":"slow down","is_retryable":true}"#,
        )
        .unwrap();

        let StreamEvent::Error(e) = event else {
            panic!("expected error event");
        };
        let run_error = e.to_run_error();
        assert_eq!(run_error.error_type, ErrorType::RateLimit);
        assert!(run_error.is_retryable);
        assert!(!run_error.is_resumable);
    }

    #[test]
    fn test_parse_tool_return_with_annotations() {
        let event = StreamEvent::from_json(
            r#"{"type":"tool_return","run_id":"r1","tool_call_id":"tc1",
                "content":"ok",
                "metadata":{"annotations":[{"id":"a1","action_type":"zotero_note",
                    "proposed_data":{"content":"n"}}]}}"#,
        )
        .unwrap();

        let StreamEvent::ToolReturn(t) = event else {
            panic!("expected tool return");
        };
        assert_eq!(t.metadata.annotations.len(), 1);
        assert!(!t.is_error);
    }

    #[test]
    fn test_unknown_frame_is_rejected() {
        assert!(StreamEvent::from_json(r#"{"type":"telepathy"}"#).is_err());
        assert!(StreamEvent::from_json("not json").is_err());
    }

    #[test]
    fn test_ready_tolerates_extra_fields() {
        let event = StreamEvent::from_json(r#"{"type":"ready","subscription":"pro"}"#).unwrap();
        assert!(matches!(event, StreamEvent::Ready(_)));
    }
}
