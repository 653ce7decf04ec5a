// Proposed action models
// Library mutations proposed by the assistant: highlights, note annotations
// and standalone Zotero notes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::citation::{BoundingBox, PageLocation};
use super::item::ItemReference;
use crate::error::{AssistantError, AssistantResult};

// ============================================================================
// Enums
// ============================================================================

/// Kind of proposed action
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    HighlightAnnotation,
    NoteAnnotation,
    ZoteroNote,
}

impl ActionType {
    /// Annotation actions live inside a PDF and go through the reader
    pub fn is_annotation(&self) -> bool {
        matches!(self, ActionType::HighlightAnnotation | ActionType::NoteAnnotation)
    }
}

impl std::fmt::Display for ActionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ActionType::HighlightAnnotation => write!(f, "highlight_annotation"),
            ActionType::NoteAnnotation => write!(f, "note_annotation"),
            ActionType::ZoteroNote => write!(f, "zotero_note"),
        }
    }
}

impl std::str::FromStr for ActionType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "highlight_annotation" | "highlight" => Ok(ActionType::HighlightAnnotation),
            "note_annotation" => Ok(ActionType::NoteAnnotation),
            "zotero_note" | "note" => Ok(ActionType::ZoteroNote),
            _ => Err(format!("Unknown action type: {}", s)),
        }
    }
}

/// Status of a proposed action
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum ActionStatus {
    #[default]
    Pending,
    Applied,
    Rejected,
    Undone,
    Error,
}

impl ActionStatus {
    /// Allowed single hops of the action state machine
    pub fn can_transition_to(&self, next: ActionStatus) -> bool {
        use ActionStatus::*;
        matches!(
            (self, next),
            (Pending, Applied)
                | (Pending, Error)
                | (Pending, Rejected)
                | (Applied, Undone)
                | (Undone, Pending)
                | (Rejected, Pending)
                | (Error, Pending)
                | (Error, Applied)
                | (Error, Rejected)
        )
    }

    /// Rank used when merging remote payloads with local state
    pub fn specificity(&self) -> u8 {
        match self {
            ActionStatus::Pending => 0,
            ActionStatus::Error => 1,
            ActionStatus::Applied | ActionStatus::Rejected | ActionStatus::Undone => 2,
        }
    }
}

impl std::fmt::Display for ActionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ActionStatus::Pending => write!(f, "pending"),
            ActionStatus::Applied => write!(f, "applied"),
            ActionStatus::Rejected => write!(f, "rejected"),
            ActionStatus::Undone => write!(f, "undone"),
            ActionStatus::Error => write!(f, "error"),
        }
    }
}

impl std::str::FromStr for ActionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(ActionStatus::Pending),
            "applied" => Ok(ActionStatus::Applied),
            "rejected" => Ok(ActionStatus::Rejected),
            "undone" => Ok(ActionStatus::Undone),
            "error" => Ok(ActionStatus::Error),
            _ => Err(format!("Unknown action status: {}", s)),
        }
    }
}

// ============================================================================
// Proposed Data
// ============================================================================

/// Highlight over text in an attachment
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HighlightData {
    pub attachment: ItemReference,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    /// Empty until the backend has located the text
    #[serde(default)]
    pub locations: Vec<PageLocation>,
}

/// Sticky note placed on a page
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NoteAnnotationData {
    pub attachment: ItemReference,
    pub comment: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_index: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<BoundingBox>,
}

/// Standalone or child note in the library
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ZoteroNoteData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<ItemReference>,
    #[serde(default)]
    pub library_id: Option<i64>,
}

/// Type-specific payload of a proposed action
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProposedData {
    Highlight(HighlightData),
    NoteAnnotation(NoteAnnotationData),
    ZoteroNote(ZoteroNoteData),
}

impl ProposedData {
    pub fn action_type(&self) -> ActionType {
        match self {
            ProposedData::Highlight(_) => ActionType::HighlightAnnotation,
            ProposedData::NoteAnnotation(_) => ActionType::NoteAnnotation,
            ProposedData::ZoteroNote(_) => ActionType::ZoteroNote,
        }
    }

    /// Attachment an annotation is placed in
    pub fn attachment(&self) -> Option<&ItemReference> {
        match self {
            ProposedData::Highlight(h) => Some(&h.attachment),
            ProposedData::NoteAnnotation(n) => Some(&n.attachment),
            ProposedData::ZoteroNote(_) => None,
        }
    }

    /// Page the annotation sits on, zero-based
    pub fn page_index(&self) -> Option<u32> {
        match self {
            ProposedData::Highlight(h) => h.locations.iter().map(|l| l.page_index).min(),
            ProposedData::NoteAnnotation(n) => n.page_index,
            ProposedData::ZoteroNote(_) => None,
        }
    }

    /// Whether position data is complete enough to place the annotation
    pub fn is_placeable(&self) -> bool {
        match self {
            ProposedData::Highlight(h) => h.locations.iter().any(|l| !l.boxes.is_empty()),
            ProposedData::NoteAnnotation(n) => n.page_index.is_some() && n.position.is_some(),
            ProposedData::ZoteroNote(_) => true,
        }
    }

    /// How much positional detail the payload carries
    pub fn specificity(&self) -> usize {
        match self {
            ProposedData::Highlight(h) => h.locations.iter().map(|l| 1 + l.boxes.len()).sum(),
            ProposedData::NoteAnnotation(n) => {
                usize::from(n.page_index.is_some()) + usize::from(n.position.is_some())
            }
            ProposedData::ZoteroNote(_) => 0,
        }
    }
}

/// Backend-confirmed identity of an applied action
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ResultData {
    pub library_id: i64,
    pub zotero_key: String,
}

impl ResultData {
    pub fn new(library_id: i64, zotero_key: impl Into<String>) -> Self {
        Self {
            library_id,
            zotero_key: zotero_key.into(),
        }
    }
}

// ============================================================================
// Proposed Action
// ============================================================================

/// A reversible, acknowledgeable library mutation proposed by the assistant.
///
/// `status` and `result_data` only change through the transition methods so
/// that `result_data` is present exactly when the action is applied.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProposedAction {
    pub id: String,
    pub run_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub toolcall_id: Option<String>,
    pub action_type: ActionType,
    status: ActionStatus,
    pub proposed_data: ProposedData,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    result_data: Option<ResultData>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl ProposedAction {
    /// Create a new pending action
    pub fn new(id: impl Into<String>, run_id: impl Into<String>, proposed_data: ProposedData) -> Self {
        Self {
            id: id.into(),
            run_id: run_id.into(),
            message_id: None,
            toolcall_id: None,
            action_type: proposed_data.action_type(),
            status: ActionStatus::Pending,
            proposed_data,
            result_data: None,
            error_message: None,
            updated_at: Utc::now(),
        }
    }

    pub fn status(&self) -> ActionStatus {
        self.status
    }

    pub fn result_data(&self) -> Option<&ResultData> {
        self.result_data.as_ref()
    }

    pub fn is_annotation(&self) -> bool {
        self.action_type.is_annotation()
    }

    fn transition(&mut self, next: ActionStatus) -> AssistantResult<()> {
        if !self.status.can_transition_to(next) {
            return Err(AssistantError::InvalidTransition {
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        if next != ActionStatus::Applied {
            self.result_data = None;
        }
        if next != ActionStatus::Error {
            self.error_message = None;
        }
        self.updated_at = Utc::now();
        Ok(())
    }

    /// pending|error -> applied
    pub fn mark_applied(&mut self, result: ResultData) -> AssistantResult<()> {
        self.transition(ActionStatus::Applied)?;
        self.result_data = Some(result);
        Ok(())
    }

    /// pending -> error
    pub fn mark_error(&mut self, message: impl Into<String>) -> AssistantResult<()> {
        self.transition(ActionStatus::Error)?;
        self.error_message = Some(message.into());
        Ok(())
    }

    /// pending|error -> rejected
    pub fn mark_rejected(&mut self) -> AssistantResult<()> {
        self.transition(ActionStatus::Rejected)
    }

    /// applied -> undone
    pub fn mark_undone(&mut self) -> AssistantResult<()> {
        self.transition(ActionStatus::Undone)
    }

    /// undone|rejected|error -> pending
    pub fn reset_to_pending(&mut self) -> AssistantResult<()> {
        self.transition(ActionStatus::Pending)
    }

    /// Adopt status and result from another record of the same action.
    /// Used when a remote payload carries a more specific state.
    pub(crate) fn adopt_state(&mut self, other: &ProposedAction) {
        self.status = other.status;
        self.result_data = if other.status == ActionStatus::Applied {
            other.result_data.clone()
        } else {
            None
        };
        self.error_message = if other.status == ActionStatus::Error {
            other.error_message.clone()
        } else {
            None
        };
        self.updated_at = other.updated_at;
    }
}

// ============================================================================
// Raw Payloads
// ============================================================================

/// Current raw agent action payload version
pub const RAW_ACTION_VERSION: u32 = 1;

fn default_raw_version() -> u32 {
    RAW_ACTION_VERSION
}

/// Agent action exactly as the backend sends it. Converted once into a
/// `ProposedAction` by `into_action`; nothing else reads raw payloads.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RawAgentAction {
    pub id: String,
    #[serde(default = "default_raw_version")]
    pub version: u32,
    pub action_type: String,
    #[serde(default)]
    pub message_id: Option<String>,
    #[serde(default, alias = "tool_call_id")]
    pub toolcall_id: Option<String>,
    #[serde(default)]
    pub status: Option<ActionStatus>,
    #[serde(default)]
    pub proposed_data: serde_json::Value,
    #[serde(default)]
    pub result_data: Option<ResultData>,
    #[serde(default)]
    pub error_message: Option<String>,
}

impl TryFrom<&RawAgentAction> for ProposedData {
    type Error = AssistantError;

    fn try_from(raw: &RawAgentAction) -> Result<Self, Self::Error> {
        if raw.version > RAW_ACTION_VERSION {
            return Err(AssistantError::InvalidPayload(format!(
                "Unsupported agent action version {} for {}",
                raw.version, raw.id
            )));
        }

        let action_type: ActionType = raw
            .action_type
            .parse()
            .map_err(AssistantError::InvalidPayload)?;

        let invalid = |e: serde_json::Error| {
            AssistantError::InvalidPayload(format!("{} ({}): {}", raw.id, action_type, e))
        };
        let data = raw.proposed_data.clone();
        Ok(match action_type {
            ActionType::HighlightAnnotation => {
                ProposedData::Highlight(serde_json::from_value(data).map_err(invalid)?)
            }
            ActionType::NoteAnnotation => {
                ProposedData::NoteAnnotation(serde_json::from_value(data).map_err(invalid)?)
            }
            ActionType::ZoteroNote => ProposedData::ZoteroNote(serde_json::from_value(data).map_err(invalid)?),
        })
    }
}

impl RawAgentAction {
    /// Normalize into a typed action owned by `run_id`
    pub fn into_action(self, run_id: &str) -> AssistantResult<ProposedAction> {
        let proposed_data = ProposedData::try_from(&self)?;

        let mut action = ProposedAction::new(self.id, run_id, proposed_data);
        action.message_id = self.message_id;
        action.toolcall_id = self.toolcall_id;

        // An "applied" payload without result data cannot be trusted
        match (self.status.unwrap_or_default(), self.result_data) {
            (ActionStatus::Applied, Some(result)) => {
                action.status = ActionStatus::Applied;
                action.result_data = Some(result);
            }
            (ActionStatus::Applied, None) | (ActionStatus::Pending, _) => {}
            (ActionStatus::Error, _) => {
                action.status = ActionStatus::Error;
                action.error_message = self.error_message;
            }
            (status, _) => action.status = status,
        }

        Ok(action)
    }
}
