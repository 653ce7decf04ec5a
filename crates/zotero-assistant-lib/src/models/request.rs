// Agent run request models
// Outbound request schema and the model/credential selection it is built from.

use serde::{Deserialize, Serialize};

use super::item::ItemReference;

// ============================================================================
// Model Selection
// ============================================================================

/// Model providers a user can bring their own key for
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ModelProvider {
    #[serde(rename = "openai")]
    OpenAI,
    Anthropic,
    Google,
    #[serde(rename = "openrouter")]
    OpenRouter,
}

impl std::fmt::Display for ModelProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ModelProvider::OpenAI => write!(f, "openai"),
            ModelProvider::Anthropic => write!(f, "anthropic"),
            ModelProvider::Google => write!(f, "google"),
            ModelProvider::OpenRouter => write!(f, "openrouter"),
        }
    }
}

impl std::str::FromStr for ModelProvider {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "openai" => Ok(ModelProvider::OpenAI),
            "anthropic" => Ok(ModelProvider::Anthropic),
            "google" | "gemini" => Ok(ModelProvider::Google),
            "openrouter" => Ok(ModelProvider::OpenRouter),
            _ => Err(format!("Unknown model provider: {}", s)),
        }
    }
}

/// User-configured model with explicit credentials
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CustomModel {
    pub provider: ModelProvider,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_base: Option<String>,
    pub api_key: String,
}

/// How the selected model is paid for and authenticated
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "access_mode", rename_all = "snake_case")]
pub enum ModelSelection {
    /// Backend-provided key; only the access id travels
    AppKey { access_id: String, model_name: String },
    /// Bring-your-own-key: provider key from the credential store
    Byok {
        access_id: String,
        model_name: String,
        provider: ModelProvider,
    },
    /// Fully custom endpoint with inline credentials
    Custom(CustomModel),
}

impl ModelSelection {
    pub fn model_name(&self) -> &str {
        match self {
            ModelSelection::AppKey { model_name, .. } => model_name,
            ModelSelection::Byok { model_name, .. } => model_name,
            ModelSelection::Custom(custom) => &custom.name,
        }
    }
}

// ============================================================================
// User Prompt
// ============================================================================

/// Kind of item attached to a message
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum AttachmentType {
    #[default]
    Source,
    Annotation,
    Note,
}

/// Item attached to a user message
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MessageAttachment {
    pub library_id: i64,
    pub zotero_key: String,
    #[serde(rename = "type", default)]
    pub attachment_type: AttachmentType,
}

impl MessageAttachment {
    pub fn source(item: &ItemReference) -> Self {
        Self {
            library_id: item.library_id,
            zotero_key: item.zotero_key.clone(),
            attachment_type: AttachmentType::Source,
        }
    }

    pub fn reference(&self) -> ItemReference {
        ItemReference::new(self.library_id, self.zotero_key.clone())
    }
}

/// Which host view the user is in
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum AppView {
    #[default]
    Library,
    FileReader,
}

/// Document currently open in the reader
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReaderState {
    pub library_id: i64,
    pub zotero_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_page: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text_selection: Option<String>,
}

impl ReaderState {
    pub fn reference(&self) -> ItemReference {
        ItemReference::new(self.library_id, self.zotero_key.clone())
    }
}

/// Snapshot of the host UI sent with every prompt
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ApplicationState {
    #[serde(default)]
    pub current_view: AppView,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reader_state: Option<ReaderState>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CollectionFilter {
    pub library_id: i64,
    pub collection_key: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TagFilter {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub library_id: Option<i64>,
    pub tag: String,
}

/// Active library/collection/tag selections restricting search
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct SearchFilters {
    #[serde(default)]
    pub libraries: Vec<i64>,
    #[serde(default)]
    pub collections: Vec<CollectionFilter>,
    #[serde(default)]
    pub tags: Vec<TagFilter>,
}

/// Tool the user explicitly asked for
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolRequest {
    pub function: String,
    #[serde(default)]
    pub parameters: serde_json::Value,
}

/// Prompt part of a run request
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct UserPrompt {
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<MessageAttachment>,
    #[serde(default)]
    pub application_state: ApplicationState,
    #[serde(default)]
    pub filters: SearchFilters,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_requests: Vec<ToolRequest>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_resume: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resumes_run_id: Option<String>,
}

// ============================================================================
// Request
// ============================================================================

/// Request kind; the backend only accepts chat runs on this socket
pub const CHAT_REQUEST_TYPE: &str = "chat";

/// Outbound agent run request
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentRunRequest {
    #[serde(rename = "type")]
    pub request_type: String,
    pub run_id: String,
    pub thread_id: Option<String>,
    pub user_prompt: UserPrompt,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_model: Option<CustomModel>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_run_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_instructions: Option<String>,
}

/// Message the host submits from the chat input
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageRequest {
    pub content: String,
    #[serde(default)]
    pub attachments: Vec<MessageAttachment>,
    #[serde(default)]
    pub application_state: ApplicationState,
    #[serde(default)]
    pub filters: SearchFilters,
    #[serde(default)]
    pub tool_requests: Vec<ToolRequest>,
}

impl SendMessageRequest {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ..Default::default()
        }
    }

    /// Rebuild the message a previous prompt was created from
    pub fn from_prompt(prompt: &UserPrompt) -> Self {
        Self {
            content: prompt.content.clone(),
            attachments: prompt.attachments.clone(),
            application_state: prompt.application_state.clone(),
            filters: prompt.filters.clone(),
            tool_requests: prompt.tool_requests.clone(),
        }
    }
}
