// Host collaborators
// Contracts for everything the assistant needs from Zotero and the backend:
// the agent socket, the item store, the PDF reader, action acknowledgment,
// user confirmation and citation previews.

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::mpsc;
use url::Url;

use crate::error::{AssistantError, AssistantResult};
use crate::models::action::{ActionStatus, ProposedAction, ResultData};
use crate::models::event::StreamEvent;
use crate::models::item::{ItemMetadata, ItemReference};
use crate::models::request::AgentRunRequest;
use crate::models::settings::AssistantSettings;

/// Buffer size for transports feeding events through an mpsc channel
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

// ============================================================================
// Agent Transport
// ============================================================================

/// Streaming connection to the agent backend.
///
/// `open` sends the request and returns the receiving end of the event
/// stream. Implementations emit `StreamEvent::Open` once connected and
/// `StreamEvent::Close` when the socket goes away.
#[async_trait]
pub trait AgentTransport: Send + Sync {
    async fn open(
        &self,
        endpoint: &Url,
        request: &AgentRunRequest,
    ) -> AssistantResult<mpsc::Receiver<StreamEvent>>;

    /// Ask the backend to stop the run
    async fn cancel(&self, run_id: &str) -> AssistantResult<()>;

    async fn close(&self) -> AssistantResult<()>;
}

/// Client-to-server control frame
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlFrame {
    Cancel { run_id: String },
}

/// JSON text frame carrying a run request
pub fn encode_request(request: &AgentRunRequest) -> AssistantResult<String> {
    Ok(serde_json::to_string(request)?)
}

/// JSON text frame canceling a run
pub fn encode_cancel(run_id: &str) -> AssistantResult<String> {
    Ok(serde_json::to_string(&ControlFrame::Cancel {
        run_id: run_id.to_string(),
    })?)
}

// ============================================================================
// Zotero Host
// ============================================================================

/// Read access to the local library
#[async_trait]
pub trait ItemStore: Send + Sync {
    /// Metadata for an item, `None` when it does not exist locally
    async fn resolve(&self, item: &ItemReference) -> AssistantResult<Option<ItemMetadata>>;
}

/// PDF reader and note operations
#[async_trait]
pub trait AnnotationHost: Send + Sync {
    /// Identity of an equivalent annotation already in the document
    async fn find_existing(&self, action: &ProposedAction) -> AssistantResult<Option<ResultData>>;

    /// Create the annotation or note. Fails with `DocumentNotLoaded` when the
    /// target attachment is not open in the reader.
    async fn create(&self, action: &ProposedAction) -> AssistantResult<ResultData>;

    async fn delete(&self, result: &ResultData) -> AssistantResult<()>;

    /// Open an attachment in the reader, at a zero-based page if given
    async fn open_document(&self, attachment: &ItemReference, page_index: Option<u32>) -> AssistantResult<()>;

    /// Scroll the reader to an applied annotation
    async fn navigate_to(&self, result: &ResultData) -> AssistantResult<()>;
}

/// Asks the user before a regenerate deletes applied annotations
#[async_trait]
pub trait RegenerateConfirmer: Send + Sync {
    async fn confirm_delete(&self, applied: &[ProposedAction]) -> bool;
}

/// External citation formatter, used for previews only
#[async_trait]
pub trait CitationFormatter: Send + Sync {
    async fn preview(&self, item: &ItemReference) -> AssistantResult<String>;
}

// ============================================================================
// Backend Client
// ============================================================================

/// Acknowledged state of one proposed action
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ActionAck {
    pub action_id: String,
    pub status: ActionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_data: Option<ResultData>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl ActionAck {
    pub fn from_action(action: &ProposedAction) -> Self {
        Self {
            action_id: action.id.clone(),
            status: action.status(),
            result_data: action.result_data().cloned(),
            error_message: action.error_message.clone(),
        }
    }
}

#[derive(Debug, Serialize)]
struct AckRequest<'a> {
    actions: &'a [ActionAck],
}

/// Backend calls outside the agent socket
#[async_trait]
pub trait BackendClient: Send + Sync {
    async fn ack_actions(&self, acks: &[ActionAck]) -> AssistantResult<()>;
}

/// Path of the acknowledgment endpoint
pub const ACK_PATH: &str = "/api/v1/agent-actions/ack";

/// reqwest-backed backend client
pub struct HttpBackendClient {
    client: Client,
    ack_url: Url,
    auth_token: Option<String>,
}

impl HttpBackendClient {
    pub fn new(settings: &AssistantSettings) -> AssistantResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(settings.request_timeout_secs))
            .build()
            .map_err(|e| AssistantError::InvalidConfig(format!("HTTP client: {}", e)))?;

        Ok(Self {
            client,
            ack_url: settings.api_url(ACK_PATH)?,
            auth_token: settings.auth_token.clone(),
        })
    }

    fn headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        if let Some(token) = &self.auth_token {
            if let Ok(value) = HeaderValue::from_str(&format!("Bearer {}", token)) {
                headers.insert(AUTHORIZATION, value);
            }
        }
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers
    }
}

#[async_trait]
impl BackendClient for HttpBackendClient {
    async fn ack_actions(&self, acks: &[ActionAck]) -> AssistantResult<()> {
        if acks.is_empty() {
            return Ok(());
        }

        let response = self
            .client
            .post(self.ack_url.clone())
            .headers(self.headers())
            .json(&AckRequest { actions: acks })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AssistantError::Backend(format!(
                "Action acknowledgment failed ({}): {}",
                status, body
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::action::{ProposedData, ZoteroNoteData};
    use crate::models::request::{UserPrompt, CHAT_REQUEST_TYPE};

    #[test]
    fn test_cancel_frame() {
        assert_eq!(
            encode_cancel("r1").unwrap(),
            r#"{"type":"cancel","run_id":"r1"}"#
        );
    }

    #[test]
    fn test_request_frame_is_chat() {
        let request = AgentRunRequest {
            request_type: CHAT_REQUEST_TYPE.to_string(),
            run_id: "r1".to_string(),
            thread_id: Some("t1".to_string()),
            user_prompt: UserPrompt::default(),
            access_id: None,
            custom_model: None,
            api_key: None,
            retry_run_id: Some("r0".to_string()),
            custom_instructions: None,
        };
        let frame: serde_json::Value = serde_json::from_str(&encode_request(&request).unwrap()).unwrap();
        assert_eq!(frame["type"], "chat");
        assert_eq!(frame["retry_run_id"], "r0");
    }

    #[test]
    fn test_ack_from_applied_action() {
        let mut action = ProposedAction::new(
            "a1",
            "r1",
            ProposedData::ZoteroNote(ZoteroNoteData {
                title: None,
                content: "c".to_string(),
                parent: None,
                library_id: None,
            }),
        );
        action.mark_applied(ResultData::new(1, "NOTE0001")).unwrap();

        let ack = ActionAck::from_action(&action);
        let value = serde_json::to_value(&ack).unwrap();
        assert_eq!(value["status"], "applied");
        assert_eq!(value["result_data"]["zotero_key"], "NOTE0001");
        assert!(value.get("error_message").is_none());
    }

    #[test]
    fn test_http_client_builds_ack_url() {
        let mut settings = AssistantSettings::default();
        settings.backend_url = "https://assistant.example.org/".to_string();
        settings.auth_token = Some("tok".to_string());

        let client = HttpBackendClient::new(&settings).unwrap();
        assert_eq!(
            client.ack_url.as_str(),
            "https://assistant.example.org/api/v1/agent-actions/ack"
        );
        assert_eq!(
            client.headers().get(AUTHORIZATION).unwrap(),
            "Bearer tok"
        );
    }
}
