// Test collaborators
// In-memory fakes for the transport, Zotero host, backend and user prompts

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use url::Url;

use crate::error::{AssistantError, AssistantResult};
use crate::models::action::{ProposedAction, ResultData};
use crate::models::event::StreamEvent;
use crate::models::item::{ItemMetadata, ItemReference};
use crate::models::request::{AgentRunRequest, ModelProvider};
use crate::services::credentials::CredentialStore;
use crate::services::host::{
    ActionAck, AgentTransport, AnnotationHost, BackendClient, CitationFormatter, ItemStore,
    RegenerateConfirmer, EVENT_CHANNEL_CAPACITY,
};

// ============================================================================
// Transport
// ============================================================================

#[derive(Default)]
pub struct FakeTransport {
    requests: Mutex<Vec<AgentRunRequest>>,
    cancels: Mutex<Vec<String>>,
    closes: Mutex<usize>,
    open_error: Mutex<Option<String>>,
    sender: Mutex<Option<mpsc::Sender<StreamEvent>>>,
}

impl FakeTransport {
    pub fn fail_open(&self, message: &str) {
        *self.open_error.lock().unwrap() = Some(message.to_string());
    }

    /// Push an event to the most recently opened stream
    pub fn emit(&self, event: StreamEvent) {
        let sender = self.sender.lock().unwrap();
        sender
            .as_ref()
            .expect("no open stream")
            .try_send(event)
            .expect("event channel full");
    }

    pub fn emit_json(&self, value: serde_json::Value) {
        self.emit(serde_json::from_value(value).expect("invalid event"));
    }

    pub fn requests(&self) -> Vec<AgentRunRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn cancels(&self) -> Vec<String> {
        self.cancels.lock().unwrap().clone()
    }

    pub fn close_count(&self) -> usize {
        *self.closes.lock().unwrap()
    }
}

#[async_trait]
impl AgentTransport for FakeTransport {
    async fn open(
        &self,
        _endpoint: &Url,
        request: &AgentRunRequest,
    ) -> AssistantResult<mpsc::Receiver<StreamEvent>> {
        if let Some(message) = self.open_error.lock().unwrap().clone() {
            return Err(AssistantError::Connection(message));
        }
        self.requests.lock().unwrap().push(request.clone());

        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        tx.try_send(StreamEvent::Open).expect("fresh channel");
        *self.sender.lock().unwrap() = Some(tx);
        Ok(rx)
    }

    async fn cancel(&self, run_id: &str) -> AssistantResult<()> {
        self.cancels.lock().unwrap().push(run_id.to_string());
        Ok(())
    }

    async fn close(&self) -> AssistantResult<()> {
        *self.closes.lock().unwrap() += 1;
        Ok(())
    }
}

// ============================================================================
// Zotero Host
// ============================================================================

pub struct FakeHost {
    existing: Mutex<HashMap<String, ResultData>>,
    document_loaded: Mutex<bool>,
    create_error: Mutex<Option<String>>,
    create_delay: Mutex<Option<Duration>>,
    create_errors_for: Mutex<HashMap<String, String>>,
    delete_error: Mutex<Option<String>>,
    created: Mutex<Vec<String>>,
    deleted: Mutex<Vec<ResultData>>,
    opened: Mutex<Vec<(String, Option<u32>)>>,
    navigated: Mutex<Vec<ResultData>>,
}

impl Default for FakeHost {
    fn default() -> Self {
        Self {
            existing: Mutex::new(HashMap::new()),
            document_loaded: Mutex::new(true),
            create_error: Mutex::new(None),
            create_delay: Mutex::new(None),
            create_errors_for: Mutex::new(HashMap::new()),
            delete_error: Mutex::new(None),
            created: Mutex::new(Vec::new()),
            deleted: Mutex::new(Vec::new()),
            opened: Mutex::new(Vec::new()),
            navigated: Mutex::new(Vec::new()),
        }
    }
}

impl FakeHost {
    pub fn add_existing(&self, action_id: &str, result: ResultData) {
        self.existing.lock().unwrap().insert(action_id.to_string(), result);
    }

    pub fn set_document_loaded(&self, loaded: bool) {
        *self.document_loaded.lock().unwrap() = loaded;
    }

    pub fn fail_create(&self, message: &str) {
        *self.create_error.lock().unwrap() = Some(message.to_string());
    }

    /// Make `create` sleep before answering
    pub fn set_create_delay(&self, delay: Option<Duration>) {
        *self.create_delay.lock().unwrap() = delay;
    }

    pub fn fail_create_for(&self, action_id: &str, message: &str) {
        self.create_errors_for
            .lock()
            .unwrap()
            .insert(action_id.to_string(), message.to_string());
    }

    pub fn fail_delete(&self, message: &str) {
        *self.delete_error.lock().unwrap() = Some(message.to_string());
    }

    pub fn created_count(&self) -> usize {
        self.created.lock().unwrap().len()
    }

    pub fn deleted_count(&self) -> usize {
        self.deleted.lock().unwrap().len()
    }

    pub fn opened(&self) -> Vec<(String, Option<u32>)> {
        self.opened.lock().unwrap().clone()
    }

    pub fn navigated(&self) -> Vec<ResultData> {
        self.navigated.lock().unwrap().clone()
    }
}

#[async_trait]
impl AnnotationHost for FakeHost {
    async fn find_existing(&self, action: &ProposedAction) -> AssistantResult<Option<ResultData>> {
        Ok(self.existing.lock().unwrap().get(&action.id).cloned())
    }

    async fn create(&self, action: &ProposedAction) -> AssistantResult<ResultData> {
        let delay = *self.create_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if action.is_annotation() && !*self.document_loaded.lock().unwrap() {
            return Err(AssistantError::DocumentNotLoaded(action.id.clone()));
        }
        if let Some(message) = self.create_errors_for.lock().unwrap().get(&action.id) {
            return Err(AssistantError::Host(message.clone()));
        }
        if let Some(message) = self.create_error.lock().unwrap().clone() {
            return Err(AssistantError::Host(message));
        }

        let mut created = self.created.lock().unwrap();
        created.push(action.id.clone());
        Ok(ResultData::new(1, format!("NEW{:05}", created.len())))
    }

    async fn delete(&self, result: &ResultData) -> AssistantResult<()> {
        if let Some(message) = self.delete_error.lock().unwrap().clone() {
            return Err(AssistantError::Host(message));
        }
        self.deleted.lock().unwrap().push(result.clone());
        Ok(())
    }

    async fn open_document(&self, attachment: &ItemReference, page_index: Option<u32>) -> AssistantResult<()> {
        self.opened.lock().unwrap().push((attachment.to_string(), page_index));
        self.set_document_loaded(true);
        Ok(())
    }

    async fn navigate_to(&self, result: &ResultData) -> AssistantResult<()> {
        self.navigated.lock().unwrap().push(result.clone());
        Ok(())
    }
}

// ============================================================================
// Backend, Prompts, Library
// ============================================================================

#[derive(Default)]
pub struct FakeBackend {
    acks: Mutex<Vec<Vec<ActionAck>>>,
    failing: Mutex<bool>,
}

impl FakeBackend {
    /// Acknowledgment batches in call order
    pub fn acks(&self) -> Vec<Vec<ActionAck>> {
        self.acks.lock().unwrap().clone()
    }

    pub fn set_failing(&self, failing: bool) {
        *self.failing.lock().unwrap() = failing;
    }
}

#[async_trait]
impl BackendClient for FakeBackend {
    async fn ack_actions(&self, acks: &[ActionAck]) -> AssistantResult<()> {
        self.acks.lock().unwrap().push(acks.to_vec());
        if *self.failing.lock().unwrap() {
            return Err(AssistantError::Backend("unavailable".to_string()));
        }
        Ok(())
    }
}

pub struct FakeConfirmer {
    answer: bool,
    asked: Mutex<usize>,
}

impl FakeConfirmer {
    pub fn answering(answer: bool) -> Self {
        Self {
            answer,
            asked: Mutex::new(0),
        }
    }

    pub fn asked(&self) -> usize {
        *self.asked.lock().unwrap()
    }
}

#[async_trait]
impl RegenerateConfirmer for FakeConfirmer {
    async fn confirm_delete(&self, _applied: &[ProposedAction]) -> bool {
        *self.asked.lock().unwrap() += 1;
        self.answer
    }
}

#[derive(Default)]
pub struct FakeItemStore {
    items: Mutex<HashMap<ItemReference, ItemMetadata>>,
    failing: Mutex<bool>,
}

impl FakeItemStore {
    pub fn insert(&self, metadata: ItemMetadata) {
        self.items
            .lock()
            .unwrap()
            .insert(metadata.reference.clone(), metadata);
    }

    pub fn set_failing(&self, failing: bool) {
        *self.failing.lock().unwrap() = failing;
    }
}

#[async_trait]
impl ItemStore for FakeItemStore {
    async fn resolve(&self, item: &ItemReference) -> AssistantResult<Option<ItemMetadata>> {
        if *self.failing.lock().unwrap() {
            return Err(AssistantError::Host("item store unavailable".to_string()));
        }
        Ok(self.items.lock().unwrap().get(item).cloned())
    }
}

#[derive(Default)]
pub struct FakeCredentials {
    keys: HashMap<ModelProvider, String>,
}

impl FakeCredentials {
    pub fn with_key(provider: ModelProvider, key: &str) -> Self {
        let mut keys = HashMap::new();
        keys.insert(provider, key.to_string());
        Self { keys }
    }
}

#[async_trait]
impl CredentialStore for FakeCredentials {
    async fn api_key(&self, provider: &ModelProvider) -> AssistantResult<Option<String>> {
        Ok(self.keys.get(provider).cloned())
    }
}

#[derive(Default)]
pub struct FakeFormatter;

#[async_trait]
impl CitationFormatter for FakeFormatter {
    async fn preview(&self, item: &ItemReference) -> AssistantResult<String> {
        Ok(format!("Preview of {}", item))
    }
}
