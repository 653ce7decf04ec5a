// Chat session
// Drives one thread against the agent backend: send, regenerate, resume and
// cancel, event dispatch, persistence and the annotation workflow.

use std::sync::Arc;

use tokio::sync::mpsc;

use super::actions::applied_annotations_for_runs;
use super::annotations::{AnnotationWorkflow, ApplyOutcome, BatchOutcome, DeleteOutcome};
use super::credentials::CredentialStore;
use super::host::{
    AgentTransport, AnnotationHost, BackendClient, CitationFormatter, ItemStore, RegenerateConfirmer,
};
use super::request_builder::{build_prompt, build_request, build_resume_prompt, RunOptions};
use super::thread::{EventOutcome, ThreadState};
use crate::error::{AssistantError, AssistantResult};
use crate::models::action::ProposedAction;
use crate::models::citation::CitationMetadata;
use crate::models::event::{CloseEvent, StreamEvent};
use crate::models::item::{ItemMetadata, ItemReference, MissingItem, MissingReason};
use crate::models::request::{SendMessageRequest, UserPrompt};
use crate::models::run::{AgentRun, ErrorType, RunError};
use crate::models::settings::AssistantSettings;
use crate::repositories::ThreadRepository;

/// Attachment content types the backend can read
const READABLE_CONTENT_TYPES: &[&str] = &[
    "application/pdf",
    "application/epub+zip",
    "text/html",
    "text/plain",
];

/// Why the backend could not see an item, judged from local metadata
pub fn classify_missing(metadata: Option<&ItemMetadata>) -> MissingReason {
    let Some(metadata) = metadata else {
        return MissingReason::NotInLibrary;
    };
    if metadata.is_attachment {
        if !metadata.file_exists {
            return MissingReason::FileMissing;
        }
        let readable = metadata
            .content_type
            .as_deref()
            .is_some_and(|t| READABLE_CONTENT_TYPES.contains(&t));
        if !readable {
            return MissingReason::UnsupportedType;
        }
    }
    MissingReason::NotSynced
}

/// External collaborators of a session
#[derive(Clone)]
pub struct SessionDeps {
    pub transport: Arc<dyn AgentTransport>,
    pub backend: Arc<dyn BackendClient>,
    pub host: Arc<dyn AnnotationHost>,
    pub items: Arc<dyn ItemStore>,
    pub confirmer: Arc<dyn RegenerateConfirmer>,
    pub credentials: Arc<dyn CredentialStore>,
    pub formatter: Option<Arc<dyn CitationFormatter>>,
}

/// One chat thread bound to the backend.
///
/// Every mutation takes `&mut self`, so event handling and user commands
/// never interleave. The host pumps `next_event` into `handle_event`.
pub struct ChatSession {
    settings: AssistantSettings,
    deps: SessionDeps,
    repo: Option<ThreadRepository>,
    thread: ThreadState,
    annotations: AnnotationWorkflow,
    events: Option<mpsc::Receiver<StreamEvent>>,
}

impl ChatSession {
    pub fn new(settings: AssistantSettings, deps: SessionDeps) -> Self {
        let annotations = AnnotationWorkflow::new(Arc::clone(&deps.host), Arc::clone(&deps.backend));
        Self {
            settings,
            deps,
            repo: None,
            thread: ThreadState::new(),
            annotations,
            events: None,
        }
    }

    /// Persist finalized runs and actions through `repo`
    pub fn with_repository(mut self, repo: ThreadRepository) -> Self {
        self.repo = Some(repo);
        self
    }

    pub fn thread(&self) -> &ThreadState {
        &self.thread
    }

    pub fn annotations(&self) -> &AnnotationWorkflow {
        &self.annotations
    }

    pub fn settings(&self) -> &AssistantSettings {
        &self.settings
    }

    pub fn update_settings(&mut self, settings: AssistantSettings) {
        self.settings = settings;
    }

    pub fn dismiss_error(&mut self, notice_id: &str) -> bool {
        self.thread.dismiss_error(notice_id)
    }

    pub fn dismiss_warning(&mut self, notice_id: &str) -> bool {
        self.thread.dismiss_warning(notice_id)
    }

    // ========================================================================
    // Threads
    // ========================================================================

    /// Replace the current thread with one from the local cache.
    /// Returns false when the thread was never stored.
    pub async fn load_thread(&mut self, thread_id: &str) -> AssistantResult<bool> {
        if self.thread.is_pending() {
            return Err(AssistantError::RunInProgress);
        }
        let repo = self
            .repo
            .as_ref()
            .ok_or_else(|| AssistantError::Storage("No thread repository configured".to_string()))?;

        let Some(snapshot) = repo.load_thread(thread_id).map_err(AssistantError::Storage)? else {
            return Ok(false);
        };

        log::info!(
            "Loaded thread {} ({} runs, {} actions)",
            thread_id,
            snapshot.runs.len(),
            snapshot.actions.len()
        );
        self.thread = ThreadState::from_history(
            snapshot.thread.id,
            snapshot.thread.title,
            snapshot.runs,
            snapshot.actions,
            snapshot.citations,
        );
        self.annotations.retain_known(&self.thread);
        Ok(true)
    }

    /// Start an empty thread, canceling anything in flight
    pub async fn new_thread(&mut self) {
        self.cancel().await;
        self.thread = ThreadState::new();
        self.annotations.retain_known(&self.thread);
    }

    // ========================================================================
    // Send / Regenerate / Resume / Cancel
    // ========================================================================

    /// Send a user message. Returns the new run id.
    pub async fn send(&mut self, message: SendMessageRequest) -> AssistantResult<String> {
        if self.thread.is_pending() {
            return Err(AssistantError::RunInProgress);
        }
        self.start_run(build_prompt(&message), None).await
    }

    /// Discard `run_id` and every later run, then ask again with the same prompt
    pub async fn regenerate(&mut self, run_id: &str) -> AssistantResult<String> {
        let Some(prompt) = self.thread.find_run(run_id).map(|r| r.prompt.clone()) else {
            return Err(self.regeneration_failed(run_id));
        };
        self.regenerate_from(run_id, prompt).await
    }

    /// Discard `run_id` and every later run, then send an edited message
    pub async fn regenerate_with_edited_prompt(
        &mut self,
        run_id: &str,
        message: SendMessageRequest,
    ) -> AssistantResult<String> {
        if self.thread.find_run(run_id).is_none() {
            return Err(self.regeneration_failed(run_id));
        }
        self.regenerate_from(run_id, build_prompt(&message)).await
    }

    fn regeneration_failed(&mut self, run_id: &str) -> AssistantError {
        let error = AssistantError::RunNotFound(run_id.to_string());
        self.thread.push_error(
            Some(run_id.to_string()),
            RunError::new(ErrorType::RegenerationError, error.to_string()),
        );
        error
    }

    async fn regenerate_from(&mut self, run_id: &str, prompt: UserPrompt) -> AssistantResult<String> {
        if self.thread.active_run().is_some() {
            self.cancel().await;
        }

        let discarded = match self.thread.runs_from(run_id) {
            Ok(discarded) => discarded,
            Err(e) => {
                self.thread.push_error(
                    Some(run_id.to_string()),
                    RunError::new(ErrorType::RegenerationError, e.to_string()),
                );
                return Err(e);
            }
        };

        let applied: Vec<ProposedAction> = applied_annotations_for_runs(self.thread.actions(), &discarded)
            .into_iter()
            .cloned()
            .collect();
        if !applied.is_empty() {
            if !self.deps.confirmer.confirm_delete(&applied).await {
                log::info!("Regeneration of run {} declined by user", run_id);
                return Err(AssistantError::RegenerationDeclined);
            }
            let mut failed = Vec::new();
            for action in &applied {
                let Some(result) = action.result_data() else {
                    continue;
                };
                match self.deps.host.delete(result).await {
                    Ok(()) => {
                        if let Some(Err(e)) = self.thread.action_mut(&action.id).map(|a| a.mark_undone()) {
                            log::warn!("Could not mark action {} undone: {}", action.id, e);
                        }
                    }
                    Err(e) => {
                        log::warn!("Failed to delete annotation {} of action {}: {}", result.zotero_key, action.id, e);
                        failed.push(result.zotero_key.clone());
                    }
                }
            }

            // Keep the runs that still own annotations in the library
            if !failed.is_empty() {
                self.persist_actions();
                let error = AssistantError::Host(format!(
                    "Could not delete annotation(s) {}; regeneration aborted",
                    failed.join(", ")
                ));
                self.thread.push_error(
                    Some(run_id.to_string()),
                    RunError::new(ErrorType::RegenerationError, error.to_string()),
                );
                return Err(error);
            }
        }

        self.thread.truncate_from(run_id)?;
        self.annotations.retain_known(&self.thread);
        if let Some(repo) = &self.repo {
            if let Err(e) = repo.delete_runs(&discarded) {
                log::warn!("Failed to delete discarded runs: {}", e);
            }
        }

        log::info!("Regenerating run {} ({} runs discarded)", run_id, discarded.len());
        self.start_run(prompt, Some(run_id.to_string())).await
    }

    /// Continue a run that failed with a resumable error
    pub async fn resume(&mut self, run_id: &str) -> AssistantResult<String> {
        let target = self.thread.find_run(run_id).map(|run| {
            let resumable = run.is_final() && run.error.as_ref().is_some_and(|e| e.is_resumable);
            (resumable, run.prompt.clone())
        });
        let previous = match target {
            Some((true, prompt)) => prompt,
            Some((false, _)) => {
                let error = AssistantError::NotResumable(run_id.to_string());
                self.thread.push_error(
                    Some(run_id.to_string()),
                    RunError::new(ErrorType::ResumeError, error.to_string()),
                );
                return Err(error);
            }
            None => return Err(AssistantError::RunNotFound(run_id.to_string())),
        };
        if self.thread.is_pending() {
            return Err(AssistantError::RunInProgress);
        }

        log::info!("Resuming run {}", run_id);
        self.start_run(build_resume_prompt(run_id, &previous), None).await
    }

    /// Cancel the active run, tell the backend and close the connection.
    /// Returns the canceled run id.
    pub async fn cancel(&mut self) -> Option<String> {
        let canceled = self.thread.cancel_active();

        if let Some(run) = &canceled {
            log::info!("Canceled run {}", run.id);
            if let Err(e) = self.deps.transport.cancel(&run.id).await {
                log::warn!("Failed to send cancel for run {}: {}", run.id, e);
            }
            self.persist_run(&run.id);
        }

        self.disconnect().await;
        canceled.map(|r| r.id)
    }

    async fn disconnect(&mut self) {
        if self.events.take().is_some() {
            if let Err(e) = self.deps.transport.close().await {
                log::warn!("Failed to close agent connection: {}", e);
            }
        }
        self.thread.apply_event(&StreamEvent::Close(CloseEvent::default()));
    }

    /// Install the shell, build the request and open the transport
    async fn start_run(&mut self, prompt: UserPrompt, retry_run_id: Option<String>) -> AssistantResult<String> {
        let thread_id = self.thread.thread_id().map(str::to_string);
        let mut shell = AgentRun::shell(
            self.settings.user_id.clone().unwrap_or_default(),
            thread_id.clone(),
            prompt.clone(),
        );
        shell.retry_run_id = retry_run_id.clone();
        shell.model_name = self
            .settings
            .selected_model
            .as_ref()
            .map(|m| m.model_name().to_string());
        let run_id = shell.id.clone();
        self.thread.begin_run(shell)?;

        let prepared = match self.settings.websocket_url() {
            Ok(endpoint) => build_request(
                &run_id,
                prompt,
                &self.settings,
                RunOptions {
                    thread_id,
                    retry_run_id,
                },
                self.deps.credentials.as_ref(),
            )
            .await
            .map(|request| (endpoint, request)),
            Err(e) => Err(e),
        };
        let (endpoint, request) = match prepared {
            Ok(prepared) => prepared,
            Err(e) => {
                log::warn!("Could not prepare run {}: {}", run_id, e);
                self.thread.rollback_run(&run_id);
                self.thread
                    .push_error(None, RunError::new(ErrorType::PreparationError, e.to_string()));
                return Err(e);
            }
        };

        // Drop any stream left over from a previous run
        self.events = None;
        match self.deps.transport.open(&endpoint, &request).await {
            Ok(events) => {
                log::info!("Sent run {} to {}", run_id, endpoint);
                self.events = Some(events);
                Ok(run_id)
            }
            Err(e) => {
                log::warn!("Could not open connection for run {}: {}", run_id, e);
                if let Some(failed) = self.thread.fail_active(RunError::connection(e.to_string())) {
                    self.persist_run(&failed);
                }
                Err(e)
            }
        }
    }

    // ========================================================================
    // Event Dispatch
    // ========================================================================

    /// Next event of the open stream; `None` when nothing is connected
    pub async fn next_event(&mut self) -> Option<StreamEvent> {
        let event = self.events.as_mut()?.recv().await;
        if event.is_none() {
            self.events = None;
        }
        event
    }

    /// Pump events until the active run is finalized or the stream ends
    pub async fn run_until_idle(&mut self) {
        while let Some(event) = self.next_event().await {
            if let EventOutcome::Finalized(_) = self.handle_event(event).await {
                break;
            }
        }
        // Stream ended without a close frame
        if self.events.is_none() && self.thread.active_run().is_some() {
            let outcome = self.handle_event(StreamEvent::Close(CloseEvent::default())).await;
            log::debug!("Stream ended during run: {:?}", outcome);
        }
    }

    /// Fold one event into the thread and run its side effects
    pub async fn handle_event(&mut self, event: StreamEvent) -> EventOutcome {
        let event = match event {
            StreamEvent::RunComplete(mut complete) => {
                self.fill_previews(&mut complete.citations).await;
                StreamEvent::RunComplete(complete)
            }
            other => other,
        };

        let outcome = self.thread.apply_event(&event);
        match &outcome {
            EventOutcome::Ignored => {
                log::debug!("Ignoring stale {} event for run {:?}", event.name(), event.run_id());
            }
            EventOutcome::Finalized(run_id) => {
                self.persist_run(run_id);
                self.disconnect().await;
            }
            EventOutcome::MissingData { run_id, items } => {
                let classified = self.classify_items(run_id, items).await;
                self.thread.record_missing_items(classified);
            }
            EventOutcome::Applied => match &event {
                StreamEvent::ToolReturn(_) | StreamEvent::AgentActions(_) => self.persist_actions(),
                StreamEvent::Thread(thread) => {
                    if let Some(repo) = &self.repo {
                        if let Err(e) = repo.upsert_thread(&thread.thread_id, thread.title.as_deref()) {
                            log::warn!("Failed to save thread {}: {}", thread.thread_id, e);
                        }
                    }
                }
                _ => {}
            },
        }
        outcome
    }

    /// Render previews for library citations that arrived without one
    async fn fill_previews(&self, citations: &mut [CitationMetadata]) {
        let Some(formatter) = &self.deps.formatter else {
            return;
        };
        for citation in citations.iter_mut().filter(|c| c.preview.is_none()) {
            let Some(item) = citation.item_reference() else {
                continue;
            };
            match formatter.preview(&item).await {
                Ok(preview) => citation.preview = Some(preview),
                Err(e) => log::debug!("No preview for {}: {}", item, e),
            }
        }
    }

    async fn classify_items(&self, run_id: &str, items: &[ItemReference]) -> Vec<MissingItem> {
        let mut classified = Vec::with_capacity(items.len());
        for item in items {
            let reason = match self.deps.items.resolve(item).await {
                Ok(metadata) => classify_missing(metadata.as_ref()),
                Err(e) => {
                    log::warn!("Could not look up missing item {}: {}", item, e);
                    MissingReason::Unknown
                }
            };
            classified.push(MissingItem {
                reference: item.clone(),
                reason,
                run_id: run_id.to_string(),
            });
        }
        classified
    }

    // ========================================================================
    // Annotations
    // ========================================================================

    pub async fn apply_action(&mut self, action_id: &str) -> AssistantResult<ApplyOutcome> {
        let outcome = self.annotations.apply(&mut self.thread, action_id).await?;
        self.persist_actions();
        Ok(outcome)
    }

    /// Open the action's document at its page and apply it
    pub async fn open_and_apply_action(&mut self, action_id: &str) -> AssistantResult<ApplyOutcome> {
        let outcome = self.annotations.open_and_apply(&mut self.thread, action_id).await?;
        self.persist_actions();
        Ok(outcome)
    }

    pub async fn delete_action(&mut self, action_id: &str) -> AssistantResult<DeleteOutcome> {
        let outcome = self.annotations.delete(&mut self.thread, action_id).await?;
        self.persist_actions();
        Ok(outcome)
    }

    pub async fn re_add_action(&mut self, action_id: &str) -> AssistantResult<ApplyOutcome> {
        let outcome = self.annotations.re_add(&mut self.thread, action_id).await?;
        self.persist_actions();
        Ok(outcome)
    }

    pub async fn apply_all_pending(&mut self, run_id: Option<&str>) -> BatchOutcome {
        let outcome = self.annotations.apply_all_pending(&mut self.thread, run_id).await;
        self.persist_actions();
        outcome
    }

    // ========================================================================
    // Persistence
    // ========================================================================

    fn persist_run(&self, run_id: &str) {
        let Some(repo) = &self.repo else {
            return;
        };
        let Some(run) = self.thread.find_run(run_id) else {
            return;
        };
        let Some(thread_id) = self.thread.thread_id().or(run.thread_id.as_deref()) else {
            log::debug!("Run {} has no thread yet, not persisted", run_id);
            return;
        };

        let citations: Vec<CitationMetadata> = self
            .thread
            .citations()
            .iter()
            .filter(|c| c.run_id.as_deref() == Some(run_id))
            .cloned()
            .collect();

        let saved = repo
            .save_run(thread_id, run)
            .and_then(|_| repo.save_citations(thread_id, &citations))
            .and_then(|_| repo.save_actions(thread_id, self.thread.actions()));
        if let Err(e) = saved {
            log::warn!("Failed to persist run {}: {}", run_id, e);
        }
    }

    fn persist_actions(&self) {
        let (Some(repo), Some(thread_id)) = (&self.repo, self.thread.thread_id()) else {
            return;
        };
        if let Err(e) = repo.save_actions(thread_id, self.thread.actions()) {
            log::warn!("Failed to persist actions of thread {}: {}", thread_id, e);
        }
    }
}
