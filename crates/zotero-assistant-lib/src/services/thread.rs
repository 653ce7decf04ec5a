// Thread state
// Active-run slot, run history, flat action/citation collections and the
// single dispatcher for stream events.

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use super::actions::{merge_actions, normalize_actions, remove_actions_for_runs};
use super::run_reducer;
use crate::error::{AssistantError, AssistantResult};
use crate::models::action::ProposedAction;
use crate::models::citation::CitationMetadata;
use crate::models::event::{DoneEvent, ErrorEvent, StreamEvent, ToolReturnEvent, WarningEvent};
use crate::models::item::{ItemReference, MissingItem};
use crate::models::run::{AgentRun, ErrorAction, RunError, RunStatus};

// ============================================================================
// Banners
// ============================================================================

/// Dismissible error banner
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ErrorNotice {
    pub id: String,
    pub run_id: Option<String>,
    pub error: RunError,
    pub action: Option<ErrorAction>,
    pub created_at: DateTime<Utc>,
}

/// Dismissible, non-blocking warning banner
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WarningNotice {
    pub id: String,
    pub run_id: Option<String>,
    pub warning_type: String,
    pub message: String,
    pub data: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

impl WarningNotice {
    fn from_event(event: &WarningEvent) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            run_id: event.run_id.clone(),
            warning_type: event.warning_type.clone(),
            message: event.message.clone(),
            data: event.data.clone(),
            created_at: Utc::now(),
        }
    }
}

/// What the dispatcher did with an event
#[derive(Debug, Clone, PartialEq)]
pub enum EventOutcome {
    Applied,
    /// Stale, unknown or foreign event; state unchanged
    Ignored,
    /// The active run was finalized and moved into history
    Finalized(String),
    /// Backend could not see these items; the session classifies them
    MissingData {
        run_id: String,
        items: Vec<ItemReference>,
    },
}

// ============================================================================
// Thread State
// ============================================================================

/// State of one conversation thread
#[derive(Debug, Default)]
pub struct ThreadState {
    thread_id: Option<String>,
    title: Option<String>,
    active_run: Option<AgentRun>,
    runs: Vec<AgentRun>,
    actions: Vec<ProposedAction>,
    citations: Vec<CitationMetadata>,
    pending: bool,
    connected: bool,
    ready: bool,
    errors: Vec<ErrorNotice>,
    warnings: Vec<WarningNotice>,
    missing_items: Vec<MissingItem>,
    /// Tool returns of the active run that arrived before their call part
    held_returns: Vec<ToolReturnEvent>,
}

impl ThreadState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a thread from persisted history
    pub fn from_history(
        thread_id: String,
        title: Option<String>,
        runs: Vec<AgentRun>,
        actions: Vec<ProposedAction>,
        citations: Vec<CitationMetadata>,
    ) -> Self {
        Self {
            thread_id: Some(thread_id),
            title,
            runs,
            actions,
            citations,
            ..Self::default()
        }
    }

    // ------------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------------

    pub fn thread_id(&self) -> Option<&str> {
        self.thread_id.as_deref()
    }

    pub fn title(&self) -> Option<&str> {
        self.title.as_deref()
    }

    pub fn active_run(&self) -> Option<&AgentRun> {
        self.active_run.as_ref()
    }

    pub fn runs(&self) -> &[AgentRun] {
        &self.runs
    }

    pub fn actions(&self) -> &[ProposedAction] {
        &self.actions
    }

    pub fn citations(&self) -> &[CitationMetadata] {
        &self.citations
    }

    pub fn is_pending(&self) -> bool {
        self.pending
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub fn is_ready(&self) -> bool {
        self.ready
    }

    pub fn errors(&self) -> &[ErrorNotice] {
        &self.errors
    }

    pub fn warnings(&self) -> &[WarningNotice] {
        &self.warnings
    }

    pub fn missing_items(&self) -> &[MissingItem] {
        &self.missing_items
    }

    /// Run by id, active or in history
    pub fn find_run(&self, run_id: &str) -> Option<&AgentRun> {
        self.active_run
            .as_ref()
            .filter(|r| r.id == run_id)
            .or_else(|| self.runs.iter().find(|r| r.id == run_id))
    }

    pub fn action(&self, action_id: &str) -> Option<&ProposedAction> {
        self.actions.iter().find(|a| a.id == action_id)
    }

    pub(crate) fn action_mut(&mut self, action_id: &str) -> Option<&mut ProposedAction> {
        self.actions.iter_mut().find(|a| a.id == action_id)
    }

    fn is_active(&self, run_id: &str) -> bool {
        self.active_run.as_ref().is_some_and(|r| r.id == run_id)
    }

    fn is_known(&self, run_id: &str) -> bool {
        self.find_run(run_id).is_some()
    }

    // ------------------------------------------------------------------------
    // Run lifecycle
    // ------------------------------------------------------------------------

    /// Install the optimistic shell. Only one run may be in flight.
    pub fn begin_run(&mut self, run: AgentRun) -> AssistantResult<()> {
        if self.pending || self.active_run.is_some() {
            return Err(AssistantError::RunInProgress);
        }
        self.errors.clear();
        self.held_returns.clear();
        self.pending = true;
        self.active_run = Some(run);
        Ok(())
    }

    /// Drop a shell that never reached the network
    pub fn rollback_run(&mut self, run_id: &str) -> Option<AgentRun> {
        if !self.is_active(run_id) {
            return None;
        }
        self.pending = false;
        self.held_returns.clear();
        self.active_run.take()
    }

    fn finalize_active(&mut self, finalized: AgentRun) -> String {
        let run_id = finalized.id.clone();
        if !self.held_returns.is_empty() {
            log::debug!(
                "Dropping {} tool return(s) whose call never arrived in run {}",
                self.held_returns.len(),
                run_id
            );
            self.held_returns.clear();
        }
        self.active_run = None;
        self.pending = false;
        self.runs.push(finalized);
        run_id
    }

    /// Fail the active run with a local error and move it to history
    pub fn fail_active(&mut self, error: RunError) -> Option<String> {
        let run = self.active_run.as_ref()?;
        let failed = run_reducer::fail(run, error.clone());
        self.push_error(Some(failed.id.clone()), error);
        Some(self.finalize_active(failed))
    }

    /// Cancel the active run and move it to history. A run that already
    /// completed but never saw `done` keeps its status.
    pub fn cancel_active(&mut self) -> Option<AgentRun> {
        let run = self.active_run.as_ref()?;
        let canceled = run_reducer::apply_cancel(run).unwrap_or_else(|| run.clone());
        self.finalize_active(canceled.clone());
        Some(canceled)
    }

    /// Run ids from `run_id` (inclusive) to the end of history
    pub fn runs_from(&self, run_id: &str) -> AssistantResult<Vec<String>> {
        let index = self
            .runs
            .iter()
            .position(|r| r.id == run_id)
            .ok_or_else(|| AssistantError::RunNotFound(run_id.to_string()))?;
        Ok(self.runs[index..].iter().map(|r| r.id.clone()).collect())
    }

    /// Truncate history at `run_id` and purge everything the discarded runs
    /// produced. Returns the discarded run ids.
    pub fn truncate_from(&mut self, run_id: &str) -> AssistantResult<Vec<String>> {
        let discarded = self.runs_from(run_id)?;
        let keep = self.runs.len() - discarded.len();
        self.runs.truncate(keep);

        remove_actions_for_runs(&mut self.actions, &discarded);
        self.citations
            .retain(|c| !c.run_id.as_ref().is_some_and(|id| discarded.contains(id)));
        self.missing_items.retain(|m| !discarded.contains(&m.run_id));
        self.errors
            .retain(|e| !e.run_id.as_ref().is_some_and(|id| discarded.contains(id)));
        self.warnings
            .retain(|w| !w.run_id.as_ref().is_some_and(|id| discarded.contains(id)));

        log::info!("Truncated thread at run {} ({} runs discarded)", run_id, discarded.len());
        Ok(discarded)
    }

    pub fn record_missing_items(&mut self, items: Vec<MissingItem>) {
        for item in items {
            let duplicate = self
                .missing_items
                .iter()
                .any(|m| m.reference == item.reference && m.run_id == item.run_id);
            if !duplicate {
                self.missing_items.push(item);
            }
        }
    }

    // ------------------------------------------------------------------------
    // Banners
    // ------------------------------------------------------------------------

    pub fn push_error(&mut self, run_id: Option<String>, error: RunError) {
        self.errors.push(ErrorNotice {
            id: Uuid::new_v4().to_string(),
            run_id,
            action: error.suggested_action(),
            error,
            created_at: Utc::now(),
        });
    }

    pub fn dismiss_error(&mut self, notice_id: &str) -> bool {
        let before = self.errors.len();
        self.errors.retain(|e| e.id != notice_id);
        before != self.errors.len()
    }

    pub fn dismiss_warning(&mut self, notice_id: &str) -> bool {
        let before = self.warnings.len();
        self.warnings.retain(|w| w.id != notice_id);
        before != self.warnings.len()
    }

    // ------------------------------------------------------------------------
    // Dispatcher
    // ------------------------------------------------------------------------

    /// Fold one stream event into the thread
    pub fn apply_event(&mut self, event: &StreamEvent) -> EventOutcome {
        match event {
            StreamEvent::Open => {
                self.connected = true;
                EventOutcome::Applied
            }
            StreamEvent::Ready(_) => {
                self.ready = true;
                EventOutcome::Applied
            }
            StreamEvent::Close(close) => {
                self.connected = false;
                self.ready = false;
                let Some(run) = self.active_run.as_ref() else {
                    return EventOutcome::Applied;
                };
                // Completed but `done` never arrived
                if run.status == RunStatus::Completed {
                    let done = DoneEvent { run_id: run.id.clone() };
                    return match run_reducer::finalize_on_done(run, &done) {
                        Some(finalized) => EventOutcome::Finalized(self.finalize_active(finalized)),
                        None => EventOutcome::Applied,
                    };
                }
                let reason = close
                    .reason
                    .clone()
                    .filter(|r| !r.is_empty())
                    .unwrap_or_else(|| "Connection closed unexpectedly".to_string());
                log::warn!("Connection closed during run: {}", reason);
                self.fail_active(RunError::connection(reason))
                    .map(EventOutcome::Finalized)
                    .unwrap_or(EventOutcome::Applied)
            }
            StreamEvent::Thread(thread) => {
                if self.thread_id.as_deref().is_some_and(|id| id != thread.thread_id) {
                    return EventOutcome::Ignored;
                }
                self.thread_id = Some(thread.thread_id.clone());
                if thread.title.is_some() {
                    self.title = thread.title.clone();
                }
                if let Some(run) = self.active_run.as_mut() {
                    run.thread_id.get_or_insert_with(|| thread.thread_id.clone());
                }
                EventOutcome::Applied
            }
            StreamEvent::RequestAck(ack) => {
                let outcome = self.reduce_active(|run| run_reducer::apply_request_ack(run, ack));
                if outcome == EventOutcome::Applied && self.thread_id.is_none() {
                    self.thread_id = ack.thread_id.clone();
                }
                outcome
            }
            StreamEvent::Part(part) => {
                let outcome = self.reduce_active(|run| run_reducer::apply_part(run, part));
                if outcome == EventOutcome::Applied && !self.held_returns.is_empty() {
                    self.replay_held_returns();
                }
                outcome
            }
            StreamEvent::ToolCallProgress(progress) => {
                self.reduce_active(|run| run_reducer::apply_tool_call_progress(run, progress))
            }
            StreamEvent::Retry(retry) => self.reduce_active(|run| run_reducer::apply_retry(run, retry)),
            StreamEvent::ToolReturn(ret) => self.apply_tool_return_event(ret),
            StreamEvent::RunComplete(complete) => {
                let outcome = self.reduce_active(|run| run_reducer::apply_run_complete(run, complete));
                if outcome == EventOutcome::Applied {
                    if let Some(run) = self.active_run.as_ref() {
                        for citation in &run.citations {
                            let known = self.citations.iter().any(|c| {
                                c.run_id == citation.run_id && c.citation_id == citation.citation_id
                            });
                            if !known {
                                self.citations.push(citation.clone());
                            }
                        }
                        merge_actions(&mut self.actions, run.agent_actions.clone());
                    }
                }
                outcome
            }
            StreamEvent::AgentActions(event) => {
                if !self.is_known(&event.run_id) {
                    log::debug!("Dropping agent actions for unknown run {}", event.run_id);
                    return EventOutcome::Ignored;
                }
                let incoming = normalize_actions(&event.actions, &event.run_id);
                merge_actions(&mut self.actions, incoming);
                EventOutcome::Applied
            }
            StreamEvent::Done(done) => {
                let Some(run) = self.active_run.as_ref() else {
                    return EventOutcome::Ignored;
                };
                match run_reducer::finalize_on_done(run, done) {
                    Some(finalized) => {
                        log::info!("Run {} finished with status {}", finalized.id, finalized.status);
                        EventOutcome::Finalized(self.finalize_active(finalized))
                    }
                    None => EventOutcome::Ignored,
                }
            }
            StreamEvent::Error(error) => self.apply_error_event(error),
            StreamEvent::Warning(warning) => {
                if warning.run_id.as_deref().is_some_and(|id| !self.is_known(id)) {
                    return EventOutcome::Ignored;
                }
                self.warnings.push(WarningNotice::from_event(warning));
                EventOutcome::Applied
            }
            StreamEvent::MissingZoteroData(missing) => {
                if !self.is_known(&missing.run_id) || missing.items.is_empty() {
                    return EventOutcome::Ignored;
                }
                EventOutcome::MissingData {
                    run_id: missing.run_id.clone(),
                    items: missing.items.clone(),
                }
            }
        }
    }

    fn apply_error_event(&mut self, event: &ErrorEvent) -> EventOutcome {
        let error = event.to_run_error();
        let Some(run) = self.active_run.as_ref() else {
            // Connection-level error with nothing streaming
            if event.run_id.is_none() {
                self.push_error(None, error);
                return EventOutcome::Applied;
            }
            return EventOutcome::Ignored;
        };

        match run_reducer::apply_error(run, event) {
            Some(failed) => {
                log::warn!("Run {} failed: {} ({})", failed.id, error.message, error.error_type);
                self.push_error(Some(failed.id.clone()), error);
                EventOutcome::Finalized(self.finalize_active(failed))
            }
            None => EventOutcome::Ignored,
        }
    }

    fn apply_tool_return_event(&mut self, ret: &ToolReturnEvent) -> EventOutcome {
        let Some(run) = self.active_run.as_ref().filter(|r| r.id == ret.run_id && !r.is_final()) else {
            return EventOutcome::Ignored;
        };

        let outcome = if run.find_tool_call(&ret.tool_call_id).is_some() {
            self.reduce_active(|run| run_reducer::apply_tool_return(run, ret))
        } else {
            log::debug!("Holding tool return {} until its call arrives", ret.tool_call_id);
            self.held_returns.push(ret.clone());
            EventOutcome::Applied
        };

        if outcome == EventOutcome::Applied {
            let mut incoming = normalize_actions(&ret.metadata.annotations, &ret.run_id);
            for action in incoming.iter_mut() {
                action.toolcall_id.get_or_insert_with(|| ret.tool_call_id.clone());
            }
            merge_actions(&mut self.actions, incoming);
        }
        outcome
    }

    /// Complete held tool returns whose call part is now in place
    fn replay_held_returns(&mut self) {
        let Some(run) = self.active_run.as_ref() else {
            return;
        };
        let (ready, waiting): (Vec<_>, Vec<_>) = std::mem::take(&mut self.held_returns)
            .into_iter()
            .partition(|ret| run.find_tool_call(&ret.tool_call_id).is_some());
        self.held_returns = waiting;

        for ret in &ready {
            self.reduce_active(|run| run_reducer::apply_tool_return(run, ret));
        }
    }

    /// Apply a reducer to the active run, guarding against stale events
    fn reduce_active<F>(&mut self, reduce: F) -> EventOutcome
    where
        F: FnOnce(&AgentRun) -> Option<AgentRun>,
    {
        let Some(run) = self.active_run.as_ref() else {
            return EventOutcome::Ignored;
        };
        match reduce(run) {
            Some(next) => {
                self.active_run = Some(next);
                EventOutcome::Applied
            }
            None => EventOutcome::Ignored,
        }
    }
}
