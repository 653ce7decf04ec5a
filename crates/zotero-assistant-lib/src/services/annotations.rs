// Annotation workflow
// Applies, deletes and re-adds proposed actions through the Zotero reader,
// tracking per-action busy/error state and acknowledging every change.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::future::join_all;

use super::actions::pending_actions;
use super::host::{ActionAck, AnnotationHost, BackendClient};
use super::thread::ThreadState;
use crate::error::{AssistantError, AssistantResult};
use crate::models::action::{ActionStatus, ProposedAction, ResultData};

/// Operation an action is busy with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BusyGroup {
    Apply,
    Delete,
    Batch,
}

/// Workflow state of one action, separate from its persisted status
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AnnotationState {
    /// Last failure, shown next to the action
    pub error: Option<String>,
    /// Creation failed because the attachment is not open in the reader
    pub pending_attachment_open: bool,
    /// Host was already asked for an equivalent annotation
    existing_checked: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ApplyOutcome {
    Applied {
        result: ResultData,
        /// An equivalent annotation was already in the document
        existing: bool,
    },
    /// Document must be opened first; status stays pending
    AwaitingDocument,
    Failed(String),
    /// Another operation on the action is running
    Busy,
    /// Action vanished or changed status while the host call ran
    Discarded,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DeleteOutcome {
    /// Never applied; rejected locally without touching the document
    Rejected,
    Undone,
    /// Host delete failed; the action stays applied
    Failed(String),
    Busy,
    Discarded,
}

/// Results of one "apply all pending" pass
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchOutcome {
    pub applied: Vec<String>,
    pub awaiting_document: Vec<String>,
    pub failed: Vec<(String, String)>,
    pub discarded: Vec<String>,
}

// ============================================================================
// Busy flags
// ============================================================================

type BusyKey = (BusyGroup, String);

#[derive(Clone, Default)]
struct BusySet(Arc<Mutex<HashSet<BusyKey>>>);

impl BusySet {
    fn keys(&self) -> MutexGuard<'_, HashSet<BusyKey>> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn contains(&self, group: BusyGroup, action_id: &str) -> bool {
        self.keys().contains(&(group, action_id.to_string()))
    }

    fn any(&self, action_id: &str) -> bool {
        self.keys().iter().any(|(_, id)| id == action_id)
    }

    /// Mark busy until the returned guard is dropped
    fn enter(&self, group: BusyGroup, action_id: &str) -> BusyGuard {
        let key = (group, action_id.to_string());
        self.keys().insert(key.clone());
        BusyGuard {
            set: self.clone(),
            key,
        }
    }
}

/// Clears its busy flag on drop, including when the owning future is dropped
struct BusyGuard {
    set: BusySet,
    key: BusyKey,
}

impl Drop for BusyGuard {
    fn drop(&mut self) {
        self.set.keys().remove(&self.key);
    }
}

// ============================================================================
// Host attempts
// ============================================================================

enum Attempt {
    Created { result: ResultData, existing: bool },
    NeedsDocument,
    /// No position to place it at until the document is open
    Unplaced,
    Failed(String),
}

async fn attempt_apply(
    host: &dyn AnnotationHost,
    action: &ProposedAction,
    check_existing: bool,
    document_opened: bool,
) -> Attempt {
    if action.is_annotation() && !document_opened && !action.proposed_data.is_placeable() {
        log::debug!("Action {} has no position yet; waiting for its document", action.id);
        return Attempt::Unplaced;
    }

    if check_existing {
        match host.find_existing(action).await {
            Ok(Some(result)) => {
                log::info!("Action {} already present as {}", action.id, result.zotero_key);
                return Attempt::Created { result, existing: true };
            }
            Ok(None) => {}
            Err(e) => log::warn!("Lookup of existing annotation for {} failed: {}", action.id, e),
        }
    }

    match host.create(action).await {
        Ok(result) => Attempt::Created { result, existing: false },
        Err(AssistantError::DocumentNotLoaded(_)) => Attempt::NeedsDocument,
        Err(e) => Attempt::Failed(e.to_string()),
    }
}

/// Drives proposed actions through the host reader
pub struct AnnotationWorkflow {
    host: Arc<dyn AnnotationHost>,
    backend: Arc<dyn BackendClient>,
    states: HashMap<String, AnnotationState>,
    busy: BusySet,
}

impl AnnotationWorkflow {
    pub fn new(host: Arc<dyn AnnotationHost>, backend: Arc<dyn BackendClient>) -> Self {
        Self {
            host,
            backend,
            states: HashMap::new(),
            busy: BusySet::default(),
        }
    }

    pub fn state(&self, action_id: &str) -> AnnotationState {
        self.states.get(action_id).cloned().unwrap_or_default()
    }

    pub fn is_busy(&self, group: BusyGroup, action_id: &str) -> bool {
        self.busy.contains(group, action_id)
    }

    fn any_busy(&self, action_id: &str) -> bool {
        self.busy.any(action_id)
    }

    /// Forget state of actions that are no longer in the thread
    pub fn retain_known(&mut self, thread: &ThreadState) {
        self.states.retain(|id, _| thread.action(id).is_some());
    }

    fn snapshot(thread: &ThreadState, action_id: &str) -> AssistantResult<ProposedAction> {
        thread
            .action(action_id)
            .cloned()
            .ok_or_else(|| AssistantError::ActionNotFound(action_id.to_string()))
    }

    async fn acknowledge(&self, acks: Vec<ActionAck>) {
        if acks.is_empty() {
            return;
        }
        if let Err(e) = self.backend.ack_actions(&acks).await {
            log::warn!("Failed to acknowledge {} action(s): {}", acks.len(), e);
        }
    }

    // ------------------------------------------------------------------------
    // Apply
    // ------------------------------------------------------------------------

    /// Apply a pending (or failed) action
    pub async fn apply(&mut self, thread: &mut ThreadState, action_id: &str) -> AssistantResult<ApplyOutcome> {
        self.apply_with(thread, action_id, false).await
    }

    async fn apply_with(
        &mut self,
        thread: &mut ThreadState,
        action_id: &str,
        document_opened: bool,
    ) -> AssistantResult<ApplyOutcome> {
        let action = Self::snapshot(thread, action_id)?;
        let expected = action.status();
        if !matches!(expected, ActionStatus::Pending | ActionStatus::Error) {
            return Err(AssistantError::InvalidTransition {
                from: expected,
                to: ActionStatus::Applied,
            });
        }
        if self.any_busy(action_id) {
            return Ok(ApplyOutcome::Busy);
        }

        let guard = self.busy.enter(BusyGroup::Apply, action_id);
        let check_existing = action.is_annotation() && !self.state(action_id).existing_checked;
        let attempt = attempt_apply(self.host.as_ref(), &action, check_existing, document_opened).await;
        drop(guard);

        let outcome = self.commit_apply(thread, action_id, expected, attempt);
        if matches!(outcome, ApplyOutcome::Applied { .. } | ApplyOutcome::Failed(_)) {
            if let Some(action) = thread.action(action_id) {
                if action.status() != expected {
                    self.acknowledge(vec![ActionAck::from_action(action)]).await;
                }
            }
        }
        Ok(outcome)
    }

    /// Open the attachment at the action's page, then retry the apply once
    pub async fn open_and_apply(
        &mut self,
        thread: &mut ThreadState,
        action_id: &str,
    ) -> AssistantResult<ApplyOutcome> {
        let action = Self::snapshot(thread, action_id)?;
        if let Some(attachment) = action.proposed_data.attachment() {
            let page = action.proposed_data.page_index();
            if let Err(e) = self.host.open_document(attachment, page).await {
                let message = e.to_string();
                log::warn!("Failed to open {} for action {}: {}", attachment, action_id, message);
                self.states.entry(action_id.to_string()).or_default().error = Some(message.clone());
                return Ok(ApplyOutcome::Failed(message));
            }
        }
        self.apply_with(thread, action_id, true).await
    }

    fn commit_apply(
        &mut self,
        thread: &mut ThreadState,
        action_id: &str,
        expected: ActionStatus,
        attempt: Attempt,
    ) -> ApplyOutcome {
        let Some(action) = thread.action_mut(action_id).filter(|a| a.status() == expected) else {
            log::debug!("Discarding stale apply result for action {}", action_id);
            return ApplyOutcome::Discarded;
        };
        let state = self.states.entry(action_id.to_string()).or_default();
        if !matches!(attempt, Attempt::Unplaced) {
            state.existing_checked = true;
        }

        match attempt {
            Attempt::Created { result, existing } => {
                if let Err(e) = action.mark_applied(result.clone()) {
                    return ApplyOutcome::Failed(e.to_string());
                }
                state.error = None;
                state.pending_attachment_open = false;
                log::info!("Applied action {} as {}", action_id, result.zotero_key);
                ApplyOutcome::Applied { result, existing }
            }
            Attempt::NeedsDocument | Attempt::Unplaced => {
                state.pending_attachment_open = true;
                ApplyOutcome::AwaitingDocument
            }
            Attempt::Failed(message) => {
                log::warn!("Applying action {} failed: {}", action_id, message);
                if expected == ActionStatus::Pending {
                    if let Err(e) = action.mark_error(message.clone()) {
                        log::warn!("Could not record error on {}: {}", action_id, e);
                    }
                } else {
                    action.error_message = Some(message.clone());
                }
                state.error = Some(message.clone());
                state.pending_attachment_open = false;
                ApplyOutcome::Failed(message)
            }
        }
    }

    /// Apply every pending annotation in parallel. Successes are acknowledged
    /// in one call and the reader jumps to the first of them.
    pub async fn apply_all_pending(&mut self, thread: &mut ThreadState, run_id: Option<&str>) -> BatchOutcome {
        let targets: Vec<ProposedAction> = pending_actions(thread.actions(), run_id)
            .into_iter()
            .filter(|a| a.is_annotation() && !self.any_busy(&a.id))
            .cloned()
            .collect();

        let mut outcome = BatchOutcome::default();
        if targets.is_empty() {
            return outcome;
        }

        let guards: Vec<BusyGuard> = targets
            .iter()
            .map(|action| self.busy.enter(BusyGroup::Batch, &action.id))
            .collect();

        let attempts = join_all(targets.iter().map(|action| {
            let check_existing = !self.state(&action.id).existing_checked;
            let host = Arc::clone(&self.host);
            async move { attempt_apply(host.as_ref(), action, check_existing, false).await }
        }))
        .await;
        drop(guards);

        let mut acks = Vec::new();
        let mut first_applied = None;
        for (action, attempt) in targets.iter().zip(attempts) {
            match self.commit_apply(thread, &action.id, ActionStatus::Pending, attempt) {
                ApplyOutcome::Applied { result, .. } => {
                    if let Some(applied) = thread.action(&action.id) {
                        acks.push(ActionAck::from_action(applied));
                    }
                    first_applied.get_or_insert(result);
                    outcome.applied.push(action.id.clone());
                }
                ApplyOutcome::AwaitingDocument => outcome.awaiting_document.push(action.id.clone()),
                ApplyOutcome::Failed(message) => outcome.failed.push((action.id.clone(), message)),
                ApplyOutcome::Busy | ApplyOutcome::Discarded => outcome.discarded.push(action.id.clone()),
            }
        }

        self.acknowledge(acks).await;

        if let Some(result) = first_applied {
            if let Err(e) = self.host.navigate_to(&result).await {
                log::warn!("Failed to navigate to annotation {}: {}", result.zotero_key, e);
            }
        }

        log::info!(
            "Batch apply: {} applied, {} awaiting document, {} failed",
            outcome.applied.len(),
            outcome.awaiting_document.len(),
            outcome.failed.len()
        );
        outcome
    }

    // ------------------------------------------------------------------------
    // Delete / re-add
    // ------------------------------------------------------------------------

    /// Reject a never-applied action, or delete an applied one from the
    /// document and mark it undone
    pub async fn delete(&mut self, thread: &mut ThreadState, action_id: &str) -> AssistantResult<DeleteOutcome> {
        let action = Self::snapshot(thread, action_id)?;
        if self.any_busy(action_id) {
            return Ok(DeleteOutcome::Busy);
        }

        match action.status() {
            ActionStatus::Pending | ActionStatus::Error => {
                let Some(local) = thread.action_mut(action_id) else {
                    return Ok(DeleteOutcome::Discarded);
                };
                local.mark_rejected()?;
                let ack = ActionAck::from_action(local);
                self.states.remove(action_id);
                self.acknowledge(vec![ack]).await;
                Ok(DeleteOutcome::Rejected)
            }
            ActionStatus::Applied => {
                let Some(result) = action.result_data().cloned() else {
                    return Ok(DeleteOutcome::Discarded);
                };

                let guard = self.busy.enter(BusyGroup::Delete, action_id);
                let deleted = self.host.delete(&result).await;
                drop(guard);

                let Some(local) = thread
                    .action_mut(action_id)
                    .filter(|a| a.result_data() == Some(&result))
                else {
                    log::debug!("Discarding stale delete result for action {}", action_id);
                    return Ok(DeleteOutcome::Discarded);
                };

                match deleted {
                    Ok(()) => {
                        local.mark_undone()?;
                        let ack = ActionAck::from_action(local);
                        self.states.remove(action_id);
                        self.acknowledge(vec![ack]).await;
                        log::info!("Undid action {}", action_id);
                        Ok(DeleteOutcome::Undone)
                    }
                    Err(e) => {
                        let message = e.to_string();
                        log::warn!("Deleting annotation for action {} failed: {}", action_id, message);
                        self.states.entry(action_id.to_string()).or_default().error = Some(message.clone());
                        Ok(DeleteOutcome::Failed(message))
                    }
                }
            }
            status => Err(AssistantError::InvalidTransition {
                from: status,
                to: ActionStatus::Undone,
            }),
        }
    }

    /// Put an undone or rejected action back to pending and apply it again
    pub async fn re_add(&mut self, thread: &mut ThreadState, action_id: &str) -> AssistantResult<ApplyOutcome> {
        let local = thread
            .action_mut(action_id)
            .ok_or_else(|| AssistantError::ActionNotFound(action_id.to_string()))?;
        if !matches!(local.status(), ActionStatus::Undone | ActionStatus::Rejected) {
            return Err(AssistantError::InvalidTransition {
                from: local.status(),
                to: ActionStatus::Pending,
            });
        }
        local.reset_to_pending()?;
        self.states.remove(action_id);

        self.apply(thread, action_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::event::{DoneEvent, StreamEvent};
    use crate::models::request::UserPrompt;
    use crate::models::run::AgentRun;
    use crate::testing::{FakeBackend, FakeHost};
    use serde_json::json;

    fn highlight(id: &str) -> serde_json::Value {
        json!({
            "id": id,
            "action_type": "highlight_annotation",
            "proposed_data": {
                "attachment": {"library_id": 1, "zotero_key": "ATT00001"},
                "text": "membrane",
                "locations": [{"page_index": 4, "boxes": [{"x1": 1.0, "y1": 1.0, "x2": 2.0, "y2": 2.0}]}]
            }
        })
    }

    fn thread_with(actions: serde_json::Value) -> ThreadState {
        let mut thread = ThreadState::new();
        let mut run = AgentRun::shell("user-1", None, UserPrompt::default());
        run.id = "r1".to_string();
        thread.begin_run(run).unwrap();
        let event: StreamEvent = serde_json::from_value(json!({
            "type": "run_complete", "run_id": "r1", "agent_actions": actions
        }))
        .unwrap();
        thread.apply_event(&event);
        thread.apply_event(&StreamEvent::Done(DoneEvent { run_id: "r1".to_string() }));
        thread
    }

    fn workflow(host: &Arc<FakeHost>, backend: &Arc<FakeBackend>) -> AnnotationWorkflow {
        AnnotationWorkflow::new(host.clone(), backend.clone())
    }

    #[tokio::test]
    async fn test_existing_annotation_is_reused() {
        let host = Arc::new(FakeHost::default());
        host.add_existing("a1", ResultData::new(1, "EXIST001"));
        let backend = Arc::new(FakeBackend::default());
        let mut thread = thread_with(json!([highlight("a1")]));
        let mut wf = workflow(&host, &backend);

        let outcome = wf.apply(&mut thread, "a1").await.unwrap();
        assert_eq!(
            outcome,
            ApplyOutcome::Applied {
                result: ResultData::new(1, "EXIST001"),
                existing: true
            }
        );
        assert_eq!(host.created_count(), 0);
        assert_eq!(thread.action("a1").unwrap().status(), ActionStatus::Applied);

        let acks = backend.acks();
        assert_eq!(acks.len(), 1);
        assert_eq!(acks[0][0].status, ActionStatus::Applied);
    }

    #[tokio::test]
    async fn test_unloaded_document_then_open_and_retry_once() {
        let host = Arc::new(FakeHost::default());
        host.set_document_loaded(false);
        let backend = Arc::new(FakeBackend::default());
        let mut thread = thread_with(json!([highlight("a1")]));
        let mut wf = workflow(&host, &backend);

        assert_eq!(wf.apply(&mut thread, "a1").await.unwrap(), ApplyOutcome::AwaitingDocument);
        assert!(wf.state("a1").pending_attachment_open);
        assert!(wf.state("a1").error.is_none());
        assert_eq!(thread.action("a1").unwrap().status(), ActionStatus::Pending);
        assert!(backend.acks().is_empty());

        let outcome = wf.open_and_apply(&mut thread, "a1").await.unwrap();
        assert!(matches!(outcome, ApplyOutcome::Applied { existing: false, .. }));
        assert_eq!(host.opened(), vec![("1-ATT00001".to_string(), Some(4))]);
        assert!(!wf.state("a1").pending_attachment_open);
    }

    #[tokio::test]
    async fn test_host_failure_marks_error() {
        let host = Arc::new(FakeHost::default());
        host.fail_create("reader crashed");
        let backend = Arc::new(FakeBackend::default());
        let mut thread = thread_with(json!([highlight("a1")]));
        let mut wf = workflow(&host, &backend);

        let outcome = wf.apply(&mut thread, "a1").await.unwrap();
        assert!(matches!(outcome, ApplyOutcome::Failed(_)));
        let action = thread.action("a1").unwrap();
        assert_eq!(action.status(), ActionStatus::Error);
        assert!(action.result_data().is_none());
        assert!(wf.state("a1").error.is_some());
        assert_eq!(backend.acks()[0][0].status, ActionStatus::Error);
    }

    #[tokio::test]
    async fn test_delete_pending_rejects_without_host_call() {
        let host = Arc::new(FakeHost::default());
        let backend = Arc::new(FakeBackend::default());
        let mut thread = thread_with(json!([highlight("a1")]));
        let mut wf = workflow(&host, &backend);

        assert_eq!(wf.delete(&mut thread, "a1").await.unwrap(), DeleteOutcome::Rejected);
        assert_eq!(thread.action("a1").unwrap().status(), ActionStatus::Rejected);
        assert_eq!(host.deleted_count(), 0);
    }

    #[tokio::test]
    async fn test_delete_applied_then_re_add() {
        let host = Arc::new(FakeHost::default());
        let backend = Arc::new(FakeBackend::default());
        let mut thread = thread_with(json!([highlight("a1")]));
        let mut wf = workflow(&host, &backend);

        wf.apply(&mut thread, "a1").await.unwrap();
        assert_eq!(wf.delete(&mut thread, "a1").await.unwrap(), DeleteOutcome::Undone);
        assert_eq!(host.deleted_count(), 1);
        let action = thread.action("a1").unwrap();
        assert_eq!(action.status(), ActionStatus::Undone);
        assert!(action.result_data().is_none());

        let outcome = wf.re_add(&mut thread, "a1").await.unwrap();
        assert!(matches!(outcome, ApplyOutcome::Applied { .. }));
        assert_eq!(host.created_count(), 2);
    }

    #[tokio::test]
    async fn test_failed_delete_stays_applied() {
        let host = Arc::new(FakeHost::default());
        let backend = Arc::new(FakeBackend::default());
        let mut thread = thread_with(json!([highlight("a1")]));
        let mut wf = workflow(&host, &backend);

        wf.apply(&mut thread, "a1").await.unwrap();
        host.fail_delete("locked");
        let outcome = wf.delete(&mut thread, "a1").await.unwrap();

        assert!(matches!(outcome, DeleteOutcome::Failed(_)));
        let action = thread.action("a1").unwrap();
        assert_eq!(action.status(), ActionStatus::Applied);
        assert!(action.result_data().is_some());
        assert!(wf.state("a1").error.is_some());
    }

    #[tokio::test]
    async fn test_apply_all_acks_successes_once_and_navigates() {
        let host = Arc::new(FakeHost::default());
        host.fail_create_for("a2", "bad position");
        let backend = Arc::new(FakeBackend::default());
        let mut thread = thread_with(json!([highlight("a1"), highlight("a2"), highlight("a3")]));
        let mut wf = workflow(&host, &backend);

        let outcome = wf.apply_all_pending(&mut thread, Some("r1")).await;
        assert_eq!(outcome.applied, vec!["a1".to_string(), "a3".to_string()]);
        assert_eq!(outcome.failed.len(), 1);

        let acks = backend.acks();
        assert_eq!(acks.len(), 1);
        assert!(acks[0].iter().all(|a| a.status == ActionStatus::Applied));
        assert_eq!(acks[0].len(), 2);
        assert_eq!(host.navigated().len(), 1);
        assert_eq!(thread.action("a2").unwrap().status(), ActionStatus::Error);
    }

    #[tokio::test]
    async fn test_result_for_vanished_action_is_discarded() {
        let host = Arc::new(FakeHost::default());
        let backend = Arc::new(FakeBackend::default());
        let mut thread = thread_with(json!([highlight("a1")]));
        let mut wf = workflow(&host, &backend);

        let attempt = Attempt::Created {
            result: ResultData::new(1, "K"),
            existing: false,
        };
        thread.truncate_from("r1").unwrap();
        assert_eq!(
            wf.commit_apply(&mut thread, "a1", ActionStatus::Pending, attempt),
            ApplyOutcome::Discarded
        );
    }

    fn unlocated_highlight(id: &str) -> serde_json::Value {
        json!({
            "id": id,
            "action_type": "highlight_annotation",
            "proposed_data": {
                "attachment": {"library_id": 1, "zotero_key": "ATT00001"},
                "text": "membrane",
                "locations": []
            }
        })
    }

    #[tokio::test]
    async fn test_unlocated_annotation_waits_for_document() {
        let host = Arc::new(FakeHost::default());
        let backend = Arc::new(FakeBackend::default());
        let mut thread = thread_with(json!([unlocated_highlight("a1")]));
        let mut wf = workflow(&host, &backend);

        assert_eq!(wf.apply(&mut thread, "a1").await.unwrap(), ApplyOutcome::AwaitingDocument);
        assert_eq!(host.created_count(), 0);
        assert!(wf.state("a1").pending_attachment_open);
        assert_eq!(thread.action("a1").unwrap().status(), ActionStatus::Pending);
        assert!(backend.acks().is_empty());

        let batch = wf.apply_all_pending(&mut thread, None).await;
        assert_eq!(batch.awaiting_document, vec!["a1".to_string()]);
        assert_eq!(host.created_count(), 0);

        let outcome = wf.open_and_apply(&mut thread, "a1").await.unwrap();
        assert!(matches!(outcome, ApplyOutcome::Applied { existing: false, .. }));
        assert_eq!(host.opened(), vec![("1-ATT00001".to_string(), None)]);
        assert_eq!(host.created_count(), 1);
        assert!(!wf.state("a1").pending_attachment_open);
    }

    #[tokio::test]
    async fn test_abandoned_apply_releases_busy_flag() {
        let host = Arc::new(FakeHost::default());
        host.set_create_delay(Some(std::time::Duration::from_secs(60)));
        let backend = Arc::new(FakeBackend::default());
        let mut thread = thread_with(json!([highlight("a1")]));
        let mut wf = workflow(&host, &backend);

        let timed_out =
            tokio::time::timeout(std::time::Duration::from_millis(20), wf.apply(&mut thread, "a1")).await;
        assert!(timed_out.is_err());
        assert!(!wf.is_busy(BusyGroup::Apply, "a1"));
        assert_eq!(thread.action("a1").unwrap().status(), ActionStatus::Pending);

        host.set_create_delay(None);
        let outcome = wf.apply(&mut thread, "a1").await.unwrap();
        assert!(matches!(outcome, ApplyOutcome::Applied { .. }));
    }

    #[tokio::test]
    async fn test_failed_ack_keeps_local_state() {
        let host = Arc::new(FakeHost::default());
        let backend = Arc::new(FakeBackend::default());
        backend.set_failing(true);
        let mut thread = thread_with(json!([highlight("a1")]));
        let mut wf = workflow(&host, &backend);

        let outcome = wf.apply(&mut thread, "a1").await.unwrap();
        assert!(matches!(outcome, ApplyOutcome::Applied { .. }));
        assert_eq!(backend.acks().len(), 1);

        let action = thread.action("a1").unwrap();
        assert_eq!(action.status(), ActionStatus::Applied);
        assert_eq!(action.result_data(), Some(&ResultData::new(1, "NEW00001")));
        assert!(wf.state("a1").error.is_none());
    }

    #[tokio::test]
    async fn test_unknown_action() {
        let host = Arc::new(FakeHost::default());
        let backend = Arc::new(FakeBackend::default());
        let mut thread = thread_with(json!([]));
        let mut wf = workflow(&host, &backend);

        assert!(matches!(
            wf.apply(&mut thread, "nope").await,
            Err(AssistantError::ActionNotFound(_))
        ));
    }
}
