// Agent run reducer
// Pure functions folding stream events into a run snapshot.
//
// Every function returns `None` when the event does not belong to the run or
// the run is already finalized; callers keep their current snapshot then.

use chrono::Utc;

use super::actions::normalize_actions;
use crate::models::event::{
    DoneEvent, ErrorEvent, PartEvent, RequestAckEvent, RetryEvent, RunCompleteEvent,
    ToolCallProgressEvent, ToolReturnEvent,
};
use crate::models::run::{
    AgentRun, MessageKind, MessagePart, ModelMessage, RetryState, RunError, RunStatus,
    ToolCallPart, ToolCallStatus, ToolResponse,
};

/// Most placeholder slots a single part may open up
pub const MAX_PLACEHOLDER_GAP: usize = 1024;

fn accepts(run: &AgentRun, run_id: &str) -> bool {
    run.id == run_id && !run.is_final()
}

/// Mark every tool call still running as failed
fn close_open_tool_calls(run: &mut AgentRun) {
    for message in run.model_messages.iter_mut() {
        for part in message.parts.iter_mut() {
            if let MessagePart::ToolCall(call) = part {
                if call.status == ToolCallStatus::InProgress {
                    call.status = ToolCallStatus::Error;
                }
            }
        }
    }
}

/// Status implied by the most recent streamed part
fn streaming_status(run: &AgentRun) -> RunStatus {
    let last = run
        .model_messages
        .last()
        .and_then(|m| m.parts.iter().rev().find(|p| !p.is_placeholder()));
    match last {
        Some(MessagePart::Thinking { .. }) => RunStatus::Thinking,
        _ => RunStatus::InProgress,
    }
}

fn merge_tool_call(stored: &mut ToolCallPart, incoming: &ToolCallPart) {
    if !incoming.tool_name.is_empty() {
        stored.tool_name = incoming.tool_name.clone();
    }
    if !incoming.args.is_null() {
        stored.args = incoming.args.clone();
    }
    if stored.status.can_advance_to(incoming.status) {
        stored.status = incoming.status;
    }
    if incoming.response.is_some() {
        stored.response = incoming.response.clone();
    }
    if incoming.progress.is_some() {
        stored.progress = incoming.progress.clone();
    }
    for id in &incoming.annotation_ids {
        if !stored.annotation_ids.contains(id) {
            stored.annotation_ids.push(id.clone());
        }
    }
}

/// Merge an incoming part snapshot into the stored slot
fn merge_part(slot: &mut MessagePart, incoming: &MessagePart) {
    match (slot, incoming) {
        (MessagePart::Text { content }, MessagePart::Text { content: next }) => {
            // Stale snapshot: already covered by what we have
            if !content.starts_with(next.as_str()) {
                *content = next.clone();
            }
        }
        (
            MessagePart::Thinking { content, signature },
            MessagePart::Thinking {
                content: next,
                signature: next_signature,
            },
        ) => {
            if !content.starts_with(next.as_str()) {
                *content = next.clone();
            }
            if next_signature.is_some() {
                *signature = next_signature.clone();
            }
        }
        (MessagePart::ToolCall(stored), MessagePart::ToolCall(next)) => {
            if stored.tool_call_id == next.tool_call_id {
                merge_tool_call(stored, next);
            } else {
                log::debug!(
                    "Ignoring tool call {} for slot held by {}",
                    next.tool_call_id,
                    stored.tool_call_id
                );
            }
        }
        // A tool call keeps its slot once placed
        (MessagePart::ToolCall(_), _) => {}
        (slot, incoming) => *slot = incoming.clone(),
    }
}

/// Place a part at its (message, part) index, gap-filling with placeholders
pub fn apply_part(run: &AgentRun, event: &PartEvent) -> Option<AgentRun> {
    if !accepts(run, &event.run_id) || event.part.is_placeholder() {
        return None;
    }

    let parts_len = run
        .model_messages
        .get(event.message_index)
        .map_or(0, |m| m.parts.len());
    if event.message_index.saturating_sub(run.model_messages.len()) > MAX_PLACEHOLDER_GAP
        || event.part_index.saturating_sub(parts_len) > MAX_PLACEHOLDER_GAP
    {
        log::warn!(
            "Ignoring part at ({}, {}) for run {}: index too far ahead",
            event.message_index,
            event.part_index,
            run.id
        );
        return None;
    }

    let mut next = run.clone();
    while next.model_messages.len() <= event.message_index {
        next.model_messages.push(ModelMessage::default());
    }

    let message = &mut next.model_messages[event.message_index];
    if matches!(event.part, MessagePart::ToolReturn(_)) {
        message.kind = MessageKind::Request;
    }
    while message.parts.len() <= event.part_index {
        message.parts.push(MessagePart::Placeholder);
    }
    merge_part(&mut message.parts[event.part_index], &event.part);

    next.status = streaming_status(&next);
    next.retry = None;
    Some(next)
}

/// Server confirmed the request; record the thread and model it runs on
pub fn apply_request_ack(run: &AgentRun, event: &RequestAckEvent) -> Option<AgentRun> {
    if !accepts(run, &event.run_id) {
        return None;
    }

    let mut next = run.clone();
    if let Some(thread_id) = &event.thread_id {
        next.thread_id = Some(thread_id.clone());
    }
    if let Some(model_name) = &event.model_name {
        next.model_name = Some(model_name.clone());
    }
    Some(next)
}

/// Complete a tool call with its response. A call that already finished is
/// left untouched.
pub fn apply_tool_return(run: &AgentRun, event: &ToolReturnEvent) -> Option<AgentRun> {
    if !accepts(run, &event.run_id) {
        return None;
    }

    let mut next = run.clone();
    let call = next.find_tool_call_mut(&event.tool_call_id)?;
    if call.status.is_final() {
        return None;
    }

    call.status = if event.is_error {
        ToolCallStatus::Error
    } else {
        ToolCallStatus::Completed
    };
    call.response = Some(ToolResponse {
        content: event.content.clone(),
        attachments: event.attachments.clone(),
    });
    call.progress = None;
    for annotation in &event.metadata.annotations {
        if !call.annotation_ids.contains(&annotation.id) {
            call.annotation_ids.push(annotation.id.clone());
        }
    }
    Some(next)
}

/// Record progress text on a running tool call
pub fn apply_tool_call_progress(run: &AgentRun, event: &ToolCallProgressEvent) -> Option<AgentRun> {
    if !accepts(run, &event.run_id) {
        return None;
    }

    let mut next = run.clone();
    let call = next.find_tool_call_mut(&event.tool_call_id)?;
    if call.status != ToolCallStatus::InProgress {
        return None;
    }
    call.progress = Some(event.progress.clone());
    Some(next)
}

/// Completion: usage, cost, run-tagged citations and typed actions
pub fn apply_run_complete(run: &AgentRun, event: &RunCompleteEvent) -> Option<AgentRun> {
    if !accepts(run, &event.run_id) {
        return None;
    }

    let mut next = run.clone();
    next.status = RunStatus::Completed;
    next.retry = None;
    if event.usage.is_some() {
        next.usage = event.usage.clone();
    }
    if event.cost.is_some() {
        next.total_cost = event.cost;
    }

    for citation in &event.citations {
        if next
            .citations
            .iter()
            .any(|c| c.citation_id == citation.citation_id)
        {
            continue;
        }
        let mut citation = citation.clone();
        citation.run_id = Some(run.id.clone());
        next.citations.push(citation);
    }

    next.agent_actions = normalize_actions(&event.agent_actions, &run.id);
    Some(next)
}

/// Backend is retrying the model call
pub fn apply_retry(run: &AgentRun, event: &RetryEvent) -> Option<AgentRun> {
    if !accepts(run, &event.run_id) {
        return None;
    }

    let mut next = if event.reset {
        reset_messages(run)?
    } else {
        run.clone()
    };
    next.retry = Some(RetryState {
        attempt: event.attempt,
        max_attempts: event.max_attempts,
        reason: event.reason.clone(),
        wait_seconds: event.wait_seconds,
    });
    Some(next)
}

/// Error reported for the run. An event without a run id applies to
/// whichever run it is given.
pub fn apply_error(run: &AgentRun, event: &ErrorEvent) -> Option<AgentRun> {
    let run_id = event.run_id.as_deref().unwrap_or(run.id.as_str());
    if !accepts(run, run_id) {
        return None;
    }
    Some(fail(run, event.to_run_error()))
}

/// Finalize a live run with a locally produced error
pub fn fail(run: &AgentRun, error: RunError) -> AgentRun {
    let mut next = run.clone();
    close_open_tool_calls(&mut next);
    next.status = RunStatus::Error;
    next.error = Some(error);
    next.retry = None;
    next.completed_at = Some(Utc::now());
    next
}

/// Drop everything streamed so far
pub fn reset_messages(run: &AgentRun) -> Option<AgentRun> {
    if run.is_final() {
        return None;
    }

    let mut next = run.clone();
    next.model_messages.clear();
    next.status = RunStatus::InProgress;
    Some(next)
}

/// User canceled the run
pub fn apply_cancel(run: &AgentRun) -> Option<AgentRun> {
    if run.is_final() {
        return None;
    }

    let mut next = run.clone();
    close_open_tool_calls(&mut next);
    next.status = RunStatus::Canceled;
    next.retry = None;
    next.completed_at = Some(Utc::now());
    Some(next)
}

/// `done` is terminal: completes the run unless it already errored, and
/// fails tool calls that never returned.
pub fn finalize_on_done(run: &AgentRun, event: &DoneEvent) -> Option<AgentRun> {
    if run.id != event.run_id || run.status == RunStatus::Canceled {
        return None;
    }

    let mut next = run.clone();
    close_open_tool_calls(&mut next);
    if next.status != RunStatus::Error {
        next.status = RunStatus::Completed;
    }
    next.retry = None;
    if next.completed_at.is_none() {
        next.completed_at = Some(Utc::now());
    }
    Some(next)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::action::ActionStatus;
    use crate::models::event::ToolReturnMetadata;
    use crate::models::request::UserPrompt;
    use crate::models::run::ErrorType;
    use serde_json::json;

    fn run() -> AgentRun {
        let mut run = AgentRun::shell("user-1", Some("thread-1".to_string()), UserPrompt::default());
        run.id = "run-1".to_string();
        run
    }

    fn part(message_index: usize, part_index: usize, part: MessagePart) -> PartEvent {
        PartEvent {
            run_id: "run-1".to_string(),
            message_index,
            part_index,
            part,
        }
    }

    fn tool_call(id: &str) -> MessagePart {
        MessagePart::ToolCall(ToolCallPart::new(id, "create_highlight", json!({"text": "x"})))
    }

    fn tool_return(id: &str, is_error: bool) -> ToolReturnEvent {
        ToolReturnEvent {
            run_id: "run-1".to_string(),
            tool_call_id: id.to_string(),
            tool_name: Some("create_highlight".to_string()),
            content: json!("done"),
            is_error,
            attachments: vec![],
            metadata: ToolReturnMetadata::default(),
        }
    }

    #[test]
    fn test_part_placement_is_idempotent() {
        let event = part(0, 0, MessagePart::text("Hello"));
        let once = apply_part(&run(), &event).unwrap();
        let twice = apply_part(&once, &event).unwrap();

        assert_eq!(once.model_messages, twice.model_messages);
        assert_eq!(twice.model_messages[0].parts, vec![MessagePart::text("Hello")]);
    }

    #[test]
    fn test_out_of_order_parts_are_gap_filled() {
        let run = apply_part(&run(), &part(1, 2, MessagePart::text("late"))).unwrap();
        assert_eq!(run.model_messages.len(), 2);
        assert!(run.model_messages[0].parts.is_empty());
        assert_eq!(
            run.model_messages[1].parts,
            vec![MessagePart::Placeholder, MessagePart::Placeholder, MessagePart::text("late")]
        );

        let run = apply_part(&run, &part(1, 0, MessagePart::text("early"))).unwrap();
        assert_eq!(run.model_messages[1].parts[0], MessagePart::text("early"));
        assert!(run.model_messages[1].parts[1].is_placeholder());
    }

    #[test]
    fn test_far_ahead_index_is_ignored() {
        let huge = u32::MAX as usize;
        assert!(apply_part(&run(), &part(0, huge, MessagePart::text("x"))).is_none());
        assert!(apply_part(&run(), &part(huge, 0, MessagePart::text("x"))).is_none());

        let edge = apply_part(&run(), &part(0, MAX_PLACEHOLDER_GAP, MessagePart::text("x"))).unwrap();
        assert_eq!(edge.model_messages[0].parts.len(), MAX_PLACEHOLDER_GAP + 1);
    }

    #[test]
    fn test_stale_text_snapshot_is_ignored() {
        let run = apply_part(&run(), &part(0, 0, MessagePart::text("Hello world"))).unwrap();
        let run = apply_part(&run, &part(0, 0, MessagePart::text("Hello"))).unwrap();
        assert_eq!(run.model_messages[0].parts[0], MessagePart::text("Hello world"));

        let run = apply_part(&run, &part(0, 0, MessagePart::text("Hello world!"))).unwrap();
        assert_eq!(run.model_messages[0].parts[0], MessagePart::text("Hello world!"));
    }

    #[test]
    fn test_thinking_status_follows_last_part() {
        let thinking = MessagePart::Thinking {
            content: "hmm".to_string(),
            signature: None,
        };
        let run = apply_part(&run(), &part(0, 0, thinking)).unwrap();
        assert_eq!(run.status, RunStatus::Thinking);

        let run = apply_part(&run, &part(0, 1, MessagePart::text("Answer"))).unwrap();
        assert_eq!(run.status, RunStatus::InProgress);
    }

    #[test]
    fn test_tool_call_status_never_regresses() {
        let run = apply_part(&run(), &part(0, 0, tool_call("tc1"))).unwrap();
        let run = apply_tool_return(&run, &tool_return("tc1", false)).unwrap();
        assert_eq!(run.find_tool_call("tc1").unwrap().status, ToolCallStatus::Completed);

        // re-streamed in_progress snapshot keeps the completed status
        let run = apply_part(&run, &part(0, 0, tool_call("tc1"))).unwrap();
        let call = run.find_tool_call("tc1").unwrap();
        assert_eq!(call.status, ToolCallStatus::Completed);
        assert!(call.response.is_some());

        // second return is a no-op
        assert!(apply_tool_return(&run, &tool_return("tc1", true)).is_none());
    }

    #[test]
    fn test_tool_call_slot_keeps_identity() {
        let run = apply_part(&run(), &part(0, 0, tool_call("tc1"))).unwrap();
        let run = apply_part(&run, &part(0, 0, tool_call("other"))).unwrap();
        assert!(run.find_tool_call("tc1").is_some());
        assert!(run.find_tool_call("other").is_none());

        let run = apply_part(&run, &part(0, 0, MessagePart::text("oops"))).unwrap();
        assert!(run.find_tool_call("tc1").is_some());
    }

    #[test]
    fn test_tool_return_records_error_and_annotation_ids() {
        let run = apply_part(&run(), &part(0, 0, tool_call("tc1"))).unwrap();
        let mut event = tool_return("tc1", true);
        event.metadata.annotations = serde_json::from_value(json!([
            {"id": "ann-1", "action_type": "zotero_note", "proposed_data": {"content": "c"}}
        ]))
        .unwrap();

        let run = apply_tool_return(&run, &event).unwrap();
        let call = run.find_tool_call("tc1").unwrap();
        assert_eq!(call.status, ToolCallStatus::Error);
        assert_eq!(call.annotation_ids, vec!["ann-1".to_string()]);
    }

    #[test]
    fn test_progress_only_on_running_call() {
        let run = apply_part(&run(), &part(0, 0, tool_call("tc1"))).unwrap();
        let progress = ToolCallProgressEvent {
            run_id: "run-1".to_string(),
            tool_call_id: "tc1".to_string(),
            progress: "Reading page 3".to_string(),
        };
        let run = apply_tool_call_progress(&run, &progress).unwrap();
        assert_eq!(run.find_tool_call("tc1").unwrap().progress.as_deref(), Some("Reading page 3"));
        assert_eq!(run.find_tool_call("tc1").unwrap().status, ToolCallStatus::InProgress);

        let run = apply_tool_return(&run, &tool_return("tc1", false)).unwrap();
        assert!(apply_tool_call_progress(&run, &progress).is_none());
    }

    #[test]
    fn test_run_complete_tags_citations_and_actions() {
        let event: RunCompleteEvent = serde_json::from_value(json!({
            "run_id": "run-1",
            "usage": {"input_tokens": 10, "output_tokens": 5},
            "cost": 0.002,
            "citations": [
                {"citation_id": "c1", "library_id": 1, "zotero_key": "AAAA"},
                {"citation_id": "c1", "library_id": 1, "zotero_key": "AAAA"}
            ],
            "agent_actions": [
                {"id": "a1", "action_type": "zotero_note", "status": "pending",
                 "proposed_data": {"content": "summary"}}
            ]
        }))
        .unwrap();

        let run = apply_run_complete(&run(), &event).unwrap();
        assert_eq!(run.status, RunStatus::Completed);
        assert_eq!(run.usage.as_ref().map(|u| u.input_tokens), Some(10));
        assert_eq!(run.citations.len(), 1);
        assert_eq!(run.citations[0].run_id.as_deref(), Some("run-1"));
        assert_eq!(run.agent_actions.len(), 1);
        assert_eq!(run.agent_actions[0].status(), ActionStatus::Pending);
    }

    #[test]
    fn test_finalized_runs_are_untouched() {
        let mut canceled = apply_cancel(&run()).unwrap();
        assert_eq!(canceled.status, RunStatus::Canceled);
        assert!(canceled.completed_at.is_some());

        assert!(apply_part(&canceled, &part(0, 0, MessagePart::text("late"))).is_none());
        let complete = RunCompleteEvent {
            run_id: "run-1".to_string(),
            usage: None,
            cost: None,
            citations: vec![],
            agent_actions: vec![],
        };
        assert!(apply_run_complete(&canceled, &complete).is_none());
        assert!(finalize_on_done(&canceled, &DoneEvent { run_id: "run-1".to_string() }).is_none());
        assert!(reset_messages(&canceled).is_none());

        canceled.id = "someone-else".to_string();
        assert!(apply_cancel(&canceled).is_none());
    }

    #[test]
    fn test_mismatched_run_id_is_noop() {
        let mut event = part(0, 0, MessagePart::text("x"));
        event.run_id = "run-2".to_string();
        assert!(apply_part(&run(), &event).is_none());
    }

    #[test]
    fn test_done_fails_dangling_tool_calls() {
        let run = apply_part(&run(), &part(0, 0, tool_call("tc1"))).unwrap();
        let done = finalize_on_done(&run, &DoneEvent { run_id: "run-1".to_string() }).unwrap();
        assert_eq!(done.status, RunStatus::Completed);
        assert_eq!(done.find_tool_call("tc1").unwrap().status, ToolCallStatus::Error);
        assert!(done.completed_at.is_some());
    }

    #[test]
    fn test_done_keeps_error_status() {
        let error = ErrorEvent {
            run_id: Some("run-1".to_string()),
            error_type: ErrorType::ServerError,
            message: "boom".to_string(),
            is_retryable: true,
            is_resumable: true,
            details: None,
        };
        let failed = apply_error(&run(), &error).unwrap();
        assert_eq!(failed.status, RunStatus::Error);
        assert!(failed.error.as_ref().unwrap().is_resumable);

        let done = finalize_on_done(&failed, &DoneEvent { run_id: "run-1".to_string() }).unwrap();
        assert_eq!(done.status, RunStatus::Error);
    }

    #[test]
    fn test_retry_with_reset_clears_messages() {
        let run = apply_part(&run(), &part(0, 0, MessagePart::text("partial"))).unwrap();
        let mut retry = RetryEvent {
            run_id: "run-1".to_string(),
            attempt: 1,
            max_attempts: 3,
            reason: "overloaded".to_string(),
            wait_seconds: Some(2.0),
            reset: false,
        };

        let kept = apply_retry(&run, &retry).unwrap();
        assert_eq!(kept.model_messages.len(), 1);
        assert_eq!(kept.retry.as_ref().map(|r| r.attempt), Some(1));

        retry.reset = true;
        let reset = apply_retry(&run, &retry).unwrap();
        assert!(reset.model_messages.is_empty());

        // streaming again clears the retry banner
        let resumed = apply_part(&reset, &part(0, 0, MessagePart::text("again"))).unwrap();
        assert!(resumed.retry.is_none());
    }
}
