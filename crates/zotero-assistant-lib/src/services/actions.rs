// Proposed action reducer
// Normalizes backend payloads and merges them into the per-thread collection.

use std::collections::HashSet;

use crate::models::action::{ActionStatus, ProposedAction, RawAgentAction};

/// Convert raw payloads into typed actions owned by `run_id`.
/// Payloads that fail validation are logged and dropped.
pub fn normalize_actions(raw: &[RawAgentAction], run_id: &str) -> Vec<ProposedAction> {
    raw.iter()
        .cloned()
        .filter_map(|action| {
            let id = action.id.clone();
            match action.into_action(run_id) {
                Ok(action) => Some(action),
                Err(e) => {
                    log::warn!("Dropping agent action {} of run {}: {}", id, run_id, e);
                    None
                }
            }
        })
        .collect()
}

/// Merge one incoming record into an existing record of the same id.
///
/// Local status wins once the user has acted on it (anything but pending);
/// a pending local record adopts a non-pending remote state. The proposed
/// payload with more positional detail wins, ties go to the incoming one.
pub fn merge_action(local: &mut ProposedAction, incoming: &ProposedAction) -> bool {
    let mut changed = false;

    if local.status() == ActionStatus::Pending && incoming.status() != ActionStatus::Pending {
        local.adopt_state(incoming);
        changed = true;
    }

    if incoming.proposed_data != local.proposed_data
        && incoming.proposed_data.action_type() == local.action_type
        && incoming.proposed_data.specificity() >= local.proposed_data.specificity()
    {
        local.proposed_data = incoming.proposed_data.clone();
        changed = true;
    }

    if local.message_id.is_none() && incoming.message_id.is_some() {
        local.message_id = incoming.message_id.clone();
        changed = true;
    }
    if local.toolcall_id.is_none() && incoming.toolcall_id.is_some() {
        local.toolcall_id = incoming.toolcall_id.clone();
        changed = true;
    }

    changed
}

/// Merge incoming records into the collection, appending unknown ids.
/// Returns the ids that were added or changed.
pub fn merge_actions(collection: &mut Vec<ProposedAction>, incoming: Vec<ProposedAction>) -> Vec<String> {
    let mut touched = Vec::new();

    for action in incoming {
        match collection.iter_mut().find(|a| a.id == action.id) {
            Some(local) => {
                if merge_action(local, &action) {
                    touched.push(action.id.clone());
                }
            }
            None => {
                touched.push(action.id.clone());
                collection.push(action);
            }
        }
    }

    touched
}

/// Drop every action belonging to the given runs
pub fn remove_actions_for_runs(collection: &mut Vec<ProposedAction>, run_ids: &[String]) -> usize {
    let run_ids: HashSet<&str> = run_ids.iter().map(String::as_str).collect();
    let before = collection.len();
    collection.retain(|a| !run_ids.contains(a.run_id.as_str()));
    before - collection.len()
}

/// Annotation actions of the given runs that exist in the user's library
pub fn applied_annotations_for_runs<'a>(
    collection: &'a [ProposedAction],
    run_ids: &[String],
) -> Vec<&'a ProposedAction> {
    collection
        .iter()
        .filter(|a| run_ids.iter().any(|id| id == &a.run_id))
        .filter(|a| a.is_annotation() && a.status() == ActionStatus::Applied)
        .collect()
}

/// Pending actions of one run (or of every run when `run_id` is None)
pub fn pending_actions<'a>(collection: &'a [ProposedAction], run_id: Option<&str>) -> Vec<&'a ProposedAction> {
    collection
        .iter()
        .filter(|a| a.status() == ActionStatus::Pending)
        .filter(|a| run_id.map_or(true, |id| a.run_id == id))
        .collect()
}
