//! Shutdown and startup passes over queue state.
//!
//! A transfer never survives a restart, so whatever was running or waiting
//! when the process went away is moved to the queue's interrupted status:
//! `failed` for uploads (the file handle is gone), `paused` for downloads.

use tracing::{info, warn};
use super::store::TaskStore;
use super::types::{QueuePolicy, QueueSnapshot, TaskId, TaskStatus};

/// Move every pending and active task to the interrupted status.
pub fn interrupt(store: &mut TaskStore) -> Vec<TaskId> {
    let ids = store.interrupt();
    if !ids.is_empty() {
        info!(queue = %store.policy().kind, interrupted = ids.len(), "queue interrupted");
    }
    ids
}

/// Clean a freshly loaded snapshot.
///
/// Tasks persisted in the active status are stale and become interrupted; the
/// persisted active pointer is dropped. Pending tasks are left for promotion.
pub fn reconcile(policy: &QueuePolicy, mut snapshot: QueueSnapshot) -> (QueueSnapshot, Vec<TaskId>) {
    let mut interrupted = Vec::new();

    for task in snapshot.tasks.iter_mut() {
        if !policy.allows(task.status) {
            warn!(id = %task.id, status = %task.status, "dropping status foreign to this queue");
            task.error = Some(format!("unexpected status {}", task.status));
            task.status = TaskStatus::Failed;
            continue;
        }

        if task.status != policy.active {
            continue;
        }

        task.status = policy.interrupted;
        task.error = match policy.interrupted {
            TaskStatus::Failed => policy.interrupt_reason.map(str::to_string),
            _ => None,
        };
        interrupted.push(task.id.clone());
    }

    snapshot.active_id = None;

    if !interrupted.is_empty() {
        info!(queue = %policy.kind, interrupted = interrupted.len(), "reconciled stale transfers");
    }
    (snapshot, interrupted)
}
