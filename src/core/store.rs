use tracing::{debug, info};
use super::errors::{Result, TransferError};
use super::guard;
use super::progress::{self, ProgressUpdate};
use super::task::TransferTask;
use super::types::{
    BatchOutcome,
    QueueEvent,
    QueuePolicy,
    QueueSnapshot,
    StatusCounts,
    TaskId,
    TaskStatus,
};

/// A task that was just promoted and whose transfer must be started
#[derive(Debug, Clone, PartialEq)]
pub struct Activation {
    pub id: TaskId,
    pub attempt: u32,
    pub task: TransferTask,
}

/// Task list and active pointer of one queue
///
/// Every operation runs to completion synchronously and ends by promoting the
/// first pending task if nothing is active, so no caller ever observes an
/// idle queue with pending work. Events and activations produced along the
/// way are buffered until the owner drains them.
#[derive(Debug)]
pub struct TaskStore {
    policy: QueuePolicy,
    tasks: Vec<TransferTask>,
    active_id: Option<TaskId>,
    events: Vec<QueueEvent>,
    activations: Vec<Activation>,
    /// Activation that has received real progress; ticks leave it alone
    reported: Option<(TaskId, u32)>,
}

impl TaskStore {
    pub fn new(policy: QueuePolicy) -> Self {
        Self {
            policy,
            tasks: Vec::new(),
            active_id: None,
            events: Vec::new(),
            activations: Vec::new(),
            reported: None,
        }
    }

    /// Rebuild a store from persisted state.
    ///
    /// Tasks that were active when the snapshot was taken have no live
    /// transfer any more; they are reconciled first and their ids returned.
    pub fn from_snapshot(policy: QueuePolicy, snapshot: QueueSnapshot) -> (Self, Vec<TaskId>) {
        let (snapshot, interrupted) = guard::reconcile(&policy, snapshot);

        let mut store = Self::new(policy);
        store.tasks = snapshot.tasks;
        store.schedule();

        (store, interrupted)
    }

    pub fn policy(&self) -> &QueuePolicy {
        &self.policy
    }

    /// Tasks in scheduling (list) order
    pub fn tasks(&self) -> &[TransferTask] {
        &self.tasks
    }

    /// Tasks in presentation order, newest first
    pub fn tasks_newest_first(&self) -> Vec<&TransferTask> {
        let mut tasks: Vec<_> = self.tasks.iter().collect();
        tasks.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        tasks
    }

    pub fn get(&self, id: &TaskId) -> Option<&TransferTask> {
        self.tasks.iter().find(|task| &task.id == id)
    }

    pub fn active_id(&self) -> Option<&TaskId> {
        self.active_id.as_ref()
    }

    pub fn counts(&self) -> StatusCounts {
        let mut counts = StatusCounts::default();
        for task in &self.tasks {
            counts.record(task.status);
        }
        counts
    }

    pub fn snapshot(&self) -> QueueSnapshot {
        QueueSnapshot {
            tasks: self.tasks.clone(),
            active_id: self.active_id.clone(),
        }
    }

    pub fn drain_events(&mut self) -> Vec<QueueEvent> {
        std::mem::take(&mut self.events)
    }

    pub fn drain_activations(&mut self) -> Vec<Activation> {
        std::mem::take(&mut self.activations)
    }

    /// Append tasks as pending and start the first one if the queue is idle.
    pub fn enqueue(&mut self, tasks: Vec<TransferTask>) -> Vec<TaskId> {
        let mut ids = Vec::with_capacity(tasks.len());

        for mut task in tasks {
            task.status = TaskStatus::Pending;
            task.progress = 0;
            task.elapsed_seconds = 0;
            task.error = None;
            task.attempt = 0;

            ids.push(task.id.clone());
            self.events.push(QueueEvent::TaskAdded { id: task.id.clone() });
            self.tasks.push(task);
        }

        info!(queue = %self.policy.kind, added = ids.len(), "tasks enqueued");
        self.schedule();
        ids
    }

    /// Promote the first pending task in list order if nothing is active.
    pub fn promote_next(&mut self) -> Option<Activation> {
        if self.active_id.is_some() {
            return None;
        }

        let index = self.tasks.iter().position(|task| task.status == TaskStatus::Pending)?;
        let active = self.policy.active;

        let task = &mut self.tasks[index];
        task.status = active;
        task.progress = 0;
        task.elapsed_seconds = 0;
        task.error = None;
        task.attempt += 1;

        let activation = Activation {
            id: task.id.clone(),
            attempt: task.attempt,
            task: task.clone(),
        };

        info!(queue = %self.policy.kind, id = %activation.id, attempt = activation.attempt, "task activated");
        self.active_id = Some(activation.id.clone());
        self.events.push(QueueEvent::StateChanged {
            id: activation.id.clone(),
            from: TaskStatus::Pending,
            to: active,
            error: None,
        });
        self.activations.push(activation.clone());

        Some(activation)
    }

    /// Set the progress of the active task. Unknown or inactive tasks are ignored.
    pub fn update_progress(&mut self, id: &TaskId, percent: u8) -> bool {
        let attempt = match self.get(id) {
            Some(task) => task.attempt,
            None => return false,
        };
        self.apply_progress(id, attempt, percent)
    }

    /// Progress reported by a transport; dropped if it belongs to an earlier
    /// activation of the task.
    ///
    /// Once an activation has reported, estimation ticks no longer touch it.
    pub fn report_progress(&mut self, update: &ProgressUpdate) -> bool {
        let active = self.policy.active;
        let current = self
            .get(&update.id)
            .is_some_and(|task| task.status == active && task.attempt == update.attempt);
        if current {
            self.reported = Some((update.id.clone(), update.attempt));
        }

        self.apply_progress(&update.id, update.attempt, update.percent)
    }

    fn apply_progress(&mut self, id: &TaskId, attempt: u32, percent: u8) -> bool {
        let active = self.policy.active;
        let task = match self.tasks.iter_mut().find(|task| &task.id == id) {
            Some(task) if task.status == active && task.attempt == attempt => task,
            _ => {
                debug!(%id, attempt, "ignoring progress for inactive task");
                return false;
            }
        };

        let percent = percent.min(100);
        if percent <= task.progress {
            return false;
        }

        task.progress = percent;
        self.events.push(QueueEvent::Progress { id: id.clone(), progress: percent });
        true
    }

    /// Change the status of a task.
    ///
    /// Returns `Ok(false)` when the task no longer exists. Moving a task into
    /// the active status is reserved to promotion.
    pub fn update_status(&mut self, id: &TaskId, status: TaskStatus, error: Option<String>) -> Result<bool> {
        let index = match self.position(id) {
            Some(index) => index,
            None => return Ok(false),
        };

        let from = self.tasks[index].status;
        if !self.policy.allows(status) || (status == self.policy.active && from != status) {
            return Err(TransferError::InvalidTransition {
                id: id.clone(),
                from,
                action: "update",
            });
        }

        self.set_status(index, status, error);
        self.schedule();
        Ok(true)
    }

    /// Record the settlement of a transfer.
    pub fn settle(&mut self, id: &TaskId, attempt: u32, outcome: std::result::Result<(), String>) -> bool {
        let index = match self.position(id) {
            Some(index) => index,
            None => {
                debug!(%id, "ignoring settlement for removed task");
                return false;
            }
        };

        let task = &self.tasks[index];
        if task.status != self.policy.active || task.attempt != attempt {
            debug!(%id, attempt, status = %task.status, "ignoring stale settlement");
            return false;
        }

        match outcome {
            Ok(()) => self.set_status(index, self.policy.success, None),
            Err(reason) => self.set_status(index, TaskStatus::Failed, Some(reason)),
        }
        self.schedule();
        true
    }

    /// Delete a task. Removing an unknown id does nothing.
    pub fn remove_task(&mut self, id: &TaskId) -> bool {
        let index = match self.position(id) {
            Some(index) => index,
            None => return false,
        };

        self.tasks.remove(index);
        self.release_active(id);
        self.events.push(QueueEvent::TaskRemoved { id: id.clone() });
        self.schedule();
        true
    }

    /// Remove every task with `status`, or every task when `status` is `None`.
    pub fn clear_by_status(&mut self, status: Option<TaskStatus>) -> usize {
        match status {
            Some(status) => self.clear_matching(|task| task.status == status),
            None => self.clear_matching(|_| true),
        }
    }

    /// Remove every task whose status is in `statuses`.
    pub fn clear_by_statuses(&mut self, statuses: &[TaskStatus]) -> usize {
        self.clear_matching(|task| statuses.contains(&task.status))
    }

    fn clear_matching<F>(&mut self, predicate: F) -> usize
    where
        F: Fn(&TransferTask) -> bool,
    {
        let before = self.tasks.len();
        self.tasks.retain(|task| !predicate(task));
        let removed = before - self.tasks.len();

        if let Some(active_id) = self.active_id.clone() {
            if self.position(&active_id).is_none() {
                self.active_id = None;
            }
        }

        if removed > 0 {
            info!(queue = %self.policy.kind, removed, "tasks cleared");
            self.events.push(QueueEvent::Cleared { removed });
        }
        self.schedule();
        removed
    }

    /// Pause a pending or active task.
    pub fn pause(&mut self, id: &TaskId) -> Result<()> {
        self.ensure_pausable()?;
        let index = self.position(id).ok_or_else(|| TransferError::TaskNotFound(id.clone()))?;

        let from = self.tasks[index].status;
        if from != TaskStatus::Pending && from != self.policy.active {
            return Err(TransferError::InvalidTransition { id: id.clone(), from, action: "pause" });
        }

        self.set_status(index, TaskStatus::Paused, None);
        self.schedule();
        Ok(())
    }

    /// Put a paused task back in the queue and start it if the queue is idle.
    pub fn resume(&mut self, id: &TaskId) -> Result<()> {
        self.ensure_pausable()?;
        let index = self.position(id).ok_or_else(|| TransferError::TaskNotFound(id.clone()))?;

        let from = self.tasks[index].status;
        if from != TaskStatus::Paused {
            return Err(TransferError::InvalidTransition { id: id.clone(), from, action: "resume" });
        }

        self.set_status(index, TaskStatus::Pending, None);
        self.schedule();
        Ok(())
    }

    pub fn pause_by_ids(&mut self, ids: &[TaskId]) -> Result<BatchOutcome> {
        self.ensure_pausable()?;
        let active = self.policy.active;
        let outcome = self.classify(ids, |status| status == TaskStatus::Pending || status == active);

        for id in &outcome.applied {
            if let Some(index) = self.position(id) {
                self.set_status(index, TaskStatus::Paused, None);
            }
        }
        self.schedule();
        Ok(outcome)
    }

    /// Resume several paused tasks at once.
    pub fn resume_by_ids(&mut self, ids: &[TaskId]) -> Result<BatchOutcome> {
        let outcome = self.resumable(ids)?;

        for id in &outcome.applied {
            if let Some(index) = self.position(id) {
                self.set_status(index, TaskStatus::Pending, None);
            }
        }
        self.schedule();
        Ok(outcome)
    }

    /// Which of `ids` could be resumed right now, without changing anything.
    pub fn resumable(&self, ids: &[TaskId]) -> Result<BatchOutcome> {
        self.ensure_pausable()?;
        Ok(self.classify(ids, |status| status == TaskStatus::Paused))
    }

    /// Pause every pending and active task.
    pub fn pause_all(&mut self) -> Result<usize> {
        let ids = self.ids_where(|task, policy| task.status == TaskStatus::Pending || task.status == policy.active);
        Ok(self.pause_by_ids(&ids)?.applied.len())
    }

    pub fn paused_ids(&self) -> Vec<TaskId> {
        self.ids_where(|task, _| task.status == TaskStatus::Paused)
    }

    /// Advance the estimate of the active task by one tick.
    pub fn tick(&mut self, rate_per_second: u64) -> bool {
        let active_id = match &self.active_id {
            Some(id) => id.clone(),
            None => return false,
        };

        let kind = self.policy.kind;
        let active = self.policy.active;
        let task = match self.tasks.iter_mut().find(|task| task.id == active_id) {
            Some(task) if task.status == active => task,
            _ => return false,
        };

        if self.reported.as_ref().is_some_and(|(id, attempt)| *id == task.id && *attempt == task.attempt) {
            return false;
        }

        task.elapsed_seconds += 1;
        let estimated = progress::estimate(
            task.size_in_bytes,
            task.elapsed_seconds,
            rate_per_second,
            task.progress as f64,
            kind,
        );

        let estimated = estimated.floor() as u8;
        if estimated <= task.progress {
            return false;
        }

        task.progress = estimated;
        debug!(id = %task.id, progress = estimated, "estimated progress");
        self.events.push(QueueEvent::Progress { id: active_id, progress: estimated });
        true
    }

    /// Force every pending and active task into the policy's interrupted
    /// status. Nothing is promoted afterwards.
    pub(crate) fn interrupt(&mut self) -> Vec<TaskId> {
        let interrupted = self.policy.interrupted;
        let reason = self.policy.interrupt_reason.map(str::to_string);
        let ids = self.ids_where(|task, policy| task.status == TaskStatus::Pending || task.status == policy.active);

        for id in &ids {
            if let Some(index) = self.position(id) {
                self.set_status(index, interrupted, reason.clone());
            }
        }
        self.active_id = None;
        ids
    }

    fn schedule(&mut self) {
        if self.active_id.is_none() {
            self.promote_next();
        }
    }

    fn set_status(&mut self, index: usize, status: TaskStatus, error: Option<String>) {
        let success = self.policy.success;
        let active = self.policy.active;

        let task = &mut self.tasks[index];
        let from = task.status;

        task.status = status;
        task.error = match status {
            TaskStatus::Failed => error,
            _ => None,
        };

        if status == success {
            task.progress = 100;
            task.elapsed_seconds = 0;
        } else if status == TaskStatus::Pending {
            task.progress = 0;
            task.elapsed_seconds = 0;
        }

        let id = task.id.clone();
        let error = task.error.clone();

        if from == active && status != active {
            self.release_active(&id);
        }

        self.events.push(QueueEvent::StateChanged { id, from, to: status, error });
    }

    fn release_active(&mut self, id: &TaskId) {
        if self.active_id.as_ref() == Some(id) {
            self.active_id = None;
        }
    }

    fn position(&self, id: &TaskId) -> Option<usize> {
        self.tasks.iter().position(|task| &task.id == id)
    }

    fn ensure_pausable(&self) -> Result<()> {
        if self.policy.supports_pause {
            Ok(())
        } else {
            Err(TransferError::Unsupported("pause and resume are only available for downloads"))
        }
    }

    fn ids_where<F>(&self, predicate: F) -> Vec<TaskId>
    where
        F: Fn(&TransferTask, &QueuePolicy) -> bool,
    {
        self.tasks
            .iter()
            .filter(|task| predicate(task, &self.policy))
            .map(|task| task.id.clone())
            .collect()
    }

    fn classify<F>(&self, ids: &[TaskId], accepts: F) -> BatchOutcome
    where
        F: Fn(TaskStatus) -> bool,
    {
        let mut outcome = BatchOutcome::default();
        for id in ids {
            match self.get(id) {
                Some(task) if accepts(task.status) => outcome.applied.push(id.clone()),
                Some(_) => outcome.skipped.push(id.clone()),
                None => outcome.missing.push(id.clone()),
            }
        }
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};
    use proptest::prelude::*;
    use crate::core::task::{FileKind, RemoteFile};

    const MB: u64 = 1024 * 1024;

    fn upload(name: &str, size: u64) -> TransferTask {
        TransferTask::upload(format!("/tmp/{name}"), "/", size, Utc::now())
    }

    fn download(name: &str) -> TransferTask {
        let file = RemoteFile { name: name.to_string(), size: 4 * MB, kind: FileKind::Document };
        TransferTask::download(name, file, Utc::now())
    }

    fn status_of(store: &TaskStore, id: &TaskId) -> TaskStatus {
        store.get(id).unwrap().status
    }

    fn activation_order(events: &[QueueEvent], active: TaskStatus) -> Vec<TaskId> {
        events
            .iter()
            .filter_map(|event| match event {
                QueueEvent::StateChanged { id, to, .. } if *to == active => Some(id.clone()),
                _ => None,
            })
            .collect()
    }

    fn assert_invariants(store: &TaskStore) {
        let active = store.policy().active;
        let running: Vec<_> = store.tasks().iter().filter(|t| t.status == active).collect();
        assert!(running.len() <= 1, "more than one active task");

        match store.active_id() {
            Some(id) => assert_eq!(store.get(id).map(|t| t.status), Some(active)),
            None => assert!(running.is_empty(), "active task without pointer"),
        }

        let has_pending = store.tasks().iter().any(|t| t.status == TaskStatus::Pending);
        if has_pending {
            assert!(store.active_id().is_some(), "pending tasks starve");
        }
    }

    #[test]
    fn test_enqueue_activates_first_task() {
        let mut store = TaskStore::new(QueuePolicy::UPLOAD);
        let ids = store.enqueue(vec![upload("a", 1), upload("b", 1)]);

        assert_eq!(store.active_id(), Some(&ids[0]));
        assert_eq!(status_of(&store, &ids[0]), TaskStatus::Uploading);
        assert_eq!(status_of(&store, &ids[1]), TaskStatus::Pending);

        let activations = store.drain_activations();
        assert_eq!(activations.len(), 1);
        assert_eq!(activations[0].id, ids[0]);
        assert_eq!(activations[0].attempt, 1);
    }

    #[test]
    fn test_fifo_activation_order() {
        let mut store = TaskStore::new(QueuePolicy::UPLOAD);
        let ids = store.enqueue(vec![upload("a", 1), upload("b", 1), upload("c", 1)]);

        for id in &ids {
            store.update_progress(id, 40);
            let attempt = store.get(id).unwrap().attempt;
            assert!(store.settle(id, attempt, Ok(())));
        }

        let events = store.drain_events();
        assert_eq!(activation_order(&events, TaskStatus::Uploading), ids);
        assert!(store.active_id().is_none());
        assert!(store.tasks().iter().all(|t| t.status == TaskStatus::Success && t.progress == 100));
    }

    #[test]
    fn test_all_failing_uploads() {
        let mut store = TaskStore::new(QueuePolicy::UPLOAD);
        let ids = store.enqueue(vec![upload("1", MB), upload("2", 2 * MB), upload("3", 3 * MB)]);

        let mut order = Vec::new();
        while let Some(activation) = store.drain_activations().pop() {
            order.push(activation.id.clone());
            store.settle(&activation.id, activation.attempt, Err("network error".into()));
        }

        assert_eq!(order, ids);
        assert!(store.active_id().is_none());
        for id in &ids {
            let task = store.get(id).unwrap();
            assert_eq!(task.status, TaskStatus::Failed);
            assert_eq!(task.error.as_deref(), Some("network error"));
        }
    }

    #[test]
    fn test_terminal_status_promotes_next_in_same_step() {
        let mut store = TaskStore::new(QueuePolicy::DOWNLOAD);
        let ids = store.enqueue(vec![download("a"), download("b")]);
        store.drain_events();

        store.update_status(&ids[0], TaskStatus::Downloaded, None).unwrap();

        assert_eq!(store.active_id(), Some(&ids[1]));
        assert_eq!(status_of(&store, &ids[1]), TaskStatus::Downloading);
        let events = store.drain_events();
        assert_eq!(events.len(), 2);
    }

    #[test]
    fn test_update_status_rejects_direct_activation() {
        let mut store = TaskStore::new(QueuePolicy::UPLOAD);
        let ids = store.enqueue(vec![upload("a", 1), upload("b", 1)]);

        let err = store.update_status(&ids[1], TaskStatus::Uploading, None).unwrap_err();
        assert!(matches!(err, TransferError::InvalidTransition { .. }));
        assert!(store.update_status(&ids[1], TaskStatus::Paused, None).is_err());
        assert_eq!(store.update_status(&TaskId::from("gone"), TaskStatus::Failed, None).unwrap(), false);
    }

    #[test]
    fn test_progress_ignored_for_inactive_and_stale() {
        let mut store = TaskStore::new(QueuePolicy::DOWNLOAD);
        let ids = store.enqueue(vec![download("a"), download("b")]);

        assert!(!store.update_progress(&ids[1], 10));
        assert!(!store.update_progress(&TaskId::from("missing"), 10));

        assert!(store.update_progress(&ids[0], 30));
        assert!(!store.update_progress(&ids[0], 20));
        assert_eq!(store.get(&ids[0]).unwrap().progress, 30);

        let stale = ProgressUpdate { id: ids[0].clone(), attempt: 0, percent: 90 };
        assert!(!store.report_progress(&stale));
    }

    #[test]
    fn test_remove_is_idempotent() {
        let mut store = TaskStore::new(QueuePolicy::UPLOAD);
        let ids = store.enqueue(vec![upload("a", 1), upload("b", 1)]);

        assert!(store.remove_task(&ids[0]));
        assert_eq!(store.active_id(), Some(&ids[1]));

        let before = store.snapshot();
        assert!(!store.remove_task(&ids[0]));
        assert!(!store.remove_task(&TaskId::from("never")));
        assert_eq!(store.snapshot(), before);
    }

    #[test]
    fn test_late_settlement_after_removal_is_noop() {
        let mut store = TaskStore::new(QueuePolicy::UPLOAD);
        let ids = store.enqueue(vec![upload("a", 1), upload("b", 1)]);
        store.remove_task(&ids[0]);

        assert!(!store.settle(&ids[0], 1, Ok(())));
        assert_eq!(store.active_id(), Some(&ids[1]));
        assert_eq!(status_of(&store, &ids[1]), TaskStatus::Uploading);
    }

    #[test]
    fn test_clear_failed_promotes_pending() {
        let mut store = TaskStore::new(QueuePolicy::UPLOAD);
        let ids = store.enqueue(vec![upload("a", 1), upload("b", 1)]);
        store.settle(&ids[0], 1, Err("x".into()));
        store.settle(&ids[1], 1, Err("y".into()));

        // pending task left without an active one, as in a hand-edited state file
        let mut snapshot = store.snapshot();
        let mut pending = upload("c", 1);
        pending.status = TaskStatus::Pending;
        snapshot.tasks.push(pending.clone());
        let mut raw = TaskStore::new(QueuePolicy::UPLOAD);
        raw.tasks = snapshot.tasks;

        assert_eq!(raw.clear_by_status(Some(TaskStatus::Failed)), 2);
        assert_eq!(raw.tasks().len(), 1);
        assert_eq!(raw.active_id(), Some(&pending.id));
        assert_eq!(status_of(&raw, &pending.id), TaskStatus::Uploading);
    }

    #[test]
    fn test_clear_all_resets_pointer() {
        let mut store = TaskStore::new(QueuePolicy::DOWNLOAD);
        store.enqueue(vec![download("a"), download("b")]);

        assert_eq!(store.clear_by_status(None), 2);
        assert!(store.active_id().is_none());
        assert!(store.tasks().is_empty());
    }

    #[test]
    fn test_clear_active_status_promotes_next() {
        let mut store = TaskStore::new(QueuePolicy::DOWNLOAD);
        let ids = store.enqueue(vec![download("a"), download("b")]);

        assert_eq!(store.clear_by_status(Some(TaskStatus::Downloading)), 1);
        assert_eq!(store.active_id(), Some(&ids[1]));
    }

    #[test]
    fn test_clear_in_progress_group() {
        let mut store = TaskStore::new(QueuePolicy::DOWNLOAD);
        let ids = store.enqueue(vec![download("a"), download("b"), download("c"), download("d")]);
        store.pause(&ids[1]).unwrap();
        store.update_status(&ids[0], TaskStatus::Downloaded, None).unwrap();

        let removed = store.clear_by_statuses(&[TaskStatus::Downloading, TaskStatus::Pending, TaskStatus::Paused]);
        assert_eq!(removed, 3);
        assert_eq!(store.tasks().len(), 1);
        assert!(store.active_id().is_none());
    }

    #[test]
    fn test_pause_active_download_promotes_next() {
        let mut store = TaskStore::new(QueuePolicy::DOWNLOAD);
        let ids = store.enqueue(vec![download("a"), download("b")]);
        store.drain_events();

        store.pause(&ids[0]).unwrap();

        assert_eq!(status_of(&store, &ids[0]), TaskStatus::Paused);
        assert_eq!(store.active_id(), Some(&ids[1]));
        assert_eq!(status_of(&store, &ids[1]), TaskStatus::Downloading);
        assert_eq!(store.drain_events().len(), 2);
    }

    #[test]
    fn test_resume_waits_for_active_task() {
        let mut store = TaskStore::new(QueuePolicy::DOWNLOAD);
        let ids = store.enqueue(vec![download("a"), download("b")]);
        store.pause(&ids[0]).unwrap();
        store.update_progress(&ids[1], 50);

        store.resume(&ids[0]).unwrap();
        assert_eq!(status_of(&store, &ids[0]), TaskStatus::Pending);
        assert_eq!(store.active_id(), Some(&ids[1]));

        store.settle(&ids[1], 1, Ok(()));
        assert_eq!(store.active_id(), Some(&ids[0]));
        let task = store.get(&ids[0]).unwrap();
        assert_eq!(task.progress, 0);
        assert_eq!(task.attempt, 2);
    }

    #[test]
    fn test_stale_settlement_after_pause_and_resume() {
        let mut store = TaskStore::new(QueuePolicy::DOWNLOAD);
        let ids = store.enqueue(vec![download("a")]);
        store.pause(&ids[0]).unwrap();
        store.resume(&ids[0]).unwrap();
        assert_eq!(store.get(&ids[0]).unwrap().attempt, 2);

        // the first request finishing late must not complete the new attempt
        assert!(!store.settle(&ids[0], 1, Ok(())));
        assert_eq!(status_of(&store, &ids[0]), TaskStatus::Downloading);
        assert!(store.settle(&ids[0], 2, Ok(())));
        assert_eq!(status_of(&store, &ids[0]), TaskStatus::Downloaded);
    }

    #[test]
    fn test_pause_rejections() {
        let mut uploads = TaskStore::new(QueuePolicy::UPLOAD);
        let ids = uploads.enqueue(vec![upload("a", 1)]);
        assert!(matches!(uploads.pause(&ids[0]), Err(TransferError::Unsupported(_))));

        let mut downloads = TaskStore::new(QueuePolicy::DOWNLOAD);
        let ids = downloads.enqueue(vec![download("a")]);
        downloads.settle(&ids[0], 1, Ok(()));
        assert!(matches!(downloads.pause(&ids[0]), Err(TransferError::InvalidTransition { .. })));
        assert!(matches!(downloads.resume(&ids[0]), Err(TransferError::InvalidTransition { .. })));
        assert!(matches!(downloads.pause(&TaskId::from("x")), Err(TransferError::TaskNotFound(_))));
    }

    #[test]
    fn test_pause_and_resume_by_ids() {
        let mut store = TaskStore::new(QueuePolicy::DOWNLOAD);
        let ids = store.enqueue(vec![download("a"), download("b"), download("c")]);
        store.settle(&ids[0], 1, Ok(()));

        let missing = TaskId::from("missing");
        let outcome = store.pause_by_ids(&[ids[0].clone(), ids[1].clone(), ids[2].clone(), missing.clone()]).unwrap();
        assert_eq!(outcome.applied, vec![ids[1].clone(), ids[2].clone()]);
        assert_eq!(outcome.skipped, vec![ids[0].clone()]);
        assert_eq!(outcome.missing, vec![missing]);
        assert!(store.active_id().is_none());

        let outcome = store.resume_by_ids(&ids).unwrap();
        assert_eq!(outcome.applied.len(), 2);
        assert_eq!(store.active_id(), Some(&ids[1]));
        assert_eq!(status_of(&store, &ids[2]), TaskStatus::Pending);
    }

    #[test]
    fn test_pause_all() {
        let mut store = TaskStore::new(QueuePolicy::DOWNLOAD);
        store.enqueue(vec![download("a"), download("b"), download("c")]);

        assert_eq!(store.pause_all().unwrap(), 3);
        assert!(store.active_id().is_none());
        assert_eq!(store.paused_ids().len(), 3);
        assert_eq!(store.counts().paused, 3);
    }

    #[test]
    fn test_tick_only_moves_active_task() {
        let mut store = TaskStore::new(QueuePolicy::DOWNLOAD);
        let ids = store.enqueue(vec![download("a"), download("b")]);

        let mut last = 0;
        for _ in 0..30 {
            store.tick(2 * MB);
            let progress = store.get(&ids[0]).unwrap().progress;
            assert!(progress >= last);
            assert!(progress < 100);
            last = progress;
        }
        assert!(last > 0);
        assert_eq!(store.get(&ids[1]).unwrap().progress, 0);
        assert_eq!(store.get(&ids[0]).unwrap().elapsed_seconds, 30);
    }

    #[test]
    fn test_tick_yields_to_reported_progress() {
        let mut store = TaskStore::new(QueuePolicy::DOWNLOAD);
        let ids = store.enqueue(vec![download("a")]);
        let report = |percent| ProgressUpdate { id: ids[0].clone(), attempt: 1, percent };

        assert!(store.report_progress(&report(10)));
        for _ in 0..10 {
            assert!(!store.tick(2 * MB));
        }
        assert_eq!(store.get(&ids[0]).unwrap().progress, 10);

        assert!(store.report_progress(&report(20)));
        assert!(!store.tick(2 * MB));
        assert_eq!(store.get(&ids[0]).unwrap().progress, 20);

        // a new activation starts estimating again until it reports
        store.pause(&ids[0]).unwrap();
        store.resume(&ids[0]).unwrap();
        assert_eq!(store.get(&ids[0]).unwrap().attempt, 2);
        assert!(store.tick(2 * MB));
    }

    #[test]
    fn test_tick_is_noop_for_uploads() {
        let mut store = TaskStore::new(QueuePolicy::UPLOAD);
        let ids = store.enqueue(vec![upload("a", MB)]);
        assert!(!store.tick(MB));
        assert_eq!(store.get(&ids[0]).unwrap().elapsed_seconds, 1);
    }

    #[test]
    fn test_newest_first_ordering() {
        let mut store = TaskStore::new(QueuePolicy::UPLOAD);
        let base = Utc.with_ymd_and_hms(2025, 5, 1, 12, 0, 0).unwrap();
        let older = TransferTask::upload("/a", "/", 1, base);
        let newer = TransferTask::upload("/b", "/", 1, base + Duration::seconds(5));
        store.enqueue(vec![older.clone(), newer.clone()]);

        let names: Vec<_> = store.tasks_newest_first().iter().map(|t| t.name.clone()).collect();
        assert_eq!(names, vec!["b", "a"]);
        assert_eq!(store.tasks()[0].id, older.id);
    }

    #[test]
    fn test_from_snapshot_promotes_pending_after_reconcile() {
        let mut running = download("a");
        running.status = TaskStatus::Downloading;
        running.attempt = 1;
        let waiting = download("b");
        let snapshot = QueueSnapshot {
            active_id: Some(running.id.clone()),
            tasks: vec![running.clone(), waiting.clone()],
        };

        let (mut store, interrupted) = TaskStore::from_snapshot(QueuePolicy::DOWNLOAD, snapshot);
        assert_eq!(interrupted, vec![running.id.clone()]);
        assert_eq!(status_of(&store, &running.id), TaskStatus::Paused);
        assert_eq!(store.active_id(), Some(&waiting.id));
        assert_eq!(store.drain_activations().len(), 1);
    }

    #[derive(Debug, Clone)]
    enum Op {
        Enqueue(u8),
        Progress(usize, u8),
        Settle(usize, bool),
        Remove(usize),
        Clear(Option<TaskStatus>),
        Pause(usize),
        Resume(usize),
        Bulk(bool),
        Tick,
        Interrupt,
    }

    fn arb_status() -> impl Strategy<Value = Option<TaskStatus>> {
        prop_oneof![
            Just(None),
            Just(Some(TaskStatus::Pending)),
            Just(Some(TaskStatus::Downloading)),
            Just(Some(TaskStatus::Paused)),
            Just(Some(TaskStatus::Downloaded)),
            Just(Some(TaskStatus::Failed)),
        ]
    }

    fn arb_op() -> impl Strategy<Value = Op> {
        prop_oneof![
            (1u8..4).prop_map(Op::Enqueue),
            (0usize..8, 0u8..=100).prop_map(|(i, p)| Op::Progress(i, p)),
            (0usize..8, any::<bool>()).prop_map(|(i, ok)| Op::Settle(i, ok)),
            (0usize..8).prop_map(Op::Remove),
            arb_status().prop_map(Op::Clear),
            (0usize..8).prop_map(Op::Pause),
            (0usize..8).prop_map(Op::Resume),
            any::<bool>().prop_map(Op::Bulk),
            Just(Op::Tick),
            Just(Op::Interrupt),
        ]
    }

    fn pick(store: &TaskStore, index: usize) -> Option<TaskId> {
        let tasks = store.tasks();
        if tasks.is_empty() {
            None
        } else {
            Some(tasks[index % tasks.len()].id.clone())
        }
    }

    proptest! {
        #[test]
        fn prop_single_flight_and_no_starvation(ops in prop::collection::vec(arb_op(), 1..60)) {
            let mut store = TaskStore::new(QueuePolicy::DOWNLOAD);
            let mut counter = 0;

            for op in ops {
                match op {
                    Op::Enqueue(n) => {
                        let tasks = (0..n).map(|_| { counter += 1; download(&format!("f{counter}")) }).collect();
                        store.enqueue(tasks);
                    }
                    Op::Progress(i, p) => if let Some(id) = pick(&store, i) { store.update_progress(&id, p); },
                    Op::Settle(i, ok) => if let Some(id) = pick(&store, i) {
                        let attempt = store.get(&id).unwrap().attempt;
                        let outcome = if ok { Ok(()) } else { Err("boom".to_string()) };
                        store.settle(&id, attempt, outcome);
                    },
                    Op::Remove(i) => if let Some(id) = pick(&store, i) { store.remove_task(&id); },
                    Op::Clear(status) => { store.clear_by_status(status); }
                    Op::Pause(i) => if let Some(id) = pick(&store, i) { let _ = store.pause(&id); },
                    Op::Resume(i) => if let Some(id) = pick(&store, i) { let _ = store.resume(&id); },
                    Op::Bulk(true) => { store.pause_all().unwrap(); }
                    Op::Bulk(false) => { let ids = store.paused_ids(); store.resume_by_ids(&ids).unwrap(); }
                    Op::Tick => { store.tick(DOWNLOAD_TEST_RATE); }
                    Op::Interrupt => { store.interrupt(); }
                }
                assert_invariants(&store);
            }
        }
    }

    const DOWNLOAD_TEST_RATE: u64 = 512 * 1024;
}
