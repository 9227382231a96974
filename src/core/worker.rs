use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::{self, Instant, Interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};
use crate::config::QueueConfig;
use super::errors::Result;
use super::guard;
use super::progress::{ProgressReporter, ProgressUpdate};
use super::store::{Activation, TaskStore};
use super::traits::{StateStorage, Transport};
use super::types::{
    BatchOutcome,
    ManagerCommand,
    ProgressMode,
    QueueEvent,
    QueuePolicy,
    QueueSnapshot,
    TaskId,
};

/// Outcome of one transfer, sent back by the spawned transport task
#[derive(Debug)]
struct Settlement {
    id: TaskId,
    attempt: u32,
    outcome: std::result::Result<(), String>,
}

/// Actor owning the store of one queue
///
/// Commands, transport callbacks, staggered resumes and ticks all go through
/// `run`, so the store only ever has one writer.
pub struct QueueWorker {
    store: TaskStore,
    config: QueueConfig,
    transport: Arc<dyn Transport>,
    storage: Arc<dyn StateStorage>,

    event_tx: broadcast::Sender<QueueEvent>,
    progress_tx: mpsc::UnboundedSender<ProgressUpdate>,
    progress_rx: mpsc::UnboundedReceiver<ProgressUpdate>,
    settled_tx: mpsc::UnboundedSender<Settlement>,
    settled_rx: mpsc::UnboundedReceiver<Settlement>,
    resume_tx: mpsc::UnboundedSender<(TaskId, u64)>,
    resume_rx: mpsc::UnboundedReceiver<(TaskId, u64)>,
    /// Staggered resumes still waiting; a pause drops the task's entry
    delayed: HashMap<TaskId, u64>,
    next_token: u64,
}

impl QueueWorker {
    pub(crate) async fn run(
        policy: QueuePolicy,
        config: QueueConfig,
        transport: Arc<dyn Transport>,
        storage: Arc<dyn StateStorage>,
        mut command_rx: mpsc::Receiver<ManagerCommand>,
        event_tx: broadcast::Sender<QueueEvent>,
    ) {
        let (progress_tx, progress_rx) = mpsc::unbounded_channel();
        let (settled_tx, settled_rx) = mpsc::unbounded_channel();
        let (resume_tx, resume_rx) = mpsc::unbounded_channel();

        let snapshot = load_snapshot(storage.as_ref(), &config.storage_key).await;
        let (store, interrupted) = TaskStore::from_snapshot(policy, snapshot);
        if !interrupted.is_empty() {
            warn!(queue = %policy.kind, count = interrupted.len(), "transfers interrupted by restart");
        }

        let mut worker = Self {
            store,
            config,
            transport,
            storage,
            event_tx,
            progress_tx,
            progress_rx,
            settled_tx,
            settled_rx,
            resume_tx,
            resume_rx,
            delayed: HashMap::new(),
            next_token: 0,
        };

        let rate = match worker.config.progress {
            ProgressMode::Estimated { rate_bytes_per_sec } => Some(rate_bytes_per_sec),
            ProgressMode::Reported => None,
        };
        let mut ticker = rate.map(|_| {
            let period = Duration::from_millis(worker.config.tick_interval_ms.max(1));
            let mut interval = time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            interval
        });

        info!(queue = %policy.kind, tasks = worker.store.tasks().len(), "queue worker started");
        worker.flush(true).await;

        loop {
            tokio::select! {
                command = command_rx.recv() => match command {
                    Some(command) => {
                        if let Some(reply) = worker.handle_command(command) {
                            let result = worker.shutdown().await;
                            let _ = reply.send(result);
                            break;
                        }
                    }
                    None => {
                        // every handle dropped without an explicit shutdown
                        if let Err(err) = worker.shutdown().await {
                            error!(error = %err, "failed to persist queue on close");
                        }
                        break;
                    }
                },
                Some(update) = worker.progress_rx.recv() => {
                    worker.store.report_progress(&update);
                }
                Some(settlement) = worker.settled_rx.recv() => {
                    worker.handle_settlement(settlement);
                }
                Some((id, token)) = worker.resume_rx.recv() => {
                    worker.resume_delayed(id, token);
                }
                _ = next_tick(&mut ticker) => {
                    if let Some(rate) = rate {
                        worker.store.tick(rate);
                    }
                }
            }

            worker.flush(false).await;
        }

        info!(queue = %policy.kind, "queue worker stopped");
    }

    /// Apply a command; a shutdown request is handed back to the run loop.
    fn handle_command(&mut self, command: ManagerCommand) -> Option<oneshot::Sender<Result<Vec<TaskId>>>> {
        match command {
            ManagerCommand::Enqueue { tasks, reply } => {
                let ids = self.store.enqueue(tasks);
                let _ = reply.send(ids);
            }
            ManagerCommand::Remove { id, reply } => {
                let _ = reply.send(self.store.remove_task(&id));
            }
            ManagerCommand::ClearByStatus { status, reply } => {
                let _ = reply.send(self.store.clear_by_status(status));
            }
            ManagerCommand::ClearByStatuses { statuses, reply } => {
                let _ = reply.send(self.store.clear_by_statuses(&statuses));
            }
            ManagerCommand::UpdateStatus { id, status, error, reply } => {
                let _ = reply.send(self.store.update_status(&id, status, error));
            }
            ManagerCommand::Pause { id, reply } => {
                self.delayed.remove(&id);
                let _ = reply.send(self.store.pause(&id));
            }
            ManagerCommand::Resume { id, reply } => {
                self.delayed.remove(&id);
                let _ = reply.send(self.store.resume(&id));
            }
            ManagerCommand::PauseByIds { ids, reply } => {
                for id in &ids {
                    self.delayed.remove(id);
                }
                let _ = reply.send(self.store.pause_by_ids(&ids));
            }
            ManagerCommand::ResumeByIds { ids, reply } => {
                let _ = reply.send(self.resume_staggered(&ids));
            }
            ManagerCommand::PauseAll { reply } => {
                self.delayed.clear();
                let _ = reply.send(self.store.pause_all());
            }
            ManagerCommand::ResumeAll { reply } => {
                let ids = self.store.paused_ids();
                let result = self.resume_staggered(&ids).map(|outcome| outcome.applied.len());
                let _ = reply.send(result);
            }
            ManagerCommand::GetTask { id, reply } => {
                let _ = reply.send(self.store.get(&id).cloned());
            }
            ManagerCommand::GetSnapshot { reply } => {
                let _ = reply.send(self.store.snapshot());
            }
            ManagerCommand::GetCounts { reply } => {
                let _ = reply.send(self.store.counts());
            }
            ManagerCommand::Shutdown { reply } => return Some(reply),
        }
        None
    }

    /// Resume the first task now and the i-th one `i * stagger` later.
    fn resume_staggered(&mut self, ids: &[TaskId]) -> Result<BatchOutcome> {
        let stagger = Duration::from_millis(self.config.resume_stagger_ms);
        if stagger.is_zero() {
            return self.store.resume_by_ids(ids);
        }

        let outcome = self.store.resumable(ids)?;
        for (index, id) in outcome.applied.iter().enumerate() {
            if index == 0 {
                self.store.resume(id)?;
                continue;
            }

            self.next_token += 1;
            let token = self.next_token;
            self.delayed.insert(id.clone(), token);

            let delay = stagger * index as u32;
            let resume_tx = self.resume_tx.clone();
            let id = id.clone();
            tokio::spawn(async move {
                time::sleep(delay).await;
                let _ = resume_tx.send((id, token));
            });
        }

        Ok(outcome)
    }

    fn resume_delayed(&mut self, id: TaskId, token: u64) {
        if self.delayed.get(&id) != Some(&token) {
            debug!(%id, "staggered resume cancelled");
            return;
        }

        self.delayed.remove(&id);
        if let Err(err) = self.store.resume(&id) {
            debug!(%id, error = %err, "staggered resume skipped");
        }
    }

    fn handle_settlement(&mut self, settlement: Settlement) {
        let Settlement { id, attempt, outcome } = settlement;
        if let Err(reason) = &outcome {
            warn!(%id, attempt, error = %reason, "transfer failed");
        }
        self.store.settle(&id, attempt, outcome);
    }

    fn start_transfer(&self, activation: Activation) {
        let Activation { id, attempt, task } = activation;
        let transport = self.transport.clone();
        let reporter = ProgressReporter::new(id.clone(), attempt, self.progress_tx.clone());
        let settled_tx = self.settled_tx.clone();

        debug!(%id, attempt, "starting transfer");
        tokio::spawn(async move {
            let handle = tokio::spawn(async move { transport.transfer(task, reporter).await });

            let outcome = match handle.await {
                Ok(Ok(())) => Ok(()),
                Ok(Err(err)) => Err(err.task_reason()),
                Err(err) => Err(format!("Task panicked: {}", err)),
            };

            let _ = settled_tx.send(Settlement { id, attempt, outcome });
        });
    }

    /// Start new activations, broadcast buffered events and persist when
    /// anything changed.
    async fn flush(&mut self, force_save: bool) {
        for activation in self.store.drain_activations() {
            self.start_transfer(activation);
        }

        let events = self.store.drain_events();
        let changed = !events.is_empty();
        for event in events {
            let _ = self.event_tx.send(event);
        }

        if changed || force_save {
            if let Err(err) = self.save_state().await {
                warn!(queue = %self.store.policy().kind, error = %err, "failed to save queue state");
            }
        }
    }

    async fn shutdown(&mut self) -> Result<Vec<TaskId>> {
        let interrupted = guard::interrupt(&mut self.store);
        for event in self.store.drain_events() {
            let _ = self.event_tx.send(event);
        }

        self.save_state().await?;
        info!(queue = %self.store.policy().kind, interrupted = interrupted.len(), "queue shut down");
        Ok(interrupted)
    }

    async fn save_state(&self) -> Result<()> {
        let data = serde_json::to_string_pretty(&self.store.snapshot())?;
        self.storage.save(&self.config.storage_key, &data).await
    }
}

/// Read the persisted snapshot; unreadable state starts the queue empty.
async fn load_snapshot(storage: &dyn StateStorage, key: &str) -> QueueSnapshot {
    let data = match storage.load(key).await {
        Ok(Some(data)) => data,
        Ok(None) => return QueueSnapshot::default(),
        Err(err) => {
            error!(key, error = %err, "failed to load queue state");
            return QueueSnapshot::default();
        }
    };

    match serde_json::from_str(&data) {
        Ok(snapshot) => snapshot,
        Err(err) => {
            error!(key, error = %err, "discarding corrupt queue state");
            QueueSnapshot::default()
        }
    }
}

async fn next_tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}
