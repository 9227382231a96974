use std::ops::Deref;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::info;
use crate::config::{Config, QueueConfig};
use super::errors::{Result, TransferError};
use super::expander::{self, ExpansionFailure};
use super::task::{RemoteFile, TransferTask};
use super::traits::{Clock, FileLister, StateStorage, Transport};
use super::types::{
    BatchOutcome,
    ManagerCommand,
    QueueEvent,
    QueueKind,
    QueuePolicy,
    QueueSnapshot,
    StatusCounts,
    TaskId,
    TaskStatus,
};
use super::worker::QueueWorker;

/// Collaborators injected into a queue
#[derive(Clone)]
pub struct QueueDeps {
    pub transport: Arc<dyn Transport>,
    pub storage: Arc<dyn StateStorage>,
    pub clock: Arc<dyn Clock>,
}

/// Handle to one queue worker
///
/// Cheap to clone; every clone talks to the same worker.
#[derive(Clone)]
pub struct QueueManager {
    policy: QueuePolicy,
    in_progress: Arc<[TaskStatus]>,
    clock: Arc<dyn Clock>,
    command_tx: mpsc::Sender<ManagerCommand>,
    event_tx: broadcast::Sender<QueueEvent>,
}

impl QueueManager {
    /// Start the worker. Persisted state is loaded and reconciled before the
    /// first command is served.
    pub fn spawn(policy: QueuePolicy, config: QueueConfig, deps: QueueDeps) -> Self {
        let (command_tx, command_rx) = mpsc::channel(100);
        let (event_tx, _) = broadcast::channel(config.event_capacity.max(1));
        let in_progress: Arc<[TaskStatus]> = config.in_progress_statuses.clone().into();

        tokio::spawn(QueueWorker::run(
            policy,
            config,
            deps.transport,
            deps.storage,
            command_rx,
            event_tx.clone(),
        ));

        Self {
            policy,
            in_progress,
            clock: deps.clock,
            command_tx,
            event_tx,
        }
    }

    pub fn kind(&self) -> QueueKind {
        self.policy.kind
    }

    pub fn policy(&self) -> &QueuePolicy {
        &self.policy
    }

    async fn request<T>(&self, build: impl FnOnce(oneshot::Sender<T>) -> ManagerCommand) -> Result<T> {
        let (reply_tx, reply_rx) = oneshot::channel();

        self.command_tx
            .send(build(reply_tx))
            .await
            .map_err(|_| TransferError::ManagerShutdown)?;

        reply_rx.await.map_err(|_| TransferError::ManagerShutdown)
    }

    /// Append tasks to the queue; returns their ids in order.
    pub async fn enqueue(&self, tasks: Vec<TransferTask>) -> Result<Vec<TaskId>> {
        if let Some(task) = tasks.iter().find(|task| task.kind() != self.policy.kind) {
            return Err(TransferError::InvalidInput(format!(
                "{} task {} sent to the {} queue",
                task.kind(),
                task.id,
                self.policy.kind
            )));
        }

        self.request(|reply| ManagerCommand::Enqueue { tasks, reply }).await
    }

    pub async fn remove_task(&self, id: &TaskId) -> Result<bool> {
        let id = id.clone();
        self.request(|reply| ManagerCommand::Remove { id, reply }).await
    }

    /// Remove all tasks with `status`, or all tasks for `None`.
    pub async fn clear_by_status(&self, status: Option<TaskStatus>) -> Result<usize> {
        self.request(|reply| ManagerCommand::ClearByStatus { status, reply }).await
    }

    /// Remove every task of the configured in-progress group.
    pub async fn clear_in_progress(&self) -> Result<usize> {
        let statuses = self.in_progress.to_vec();
        self.request(|reply| ManagerCommand::ClearByStatuses { statuses, reply }).await
    }

    pub async fn update_status(&self, id: &TaskId, status: TaskStatus, error: Option<String>) -> Result<bool> {
        let id = id.clone();
        self.request(|reply| ManagerCommand::UpdateStatus { id, status, error, reply }).await?
    }

    pub async fn pause(&self, id: &TaskId) -> Result<()> {
        let id = id.clone();
        self.request(|reply| ManagerCommand::Pause { id, reply }).await?
    }

    pub async fn resume(&self, id: &TaskId) -> Result<()> {
        let id = id.clone();
        self.request(|reply| ManagerCommand::Resume { id, reply }).await?
    }

    pub async fn pause_by_ids(&self, ids: Vec<TaskId>) -> Result<BatchOutcome> {
        self.request(|reply| ManagerCommand::PauseByIds { ids, reply }).await?
    }

    /// Resume paused tasks one stagger interval apart, in the order given.
    pub async fn resume_by_ids(&self, ids: Vec<TaskId>) -> Result<BatchOutcome> {
        self.request(|reply| ManagerCommand::ResumeByIds { ids, reply }).await?
    }

    pub async fn pause_all(&self) -> Result<usize> {
        self.request(|reply| ManagerCommand::PauseAll { reply }).await?
    }

    pub async fn resume_all(&self) -> Result<usize> {
        self.request(|reply| ManagerCommand::ResumeAll { reply }).await?
    }

    pub async fn task(&self, id: &TaskId) -> Result<Option<TransferTask>> {
        let id = id.clone();
        self.request(|reply| ManagerCommand::GetTask { id, reply }).await
    }

    pub async fn snapshot(&self) -> Result<QueueSnapshot> {
        self.request(|reply| ManagerCommand::GetSnapshot { reply }).await
    }

    /// Tasks in scheduling order
    pub async fn tasks(&self) -> Result<Vec<TransferTask>> {
        Ok(self.snapshot().await?.tasks)
    }

    /// Tasks newest first, for display
    pub async fn tasks_newest_first(&self) -> Result<Vec<TransferTask>> {
        let mut tasks = self.tasks().await?;
        tasks.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(tasks)
    }

    pub async fn counts(&self) -> Result<StatusCounts> {
        self.request(|reply| ManagerCommand::GetCounts { reply }).await
    }

    /// Subscribe to queue events
    ///
    /// A subscriber that falls more than `event_capacity` events behind gets
    /// `RecvError::Lagged` and misses the oldest ones.
    pub fn subscribe_events(&self) -> broadcast::Receiver<QueueEvent> {
        self.event_tx.subscribe()
    }

    /// Wait until no task is pending or active.
    pub async fn wait_idle(&self) -> Result<StatusCounts> {
        let mut events = self.subscribe_events();

        loop {
            let counts = self.counts().await?;
            if counts.pending == 0 && counts.active == 0 {
                return Ok(counts);
            }

            match events.recv().await {
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return Err(TransferError::ManagerShutdown),
            }
        }
    }

    /// Interrupt pending and active tasks, persist and stop the worker.
    ///
    /// Returns the ids of the interrupted tasks.
    pub async fn shutdown(&self) -> Result<Vec<TaskId>> {
        self.request(|reply| ManagerCommand::Shutdown { reply }).await?
    }

    fn now(&self) -> chrono::DateTime<chrono::Utc> {
        self.clock.now()
    }
}

/// Upload queue
///
/// Uploads cannot be paused; the pause family of [`QueueManager`] returns
/// [`TransferError::Unsupported`].
#[derive(Clone)]
pub struct UploadQueue {
    manager: QueueManager,
}

impl UploadQueue {
    pub fn spawn(config: QueueConfig, deps: QueueDeps) -> Self {
        Self {
            manager: QueueManager::spawn(QueuePolicy::UPLOAD, config, deps),
        }
    }

    /// Queue local files for upload into the remote `catalogue`.
    pub async fn enqueue_files(&self, catalogue: &str, paths: Vec<PathBuf>) -> Result<Vec<TaskId>> {
        let mut tasks = Vec::with_capacity(paths.len());

        for path in paths {
            let metadata = tokio::fs::metadata(&path).await?;
            if !metadata.is_file() {
                return Err(TransferError::InvalidInput(format!("{} is not a file", path.display())));
            }

            tasks.push(TransferTask::upload(path, catalogue, metadata.len(), self.manager.now()));
        }

        self.manager.enqueue(tasks).await
    }
}

impl Deref for UploadQueue {
    type Target = QueueManager;

    fn deref(&self) -> &QueueManager {
        &self.manager
    }
}

/// Tasks created from a remote folder
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DirectoryEnqueue {
    pub ids: Vec<TaskId>,
    /// Sub-folders whose files could not be listed
    pub failures: Vec<ExpansionFailure>,
}

#[derive(Clone)]
pub struct DownloadQueue {
    manager: QueueManager,
    lister: Arc<dyn FileLister>,
    page_size: u32,
}

impl DownloadQueue {
    pub fn spawn(config: QueueConfig, deps: QueueDeps, lister: Arc<dyn FileLister>, page_size: u32) -> Self {
        Self {
            manager: QueueManager::spawn(QueuePolicy::DOWNLOAD, config, deps),
            lister,
            page_size,
        }
    }

    /// Queue remote files, given as `(file_id, file)` pairs.
    pub async fn enqueue_files(&self, files: Vec<(String, RemoteFile)>) -> Result<Vec<TaskId>> {
        let now = self.manager.now();
        let tasks = files
            .into_iter()
            .map(|(file_id, file)| TransferTask::download(file_id, file, now))
            .collect();

        self.manager.enqueue(tasks).await
    }

    /// Queue every file below the remote folder `path`.
    ///
    /// Task names keep the folder structure, starting with the folder's own
    /// name. Nothing is queued if the folder itself cannot be listed.
    pub async fn enqueue_directory(&self, path: &str) -> Result<DirectoryEnqueue> {
        let prefix = path.trim_end_matches('/').rsplit('/').next().unwrap_or_default();
        let expansion = expander::expand_directory(self.lister.as_ref(), path, prefix, self.page_size).await?;

        info!(path, files = expansion.files.len(), failures = expansion.failures.len(), "enqueueing folder");
        let files = expansion
            .files
            .into_iter()
            .map(|expanded| (expanded.file_id, expanded.file))
            .collect();

        let ids = self.enqueue_files(files).await?;
        Ok(DirectoryEnqueue {
            ids,
            failures: expansion.failures,
        })
    }
}

impl Deref for DownloadQueue {
    type Target = QueueManager;

    fn deref(&self) -> &QueueManager {
        &self.manager
    }
}

/// Collaborators of both queues
#[derive(Clone)]
pub struct TransferDeps {
    pub uploader: Arc<dyn Transport>,
    pub downloader: Arc<dyn Transport>,
    pub lister: Arc<dyn FileLister>,
    pub storage: Arc<dyn StateStorage>,
    pub clock: Arc<dyn Clock>,
}

/// The upload and download queues of one client
#[derive(Clone)]
pub struct TransferQueues {
    pub uploads: UploadQueue,
    pub downloads: DownloadQueue,
}

impl TransferQueues {
    pub fn spawn(config: &Config, deps: TransferDeps) -> Self {
        let uploads = UploadQueue::spawn(config.upload.clone(), QueueDeps {
            transport: deps.uploader,
            storage: deps.storage.clone(),
            clock: deps.clock.clone(),
        });

        let downloads = DownloadQueue::spawn(
            config.download.clone(),
            QueueDeps {
                transport: deps.downloader,
                storage: deps.storage,
                clock: deps.clock,
            },
            deps.lister,
            config.api.page_size(),
        );

        Self { uploads, downloads }
    }

    /// Shut both queues down; the first error wins but both are attempted.
    pub async fn shutdown(&self) -> Result<()> {
        let (uploads, downloads) = tokio::join!(self.uploads.shutdown(), self.downloads.shutdown());
        uploads?;
        downloads?;
        Ok(())
    }
}
