use std::fmt;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use uuid::Uuid;
use super::errors::Result;
use super::task::TransferTask;

/// Transfer task identifier
///
/// Built from the file name, the enqueue timestamp and a random salt, so two
/// tasks for the same file enqueued in the same millisecond still differ.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(transparent)]
pub struct TaskId(String);

impl TaskId {
    pub fn generate(name: &str, now: DateTime<Utc>) -> Self {
        Self(format!("{}-{}-{}", name, now.timestamp_millis(), Uuid::new_v4().simple()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for TaskId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for TaskId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    /// Waiting in the queue
    Pending,
    /// Active upload
    Uploading,
    /// Active download
    Downloading,
    /// Stopped by the user or by a shutdown, download only
    Paused,
    /// Upload finished
    Success,
    /// Download finished
    Downloaded,
    Failed,
}

impl TaskStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Uploading => "uploading",
            TaskStatus::Downloading => "downloading",
            TaskStatus::Paused => "paused",
            TaskStatus::Success => "success",
            TaskStatus::Downloaded => "downloaded",
            TaskStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueKind {
    Upload,
    Download,
}

impl fmt::Display for QueueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueueKind::Upload => f.write_str("upload"),
            QueueKind::Download => f.write_str("download"),
        }
    }
}

/// Per-queue scheduling policy
///
/// Upload and download queues share one engine; everything that differs
/// between them lives here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueuePolicy {
    pub kind: QueueKind,
    /// Status of the single running task
    pub active: TaskStatus,
    /// Status of a task whose transfer settled successfully
    pub success: TaskStatus,
    /// Status forced onto pending and active tasks at shutdown or when a
    /// persisted active task is loaded
    pub interrupted: TaskStatus,
    pub interrupt_reason: Option<&'static str>,
    pub supports_pause: bool,
}

pub const INTERRUPTED_BY_REFRESH: &str = "interrupted by refresh";

impl QueuePolicy {
    pub const UPLOAD: QueuePolicy = QueuePolicy {
        kind: QueueKind::Upload,
        active: TaskStatus::Uploading,
        success: TaskStatus::Success,
        interrupted: TaskStatus::Failed,
        interrupt_reason: Some(INTERRUPTED_BY_REFRESH),
        supports_pause: false,
    };

    pub const DOWNLOAD: QueuePolicy = QueuePolicy {
        kind: QueueKind::Download,
        active: TaskStatus::Downloading,
        success: TaskStatus::Downloaded,
        interrupted: TaskStatus::Paused,
        interrupt_reason: None,
        supports_pause: true,
    };

    /// Statuses a task of this queue may legally hold.
    pub fn allows(&self, status: TaskStatus) -> bool {
        match status {
            TaskStatus::Pending | TaskStatus::Failed => true,
            TaskStatus::Paused => self.supports_pause,
            other => other == self.active || other == self.success,
        }
    }
}

/// How a queue obtains progress for its active task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(tag = "mode", rename_all = "lowercase")]
pub enum ProgressMode {
    /// Only the transport's progress callbacks move the value
    Reported,
    /// A periodic tick estimates progress from elapsed time
    Estimated {
        rate_bytes_per_sec: u64,
    },
}

impl Default for ProgressMode {
    fn default() -> Self {
        ProgressMode::Reported
    }
}

/// Task count per status
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StatusCounts {
    pub total: usize,
    pub pending: usize,
    pub active: usize,
    pub paused: usize,
    pub completed: usize,
    pub failed: usize,
}

impl StatusCounts {
    pub fn record(&mut self, status: TaskStatus) {
        self.total += 1;
        match status {
            TaskStatus::Pending => self.pending += 1,
            TaskStatus::Uploading | TaskStatus::Downloading => self.active += 1,
            TaskStatus::Paused => self.paused += 1,
            TaskStatus::Success | TaskStatus::Downloaded => self.completed += 1,
            TaskStatus::Failed => self.failed += 1,
        }
    }
}

/// Persisted form of a queue
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueSnapshot {
    pub tasks: Vec<TransferTask>,
    pub active_id: Option<TaskId>,
}

/// Result of a multi-id operation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchOutcome {
    /// Ids whose status changed
    pub applied: Vec<TaskId>,
    /// Ids that exist but were not in a state the operation accepts
    pub skipped: Vec<TaskId>,
    /// Ids with no task
    pub missing: Vec<TaskId>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum QueueEvent {
    TaskAdded {
        id: TaskId,
    },
    StateChanged {
        id: TaskId,
        from: TaskStatus,
        to: TaskStatus,
        error: Option<String>,
    },
    Progress {
        id: TaskId,
        progress: u8,
    },
    TaskRemoved {
        id: TaskId,
    },
    Cleared {
        removed: usize,
    },
}

/// Queue manager command
pub enum ManagerCommand {
    Enqueue {
        tasks: Vec<TransferTask>,
        reply: oneshot::Sender<Vec<TaskId>>,
    },

    Remove {
        id: TaskId,
        reply: oneshot::Sender<bool>,
    },

    /// `None` clears every task
    ClearByStatus {
        status: Option<TaskStatus>,
        reply: oneshot::Sender<usize>,
    },

    ClearByStatuses {
        statuses: Vec<TaskStatus>,
        reply: oneshot::Sender<usize>,
    },

    /// Status change from outside the queue; promotion stays internal
    UpdateStatus {
        id: TaskId,
        status: TaskStatus,
        error: Option<String>,
        reply: oneshot::Sender<Result<bool>>,
    },

    Pause {
        id: TaskId,
        reply: oneshot::Sender<Result<()>>,
    },

    Resume {
        id: TaskId,
        reply: oneshot::Sender<Result<()>>,
    },

    PauseByIds {
        ids: Vec<TaskId>,
        reply: oneshot::Sender<Result<BatchOutcome>>,
    },

    ResumeByIds {
        ids: Vec<TaskId>,
        reply: oneshot::Sender<Result<BatchOutcome>>,
    },

    PauseAll {
        reply: oneshot::Sender<Result<usize>>,
    },

    ResumeAll {
        reply: oneshot::Sender<Result<usize>>,
    },

    GetTask {
        id: TaskId,
        reply: oneshot::Sender<Option<TransferTask>>,
    },

    GetSnapshot {
        reply: oneshot::Sender<QueueSnapshot>,
    },

    GetCounts {
        reply: oneshot::Sender<StatusCounts>,
    },

    /// Apply the reload guard, persist and stop the worker
    Shutdown {
        reply: oneshot::Sender<Result<Vec<TaskId>>>,
    },
}
