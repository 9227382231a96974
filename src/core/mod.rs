mod errors;
mod manager;
mod task;
mod traits;
mod types;
mod worker;

pub mod expander;
pub mod guard;
pub mod progress;
pub mod storage;
pub mod store;

pub use errors::{Result, TransferError};
pub use expander::{expand_directory, Expansion, ExpansionFailure, ListPage, ListQuery, RemoteEntry};
pub use manager::{
    DirectoryEnqueue,
    DownloadQueue,
    QueueDeps,
    QueueManager,
    TransferDeps,
    TransferQueues,
    UploadQueue,
};
pub use progress::{estimate, ProgressReporter, ProgressStream, ProgressUpdate, DOWNLOAD_RATE, UPLOAD_RATE};
pub use storage::{FileStorage, MemoryStorage};
pub use store::{Activation, TaskStore};
pub use task::{FileKind, RemoteFile, TaskSource, TransferTask};
pub use traits::{Clock, FileLister, StateStorage, SystemClock, Transport};
pub use types::{
    BatchOutcome,
    ProgressMode,
    QueueEvent,
    QueueKind,
    QueuePolicy,
    QueueSnapshot,
    StatusCounts,
    TaskId,
    TaskStatus,
    INTERRUPTED_BY_REFRESH,
};
