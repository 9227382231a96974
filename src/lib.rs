pub mod api;
pub mod config;
pub mod core;
pub mod logging;

// re-export the types most callers need
pub use core::{
    DownloadQueue,
    QueueEvent,
    QueueManager,
    Result,
    TaskId,
    TaskStatus,
    TransferError,
    TransferQueues,
    TransferTask,
    UploadQueue,
};
pub use config::Config;
