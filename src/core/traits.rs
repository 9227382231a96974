use async_trait::async_trait;
use chrono::{DateTime, Utc};
use super::errors::Result;
use super::expander::{ListPage, ListQuery};
use super::progress::ProgressReporter;
use super::task::TransferTask;

/// Moves the bytes of one task
///
/// The queue calls `transfer` once per activation and never cancels it; a
/// transfer that outlives its task is ignored when it settles.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn transfer(&self, task: TransferTask, reporter: ProgressReporter) -> Result<()>;
}

/// Paged listing of a remote catalogue
#[async_trait]
pub trait FileLister: Send + Sync {
    async fn list_files(&self, query: &ListQuery) -> Result<ListPage>;
}

/// Durable string storage keyed by queue name
#[async_trait]
pub trait StateStorage: Send + Sync {
    /// `Ok(None)` when nothing was saved under `key` yet
    async fn load(&self, key: &str) -> Result<Option<String>>;

    async fn save(&self, key: &str, value: &str) -> Result<()>;
}

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
