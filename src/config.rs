//! TOML configuration for both queues and the HTTP collaborators

use std::path::{Path, PathBuf};
use std::time::Duration;
use serde::Deserialize;
use crate::core::{ProgressMode, QueueKind, Result, TaskStatus};
use crate::core::expander::MAX_PAGE_SIZE;

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub api: ApiConfig,
    pub storage: StorageConfig,
    pub upload: QueueConfig,
    pub download: QueueConfig,
    /// Where downloaded files are written
    pub download_dir: Option<PathBuf>,
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> Result<Config> {
        let data = std::fs::read_to_string(path)?;
        Self::from_toml_str(&data)
    }

    /// Parse a config, filling in the per-queue defaults for missing sections.
    pub fn from_toml_str(data: &str) -> Result<Config> {
        let raw: RawConfig = toml::from_str(data)?;

        Ok(Config {
            api: raw.api,
            storage: raw.storage,
            upload: raw.upload.merge(QueueKind::Upload),
            download: raw.download.merge(QueueKind::Download),
            download_dir: raw.download_dir,
        })
    }

    pub fn download_dir(&self) -> PathBuf {
        self.download_dir.clone().unwrap_or_else(|| PathBuf::from("downloads"))
    }
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct RawConfig {
    api: ApiConfig,
    storage: StorageConfig,
    upload: QueueSection,
    download: QueueSection,
    download_dir: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api: ApiConfig::default(),
            storage: StorageConfig::default(),
            upload: QueueConfig::for_kind(QueueKind::Upload),
            download: QueueConfig::for_kind(QueueKind::Download),
            download_dir: None,
        }
    }
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct ApiConfig {
    pub base_url: String,
    /// Sent as `Authorization: Bearer <token>`
    pub token: Option<String>,
    pub timeout_secs: u64,
    /// Listing page size, at most 100
    pub page_size: u32,
}

impl ApiConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn page_size(&self) -> u32 {
        self.page_size.clamp(1, MAX_PAGE_SIZE)
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:48080".to_string(),
            token: None,
            timeout_secs: 300,
            page_size: MAX_PAGE_SIZE,
        }
    }
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct StorageConfig {
    pub state_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            state_dir: PathBuf::from(".cloud-transfer"),
        }
    }
}

/// Settings of one queue
#[derive(Debug, Clone, PartialEq)]
pub struct QueueConfig {
    /// Key the snapshot is persisted under
    pub storage_key: String,
    /// `Estimated` only drives an activation until its transport reports
    pub progress: ProgressMode,
    pub tick_interval_ms: u64,
    /// Gap between consecutive resumes of a batch; 0 resumes all at once
    pub resume_stagger_ms: u64,
    /// Statuses removed by "clear in progress"
    pub in_progress_statuses: Vec<TaskStatus>,
    /// Buffered events per subscriber before it lags
    pub event_capacity: usize,
}

impl QueueConfig {
    pub fn for_kind(kind: QueueKind) -> Self {
        match kind {
            QueueKind::Upload => Self {
                storage_key: "upload-store".to_string(),
                in_progress_statuses: vec![TaskStatus::Uploading, TaskStatus::Pending],
                ..Self::base()
            },
            QueueKind::Download => Self {
                storage_key: "download-store".to_string(),
                in_progress_statuses: vec![TaskStatus::Downloading, TaskStatus::Pending, TaskStatus::Paused],
                ..Self::base()
            },
        }
    }

    fn base() -> Self {
        Self {
            storage_key: String::new(),
            progress: ProgressMode::Reported,
            tick_interval_ms: 1000,
            resume_stagger_ms: 100,
            in_progress_statuses: Vec::new(),
            event_capacity: 256,
        }
    }
}

/// A `[upload]` or `[download]` table; missing keys keep that queue's defaults
#[derive(Deserialize, Default)]
#[serde(default)]
struct QueueSection {
    storage_key: Option<String>,
    progress: Option<ProgressMode>,
    tick_interval_ms: Option<u64>,
    resume_stagger_ms: Option<u64>,
    in_progress_statuses: Option<Vec<TaskStatus>>,
    event_capacity: Option<usize>,
}

impl QueueSection {
    fn merge(self, kind: QueueKind) -> QueueConfig {
        let base = QueueConfig::for_kind(kind);
        QueueConfig {
            storage_key: self.storage_key.unwrap_or(base.storage_key),
            progress: self.progress.unwrap_or(base.progress),
            tick_interval_ms: self.tick_interval_ms.unwrap_or(base.tick_interval_ms),
            resume_stagger_ms: self.resume_stagger_ms.unwrap_or(base.resume_stagger_ms),
            in_progress_statuses: self.in_progress_statuses.unwrap_or(base.in_progress_statuses),
            event_capacity: self.event_capacity.unwrap_or(base.event_capacity),
        }
    }
}
