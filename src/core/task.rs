use std::path::{Path, PathBuf};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use super::types::{QueueKind, TaskId, TaskStatus};

/// Remote file type codes used by the file service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(from = "i64", into = "i64")]
pub enum FileKind {
    Image,
    Audio,
    Video,
    Document,
    Torrent,
    Other,
    Directory,
    Recycle,
    Share,
}

impl FileKind {
    pub fn code(self) -> i64 {
        match self {
            FileKind::Image => 0,
            FileKind::Audio => 1,
            FileKind::Video => 2,
            FileKind::Document => 3,
            FileKind::Torrent => 4,
            FileKind::Other => 5,
            FileKind::Directory => 6,
            FileKind::Recycle => 7,
            FileKind::Share => 8,
        }
    }

    /// Guess the type of a local file from its extension.
    pub fn from_file_name(name: &str) -> Self {
        let ext = match name.rsplit_once('.') {
            Some((_, ext)) => ext.to_ascii_lowercase(),
            None => return FileKind::Other,
        };

        match ext.as_str() {
            "jpg" | "jpeg" | "png" | "gif" | "bmp" | "webp" => FileKind::Image,
            "mp3" | "wav" | "ogg" | "flac" | "aac" => FileKind::Audio,
            "mp4" | "avi" | "mov" | "wmv" | "flv" | "mkv" => FileKind::Video,
            "doc" | "docx" | "pdf" | "txt" | "xls" | "xlsx" | "ppt" | "pptx" => FileKind::Document,
            "torrent" => FileKind::Torrent,
            _ => FileKind::Other,
        }
    }
}

impl From<i64> for FileKind {
    fn from(code: i64) -> Self {
        match code {
            0 => FileKind::Image,
            1 => FileKind::Audio,
            2 => FileKind::Video,
            3 => FileKind::Document,
            4 => FileKind::Torrent,
            6 => FileKind::Directory,
            7 => FileKind::Recycle,
            8 => FileKind::Share,
            _ => FileKind::Other,
        }
    }
}

impl From<FileKind> for i64 {
    fn from(kind: FileKind) -> Self {
        kind.code()
    }
}

/// Snapshot of a remote file taken when its download is enqueued
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct RemoteFile {
    pub name: String,
    pub size: u64,
    #[serde(rename = "type")]
    pub kind: FileKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase", rename_all_fields = "camelCase")]
pub enum TaskSource {
    Upload {
        /// Local file, reopened by the transport on every activation
        path: PathBuf,
        /// Destination folder on the server
        catalogue: String,
    },
    Download {
        file_id: String,
        file: RemoteFile,
    },
}

/// One file transfer
///
/// Records handed out by a queue are copies; only the queue's own store
/// mutates the originals.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferTask {
    pub id: TaskId,
    /// Display name, may carry a relative folder prefix
    pub name: String,
    pub source: TaskSource,
    pub status: TaskStatus,
    /// 0..=100
    pub progress: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub elapsed_seconds: u64,
    pub size_in_bytes: u64,
    /// Number of times the task has been activated
    #[serde(default)]
    pub attempt: u32,
}

impl TransferTask {
    fn new(name: String, source: TaskSource, size_in_bytes: u64, now: DateTime<Utc>) -> Self {
        Self {
            id: TaskId::generate(&name, now),
            name,
            source,
            status: TaskStatus::Pending,
            progress: 0,
            error: None,
            created_at: now,
            elapsed_seconds: 0,
            size_in_bytes,
            attempt: 0,
        }
    }

    pub fn upload(
        path: impl Into<PathBuf>,
        catalogue: impl Into<String>,
        size_in_bytes: u64,
        now: DateTime<Utc>,
    ) -> Self {
        let path = path.into();
        let name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.to_string_lossy().into_owned());

        let source = TaskSource::Upload {
            path,
            catalogue: catalogue.into(),
        };

        Self::new(name, source, size_in_bytes, now)
    }

    pub fn download(file_id: impl Into<String>, file: RemoteFile, now: DateTime<Utc>) -> Self {
        let name = file.name.clone();
        let size = file.size;
        let source = TaskSource::Download {
            file_id: file_id.into(),
            file,
        };

        Self::new(name, source, size, now)
    }

    pub fn kind(&self) -> QueueKind {
        match self.source {
            TaskSource::Upload { .. } => QueueKind::Upload,
            TaskSource::Download { .. } => QueueKind::Download,
        }
    }

    pub fn local_path(&self) -> Option<&Path> {
        match &self.source {
            TaskSource::Upload { path, .. } => Some(path),
            TaskSource::Download { .. } => None,
        }
    }

    pub fn remote_file_id(&self) -> Option<&str> {
        match &self.source {
            TaskSource::Download { file_id, .. } => Some(file_id),
            TaskSource::Upload { .. } => None,
        }
    }
}
