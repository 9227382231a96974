use thiserror::Error;
use super::types::{TaskId, TaskStatus};

#[derive(Error, Debug)]
pub enum TransferError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Config error: {0}")]
    Config(#[from] toml::de::Error),

    #[error("API error: code {code}, message: {msg}")]
    Api {
        code: i64,
        msg: String,
    },

    #[error("Server error: status code {status_code}, message: {message}")]
    ServerError {
        status_code: u16,
        message: String,
    },

    #[error("Task not found: {0}")]
    TaskNotFound(TaskId),

    #[error("Cannot {action} task {id} in state {from}")]
    InvalidTransition {
        id: TaskId,
        from: TaskStatus,
        action: &'static str,
    },

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Unsupported operation: {0}")]
    Unsupported(&'static str),

    #[error("Failed to list '{path}': {message}")]
    Expansion {
        path: String,
        message: String,
    },

    #[error("Queue manager shut down")]
    ManagerShutdown,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl TransferError {
    pub fn server_error(status_code: u16, message: impl Into<String>) -> Self {
        Self::ServerError {
            status_code,
            message: message.into(),
        }
    }

    pub fn api(code: i64, msg: impl Into<String>) -> Self {
        Self::Api {
            code,
            msg: msg.into(),
        }
    }

    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Message recorded on a failed task; API errors keep the server's text.
    pub fn task_reason(&self) -> String {
        match self {
            TransferError::Api { msg, .. } if !msg.is_empty() => msg.clone(),
            other => other.to_string(),
        }
    }
}

/// Error alias
pub type Result<T, E = TransferError> = std::result::Result<T, E>;
