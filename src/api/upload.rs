use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::Body;
use serde_json::Value;
use tokio::fs::File;
use tokio_util::io::ReaderStream;
use tracing::{debug, info};
use crate::core::{FileKind, ProgressReporter, ProgressStream, Result, TaskSource, TransferError, TransferTask, Transport};
use super::client::{bytes_to_megabytes, ApiClient, CREATE_PATH};

/// Multipart upload to the create endpoint
#[derive(Debug, Clone)]
pub struct HttpUploader {
    api: ApiClient,
}

impl HttpUploader {
    pub fn new(api: ApiClient) -> Self {
        Self { api }
    }
}

#[async_trait]
impl Transport for HttpUploader {
    async fn transfer(&self, task: TransferTask, reporter: ProgressReporter) -> Result<()> {
        let (path, catalogue) = match &task.source {
            TaskSource::Upload { path, catalogue } => (path.clone(), catalogue.clone()),
            TaskSource::Download { .. } => {
                return Err(TransferError::InvalidInput(format!("{} is not an upload", task.id)));
            }
        };

        let file = File::open(&path).await?;
        let size = file.metadata().await?.len();
        let kind = FileKind::from_file_name(&task.name);

        // 1MB
        let stream = ProgressStream::new(ReaderStream::with_capacity(file, 1024 * 1024), reporter, size);
        let part = Part::stream_with_length(Body::wrap_stream(stream), size).file_name(task.name.clone());

        let form = Form::new()
            .part("file", part)
            .text("name", task.name.clone())
            .text("type", kind.code().to_string())
            .text("catalogue", catalogue)
            .text("size", bytes_to_megabytes(size));

        debug!(id = %task.id, path = %path.display(), size, "uploading file");
        let response = self.api
            .http()
            .post(self.api.endpoint(CREATE_PATH)?)
            .headers(self.api.headers()?)
            .multipart(form)
            .send()
            .await?;

        ApiClient::decode::<Value>(response).await?;
        info!(id = %task.id, name = %task.name, "upload finished");

        Ok(())
    }
}
