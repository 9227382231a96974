use std::path::{Path, PathBuf};
use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::header::{CONTENT_DISPOSITION, CONTENT_TYPE};
use reqwest::Response;
use serde_json::Value;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};
use uuid::Uuid;
use crate::core::{ProgressReporter, Result, TransferError, TransferTask, Transport};
use super::client::{ApiClient, ApiResponse, DOWNLOAD_PATH};

/// Streams files from the download endpoint into a local directory
///
/// Folder prefixes of the task name become sub-directories, so an expanded
/// folder is recreated below `dir`.
#[derive(Debug, Clone)]
pub struct HttpDownloader {
    api: ApiClient,
    dir: PathBuf,
}

impl HttpDownloader {
    pub fn new(api: ApiClient, dir: impl Into<PathBuf>) -> Self {
        Self { api, dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

#[async_trait]
impl Transport for HttpDownloader {
    async fn transfer(&self, task: TransferTask, reporter: ProgressReporter) -> Result<()> {
        let file_id = task
            .remote_file_id()
            .ok_or_else(|| TransferError::InvalidInput(format!("{} is not a download", task.id)))?;

        let url = self.api.endpoint(&format!("{}/{}", DOWNLOAD_PATH, urlencoding::encode(file_id)))?;
        let response = self.api
            .http()
            .get(url)
            .headers(self.api.headers()?)
            .send()
            .await?;
        let response = ApiClient::check_status(response).await?;

        let header_name = response
            .headers()
            .get(CONTENT_DISPOSITION)
            .and_then(|value| value.to_str().ok())
            .and_then(filename_from_disposition);
        let destination = destination(&self.dir, &task.name, header_name.as_deref());

        // the service answers failures with a JSON envelope and status 200
        if is_json(&response) {
            let body = response.bytes().await?;
            if let Ok(envelope) = serde_json::from_slice::<ApiResponse<Value>>(&body) {
                envelope.into_result()?;
            }
            write_all(&destination, &body).await?;
            reporter.report(body.len() as u64, body.len() as u64);
            return Ok(());
        }

        // 0 when neither the response nor the listing knows the size
        let total = response.content_length().filter(|len| *len > 0).unwrap_or(task.size_in_bytes);
        debug!(id = %task.id, path = %destination.display(), total, "downloading file");

        if let Some(parent) = destination.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let partial = partial_path(&destination);
        let loaded = match stream_to(&partial, response, total, &reporter).await {
            Ok(loaded) => loaded,
            Err(e) => {
                let _ = tokio::fs::remove_file(&partial).await;
                return Err(e);
            }
        };

        if let Err(e) = tokio::fs::rename(&partial, &destination).await {
            let _ = tokio::fs::remove_file(&partial).await;
            return Err(e.into());
        }

        info!(id = %task.id, path = %destination.display(), bytes = loaded, "download finished");
        Ok(())
    }
}

/// Write the body to `path`, returning the number of bytes written.
async fn stream_to(path: &Path, response: Response, total: u64, reporter: &ProgressReporter) -> Result<u64> {
    let mut file = File::create(path).await?;
    let mut stream = response.bytes_stream();
    let mut loaded: u64 = 0;

    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        file.write_all(&chunk).await?;
        loaded += chunk.len() as u64;
        if total > 0 {
            reporter.report(loaded.min(total), total);
        }
    }

    file.flush().await?;
    Ok(loaded)
}

fn is_json(response: &Response) -> bool {
    response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.starts_with("application/json"))
        .unwrap_or(false)
}

async fn write_all(path: &Path, data: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(path, data).await?;
    Ok(())
}

/// Sibling of `destination` private to one transfer, so overlapping
/// attempts of a task never share a partial file.
fn partial_path(destination: &Path) -> PathBuf {
    let name = destination
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    destination.with_file_name(format!(".{}.{}.part", name, Uuid::new_v4().simple()))
}

/// File name from a `Content-Disposition` value, preferring the RFC 5987
/// `filename*=UTF-8''...` form.
pub fn filename_from_disposition(value: &str) -> Option<String> {
    let params: Vec<(String, &str)> = value
        .split(';')
        .filter_map(|param| param.split_once('='))
        .map(|(key, value)| (key.trim().to_ascii_lowercase(), value.trim().trim_matches('"')))
        .collect();

    let extended = params.iter().find(|(key, _)| key == "filename*").and_then(|(_, value)| {
        let encoded = value.split_once("''").map(|(_, rest)| rest).unwrap_or(value);
        urlencoding::decode(encoded).ok().map(|name| name.into_owned())
    });

    extended
        .or_else(|| params.iter().find(|(key, _)| key == "filename").map(|(_, value)| value.to_string()))
        .filter(|name| !name.is_empty())
}

/// Local path for a task: folder prefixes of `display_name` below `dir`,
/// ending in the server's file name when one was sent.
fn destination(dir: &Path, display_name: &str, server_name: Option<&str>) -> PathBuf {
    let mut parts: Vec<&str> = display_name
        .split(['/', '\\'])
        .filter(|part| !part.is_empty() && *part != "." && *part != "..")
        .collect();
    let fallback = parts.pop().unwrap_or("download");

    let file_name = server_name
        .and_then(|name| name.rsplit(['/', '\\']).next())
        .filter(|name| !name.is_empty() && *name != "." && *name != "..")
        .unwrap_or(fallback);

    let mut path = dir.to_path_buf();
    for part in parts {
        path.push(part);
    }
    path.push(file_name);
    path
}
