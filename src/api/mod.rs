//! HTTP collaborators for the cloud-disk file service

mod client;
mod download;
mod upload;

use std::sync::Arc;
use crate::config::Config;
use crate::core::{FileStorage, Result, SystemClock, TransferDeps};

pub use client::{
    bytes_to_megabytes,
    megabytes_to_bytes,
    ApiClient,
    ApiResponse,
    FileInfo,
    PageResult,
    CREATE_PATH,
    DOWNLOAD_PATH,
    LIST_PATH,
};
pub use download::{filename_from_disposition, HttpDownloader};
pub use upload::HttpUploader;

/// Queue collaborators talking to the service described by `config`, with
/// state kept under `storage.state_dir`.
pub fn http_deps(config: &Config) -> Result<TransferDeps> {
    let api = ApiClient::new(&config.api)?;

    Ok(TransferDeps {
        uploader: Arc::new(HttpUploader::new(api.clone())),
        downloader: Arc::new(HttpDownloader::new(api.clone(), config.download_dir())),
        lister: Arc::new(api),
        storage: Arc::new(FileStorage::new(&config.storage.state_dir)),
        clock: Arc::new(SystemClock),
    })
}
