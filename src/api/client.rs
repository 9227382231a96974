use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use url::Url;
use crate::config::ApiConfig;
use crate::core::{FileKind, FileLister, ListPage, ListQuery, RemoteEntry, Result, TransferError};

pub const CREATE_PATH: &str = "/admin-api/system/hadoop-file/create";
pub const LIST_PATH: &str = "/admin-api/system/hadoop-file/list";
pub const DOWNLOAD_PATH: &str = "/admin-api/system/hadoop-file/download";

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

/// Envelope of every JSON response of the file service; `code == 0` is success
#[derive(Deserialize, Debug, Clone)]
pub struct ApiResponse<T> {
    pub code: i64,
    #[serde(default)]
    pub msg: String,
    pub data: Option<T>,
}

impl<T> ApiResponse<T> {
    pub fn into_result(self) -> Result<Option<T>> {
        if self.code == 0 {
            Ok(self.data)
        } else {
            Err(TransferError::api(self.code, self.msg))
        }
    }
}

#[derive(Deserialize, Debug, Clone)]
pub struct PageResult<T> {
    #[serde(default = "Vec::new")]
    pub list: Vec<T>,
    #[serde(default)]
    pub total: u64,
}

/// Entry of the listing endpoint
#[derive(Deserialize, Debug, Clone)]
pub struct FileInfo {
    pub id: NumberOrString,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: FileKind,
    /// Megabytes, as a decimal string
    #[serde(default)]
    pub size: Option<NumberOrString>,
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(untagged)]
pub enum NumberOrString {
    Number(serde_json::Number),
    Text(String),
}

impl NumberOrString {
    fn as_text(&self) -> String {
        match self {
            NumberOrString::Number(n) => n.to_string(),
            NumberOrString::Text(s) => s.clone(),
        }
    }

    fn as_f64(&self) -> Option<f64> {
        match self {
            NumberOrString::Number(n) => n.as_f64(),
            NumberOrString::Text(s) => s.trim().parse().ok(),
        }
    }
}

impl From<FileInfo> for RemoteEntry {
    fn from(info: FileInfo) -> Self {
        let megabytes = info.size.as_ref().and_then(NumberOrString::as_f64).unwrap_or(0.0);

        RemoteEntry {
            id: info.id.as_text(),
            name: info.name,
            kind: info.kind,
            size_in_bytes: megabytes_to_bytes(megabytes),
        }
    }
}

pub fn megabytes_to_bytes(megabytes: f64) -> u64 {
    if megabytes.is_finite() && megabytes > 0.0 {
        (megabytes * BYTES_PER_MB).round() as u64
    } else {
        0
    }
}

/// Size field of the create endpoint: megabytes with two decimals
pub fn bytes_to_megabytes(bytes: u64) -> String {
    format!("{:.2}", bytes as f64 / BYTES_PER_MB)
}

/// Shared HTTP client of the file service
#[derive(Debug, Clone)]
pub struct ApiClient {
    client: Client,
    base_url: String,
    token: Option<String>,
}

impl ApiClient {
    pub fn new(config: &ApiConfig) -> Result<Self> {
        Url::parse(&config.base_url)
            .map_err(|e| TransferError::InvalidInput(format!("invalid base url '{}': {}", config.base_url, e)))?;

        let client = Client::builder()
            .timeout(config.timeout())
            .build()?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            token: config.token.clone(),
        })
    }

    pub fn http(&self) -> &Client {
        &self.client
    }

    pub fn endpoint(&self, path: &str) -> Result<Url> {
        let url = format!("{}{}", self.base_url, path);
        Url::parse(&url).map_err(|e| TransferError::InvalidInput(format!("invalid url '{}': {}", url, e)))
    }

    pub fn headers(&self) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();

        if let Some(token) = &self.token {
            let value = HeaderValue::from_str(&format!("Bearer {}", token))
                .map_err(|e| TransferError::InvalidInput(format!("invalid token: {}", e)))?;
            headers.insert(AUTHORIZATION, value);
        }

        Ok(headers)
    }

    /// Fail on non-2xx, keeping the body as the message.
    pub async fn check_status(response: Response) -> Result<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let message = response.text().await.unwrap_or_default();
        Err(TransferError::server_error(status.as_u16(), message))
    }

    /// Decode a JSON envelope and fail on a non-zero code.
    pub async fn decode<T: DeserializeOwned>(response: Response) -> Result<Option<T>> {
        let response = Self::check_status(response).await?;
        let bytes = response.bytes().await?;
        let envelope: ApiResponse<T> = serde_json::from_slice(&bytes)?;
        envelope.into_result()
    }
}

#[async_trait]
impl FileLister for ApiClient {
    async fn list_files(&self, query: &ListQuery) -> Result<ListPage> {
        let mut params = vec![
            ("catalogue", query.catalogue.clone()),
            ("pageNo", query.page_no.to_string()),
            ("pageSize", query.page_size.to_string()),
        ];
        if let Some(kind) = query.kind {
            params.push(("type", kind.code().to_string()));
        }

        let response = self.client
            .get(self.endpoint(LIST_PATH)?)
            .headers(self.headers()?)
            .query(&params)
            .send()
            .await?;

        let page: Option<PageResult<FileInfo>> = Self::decode(response).await?;
        let page = page.unwrap_or(PageResult { list: Vec::new(), total: 0 });

        Ok(ListPage {
            entries: page.list.into_iter().map(RemoteEntry::from).collect(),
            total: page.total,
        })
    }
}
