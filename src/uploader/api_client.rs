use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::time::{Duration, Instant};

use crate::errors::{AppError, AppResult};
use crate::forms::FormPhase;
use crate::image_processor::CompressionResult;
use crate::records::{DropdownData, SearchQuery, SearchRecord};

/// Reply of the photo upload endpoint.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UploadResponse {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

impl UploadResponse {
    pub fn stored(url: &str) -> Self {
        Self {
            success: true,
            url: Some(url.to_string()),
            error: None,
        }
    }

    pub fn rejected(error: &str) -> Self {
        Self {
            success: false,
            url: None,
            error: Some(error.to_string()),
        }
    }
}

#[derive(Debug, Serialize)]
struct PhotoUploadBody<'a> {
    #[serde(rename = "dataUrl")]
    data_url: &'a str,
    mime: &'a str,
    filename: &'a str,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    data: Option<Vec<SearchRecord>>,
}

/// The remote permit API.
#[async_trait]
pub trait PermitBackend: Send + Sync {
    async fn upload_photo(&self, photo: &CompressionResult) -> AppResult<UploadResponse>;

    async fn submit_form(
        &self,
        phase: FormPhase,
        payload: &serde_json::Value,
    ) -> AppResult<serde_json::Value>;

    async fn dropdown_data(&self) -> AppResult<DropdownData>;

    async fn search_records(&self, query: &SearchQuery) -> AppResult<Vec<SearchRecord>>;
}

/// HTTP client for the permit API
pub struct ApiClient {
    client: Client,
    endpoint: String,
}

impl ApiClient {
    pub fn new(endpoint: &str, timeout: Duration) -> AppResult<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            endpoint: endpoint.trim().trim_end_matches('/').to_string(),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.endpoint, path)
    }
}

#[async_trait]
impl PermitBackend for ApiClient {
    async fn upload_photo(&self, photo: &CompressionResult) -> AppResult<UploadResponse> {
        let start_time = Instant::now();
        let body = PhotoUploadBody {
            data_url: &photo.data_url,
            mime: &photo.mime,
            filename: &photo.filename,
        };

        let response = self
            .client
            .post(self.url("/api/upload-photo"))
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(AppError::HttpStatus {
                status: status.as_u16(),
                message: status
                    .canonical_reason()
                    .unwrap_or("upload failed")
                    .to_string(),
            });
        }

        let result: UploadResponse = response.json().await?;
        log::info!(
            "Upload finished ({:.1}s): {}",
            start_time.elapsed().as_secs_f64(),
            photo.filename
        );

        Ok(result)
    }

    async fn submit_form(
        &self,
        phase: FormPhase,
        payload: &serde_json::Value,
    ) -> AppResult<serde_json::Value> {
        let response = self
            .client
            .post(self.url(phase.api_path()))
            .json(payload)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response
                .json::<ErrorBody>()
                .await
                .ok()
                .and_then(|body| body.error)
                .unwrap_or_else(|| "submission failed".to_string());
            return Err(AppError::HttpStatus {
                status: status.as_u16(),
                message,
            });
        }

        Ok(response.json().await?)
    }

    async fn dropdown_data(&self) -> AppResult<DropdownData> {
        let response = self.client.get(self.url("/api/dropdown-data")).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(AppError::HttpStatus {
                status: status.as_u16(),
                message: "failed to load dropdown data".to_string(),
            });
        }

        Ok(response.json().await?)
    }

    async fn search_records(&self, query: &SearchQuery) -> AppResult<Vec<SearchRecord>> {
        let response = self
            .client
            .get(self.url("/api/search-records"))
            .query(&query.params())
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(AppError::HttpStatus {
                status: status.as_u16(),
                message: "search failed".to_string(),
            });
        }

        let body: SearchResponse = response.json().await?;
        Ok(body.data.unwrap_or_default())
    }
}
