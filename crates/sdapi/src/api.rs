//! REST client for the Stable Diffusion web API.
//!
//! Wraps the two calls the worker makes: the job call itself (`POST` to
//! an arbitrary API path) and the progress poll (`GET
//! /sdapi/v1/progress`). Both use a shared [`reqwest::Client`].
//!
//! No timeout is configured on the client. A backend that never answers
//! blocks the job that called it.

use async_trait::async_trait;

use crate::progress::{parse_progress_field, ProgressSnapshot};

/// Path of the backend progress endpoint, without leading slash.
pub const PROGRESS_PATH: &str = "sdapi/v1/progress";

/// Status and body of a completed backend call, forwarded verbatim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendResponse {
    pub status: u16,
    pub body: String,
}

/// Errors from the backend API layer.
///
/// HTTP error statuses are not errors here; they come back as a
/// [`BackendResponse`] like any other status.
#[derive(Debug, thiserror::Error)]
pub enum SdApiError {
    /// The request could not be built (bad URL, bad header).
    #[error("Invalid backend request: {0}")]
    InvalidRequest(String),

    /// The backend could not be reached (connect, DNS, TLS, reset).
    #[error("Backend unreachable: {0}")]
    Unreachable(String),

    /// The backend answered but the body could not be read.
    #[error("Failed to read backend response body: {0}")]
    Body(String),
}

/// The backend operations the job pipeline depends on.
#[async_trait]
pub trait SdBackend: Send + Sync {
    /// `POST` `params` to `api` with a JSON content type.
    async fn submit(&self, api: &str, params: &str) -> Result<BackendResponse, SdApiError>;

    /// `GET` the progress endpoint and extract its `progress` field.
    async fn progress(&self) -> Result<ProgressSnapshot, SdApiError>;
}

/// HTTP client for a single Stable Diffusion instance.
pub struct SdApi {
    client: reqwest::Client,
    base_url: String,
}

impl SdApi {
    /// Create a client for a backend.
    ///
    /// * `base_url` - scheme, host and port, e.g. `http://127.0.0.1:7860`.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(reqwest::Client::new(), base_url)
    }

    /// Create a client reusing an existing [`reqwest::Client`].
    pub fn with_client(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into();
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Backend base URL without trailing slash (e.g. `http://127.0.0.1:7860`).
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Full URL for an API path. One leading `/` on `api` is ignored.
    pub fn url_for(&self, api: &str) -> String {
        let api = api.strip_prefix('/').unwrap_or(api);
        format!("{}/{}", self.base_url, api)
    }

    // ---- private helpers ----

    async fn read_response(response: reqwest::Response) -> Result<BackendResponse, SdApiError> {
        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| SdApiError::Body(e.to_string()))?;
        Ok(BackendResponse { status, body })
    }
}

#[async_trait]
impl SdBackend for SdApi {
    async fn submit(&self, api: &str, params: &str) -> Result<BackendResponse, SdApiError> {
        let url = self.url_for(api);
        tracing::debug!(url = %url, "Submitting job to backend");

        let response = self
            .client
            .post(&url)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(params.to_owned())
            .send()
            .await
            .map_err(classify_send_error)?;

        Self::read_response(response).await
    }

    async fn progress(&self) -> Result<ProgressSnapshot, SdApiError> {
        let response = self
            .client
            .get(self.url_for(PROGRESS_PATH))
            .send()
            .await
            .map_err(classify_send_error)?;

        let BackendResponse { status, body } = Self::read_response(response).await?;
        Ok(ProgressSnapshot {
            status,
            progress: parse_progress_field(&body),
        })
    }
}

fn classify_send_error(e: reqwest::Error) -> SdApiError {
    if e.is_builder() {
        SdApiError::InvalidRequest(e.to_string())
    } else {
        SdApiError::Unreachable(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_for_strips_one_leading_slash() {
        let api = SdApi::new("http://127.0.0.1:7860");
        assert_eq!(
            api.url_for("/sdapi/v1/txt2img"),
            "http://127.0.0.1:7860/sdapi/v1/txt2img"
        );
        assert_eq!(
            api.url_for("sdapi/v1/txt2img"),
            "http://127.0.0.1:7860/sdapi/v1/txt2img"
        );
    }

    #[test]
    fn trailing_slash_on_base_is_dropped() {
        let api = SdApi::new("http://sd.local:7860/");
        assert_eq!(api.base_url(), "http://sd.local:7860");
        assert_eq!(api.url_for(PROGRESS_PATH), "http://sd.local:7860/sdapi/v1/progress");
    }
}
