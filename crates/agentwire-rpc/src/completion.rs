//! Upstream completion backend.
//!
//! The dispatcher only needs "send this Messages API request, give me the raw
//! response body". [`AnthropicClient`] is the production implementation;
//! tests substitute their own [`CompletionService`].

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use crate::error::{Result, RpcError};

/// Default Anthropic API base URL.
const DEFAULT_API_BASE: &str = "https://api.anthropic.com";

/// Anthropic API version header value.
const API_VERSION: &str = "2023-06-01";

/// Overall bound on one upstream request.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(300);

/// Sends one completion request and returns the raw JSON response body.
#[async_trait]
pub trait CompletionService: Send + Sync {
    async fn create_message(&self, request: &Value) -> Result<String>;
}

/// Anthropic Messages API client.
pub struct AnthropicClient {
    client: Client,
    api_key: String,
    api_base: String,
}

#[derive(Debug, Deserialize)]
struct ApiErrorResponse {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    #[serde(rename = "type")]
    error_type: String,
    message: String,
}

impl AnthropicClient {
    pub fn new(api_key: impl Into<String>) -> Result<Self> {
        Self::with_base_url(api_key, DEFAULT_API_BASE)
    }

    /// Point the client at another base URL (proxies, tests).
    pub fn with_base_url(api_key: impl Into<String>, api_base: impl Into<String>) -> Result<Self> {
        let client = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            client,
            api_key: api_key.into(),
            api_base: api_base.into().trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl CompletionService for AnthropicClient {
    async fn create_message(&self, request: &Value) -> Result<String> {
        let url = format!("{}/v1/messages", self.api_base);
        let response = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .json(request)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        debug!(status = status.as_u16(), len = body.len(), "completion response");

        if !status.is_success() {
            let message = match serde_json::from_str::<ApiErrorResponse>(&body) {
                Ok(err) => format!("{}: {}", err.error.error_type, err.error.message),
                Err(_) => body,
            };
            return Err(RpcError::Api {
                status: status.as_u16(),
                message,
            });
        }
        Ok(body)
    }
}
