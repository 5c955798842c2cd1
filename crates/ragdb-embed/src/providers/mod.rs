//! Embedding providers, one per [`ProviderKind`], plus the mock generator.

pub mod cloud;
pub mod mock;
pub mod ollama;
pub mod sentence;

use std::sync::Arc;
use std::time::Duration;

use reqwest::{Client, Response};

use ragdb_core::config::{BackendConfig, ProviderKind};
use ragdb_core::error::{Error, Result};
use ragdb_core::traits::EmbeddingProvider;

pub use cloud::{CloudApiProvider, CloudFlavor};
pub use mock::mock_vector;
pub use ollama::OllamaProvider;
pub use sentence::SentenceEncoderProvider;

/// Builds the provider for a configured backend.
pub fn build_provider(config: &BackendConfig) -> Result<Arc<dyn EmbeddingProvider>> {
    let provider: Arc<dyn EmbeddingProvider> = match config.provider {
        ProviderKind::LocalServer => Arc::new(OllamaProvider::from_config(config)?),
        ProviderKind::SentenceEncoder => Arc::new(SentenceEncoderProvider::from_config(config)),
        ProviderKind::CloudApi => Arc::new(CloudApiProvider::from_config(config)?),
    };
    Ok(provider)
}

pub(crate) fn http_client(config: &BackendConfig) -> Result<Client> {
    Client::builder()
        .timeout(Duration::from_secs_f64(config.timeout_seconds.max(0.001)))
        .build()
        .map_err(|e| Error::backend(&config.name, e))
}

pub(crate) fn required_url(config: &BackendConfig) -> Result<String> {
    config
        .base_url
        .as_deref()
        .map(|u| u.trim_end_matches('/').to_string())
        .filter(|u| !u.is_empty())
        .ok_or_else(|| Error::config(format!("base_url is required for {}", config.name)))
}

pub(crate) fn send_error(backend: &str, e: &reqwest::Error) -> Error {
    if e.is_timeout() {
        Error::backend(backend, "request timed out")
    } else if e.is_connect() {
        Error::backend(backend, format!("connection failed: {e}"))
    } else {
        Error::backend(backend, format!("HTTP request failed: {e}"))
    }
}

/// Maps non-2xx statuses to `BackendUnavailable` and decodes the JSON body.
pub(crate) async fn check_and_parse(response: Response, backend: &str) -> Result<serde_json::Value> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_else(|_| "Unknown error".to_string());
        let context = match status.as_u16() {
            401 => "authentication failed".to_string(),
            429 => "rate limit exceeded".to_string(),
            code @ 500..=599 => format!("server error ({code})"),
            code => format!("request failed ({code})"),
        };
        return Err(Error::backend(backend, format!("{context}: {body}")));
    }
    response.json().await.map_err(|e| Error::backend(backend, format!("response parse failed: {e}")))
}

pub(crate) fn parse_vector(value: &serde_json::Value, backend: &str) -> Result<Vec<f32>> {
    let values = value
        .as_array()
        .ok_or_else(|| Error::backend(backend, "invalid response format: missing embedding array"))?;
    values
        .iter()
        .map(|v| v.as_f64().map(|f| f as f32).ok_or_else(|| Error::backend(backend, "non-numeric embedding value")))
        .collect()
}
