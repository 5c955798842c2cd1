//! Local model server provider speaking the Ollama embeddings API.

use async_trait::async_trait;
use futures::stream::{self, StreamExt, TryStreamExt};
use reqwest::Client;
use serde_json::json;

use ragdb_core::config::BackendConfig;
use ragdb_core::error::Result;
use ragdb_core::traits::EmbeddingProvider;

use super::{check_and_parse, http_client, parse_vector, required_url, send_error};
use crate::models::model_spec;

pub struct OllamaProvider {
    name: String,
    base_url: String,
    max_concurrent: usize,
    client: Client,
}

impl OllamaProvider {
    pub fn from_config(config: &BackendConfig) -> Result<Self> {
        Ok(Self {
            name: config.name.clone(),
            base_url: required_url(config)?,
            max_concurrent: config.max_concurrent_requests.max(1),
            client: http_client(config)?,
        })
    }

    async fn embed_one(&self, text: &str, model: &str) -> Result<Vec<f32>> {
        let payload = json!({ "model": model, "prompt": text, "stream": false });
        let response = self
            .client
            .post(format!("{}/api/embeddings", self.base_url))
            .json(&payload)
            .send()
            .await
            .map_err(|e| send_error(&self.name, &e))?;
        let body = check_and_parse(response, &self.name).await?;
        parse_vector(&body["embedding"], &self.name)
    }
}

#[async_trait]
impl EmbeddingProvider for OllamaProvider {
    fn name(&self) -> &str { &self.name }

    fn dimensions(&self, model: &str) -> Option<usize> { model_spec(model).map(|m| m.dimensions) }

    /// The server takes one prompt per request; requests run with bounded
    /// concurrency and results keep input order.
    async fn embed(&self, texts: &[String], model: &str) -> Result<Vec<Vec<f32>>> {
        let requests: Vec<_> = texts.iter().map(|t| self.embed_one(t, model)).collect();
        stream::iter(requests)
            .buffered(self.max_concurrent)
            .try_collect()
            .await
    }
}
