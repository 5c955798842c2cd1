use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;

use ragdb_core::config::BackendConfig;
use ragdb_core::error::{Error, Result};
use ragdb_core::traits::EmbeddingProvider;

use super::{check_and_parse, http_client, parse_vector, required_url, send_error};
use crate::models::model_spec;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloudFlavor {
    /// `POST {base}/embeddings`, bearer auth, `data[i].embedding`.
    OpenAi,
    /// `POST {base}/pipeline/feature-extraction/{model}`, returns `[[f32]]`.
    HuggingFace,
}

impl CloudFlavor {
    fn detect(config: &BackendConfig) -> Self {
        let url = config.base_url.as_deref().unwrap_or_default();
        if config.name.contains("huggingface") || url.contains("huggingface") { Self::HuggingFace } else { Self::OpenAi }
    }
}

pub struct CloudApiProvider {
    name: String,
    base_url: String,
    api_key: String,
    flavor: CloudFlavor,
    client: Client,
}

impl CloudApiProvider {
    pub fn from_config(config: &BackendConfig) -> Result<Self> {
        let api_key = config
            .api_key
            .clone()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| Error::config(format!("api_key is required for {}", config.name)))?;
        Ok(Self {
            name: config.name.clone(),
            base_url: required_url(config)?,
            api_key,
            flavor: CloudFlavor::detect(config),
            client: http_client(config)?,
        })
    }

    pub fn flavor(&self) -> CloudFlavor { self.flavor }

    async fn embed_openai(&self, texts: &[String], model: &str) -> Result<Vec<Vec<f32>>> {
        let payload = json!({ "input": texts, "model": model, "encoding_format": "float" });
        let response = self
            .client
            .post(format!("{}/embeddings", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&payload)
            .send()
            .await
            .map_err(|e| send_error(&self.name, &e))?;
        let body = check_and_parse(response, &self.name).await?;
        let data = body["data"]
            .as_array()
            .ok_or_else(|| Error::backend(&self.name, "invalid response format: missing data array"))?;
        if data.len() != texts.len() {
            return Err(Error::backend(&self.name, format!("expected {} embeddings, got {}", texts.len(), data.len())));
        }
        data.iter().map(|item| parse_vector(&item["embedding"], &self.name)).collect()
    }

    async fn embed_huggingface(&self, texts: &[String], model: &str) -> Result<Vec<Vec<f32>>> {
        let response = self
            .client
            .post(format!("{}/pipeline/feature-extraction/{model}", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&json!({ "inputs": texts, "options": { "wait_for_model": true } }))
            .send()
            .await
            .map_err(|e| send_error(&self.name, &e))?;
        let body = check_and_parse(response, &self.name).await?;
        let rows = body
            .as_array()
            .ok_or_else(|| Error::backend(&self.name, "invalid response format: expected a list of vectors"))?;
        if rows.len() != texts.len() {
            return Err(Error::backend(&self.name, format!("expected {} embeddings, got {}", texts.len(), rows.len())));
        }
        rows.iter().map(|row| parse_vector(row, &self.name)).collect()
    }
}

#[async_trait]
impl EmbeddingProvider for CloudApiProvider {
    fn name(&self) -> &str { &self.name }

    fn dimensions(&self, model: &str) -> Option<usize> { model_spec(model).map(|m| m.dimensions) }

    async fn embed(&self, texts: &[String], model: &str) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() { return Ok(Vec::new()); }
        match self.flavor {
            CloudFlavor::OpenAi => self.embed_openai(texts, model).await,
            CloudFlavor::HuggingFace => self.embed_huggingface(texts, model).await,
        }
    }
}
