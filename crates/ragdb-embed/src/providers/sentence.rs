//! In-process sentence encoder: XLM-Roberta weights (bge-m3 family) run with
//! candle, masked mean pooling, L2 normalization.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, Result as AnyResult};
use async_trait::async_trait;
use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::models::xlm_roberta::{Config as XLMRobertaConfig, XLMRobertaModel};
use tokenizers::Tokenizer;
use tokio::sync::OnceCell;
use tracing::{debug, info};

use ragdb_core::config::BackendConfig;
use ragdb_core::error::{Error, Result};
use ragdb_core::traits::EmbeddingProvider;

use crate::device::select_device;
use crate::models::model_spec;
use crate::pool::masked_mean_l2;
use crate::tokenize::tokenize_batch;

const MAX_LEN: usize = 256;

pub struct SentenceEncoder {
    model: XLMRobertaModel,
    tokenizer: Tokenizer,
    device: Device,
    dim: usize,
}

impl SentenceEncoder {
    /// Loads `tokenizer.json`, `config.json` and `pytorch_model.bin` from `model_dir`.
    pub fn load(model_dir: &Path) -> AnyResult<Self> {
        let device = select_device();
        let tokenizer_path = model_dir.join("tokenizer.json");
        let tokenizer = Tokenizer::from_file(&tokenizer_path)
            .map_err(|e| anyhow!("Failed to load tokenizer from {}: {}", tokenizer_path.display(), e))?;
        let config: XLMRobertaConfig = serde_json::from_str(&std::fs::read_to_string(model_dir.join("config.json"))?)?;
        let weights = candle_core::pickle::read_all(model_dir.join("pytorch_model.bin"))?;
        let weights: HashMap<String, Tensor> = weights.into_iter().collect();
        let vb = VarBuilder::from_tensors(weights, DType::F32, &device);
        let model = XLMRobertaModel::new(&config, vb)?;
        info!(dir = %model_dir.display(), dim = config.hidden_size, "sentence encoder loaded");
        Ok(Self { model, tokenizer, device, dim: config.hidden_size })
    }

    pub fn dim(&self) -> usize { self.dim }

    pub fn embed_batch(&self, texts: &[String]) -> AnyResult<Vec<Vec<f32>>> {
        if texts.is_empty() { return Ok(Vec::new()); }
        let (input_ids, attention_mask) = tokenize_batch(&self.tokenizer, texts, MAX_LEN, &self.device)?;
        let token_type_ids = Tensor::zeros((texts.len(), MAX_LEN), DType::I64, &self.device)?;
        let hidden = self.model.forward(&input_ids, &attention_mask, &token_type_ids, None, None, None)?;
        let pooled = masked_mean_l2(&hidden, &attention_mask)?;
        Ok(pooled.to_device(&Device::Cpu)?.to_vec2::<f32>()?)
    }
}

/// Provider wrapper; the model is loaded on first use on a blocking thread.
pub struct SentenceEncoderProvider {
    name: String,
    model_dir: Option<PathBuf>,
    encoder: OnceCell<Arc<SentenceEncoder>>,
}

impl SentenceEncoderProvider {
    pub fn from_config(config: &BackendConfig) -> Self {
        Self {
            name: config.name.clone(),
            model_dir: resolve_model_dir(config.model_path.as_deref(), &config.default_model),
            encoder: OnceCell::new(),
        }
    }

    async fn encoder(&self) -> Result<Arc<SentenceEncoder>> {
        let encoder = self
            .encoder
            .get_or_try_init(|| async {
                let dir = self
                    .model_dir
                    .clone()
                    .ok_or_else(|| Error::backend(&self.name, "could not locate a sentence encoder model directory"))?;
                let loaded = tokio::task::spawn_blocking(move || SentenceEncoder::load(&dir))
                    .await
                    .map_err(|e| Error::backend(&self.name, e))?
                    .map_err(|e| Error::backend(&self.name, e))?;
                Ok::<_, Error>(Arc::new(loaded))
            })
            .await?;
        Ok(Arc::clone(encoder))
    }
}

#[async_trait]
impl EmbeddingProvider for SentenceEncoderProvider {
    fn name(&self) -> &str { &self.name }

    fn dimensions(&self, model: &str) -> Option<usize> {
        self.encoder.get().map(|e| e.dim()).or_else(|| model_spec(model).map(|m| m.dimensions))
    }

    async fn embed(&self, texts: &[String], _model: &str) -> Result<Vec<Vec<f32>>> {
        let encoder = self.encoder().await?;
        let texts = texts.to_vec();
        debug!(count = texts.len(), "sentence encoder batch");
        tokio::task::spawn_blocking(move || encoder.embed_batch(&texts))
            .await
            .map_err(|e| Error::backend(&self.name, e))?
            .map_err(|e| Error::backend(&self.name, e))
    }
}

/// Explicit path, then `APP_MODEL_DIR` / `MODEL_DIR`, then `models/<model>`.
pub fn resolve_model_dir(explicit: Option<&str>, model: &str) -> Option<PathBuf> {
    let candidates = explicit
        .map(ragdb_core::config::expand_path)
        .into_iter()
        .chain(["APP_MODEL_DIR", "MODEL_DIR"].into_iter().filter_map(|k| std::env::var(k).ok()).map(PathBuf::from))
        .chain([Path::new("models").join(model), Path::new("../models").join(model)]);
    for dir in candidates {
        if dir.exists() { return Some(dir); }
    }
    None
}
