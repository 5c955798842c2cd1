//! Embedding service: cache, input guard, and the priority-ordered fallback
//! chain over the registry's backends, with a deterministic mock path.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, warn};

use ragdb_core::config::{BackendConfig, EmbeddingBackendsConfig};
use ragdb_core::error::{Error, Result};
use ragdb_core::traits::{Embedder, EmbeddingProvider};

use crate::cache::{CacheStats, EmbeddingCache};
use crate::models::{best_model_for, model_spec, truncate_to_tokens, Modality};
use crate::providers::{build_provider, mock_vector};
use crate::registry::BackendRegistry;

pub const MOCK_BACKEND: &str = "mock";

#[derive(Debug, Clone, Serialize)]
pub struct EmbeddingStats {
    pub enabled: bool,
    pub active_backend: String,
    pub best_model: String,
    pub dimensions: usize,
    pub total_requests: u64,
    pub total_errors: u64,
    pub fallbacks: u64,
    pub mock_vectors: u64,
    pub last_latency_ms: f64,
    pub provider_usage: BTreeMap<String, u64>,
    pub cache: CacheStats,
}

#[derive(Default)]
struct Counters {
    requests: AtomicU64,
    errors: AtomicU64,
    fallbacks: AtomicU64,
    mock_vectors: AtomicU64,
    last_latency_us: AtomicU64,
    usage: Mutex<BTreeMap<String, u64>>,
    last_backend: Mutex<Option<String>>,
}

impl Counters {
    fn record_success(&self, backend: &str, started: Instant) {
        let elapsed = u64::try_from(started.elapsed().as_micros()).unwrap_or(u64::MAX);
        self.last_latency_us.store(elapsed, Ordering::Relaxed);
        *self.usage.lock().unwrap_or_else(PoisonError::into_inner).entry(backend.to_string()).or_insert(0) += 1;
        *self.last_backend.lock().unwrap_or_else(PoisonError::into_inner) = Some(backend.to_string());
    }
}

pub struct EmbeddingService {
    registry: Arc<BackendRegistry>,
    providers: HashMap<String, Arc<dyn EmbeddingProvider>>,
    cache: EmbeddingCache,
    counters: Counters,
}

impl EmbeddingService {
    /// Validates the config and builds a provider for every configured
    /// backend. Backends whose provider cannot be built are left out of the
    /// chain (they fail over like any unavailable backend).
    pub fn new(config: EmbeddingBackendsConfig) -> Result<Self> {
        config.validate()?;
        let mut providers = Vec::new();
        for backend in &config.backends {
            match build_provider(backend) {
                Ok(p) => providers.push(p),
                Err(e) => debug!(backend = %backend.name, error = %e, "embedding provider not built"),
            }
        }
        Ok(Self::with_providers(Arc::new(BackendRegistry::new(config)), providers))
    }

    /// Uses caller-supplied providers, matched to backends by `name()`.
    pub fn with_providers(registry: Arc<BackendRegistry>, providers: Vec<Arc<dyn EmbeddingProvider>>) -> Self {
        let cache = EmbeddingCache::new(registry.cache_capacity());
        let providers = providers.into_iter().map(|p| (p.name().to_string(), p)).collect();
        Self { registry, providers, cache, counters: Counters::default() }
    }

    /// Mock-mode service with no backends, for tests and offline runs.
    pub fn mock(dim: usize) -> Self {
        let config = EmbeddingBackendsConfig { mock_mode: true, mock_dimension: dim, default_backend: None, backends: Vec::new(), ..EmbeddingBackendsConfig::default() };
        Self::with_providers(Arc::new(BackendRegistry::new(config)), Vec::new())
    }

    pub fn registry(&self) -> &Arc<BackendRegistry> { &self.registry }

    /// Primary backend's default model; without a primary, the best table
    /// entry for the modality, or `mock` when only the mock path is left.
    pub fn get_best_model(&self, modality: Modality) -> String {
        match self.registry.get_primary_backend() {
            Some(b) if !b.default_model.is_empty() => b.default_model,
            None if self.registry.mock_mode() => MOCK_BACKEND.to_string(),
            _ => best_model_for(modality).name.to_string(),
        }
    }

    /// Vector length of the primary backend's model; the mock dimension
    /// when no backend is enabled.
    pub fn dimensions(&self) -> usize {
        let Some(primary) = self.registry.get_primary_backend() else {
            return self.registry.mock_dimension();
        };
        let model = self.get_best_model(Modality::Text);
        self.providers
            .get(&primary.name)
            .and_then(|p| p.dimensions(&model))
            .or_else(|| model_spec(&model).map(|m| m.dimensions))
            .unwrap_or_else(|| self.registry.mock_dimension())
    }

    pub async fn embed_text(&self, text: &str, model: Option<&str>) -> Result<Vec<f32>> {
        let mut out = self.embed_batch_with_model(&[text.to_string()], model).await?;
        out.pop().ok_or_else(|| Error::Operation("embedding batch returned no vector".into()))
    }

    pub async fn embed_code(&self, text: &str) -> Result<Vec<f32>> {
        let model = self.get_best_model(Modality::Code);
        self.embed_text(text, Some(&model)).await
    }

    pub async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.embed_batch_with_model(texts, None).await
    }

    /// Same length and order as `texts`. Empty texts map to the zero vector,
    /// cached texts are served locally, and a failing group is retried one
    /// text at a time before giving up. Vectors are cached under the model
    /// that produced them; mock vectors are not cached.
    pub async fn embed_batch_with_model(&self, texts: &[String], model: Option<&str>) -> Result<Vec<Vec<f32>>> {
        let cache_model = model.map_or_else(|| self.get_best_model(Modality::Text), str::to_string);
        let dim = self.dimensions();
        let mut out: Vec<Option<Vec<f32>>> = vec![None; texts.len()];
        let mut pending = Vec::new();
        for (i, text) in texts.iter().enumerate() {
            if text.trim().is_empty() {
                out[i] = Some(vec![0.0; dim]);
            } else if let Some(v) = self.cache.get(&cache_model, text).await {
                out[i] = Some(v);
            } else {
                pending.push(i);
            }
        }

        let group_size = self.registry.get_primary_backend().map_or(16, |b| b.batch_size.max(1));
        for group in pending.chunks(group_size) {
            let group_texts: Vec<String> = group.iter().map(|&i| texts[i].clone()).collect();
            let resolved: Vec<(Vec<f32>, Option<String>)> = match self.resolve(&group_texts, model).await {
                Ok((vectors, answered)) => vectors.into_iter().map(|v| (v, answered.clone())).collect(),
                Err(e) if group.len() > 1 => {
                    warn!(error = %e, size = group.len(), "batch embedding failed, retrying texts individually");
                    let mut single = Vec::with_capacity(group.len());
                    for text in &group_texts {
                        let (vectors, answered) = self.resolve(std::slice::from_ref(text), model).await?;
                        single.extend(vectors.into_iter().map(|v| (v, answered.clone())));
                    }
                    single
                }
                Err(e) => return Err(e),
            };
            for ((&i, (vector, answered)), text) in group.iter().zip(resolved).zip(&group_texts) {
                if let Some(answered) = answered {
                    self.cache.put(&answered, text, vector.clone()).await;
                }
                out[i] = Some(vector);
            }
        }

        out.into_iter()
            .map(|v| v.ok_or_else(|| Error::Operation("missing embedding in batch output".into())))
            .collect()
    }

    /// Walks the fallback chain for one group. Returns the vectors and the
    /// model that produced them (`None` for the mock path).
    async fn resolve(&self, texts: &[String], model: Option<&str>) -> Result<(Vec<Vec<f32>>, Option<String>)> {
        self.counters.requests.fetch_add(1, Ordering::Relaxed);
        let started = Instant::now();
        let chain = self.registry.resolution_chain();
        let mut last_error = if chain.is_empty() { "no embedding backend enabled".to_string() } else { String::new() };

        for (position, backend) in chain.iter().enumerate() {
            if position > 0 {
                self.counters.fallbacks.fetch_add(1, Ordering::Relaxed);
                debug!(backend = %backend.name, "falling back to next embedding backend");
            }
            let Some(provider) = self.providers.get(&backend.name) else {
                last_error = format!("{}: provider not available", backend.name);
                continue;
            };
            let backend_model = model_for_backend(backend, model, position == 0);
            match self.try_backend(backend, provider.as_ref(), texts, backend_model).await {
                Ok(vectors) => {
                    self.counters.record_success(&backend.name, started);
                    return Ok((vectors, Some(backend_model.to_string())));
                }
                Err(e) => last_error = e.to_string(),
            }
        }

        if self.registry.mock_mode() {
            debug!(reason = %last_error, count = texts.len(), "serving mock embeddings");
            self.counters.mock_vectors.fetch_add(texts.len() as u64, Ordering::Relaxed);
            self.counters.record_success(MOCK_BACKEND, started);
            let dim = self.dimensions();
            return Ok((texts.iter().map(|t| mock_vector(t, dim)).collect(), None));
        }
        Err(Error::EmbeddingUnavailable(last_error))
    }

    /// One backend with its timeout and retry policy. Every error or timeout
    /// counts; the last one is returned.
    async fn try_backend(
        &self,
        backend: &BackendConfig,
        provider: &dyn EmbeddingProvider,
        texts: &[String],
        model: &str,
    ) -> Result<Vec<Vec<f32>>> {
        let guarded: Vec<String> = match model_spec(model) {
            Some(spec) => texts.iter().map(|t| truncate_to_tokens(t, spec.max_tokens).into_owned()).collect(),
            None => texts.to_vec(),
        };
        let timeout = Duration::from_secs_f64(backend.timeout_seconds.max(0.001));
        let attempts = u32::try_from(backend.max_retries.max(0)).unwrap_or(u32::MAX).saturating_add(1);
        let mut last = Error::backend(&backend.name, "not attempted");
        for attempt in 0..attempts {
            if attempt > 0 && backend.retry_delay > 0.0 {
                tokio::time::sleep(Duration::from_secs_f64(backend.retry_delay)).await;
            }
            let result = match tokio::time::timeout(timeout, provider.embed(&guarded, model)).await {
                Ok(Ok(vectors)) if vectors.len() == texts.len() => return Ok(vectors),
                Ok(Ok(vectors)) => Error::backend(&backend.name, format!("expected {} vectors, got {}", texts.len(), vectors.len())),
                Ok(Err(e)) => e,
                Err(_) => Error::backend(&backend.name, format!("timed out after {:.1}s", backend.timeout_seconds)),
            };
            self.counters.errors.fetch_add(1, Ordering::Relaxed);
            warn!(backend = %backend.name, attempt = attempt + 1, attempts, error = %result, "embedding backend attempt failed");
            last = result;
        }
        Err(last)
    }

    /// True when at least one enabled backend answers within its timeout.
    pub async fn health_check(&self) -> bool {
        for backend in self.registry.get_enabled_backends() {
            let Some(provider) = self.providers.get(&backend.name) else { continue };
            let timeout = Duration::from_secs_f64(backend.timeout_seconds.max(0.001));
            if matches!(tokio::time::timeout(timeout, provider.health_check(&backend.default_model)).await, Ok(Ok(()))) {
                return true;
            }
        }
        false
    }

    pub fn clear_cache(&self) { self.cache.clear(); }

    pub async fn get_stats(&self) -> EmbeddingStats {
        let c = &self.counters;
        let last_backend = c.last_backend.lock().unwrap_or_else(PoisonError::into_inner).clone();
        let primary = self.registry.resolution_chain().into_iter().next().map(|b| b.name);
        let active_backend = last_backend.or(primary).unwrap_or_else(|| MOCK_BACKEND.to_string());
        EmbeddingStats {
            enabled: active_backend != MOCK_BACKEND,
            active_backend,
            best_model: self.get_best_model(Modality::Text),
            dimensions: self.dimensions(),
            total_requests: c.requests.load(Ordering::Relaxed),
            total_errors: c.errors.load(Ordering::Relaxed),
            fallbacks: c.fallbacks.load(Ordering::Relaxed),
            mock_vectors: c.mock_vectors.load(Ordering::Relaxed),
            last_latency_ms: c.last_latency_us.load(Ordering::Relaxed) as f64 / 1000.0,
            provider_usage: c.usage.lock().unwrap_or_else(PoisonError::into_inner).clone(),
            cache: self.cache.stats().await,
        }
    }
}

/// A requested model goes to the primary backend and to any backend that
/// serves it by default; every other backend uses its own default model.
fn model_for_backend<'a>(backend: &'a BackendConfig, requested: Option<&'a str>, primary: bool) -> &'a str {
    match requested {
        Some(model) if primary || model == backend.default_model => model,
        _ => &backend.default_model,
    }
}

#[async_trait]
impl Embedder for EmbeddingService {
    fn dimensions(&self) -> usize { EmbeddingService::dimensions(self) }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> { EmbeddingService::embed_batch(self, texts).await }
}
