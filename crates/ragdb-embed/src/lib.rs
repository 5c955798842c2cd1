//! Embedding layer: a registry of prioritized backends and the service that
//! resolves embeddings through them, with caching and a mock fallback.
//!
//! Providers:
//! - local model server (Ollama HTTP API)
//! - in-process sentence encoder (candle, XLM-Roberta weights)
//! - cloud APIs (OpenAI-compatible, Hugging Face inference)

pub mod cache;
pub mod device;
pub mod models;
pub mod pool;
pub mod providers;
pub mod registry;
pub mod service;
pub mod tokenize;

pub use cache::{CacheStats, EmbeddingCache};
pub use models::{best_model_for, model_spec, Modality, ModelSpec};
pub use pool::masked_mean_l2;
pub use providers::{build_provider, mock_vector};
pub use registry::BackendRegistry;
pub use service::{EmbeddingService, EmbeddingStats};
