//! Static table of known embedding models, ranked by priority (1 = best).

use serde::Serialize;
use std::borrow::Cow;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Modality {
    Text,
    Code,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct ModelSpec {
    pub name: &'static str,
    pub dimensions: usize,
    pub max_tokens: usize,
    pub priority: u8,
    pub code_optimized: bool,
}

pub const MODELS: &[ModelSpec] = &[
    ModelSpec { name: "embeddinggemma:latest", dimensions: 1024, max_tokens: 2048, priority: 1, code_optimized: true },
    ModelSpec { name: "nomic-embed-text", dimensions: 768, max_tokens: 8192, priority: 2, code_optimized: false },
    ModelSpec { name: "mxbai-embed-large", dimensions: 1024, max_tokens: 512, priority: 2, code_optimized: false },
    ModelSpec { name: "bge-m3", dimensions: 1024, max_tokens: 8192, priority: 3, code_optimized: false },
    ModelSpec { name: "text-embedding-3-small", dimensions: 1536, max_tokens: 8191, priority: 3, code_optimized: false },
    ModelSpec { name: "all-MiniLM-L6-v2", dimensions: 384, max_tokens: 256, priority: 4, code_optimized: false },
    ModelSpec { name: "all-mpnet-base-v2", dimensions: 768, max_tokens: 384, priority: 4, code_optimized: false },
];

/// Looks a model up by exact name, then by its last path segment
/// (`sentence-transformers/all-MiniLM-L6-v2` resolves to `all-MiniLM-L6-v2`).
pub fn model_spec(name: &str) -> Option<&'static ModelSpec> {
    let short = name.rsplit('/').next().unwrap_or(name);
    MODELS.iter().find(|m| m.name == name || m.name == short)
}

/// Highest ranked model for a modality; code prefers code-optimized models.
pub fn best_model_for(modality: Modality) -> &'static ModelSpec {
    let mut ranked: Vec<&ModelSpec> = MODELS.iter().collect();
    ranked.sort_by_key(|m| (modality == Modality::Code && !m.code_optimized, m.priority));
    ranked[0]
}

/// Rough token estimate used by the input guard.
pub fn estimate_tokens(text: &str) -> usize {
    let words = text.split_whitespace().count();
    (words as f64 * 1.3).ceil() as usize
}

/// Truncates `text` by whole words so that its estimate fits `max_tokens`.
pub fn truncate_to_tokens(text: &str, max_tokens: usize) -> Cow<'_, str> {
    if estimate_tokens(text) <= max_tokens {
        return Cow::Borrowed(text);
    }
    let keep = ((max_tokens as f64) / 1.3).floor() as usize;
    Cow::Owned(text.split_whitespace().take(keep).collect::<Vec<_>>().join(" "))
}
