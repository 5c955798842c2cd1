//! Domain types shared by the chunker, indexer, stores and search engines.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;

pub type ChunkId = String;
pub type Meta = HashMap<String, String>;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ChunkType {
    Function,
    Class,
    Import,
    Generic,
}

impl ChunkType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Function => "function",
            Self::Class => "class",
            Self::Import => "import",
            Self::Generic => "generic",
        }
    }
}

impl fmt::Display for ChunkType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

/// Position and identity of a chunk inside its document.
///
/// Lines are 1-based and `end_line` is exclusive, so a chunk spans
/// `start_line..end_line` and `start_line < end_line` always holds.
/// `part` is set when an oversized declaration was split: `(index, total)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    pub chunk_id: ChunkId,
    pub chunk_type: ChunkType,
    pub start_line: usize,
    pub end_line: usize,
    pub language: String,
    pub name: Option<String>,
    pub part: Option<(usize, usize)>,
    pub tokens: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    pub text: String,
    pub metadata: ChunkMetadata,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SymbolKind {
    Function,
    Class,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SymbolInfo {
    pub kind: SymbolKind,
    pub start_line: usize,
    pub chunk_index: usize,
}

pub type SymbolMap = BTreeMap<String, SymbolInfo>;

/// A document handed to the indexer. `content` may be absent, in which case
/// it is fetched from the file collaborator by `path`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentPayload {
    pub path: String,
    pub content: Option<String>,
    pub file_type: String,
}

impl DocumentPayload {
    pub fn new(path: impl Into<String>, content: impl Into<String>) -> Self {
        let path = path.into();
        let file_type = extension_of(&path);
        Self { path, content: Some(content.into()), file_type }
    }

    pub fn by_path(path: impl Into<String>) -> Self {
        let path = path.into();
        let file_type = extension_of(&path);
        Self { path, content: None, file_type }
    }
}

fn extension_of(path: &str) -> String {
    std::path::Path::new(path)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| format!(".{}", e.to_ascii_lowercase()))
        .unwrap_or_default()
}

/// A text unit for the keyword side of the hybrid engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexedText {
    pub id: String,
    pub content: String,
    pub metadata: Meta,
}

/// A row written to a vector store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorRecord {
    pub id: String,
    pub doc_path: String,
    pub text: String,
    pub vector: Vec<f32>,
    pub metadata: Meta,
}

/// A similarity hit returned by a vector store; `similarity` is in `[0, 1]`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorMatch {
    pub id: String,
    pub text: String,
    pub similarity: f32,
    pub metadata: Meta,
}

/// Which engine produced a result.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ResultType {
    Semantic,
    Keyword,
    Bm25,
    Hybrid,
}

impl ResultType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Semantic => "semantic",
            Self::Keyword => "keyword",
            Self::Bm25 => "bm25",
            Self::Hybrid => "hybrid",
        }
    }
}

impl fmt::Display for ResultType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

impl std::str::FromStr for ResultType {
    type Err = crate::error::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "semantic" | "vector" => Ok(Self::Semantic),
            "keyword" | "text" => Ok(Self::Keyword),
            "bm25" => Ok(Self::Bm25),
            "hybrid" => Ok(Self::Hybrid),
            other => Err(crate::error::Error::Operation(format!("unknown search type '{other}'"))),
        }
    }
}

/// The surface returned by every search path. Higher `score` is better.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResult {
    pub id: String,
    pub content: String,
    pub score: f32,
    #[serde(rename = "type")]
    pub result_type: ResultType,
    pub metadata: Meta,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Success,
    PartialSuccess,
    Failed,
    Cancelled,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DocumentFailure {
    pub path: String,
    pub reason: String,
}

/// Outcome of one `index_documents` call. `indexed` and `failed_chunks`
/// count chunks; `documents_indexed` and `failed` count documents.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexRunSummary {
    pub status: RunStatus,
    pub documents_total: usize,
    pub documents_indexed: usize,
    pub failed: usize,
    pub total_chunks: usize,
    pub indexed: usize,
    pub failed_chunks: usize,
    pub failures: Vec<DocumentFailure>,
}

/// Result of benchmarking a single embedding model against a query set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationMetrics {
    pub model_name: String,
    pub retrieval_accuracy: f64,
    pub latency_ms: f64,
    pub memory_usage_mb: f64,
    pub code_specificity: f64,
    pub throughput_per_second: f64,
    pub error_rate: f64,
    pub timestamp: DateTime<Utc>,
}
