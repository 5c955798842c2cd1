use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Invalid configuration: {}", errors.join("; "))]
    InvalidConfig { errors: Vec<String> },

    #[error("Embedding backend '{backend}' unavailable: {reason}")]
    BackendUnavailable { backend: String, reason: String },

    #[error("Embedding unavailable, all backends exhausted: {0}")]
    EmbeddingUnavailable(String),

    #[error("Document skipped: {path}: {reason}")]
    DocumentSkipped { path: String, reason: String },

    #[error("Batch write failed after {attempts} attempts: {reason}")]
    BatchWriteFailure { attempts: u32, reason: String },

    #[error("Vector store error: {0}")]
    VectorStore(String),

    #[error("Index error: {0}")]
    Index(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Operation failed: {0}")]
    Operation(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl Error {
    pub fn config(message: impl Into<String>) -> Self {
        Self::InvalidConfig { errors: vec![message.into()] }
    }

    pub fn backend(backend: impl Into<String>, reason: impl ToString) -> Self {
        Self::BackendUnavailable { backend: backend.into(), reason: reason.to_string() }
    }

    /// True for failures the fallback chain or a retry loop may recover from.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::BackendUnavailable { .. } | Self::VectorStore(_) | Self::Io(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
