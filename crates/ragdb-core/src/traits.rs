use async_trait::async_trait;

use crate::error::Result;
use crate::types::{IndexedText, VectorMatch, VectorRecord};

/// Anything that turns text into fixed-dimension vectors.
#[async_trait]
pub trait Embedder: Send + Sync {
    fn dimensions(&self) -> usize;
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        let mut out = self.embed_batch(&[text.to_string()]).await?;
        out.pop().ok_or_else(|| crate::error::Error::Operation("embedder returned no vector".into()))
    }
}

/// A single embedding backend (local model server, sentence encoder, cloud API).
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    fn name(&self) -> &str;
    /// Vector length for `model`, when the provider knows it up front.
    fn dimensions(&self, model: &str) -> Option<usize>;
    async fn embed(&self, texts: &[String], model: &str) -> Result<Vec<Vec<f32>>>;

    async fn health_check(&self, model: &str) -> Result<()> {
        self.embed(&["health check".to_string()], model).await.map(|_| ())
    }
}

#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Inserts records, replacing any with the same id.
    async fn add(&self, records: Vec<VectorRecord>) -> Result<()>;
    async fn similarity_search(&self, vector: &[f32], k: usize) -> Result<Vec<VectorMatch>>;
    async fn delete_document(&self, doc_path: &str) -> Result<usize>;
    async fn clear(&self) -> Result<()>;
    async fn count(&self) -> Result<usize>;
}

/// Lexical side of the index, fed alongside the vector store. Document
/// identity is the `document_id` metadata key.
#[async_trait]
pub trait TextSink: Send + Sync {
    async fn index_texts(&self, docs: Vec<IndexedText>) -> Result<()>;
    async fn remove_texts(&self, doc_path: &str) -> Result<usize>;
    async fn clear_texts(&self) -> Result<()>;
}

/// Content lookup delegated to the file indexing service.
#[async_trait]
pub trait FileContentSource: Send + Sync {
    async fn get_file_content(&self, path: &str) -> Option<String>;
    async fn get_cached_content(&self, path: &str) -> Option<String>;
}
