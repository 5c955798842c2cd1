//! Document indexing pipeline and its file discovery collaborator.

pub mod files;
pub mod indexer;

pub use files::{FileIndexReport, FileIndexService, SKIP_DIRS};
pub use indexer::{chunk_metadata, record_id, DeadLetter, DocumentIndexer, IndexerStats, RetryReport};
