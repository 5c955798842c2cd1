//! ragdb-hybrid
//!
//! Hybrid search over a vector store and the lexical indexes, fused with
//! Reciprocal Rank Fusion. Also hosts the search benchmark and the
//! embedding model evaluation.

pub mod benchmark;
pub mod engine;
pub mod evaluation;
pub mod fusion;

pub use benchmark::{BenchmarkReport, TimingSummary};
pub use engine::{HybridSearchEngine, IndexReport, SearchStatistics};
pub use evaluation::{code_search_benchmark, generate_report, rank_models, sample_corpus, ModelEvaluator, TestQuery};
pub use fusion::{fusion_key, reciprocal_rank_fusion, FusionWeights, KEYWORD_RANK, SEMANTIC_RANK};
