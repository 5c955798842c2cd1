//! Document chunking for the indexing pipeline.
//!
//! Code is split at declaration boundaries (tree-sitter where a grammar is
//! compiled in, regex heuristics otherwise); everything else, and any gap
//! between declarations, goes through the line-based generic splitter.

pub mod chunker;
pub mod generic;
pub mod heuristic;
pub mod language;
pub mod structural;

pub use chunker::{ChunkerStats, CodeChunker};
pub use generic::estimate_tokens;
pub use language::{Family, Language};
pub use structural::{Declaration, StructuralChunker, TreeSitterChunker};
