//! ragdb-text
//!
//! Lexical search: an in-memory keyword index (idf scoring) and a RAM-backed
//! tantivy BM25 index sharing the same stop-word list.

pub mod bm25;
pub mod keyword;
pub mod tantivy_utils;

pub use bm25::Bm25Index;
pub use keyword::{tokenize, KeywordIndex};
