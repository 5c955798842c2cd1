//! Shared configuration, error taxonomy, domain types and async traits for the
//! ragdb indexing and hybrid search workspace.
//!
//! Configuration uses Figment to merge `config.toml` + `config.<env>.toml` +
//! `APP_*` env vars, then applies the flat embedding/chunker/indexer keys.

pub mod config;
pub mod error;
pub mod traits;
pub mod types;

pub use error::{Error, Result};
