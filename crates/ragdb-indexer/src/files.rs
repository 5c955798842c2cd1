//! File discovery and content lookup for the indexer.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use moka::future::Cache;
use serde::Serialize;
use tracing::{debug, info, warn};
use walkdir::{DirEntry, WalkDir};

use ragdb_core::config::FilesConfig;
use ragdb_core::error::{Error, Result};
use ragdb_core::traits::FileContentSource;
use ragdb_core::types::DocumentPayload;

pub const SKIP_DIRS: &[&str] = &[".git", "node_modules", "target", "__pycache__", ".venv", "venv", "dist", "build"];

const CONTENT_CACHE_ENTRIES: u64 = 1024;

#[derive(Debug, Clone, Default, Serialize)]
pub struct FileIndexReport {
    pub success: bool,
    pub indexed_files: usize,
    pub skipped_files: usize,
    /// Previously indexed paths under the walked roots that are gone or no
    /// longer match; their entries should leave the index.
    pub removed_files: Vec<String>,
    pub errors: Vec<String>,
}

/// Tracks which files are eligible for indexing and serves their content
/// from a bounded cache.
pub struct FileIndexService {
    config: FilesConfig,
    indexed: RwLock<BTreeSet<String>>,
    cache: Cache<String, Arc<String>>,
}

fn normalize_ext(ext: &str) -> String {
    let ext = ext.trim().to_ascii_lowercase();
    if ext.starts_with('.') { ext } else { format!(".{ext}") }
}

fn is_skipped_dir(entry: &DirEntry) -> bool {
    entry.depth() > 0 && entry.file_type().is_dir() && entry.file_name().to_str().is_some_and(|n| SKIP_DIRS.contains(&n))
}

struct Walk {
    files: Vec<String>,
    skipped: usize,
    errors: Vec<String>,
}

fn walk(directories: &[PathBuf], extensions: &BTreeSet<String>, max_bytes: u64) -> Walk {
    let mut out = Walk { files: Vec::new(), skipped: 0, errors: Vec::new() };
    for root in directories {
        if !root.is_dir() {
            out.errors.push(format!("not a directory: {}", root.display()));
            continue;
        }
        for entry in WalkDir::new(root).into_iter().filter_entry(|e| !is_skipped_dir(e)) {
            let entry = match entry {
                Ok(e) => e,
                Err(e) => {
                    out.errors.push(e.to_string());
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }
            let path = entry.path();
            let ext = path.extension().and_then(|s| s.to_str()).map(normalize_ext).unwrap_or_default();
            if !extensions.contains(&ext) {
                continue;
            }
            match entry.metadata() {
                Ok(meta) if meta.len() <= max_bytes => out.files.push(path.to_string_lossy().into_owned()),
                Ok(meta) => {
                    debug!(path = %path.display(), bytes = meta.len(), "file over size limit");
                    out.skipped += 1;
                }
                Err(e) => {
                    out.errors.push(format!("{}: {e}", path.display()));
                    out.skipped += 1;
                }
            }
        }
    }
    out
}

impl FileIndexService {
    pub fn new(config: FilesConfig) -> Self {
        Self { config, indexed: RwLock::new(BTreeSet::new()), cache: Cache::new(CONTENT_CACHE_ENTRIES) }
    }

    pub fn config(&self) -> &FilesConfig { &self.config }

    /// Walks `directories` and records every file with a matching extension.
    /// `extensions` overrides the configured list when given. Known paths
    /// under a walked root that the walk no longer finds are dropped and
    /// reported in `removed_files`.
    pub async fn index_files(&self, directories: &[PathBuf], extensions: Option<&[String]>) -> Result<FileIndexReport> {
        let wanted: BTreeSet<String> = extensions.unwrap_or(&self.config.extensions).iter().map(|e| normalize_ext(e)).collect();
        let dirs = directories.to_vec();
        let max_bytes = self.config.max_file_bytes;
        let walked = tokio::task::spawn_blocking(move || walk(&dirs, &wanted, max_bytes))
            .await
            .map_err(|e| Error::Operation(format!("directory walk aborted: {e}")))?;

        for err in &walked.errors {
            warn!(error = %err, "file discovery problem");
        }
        let indexed_files = walked.files.len();
        let found: BTreeSet<String> = walked.files.into_iter().collect();
        let removed_files: Vec<String> = {
            let mut indexed = self.indexed.write().unwrap_or_else(PoisonError::into_inner);
            let gone: Vec<String> = indexed
                .iter()
                .filter(|p| !found.contains(*p) && directories.iter().any(|root| Path::new(p.as_str()).starts_with(root)))
                .cloned()
                .collect();
            for path in &gone {
                indexed.remove(path);
            }
            indexed.extend(found.iter().cloned());
            gone
        };
        // Re-indexing must not serve stale content.
        for path in found.iter().chain(&removed_files) {
            self.cache.invalidate(path).await;
        }
        if !removed_files.is_empty() {
            info!(removed = removed_files.len(), "files no longer present");
        }
        info!(indexed_files, skipped_files = walked.skipped, "file discovery finished");
        Ok(FileIndexReport {
            success: walked.errors.is_empty(),
            indexed_files,
            skipped_files: walked.skipped,
            removed_files,
            errors: walked.errors,
        })
    }

    /// Paths whose file name or content contains every whitespace-separated
    /// term, case-insensitively, in path order.
    pub async fn search_files(&self, query: &str, max_results: usize) -> Vec<String> {
        let terms: Vec<String> = query.split_whitespace().map(str::to_lowercase).collect();
        if terms.is_empty() || max_results == 0 {
            return Vec::new();
        }
        let mut hits = Vec::new();
        for path in self.indexed_files() {
            let name = Path::new(&path).file_name().map(|n| n.to_string_lossy().to_lowercase()).unwrap_or_default();
            let content = self.get_file_content(&path).await.map(|c| c.to_lowercase()).unwrap_or_default();
            if terms.iter().all(|t| name.contains(t.as_str()) || content.contains(t.as_str())) {
                hits.push(path);
                if hits.len() == max_results {
                    break;
                }
            }
        }
        hits
    }

    pub fn indexed_files(&self) -> Vec<String> {
        self.indexed.read().unwrap_or_else(PoisonError::into_inner).iter().cloned().collect()
    }

    pub fn payloads(&self) -> Vec<DocumentPayload> { self.indexed_files().into_iter().map(DocumentPayload::by_path).collect() }

    pub async fn forget(&self, path: &str) -> bool {
        self.cache.invalidate(path).await;
        self.indexed.write().unwrap_or_else(PoisonError::into_inner).remove(path)
    }

    pub fn clear(&self) {
        self.indexed.write().unwrap_or_else(PoisonError::into_inner).clear();
        self.cache.invalidate_all();
    }
}

#[async_trait]
impl FileContentSource for FileIndexService {
    /// Reads from disk on a cache miss; undecodable bytes are replaced.
    async fn get_file_content(&self, path: &str) -> Option<String> {
        if let Some(hit) = self.cache.get(path).await {
            return Some(hit.as_ref().clone());
        }
        match tokio::fs::read(path).await {
            Ok(bytes) => {
                let content = String::from_utf8_lossy(&bytes).into_owned();
                self.cache.insert(path.to_string(), Arc::new(content.clone())).await;
                Some(content)
            }
            Err(e) => {
                debug!(path, error = %e, "file content unavailable");
                None
            }
        }
    }

    async fn get_cached_content(&self, path: &str) -> Option<String> { self.cache.get(path).await.map(|c| c.as_ref().clone()) }
}
