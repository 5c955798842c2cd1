//! Wiring shared by the ragdb binaries: config, tracing and the
//! file → indexer → hybrid engine pipeline.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use indicatif::{ProgressBar, ProgressStyle};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use ragdb_core::config::{expand_path, Config, RagConfig};
use ragdb_core::traits::{Embedder, VectorStore};
use ragdb_core::types::{IndexRunSummary, RunStatus};
use ragdb_embed::EmbeddingService;
use ragdb_hybrid::HybridSearchEngine;
use ragdb_indexer::{DocumentIndexer, FileIndexService};
use ragdb_vector::{InMemoryVectorStore, LanceVectorStore};

/// Payloads handed to the indexer per progress step.
const PROGRESS_STEP: usize = 32;

/// Logs go to stderr; `RUST_LOG` overrides the `info` default.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).try_init();
}

/// Layered settings. `mock` disables every backend and serves mock
/// embeddings so runs work offline.
pub fn load_settings(mock: bool) -> anyhow::Result<RagConfig> {
    let settings = Config::load()?.settings().context("loading settings")?;
    Ok(settings.with_override(|s| {
        if mock {
            s.embedding.mock_mode = true;
            s.embedding.default_backend = None;
            for backend in &mut s.embedding.backends {
                backend.enabled = false;
            }
        }
    }))
}

pub async fn open_store(settings: &RagConfig) -> anyhow::Result<Arc<dyn VectorStore>> {
    match settings.storage.lancedb_dir.as_deref() {
        Some(dir) => {
            let path = expand_path(dir);
            let store = LanceVectorStore::open(&path, &settings.storage.table)
                .await
                .with_context(|| format!("opening LanceDB at {}", path.display()))?;
            info!(path = %path.display(), table = %settings.storage.table, "using LanceDB vector store");
            Ok(Arc::new(store))
        }
        None => Ok(Arc::new(InMemoryVectorStore::new())),
    }
}

pub struct Pipeline {
    pub files: Arc<FileIndexService>,
    pub indexer: DocumentIndexer,
    pub engine: Arc<HybridSearchEngine>,
    pub embeddings: Arc<EmbeddingService>,
}

impl Pipeline {
    pub async fn build(settings: &RagConfig) -> anyhow::Result<Self> {
        let embeddings = Arc::new(EmbeddingService::new(settings.embedding.clone())?);
        let embedder: Arc<dyn Embedder> = embeddings.clone();
        let store = open_store(settings).await?;
        let files = Arc::new(FileIndexService::new(settings.files.clone()));
        let engine = Arc::new(HybridSearchEngine::new(settings.search.clone(), embedder.clone(), store.clone())?);
        let indexer = DocumentIndexer::from_config(settings, embedder, store)
            .with_file_source(files.clone())
            .with_text_sink(engine.clone());
        Ok(Self { files, indexer, engine, embeddings })
    }

    /// Discovers files under `dirs` and indexes them with a progress bar.
    /// Ctrl-C stops the run between batches.
    pub async fn ingest(&self, dirs: &[PathBuf], extensions: Option<&[String]>) -> anyhow::Result<IndexRunSummary> {
        let report = self.files.index_files(dirs, extensions).await?;
        for err in &report.errors {
            warn!(error = %err, "discovery");
        }
        for path in &report.removed_files {
            self.indexer.remove_document(path).await?;
        }
        let payloads = self.files.payloads();

        let token = CancellationToken::new();
        let on_signal = token.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                on_signal.cancel();
            }
        });

        let bar = ProgressBar::new(payloads.len() as u64);
        bar.set_style(ProgressStyle::with_template("{msg} [{bar:40}] {pos}/{len} ({eta})")?);
        bar.set_message("Indexing");

        let mut total = IndexRunSummary {
            status: RunStatus::Success,
            documents_total: 0,
            documents_indexed: 0,
            failed: 0,
            total_chunks: 0,
            indexed: 0,
            failed_chunks: 0,
            failures: Vec::new(),
        };
        for step in payloads.chunks(PROGRESS_STEP) {
            if token.is_cancelled() {
                total.status = RunStatus::Cancelled;
                break;
            }
            let summary = self.indexer.index_documents_with_cancel(step.to_vec(), token.clone()).await?;
            bar.inc(step.len() as u64);
            merge(&mut total, summary);
        }
        bar.finish_and_clear();
        Ok(total)
    }
}

fn merge(total: &mut IndexRunSummary, s: IndexRunSummary) {
    total.documents_total += s.documents_total;
    total.documents_indexed += s.documents_indexed;
    total.failed += s.failed;
    total.total_chunks += s.total_chunks;
    total.indexed += s.indexed;
    total.failed_chunks += s.failed_chunks;
    total.failures.extend(s.failures);
    total.status = match (total.status, s.status) {
        (RunStatus::Cancelled, _) | (_, RunStatus::Cancelled) => RunStatus::Cancelled,
        _ if total.failed == 0 => RunStatus::Success,
        _ if total.documents_indexed == 0 => RunStatus::Failed,
        _ => RunStatus::PartialSuccess,
    };
}

pub fn print_summary(summary: &IndexRunSummary) {
    println!(
        "status: {:?}  documents: {}/{}  chunks: {}/{}",
        summary.status, summary.documents_indexed, summary.documents_total, summary.indexed, summary.total_chunks
    );
    for f in &summary.failures {
        println!("  skipped {}: {}", f.path, f.reason);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ragdb_core::types::DocumentFailure;

    fn summary(status: RunStatus, indexed: usize, failed: usize) -> IndexRunSummary {
        IndexRunSummary {
            status,
            documents_total: indexed + failed,
            documents_indexed: indexed,
            failed,
            total_chunks: indexed,
            indexed,
            failed_chunks: 0,
            failures: (0..failed).map(|i| DocumentFailure { path: format!("f{i}"), reason: "unreadable".into() }).collect(),
        }
    }

    #[test]
    fn merged_status_follows_the_totals() {
        let mut total = summary(RunStatus::Success, 0, 0);
        merge(&mut total, summary(RunStatus::Success, 3, 0));
        assert_eq!(total.status, RunStatus::Success);
        merge(&mut total, summary(RunStatus::Failed, 0, 2));
        assert_eq!(total.status, RunStatus::PartialSuccess);
        assert_eq!((total.documents_total, total.failures.len()), (5, 2));
        merge(&mut total, summary(RunStatus::Cancelled, 0, 0));
        assert_eq!(total.status, RunStatus::Cancelled);
    }
}
