//! Chunk, embed and store documents in bounded-concurrency batches.
//!
//! A run prepares every payload up front (content lookup, chunking, removal
//! of the document's previous vectors), then drives all batches through
//! `buffer_unordered`. Each batch is retried with exponential backoff and
//! lands on the dead-letter list when its attempts run out; the rest of the
//! run carries on. Run aggregates are folded in once every batch finished.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use futures::stream::{self, StreamExt};
use serde::Serialize;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use ragdb_chunk::{ChunkerStats, CodeChunker};
use ragdb_core::config::{IndexerConfig, RagConfig};
use ragdb_core::error::{Error, Result};
use ragdb_core::traits::{Embedder, FileContentSource, TextSink, VectorStore};
use ragdb_core::types::{
    Chunk, DocumentFailure, DocumentPayload, IndexRunSummary, IndexedText, Meta, RunStatus, VectorRecord,
};

const LATENCY_EMA_ALPHA: f64 = 0.1;

#[derive(Debug, Clone, Serialize)]
pub struct IndexerStats {
    pub total_chunks: usize,
    pub total_documents: usize,
    /// Mean chunk length in characters.
    pub avg_chunk_size: f64,
    pub failed_documents: usize,
    pub dead_letters: usize,
    pub avg_batch_latency_ms: f64,
    pub paused: bool,
    pub chunker: ChunkerStats,
}

/// A batch that exhausted its attempts.
#[derive(Debug, Clone)]
pub struct DeadLetter {
    pub doc_path: String,
    pub file_type: String,
    pub first_index: usize,
    pub chunks: Vec<Chunk>,
    pub attempts: u32,
    pub last_error: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RetryReport {
    pub retried: usize,
    pub recovered: usize,
    pub remaining: usize,
}

/// Store id of a chunk; unique across documents.
pub fn record_id(doc_path: &str, chunk_id: &str) -> String { format!("{doc_path}#{chunk_id}") }

/// Metadata written with every chunk, shared by the vector and text sides.
pub fn chunk_metadata(chunk: &Chunk, doc_path: &str, file_type: &str, chunk_index: usize) -> Meta {
    let m = &chunk.metadata;
    let mut meta = Meta::new();
    meta.insert("chunk_id".into(), record_id(doc_path, &m.chunk_id));
    meta.insert("document_id".into(), doc_path.to_string());
    meta.insert("chunk_index".into(), chunk_index.to_string());
    meta.insert("chunk_type".into(), m.chunk_type.as_str().to_string());
    meta.insert("start_line".into(), m.start_line.to_string());
    meta.insert("end_line".into(), m.end_line.to_string());
    meta.insert("language".into(), m.language.clone());
    meta.insert("tokens".into(), m.tokens.to_string());
    meta.insert("file_type".into(), file_type.to_string());
    if let Some(name) = &m.name {
        meta.insert("name".into(), name.clone());
    }
    if let Some((i, total)) = m.part {
        meta.insert("part".into(), format!("{}/{total}", i + 1));
    }
    meta
}

struct Batch {
    doc: usize,
    doc_path: String,
    file_type: String,
    first_index: usize,
    chunks: Vec<Chunk>,
}

impl Batch {
    fn from_letter(doc: usize, letter: DeadLetter) -> Self {
        Self { doc, doc_path: letter.doc_path, file_type: letter.file_type, first_index: letter.first_index, chunks: letter.chunks }
    }
}

enum BatchResult {
    Written { latency_ms: f64 },
    Failed(DeadLetter),
    Cancelled,
}

struct BatchOutcome {
    doc: usize,
    chunks: usize,
    chars: usize,
    result: BatchResult,
}

/// Per-document tally for one run.
#[derive(Default)]
struct DocRun {
    path: String,
    chunks: usize,
    written: usize,
    chars: usize,
    failed: usize,
    cancelled: usize,
    failure: Option<String>,
    skipped: Option<String>,
    not_started: bool,
}

#[derive(Debug, Clone, Copy, Default)]
struct DocTotals {
    chunks: usize,
    chars: usize,
}

#[derive(Default)]
struct Aggregates {
    documents: HashMap<String, DocTotals>,
    failed_documents: usize,
    latency_ema_ms: Option<f64>,
    dead_letters: Vec<DeadLetter>,
}

impl Aggregates {
    fn record_latency(&mut self, ms: f64) {
        self.latency_ema_ms = Some(match self.latency_ema_ms {
            None => ms,
            Some(prev) => LATENCY_EMA_ALPHA * ms + (1.0 - LATENCY_EMA_ALPHA) * prev,
        });
    }
}

pub struct DocumentIndexer {
    config: IndexerConfig,
    chunker: CodeChunker,
    embedder: Arc<dyn Embedder>,
    store: Arc<dyn VectorStore>,
    files: Option<Arc<dyn FileContentSource>>,
    text_sink: Option<Arc<dyn TextSink>>,
    paused: watch::Sender<bool>,
    aggregates: Mutex<Aggregates>,
}

impl DocumentIndexer {
    pub fn new(config: IndexerConfig, chunker: CodeChunker, embedder: Arc<dyn Embedder>, store: Arc<dyn VectorStore>) -> Self {
        let (paused, _) = watch::channel(false);
        Self { config, chunker, embedder, store, files: None, text_sink: None, paused, aggregates: Mutex::new(Aggregates::default()) }
    }

    pub fn from_config(config: &RagConfig, embedder: Arc<dyn Embedder>, store: Arc<dyn VectorStore>) -> Self {
        Self::new(config.indexer.clone(), CodeChunker::new(config.chunker.clone()), embedder, store)
    }

    /// Payloads without inline content are resolved through `source`.
    #[must_use]
    pub fn with_file_source(mut self, source: Arc<dyn FileContentSource>) -> Self {
        self.files = Some(source);
        self
    }

    /// Every written batch is mirrored into `sink`.
    #[must_use]
    pub fn with_text_sink(mut self, sink: Arc<dyn TextSink>) -> Self {
        self.text_sink = Some(sink);
        self
    }

    fn aggregates(&self) -> MutexGuard<'_, Aggregates> { self.aggregates.lock().unwrap_or_else(PoisonError::into_inner) }

    pub async fn index_documents(&self, payloads: Vec<DocumentPayload>) -> Result<IndexRunSummary> {
        self.index_documents_with_cancel(payloads, CancellationToken::new()).await
    }

    /// Cancellation is honored between batches; vectors already written stay.
    pub async fn index_documents_with_cancel(
        &self,
        payloads: Vec<DocumentPayload>,
        token: CancellationToken,
    ) -> Result<IndexRunSummary> {
        let batch_size = self.config.batch_size_text.max(1);
        let mut docs: Vec<DocRun> = Vec::with_capacity(payloads.len());
        let mut batches = Vec::new();

        for payload in &payloads {
            let doc = docs.len();
            let mut run = DocRun { path: payload.path.clone(), ..DocRun::default() };
            if token.is_cancelled() {
                run.not_started = true;
                docs.push(run);
                continue;
            }
            match self.prepare(payload).await {
                Ok(chunks) => {
                    run.chunks = chunks.len();
                    for (n, group) in chunks.chunks(batch_size).enumerate() {
                        batches.push(Batch {
                            doc,
                            doc_path: payload.path.clone(),
                            file_type: payload.file_type.clone(),
                            first_index: n * batch_size,
                            chunks: group.to_vec(),
                        });
                    }
                }
                Err(e) => {
                    warn!(path = %payload.path, error = %e, "document skipped");
                    run.skipped = Some(e.to_string());
                }
            }
            docs.push(run);
        }

        let outcomes: Vec<BatchOutcome> = stream::iter(batches)
            .map(|batch| self.run_batch(batch, &token))
            .buffer_unordered(self.config.concurrency.max(1))
            .collect()
            .await;

        let mut latencies = Vec::new();
        let mut dead = Vec::new();
        for outcome in outcomes {
            let run = &mut docs[outcome.doc];
            match outcome.result {
                BatchResult::Written { latency_ms } => {
                    run.written += outcome.chunks;
                    run.chars += outcome.chars;
                    latencies.push(latency_ms);
                }
                BatchResult::Failed(letter) => {
                    run.failed += outcome.chunks;
                    run.failure.get_or_insert_with(|| letter.last_error.clone());
                    dead.push(letter);
                }
                BatchResult::Cancelled => run.cancelled += outcome.chunks,
            }
        }

        let summary = summarize(&docs, token.is_cancelled());
        {
            let mut agg = self.aggregates();
            for run in docs.iter().filter(|r| r.skipped.is_none() && !r.not_started) {
                agg.documents.insert(run.path.clone(), DocTotals { chunks: run.written, chars: run.chars });
            }
            agg.failed_documents += summary.failed;
            for ms in latencies {
                agg.record_latency(ms);
            }
            agg.dead_letters.extend(dead);
        }
        info!(
            status = ?summary.status,
            documents = summary.documents_total,
            indexed_documents = summary.documents_indexed,
            failed = summary.failed,
            chunks = summary.indexed,
            failed_chunks = summary.failed_chunks,
            "index run finished"
        );
        Ok(summary)
    }

    async fn resolve_content(&self, payload: &DocumentPayload) -> Option<String> {
        if let Some(content) = &payload.content {
            return Some(content.clone());
        }
        let files = self.files.as_ref()?;
        match files.get_cached_content(&payload.path).await {
            Some(content) => Some(content),
            None => files.get_file_content(&payload.path).await,
        }
    }

    /// Content, chunks, and removal of the document's previous entries. A
    /// document whose content is gone loses its stored entries as well.
    async fn prepare(&self, payload: &DocumentPayload) -> Result<Vec<Chunk>> {
        let skipped = |reason: String| Error::DocumentSkipped { path: payload.path.clone(), reason };
        let Some(content) = self.resolve_content(payload).await else {
            self.purge(&payload.path).await;
            return Err(skipped("content unavailable".into()));
        };
        let doc = DocumentPayload { path: payload.path.clone(), content: Some(content), file_type: payload.file_type.clone() };
        let (chunks, _) = self.chunker.chunk_document(&doc);

        let removed = self
            .store
            .delete_document(&payload.path)
            .await
            .map_err(|e| skipped(format!("previous vectors not removed: {e}")))?;
        if let Some(sink) = &self.text_sink {
            sink.remove_texts(&payload.path).await.map_err(|e| skipped(format!("previous texts not removed: {e}")))?;
        }
        if removed > 0 {
            debug!(path = %payload.path, removed, "replaced previous vectors");
        }
        Ok(chunks)
    }

    async fn purge(&self, doc_path: &str) {
        match self.remove_document(doc_path).await {
            Ok(0) => {}
            Ok(removed) => info!(path = doc_path, removed, "removed entries of unreadable document"),
            Err(e) => warn!(path = doc_path, error = %e, "stale entries not removed"),
        }
    }

    /// Resolves when not paused; `false` if cancelled while waiting.
    async fn wait_if_paused(&self, token: &CancellationToken) -> bool {
        let mut rx = self.paused.subscribe();
        loop {
            if token.is_cancelled() {
                return false;
            }
            if !*rx.borrow_and_update() {
                return true;
            }
            tokio::select! {
                changed = rx.changed() => if changed.is_err() { return true },
                () = token.cancelled() => return false,
            }
        }
    }

    fn backoff(&self, attempt: u32) -> Duration {
        let secs = self.config.backoff_base_s * 2f64.powi(i32::try_from(attempt).unwrap_or(i32::MAX));
        Duration::try_from_secs_f64(secs).unwrap_or_default()
    }

    async fn run_batch(&self, batch: Batch, token: &CancellationToken) -> BatchOutcome {
        let chunks = batch.chunks.len();
        let chars: usize = batch.chunks.iter().map(|c| c.text.chars().count()).sum();
        let outcome = |result| BatchOutcome { doc: batch.doc, chunks, chars, result };

        if !self.wait_if_paused(token).await {
            return outcome(BatchResult::Cancelled);
        }
        let max_attempts = self.config.max_attempts.max(1);
        let started = Instant::now();
        let mut last_error = String::new();
        for attempt in 1..=max_attempts {
            match self.write_batch(&batch).await {
                Ok(()) => {
                    let latency_ms = started.elapsed().as_secs_f64() * 1000.0;
                    return outcome(BatchResult::Written { latency_ms });
                }
                Err(e) => {
                    last_error = e.to_string();
                    if attempt < max_attempts {
                        let delay = self.backoff(attempt);
                        debug!(path = %batch.doc_path, attempt, ?delay, error = %e, "batch write failed, retrying");
                        tokio::select! {
                            () = tokio::time::sleep(delay) => {}
                            () = token.cancelled() => return outcome(BatchResult::Cancelled),
                        }
                    }
                }
            }
        }

        let failure = Error::BatchWriteFailure { attempts: max_attempts, reason: last_error };
        error!(path = %batch.doc_path, first_chunk = batch.first_index, error = %failure, "batch moved to dead letters");
        let letter = DeadLetter {
            doc_path: batch.doc_path.clone(),
            file_type: batch.file_type.clone(),
            first_index: batch.first_index,
            chunks: batch.chunks.clone(),
            attempts: max_attempts,
            last_error: failure.to_string(),
        };
        outcome(BatchResult::Failed(letter))
    }

    async fn write_batch(&self, batch: &Batch) -> Result<()> {
        let texts: Vec<String> = batch.chunks.iter().map(|c| c.text.clone()).collect();
        let vectors = self.embedder.embed_batch(&texts).await?;
        if vectors.len() != texts.len() {
            return Err(Error::Operation(format!("embedder returned {} vectors for {} chunks", vectors.len(), texts.len())));
        }

        let mut records = Vec::with_capacity(texts.len());
        let mut docs = Vec::with_capacity(texts.len());
        for (i, (chunk, vector)) in batch.chunks.iter().zip(vectors).enumerate() {
            let id = record_id(&batch.doc_path, &chunk.metadata.chunk_id);
            let metadata = chunk_metadata(chunk, &batch.doc_path, &batch.file_type, batch.first_index + i);
            if self.text_sink.is_some() {
                docs.push(IndexedText { id: id.clone(), content: chunk.text.clone(), metadata: metadata.clone() });
            }
            records.push(VectorRecord { id, doc_path: batch.doc_path.clone(), text: chunk.text.clone(), vector, metadata });
        }
        self.store.add(records).await?;
        if let Some(sink) = &self.text_sink {
            sink.index_texts(docs).await?;
        }
        Ok(())
    }

    pub fn pause(&self) {
        self.paused.send_replace(true);
        info!("document indexer paused");
    }

    pub fn resume(&self) {
        self.paused.send_replace(false);
        info!("document indexer resumed");
    }

    pub fn is_paused(&self) -> bool { *self.paused.borrow() }

    pub fn get_stats(&self) -> IndexerStats {
        let agg = self.aggregates();
        let total_chunks: usize = agg.documents.values().map(|d| d.chunks).sum();
        let total_chars: usize = agg.documents.values().map(|d| d.chars).sum();
        IndexerStats {
            total_chunks,
            total_documents: agg.documents.len(),
            avg_chunk_size: if total_chunks == 0 { 0.0 } else { total_chars as f64 / total_chunks as f64 },
            failed_documents: agg.failed_documents,
            dead_letters: agg.dead_letters.len(),
            avg_batch_latency_ms: agg.latency_ema_ms.unwrap_or(0.0),
            paused: self.is_paused(),
            chunker: self.chunker.stats(),
        }
    }

    pub fn dead_letters(&self) -> Vec<DeadLetter> { self.aggregates().dead_letters.clone() }

    /// Re-runs every dead-lettered batch once through the normal retry loop.
    pub async fn retry_dead_letters(&self) -> RetryReport {
        let letters = std::mem::take(&mut self.aggregates().dead_letters);
        let retried = letters.len();
        if retried == 0 {
            return RetryReport::default();
        }
        let paths: Vec<String> = letters.iter().map(|l| l.doc_path.clone()).collect();
        let token = CancellationToken::new();
        let outcomes: Vec<BatchOutcome> = stream::iter(letters.into_iter().enumerate().map(|(i, l)| Batch::from_letter(i, l)))
            .map(|batch| self.run_batch(batch, &token))
            .buffer_unordered(self.config.concurrency.max(1))
            .collect()
            .await;

        let mut agg = self.aggregates();
        let mut recovered = 0;
        for outcome in outcomes {
            match outcome.result {
                BatchResult::Written { latency_ms } => {
                    recovered += 1;
                    let totals = agg.documents.entry(paths[outcome.doc].clone()).or_default();
                    totals.chunks += outcome.chunks;
                    totals.chars += outcome.chars;
                    agg.record_latency(latency_ms);
                }
                BatchResult::Failed(letter) => agg.dead_letters.push(letter),
                BatchResult::Cancelled => {}
            }
        }
        let report = RetryReport { retried, recovered, remaining: agg.dead_letters.len() };
        info!(retried, recovered, remaining = report.remaining, "dead letters retried");
        report
    }

    /// Deletes the document's vectors (and texts); returns how many vectors went.
    pub async fn remove_document(&self, doc_path: &str) -> Result<usize> {
        let removed = self.store.delete_document(doc_path).await?;
        if let Some(sink) = &self.text_sink {
            sink.remove_texts(doc_path).await?;
        }
        let mut agg = self.aggregates();
        agg.documents.remove(doc_path);
        agg.dead_letters.retain(|l| l.doc_path != doc_path);
        Ok(removed)
    }

    /// Empties the store and resets every running aggregate.
    pub async fn clear_index(&self) -> Result<()> {
        self.store.clear().await?;
        if let Some(sink) = &self.text_sink {
            sink.clear_texts().await?;
        }
        *self.aggregates() = Aggregates::default();
        info!("index cleared");
        Ok(())
    }

    pub async fn health_check(&self) -> bool {
        match self.store.count().await {
            Ok(_) => true,
            Err(e) => {
                warn!(error = %e, "vector store health check failed");
                false
            }
        }
    }
}

fn summarize(docs: &[DocRun], cancelled: bool) -> IndexRunSummary {
    let mut summary = IndexRunSummary {
        status: RunStatus::Success,
        documents_total: docs.len(),
        documents_indexed: 0,
        failed: 0,
        total_chunks: 0,
        indexed: 0,
        failed_chunks: 0,
        failures: Vec::new(),
    };
    let mut interrupted = false;
    for run in docs {
        summary.total_chunks += run.chunks;
        summary.indexed += run.written;
        summary.failed_chunks += run.failed;
        if let Some(reason) = &run.skipped {
            summary.failed += 1;
            summary.failures.push(DocumentFailure { path: run.path.clone(), reason: reason.clone() });
        } else if run.failed > 0 {
            summary.failed += 1;
            let reason = format!(
                "{} of {} chunks not written: {}",
                run.failed,
                run.chunks,
                run.failure.as_deref().unwrap_or("unknown error")
            );
            summary.failures.push(DocumentFailure { path: run.path.clone(), reason });
        } else if run.not_started || run.cancelled > 0 {
            interrupted = true;
        } else {
            summary.documents_indexed += 1;
        }
    }
    summary.status = if cancelled && interrupted {
        RunStatus::Cancelled
    } else if summary.failed == 0 {
        RunStatus::Success
    } else if summary.documents_indexed == 0 && summary.indexed == 0 {
        RunStatus::Failed
    } else {
        RunStatus::PartialSuccess
    };
    summary
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_reflects_partial_failure() {
        let ok = DocRun { path: "a".into(), chunks: 2, written: 2, ..DocRun::default() };
        let bad = DocRun { path: "b".into(), skipped: Some("content unavailable".into()), ..DocRun::default() };
        let summary = summarize(&[ok, bad], false);
        assert_eq!(summary.status, RunStatus::PartialSuccess);
        assert_eq!(summary.documents_indexed, 1);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.failures[0].path, "b");
    }

    #[test]
    fn all_skipped_is_a_failed_run() {
        let bad = DocRun { path: "b".into(), skipped: Some("x".into()), ..DocRun::default() };
        assert_eq!(summarize(&[bad], false).status, RunStatus::Failed);
        assert_eq!(summarize(&[], false).status, RunStatus::Success);
    }

    #[test]
    fn cancellation_only_counts_when_work_was_left() {
        let done = DocRun { path: "a".into(), chunks: 1, written: 1, ..DocRun::default() };
        let pending = DocRun { path: "b".into(), not_started: true, ..DocRun::default() };
        assert_eq!(summarize(&[done], true).status, RunStatus::Success);
        let done = DocRun { path: "a".into(), chunks: 1, written: 1, ..DocRun::default() };
        assert_eq!(summarize(&[done, pending], true).status, RunStatus::Cancelled);
    }

    #[test]
    fn latency_is_an_exponential_average() {
        let mut agg = Aggregates::default();
        agg.record_latency(100.0);
        agg.record_latency(200.0);
        let ema = agg.latency_ema_ms.unwrap_or_default();
        assert!((ema - 110.0).abs() < 1e-9);
    }
}
