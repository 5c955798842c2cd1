use std::collections::HashMap;
use std::fs;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use ragdb_chunk::CodeChunker;
use ragdb_core::config::{ChunkerConfig, FilesConfig, IndexerConfig};
use ragdb_core::error::{Error, Result};
use ragdb_core::traits::{Embedder, TextSink, VectorStore};
use ragdb_core::types::{DocumentPayload, IndexedText, RunStatus, VectorMatch, VectorRecord};
use ragdb_embed::EmbeddingService;
use ragdb_indexer::{DocumentIndexer, FileIndexService};
use ragdb_vector::InMemoryVectorStore;

const DIM: usize = 8;

fn config() -> IndexerConfig { IndexerConfig { batch_size_text: 2, concurrency: 2, max_attempts: 3, backoff_base_s: 0.0 } }

fn embedder() -> Arc<dyn Embedder> { Arc::new(EmbeddingService::mock(DIM)) }

fn indexer(store: Arc<dyn VectorStore>, config: IndexerConfig) -> DocumentIndexer {
    DocumentIndexer::new(config, CodeChunker::new(ChunkerConfig::default()), embedder(), store)
}

fn python_source(functions: usize) -> String {
    (0..functions).map(|i| format!("def f{i}(x):\n    return x + {i}\n")).collect::<Vec<_>>().join("\n")
}

/// Delegates to an in-memory store; `add` can be made to fail on demand and
/// in-flight adds are tracked.
#[derive(Default)]
struct TestStore {
    inner: InMemoryVectorStore,
    fail_adds: AtomicBool,
    failures_left: AtomicUsize,
    add_delay_ms: u64,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    adds: AtomicUsize,
}

impl TestStore {
    fn flaky(failures: usize) -> Self {
        let store = Self::default();
        store.failures_left.store(failures, Ordering::SeqCst);
        store
    }

    fn slow(add_delay_ms: u64) -> Self { Self { add_delay_ms, ..Self::default() } }
}

#[async_trait]
impl VectorStore for TestStore {
    async fn add(&self, records: Vec<VectorRecord>) -> Result<()> {
        self.adds.fetch_add(1, Ordering::SeqCst);
        if self.fail_adds.load(Ordering::SeqCst) {
            return Err(Error::VectorStore("store offline".into()));
        }
        if self.failures_left.load(Ordering::SeqCst) > 0 {
            self.failures_left.fetch_sub(1, Ordering::SeqCst);
            return Err(Error::VectorStore("transient write error".into()));
        }
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if self.add_delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(self.add_delay_ms)).await;
        }
        let result = self.inner.add(records).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }

    async fn similarity_search(&self, vector: &[f32], k: usize) -> Result<Vec<VectorMatch>> {
        self.inner.similarity_search(vector, k).await
    }

    async fn delete_document(&self, doc_path: &str) -> Result<usize> { self.inner.delete_document(doc_path).await }

    async fn clear(&self) -> Result<()> { self.inner.clear().await }

    async fn count(&self) -> Result<usize> { self.inner.count().await }
}

#[derive(Default)]
struct RecordingSink {
    docs: Mutex<HashMap<String, IndexedText>>,
}

impl RecordingSink {
    fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.docs.lock().expect("lock").keys().cloned().collect();
        ids.sort();
        ids
    }
}

#[async_trait]
impl TextSink for RecordingSink {
    async fn index_texts(&self, docs: Vec<IndexedText>) -> Result<()> {
        let mut map = self.docs.lock().expect("lock");
        for d in docs {
            map.insert(d.id.clone(), d);
        }
        Ok(())
    }

    async fn remove_texts(&self, doc_path: &str) -> Result<usize> {
        let mut map = self.docs.lock().expect("lock");
        let before = map.len();
        map.retain(|_, d| d.metadata.get("document_id").map(String::as_str) != Some(doc_path));
        Ok(before - map.len())
    }

    async fn clear_texts(&self) -> Result<()> {
        self.docs.lock().expect("lock").clear();
        Ok(())
    }
}

#[tokio::test]
async fn one_unreadable_document_does_not_fail_the_run() {
    let tmp = TempDir::new().expect("tmp");
    let mut payloads = Vec::new();
    for i in 0..9 {
        let path = tmp.path().join(format!("mod{i}.py"));
        fs::write(&path, python_source(1)).expect("write");
        payloads.push(DocumentPayload::by_path(path.to_string_lossy()));
    }
    let missing = tmp.path().join("missing.py").to_string_lossy().into_owned();
    payloads.insert(4, DocumentPayload::by_path(missing.clone()));

    let files = Arc::new(FileIndexService::new(FilesConfig::default()));
    let store = Arc::new(InMemoryVectorStore::new());
    let indexer = indexer(store.clone(), config()).with_file_source(files);

    let summary = indexer.index_documents(payloads).await.expect("run");
    assert_eq!(summary.status, RunStatus::PartialSuccess);
    assert_eq!(summary.documents_total, 10);
    assert_eq!(summary.documents_indexed, 9);
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.failures.len(), 1);
    assert_eq!(summary.failures[0].path, missing);
    assert_eq!(summary.total_chunks, 9);
    assert_eq!(summary.indexed, 9);
    assert_eq!(summary.failed_chunks, 0);
    assert_eq!(store.count().await.expect("count"), 9);

    let stats = indexer.get_stats();
    assert_eq!(stats.total_documents, 9);
    assert_eq!(stats.total_chunks, 9);
    assert_eq!(stats.failed_documents, 1);
    assert!(stats.avg_chunk_size > 0.0);
}

#[tokio::test]
async fn deleted_file_loses_its_vectors_and_texts() {
    let tmp = TempDir::new().expect("tmp");
    let gone = tmp.path().join("gone.py");
    fs::write(&gone, python_source(1)).expect("write");
    fs::write(tmp.path().join("kept.py"), python_source(1)).expect("write");
    let gone = gone.to_string_lossy().into_owned();
    let dirs = [tmp.path().to_path_buf()];

    let files = Arc::new(FileIndexService::new(FilesConfig::default()));
    let store = Arc::new(InMemoryVectorStore::new());
    let sink = Arc::new(RecordingSink::default());
    let indexer = indexer(store.clone(), config()).with_file_source(files.clone()).with_text_sink(sink.clone());

    files.index_files(&dirs, None).await.expect("discover");
    indexer.index_documents(files.payloads()).await.expect("first run");
    assert_eq!(store.count().await.expect("count"), 2);
    assert_eq!(sink.ids().len(), 2);

    fs::remove_file(&gone).expect("remove");
    let report = files.index_files(&dirs, None).await.expect("rediscover");
    assert_eq!(report.removed_files, [gone.clone()]);
    assert!(!files.indexed_files().contains(&gone));

    let summary = indexer.index_documents(vec![DocumentPayload::by_path(gone.clone())]).await.expect("run");
    assert_eq!(summary.status, RunStatus::Failed);
    assert_eq!(summary.indexed, 0);
    assert_eq!(store.count().await.expect("count"), 1);
    assert!(sink.ids().iter().all(|id| !id.starts_with(&gone)));
    assert_eq!(indexer.get_stats().total_documents, 1);
}

#[tokio::test]
async fn written_vectors_carry_chunk_metadata() {
    let store = Arc::new(InMemoryVectorStore::new());
    let indexer = indexer(store.clone(), config());
    let summary = indexer.index_documents(vec![DocumentPayload::new("src/calc.py", python_source(1))]).await.expect("run");
    assert_eq!(summary.status, RunStatus::Success);

    let hits = store.similarity_search(&vec![1.0; DIM], 5).await.expect("search");
    assert_eq!(hits.len(), 1);
    let meta = &hits[0].metadata;
    assert_eq!(hits[0].id, "src/calc.py#func_f0_1");
    assert_eq!(meta.get("chunk_id").map(String::as_str), Some("src/calc.py#func_f0_1"));
    assert_eq!(meta.get("document_id").map(String::as_str), Some("src/calc.py"));
    assert_eq!(meta.get("chunk_type").map(String::as_str), Some("function"));
    assert_eq!(meta.get("language").map(String::as_str), Some("python"));
    assert_eq!(meta.get("name").map(String::as_str), Some("f0"));
    assert_eq!(meta.get("chunk_index").map(String::as_str), Some("0"));
}

#[tokio::test]
async fn reindexing_a_path_replaces_its_vectors() {
    let store = Arc::new(InMemoryVectorStore::new());
    let indexer = indexer(store.clone(), config());

    indexer.index_documents(vec![DocumentPayload::new("a.py", python_source(3))]).await.expect("first");
    assert_eq!(store.count().await.expect("count"), 3);

    indexer.index_documents(vec![DocumentPayload::new("a.py", python_source(1))]).await.expect("second");
    assert_eq!(store.count().await.expect("count"), 1);
    let stats = indexer.get_stats();
    assert_eq!(stats.total_documents, 1);
    assert_eq!(stats.total_chunks, 1);
}

#[tokio::test]
async fn transient_store_errors_are_retried() {
    let store = Arc::new(TestStore::flaky(2));
    let indexer = indexer(store.clone(), config());
    let summary = indexer.index_documents(vec![DocumentPayload::new("a.py", python_source(2))]).await.expect("run");

    assert_eq!(summary.status, RunStatus::Success);
    assert_eq!(summary.indexed, 2);
    assert_eq!(store.adds.load(Ordering::SeqCst), 3);
    assert!(indexer.dead_letters().is_empty());
}

#[tokio::test]
async fn exhausted_batches_go_to_dead_letters_and_can_be_retried() {
    let store = Arc::new(TestStore::default());
    store.fail_adds.store(true, Ordering::SeqCst);
    let indexer = indexer(store.clone(), config());

    let summary = indexer.index_documents(vec![DocumentPayload::new("a.py", python_source(3))]).await.expect("run");
    assert_eq!(summary.status, RunStatus::Failed);
    assert_eq!(summary.total_chunks, 3);
    assert_eq!(summary.failed_chunks, 3);
    assert_eq!(summary.indexed, 0);
    assert!(summary.failures[0].reason.contains("store offline"));
    // Two batches (2 + 1 chunks), three attempts each.
    assert_eq!(store.adds.load(Ordering::SeqCst), 6);

    let letters = indexer.dead_letters();
    assert_eq!(letters.len(), 2);
    assert!(letters.iter().all(|l| l.attempts == 3 && l.doc_path == "a.py"));
    assert_eq!(indexer.get_stats().dead_letters, 2);

    store.fail_adds.store(false, Ordering::SeqCst);
    let report = indexer.retry_dead_letters().await;
    assert_eq!(report.retried, 2);
    assert_eq!(report.recovered, 2);
    assert_eq!(report.remaining, 0);
    assert_eq!(store.count().await.expect("count"), 3);
    let stats = indexer.get_stats();
    assert_eq!(stats.dead_letters, 0);
    assert_eq!(stats.total_chunks, 3);
}

#[tokio::test]
async fn concurrency_is_bounded() {
    let store = Arc::new(TestStore::slow(20));
    let cfg = IndexerConfig { batch_size_text: 1, concurrency: 2, ..config() };
    let indexer = indexer(store.clone(), cfg);
    let docs = (0..3).map(|i| DocumentPayload::new(format!("m{i}.py"), python_source(2))).collect();

    let summary = indexer.index_documents(docs).await.expect("run");
    assert_eq!(summary.indexed, 6);
    let peak = store.max_in_flight.load(Ordering::SeqCst);
    assert!((1..=2).contains(&peak), "peak in-flight batches was {peak}");
    assert!(indexer.get_stats().avg_batch_latency_ms > 0.0);
}

#[tokio::test]
async fn a_cancelled_run_reports_cancelled() {
    let store = Arc::new(InMemoryVectorStore::new());
    let indexer = indexer(store.clone(), config());
    let token = CancellationToken::new();
    token.cancel();

    let summary = indexer
        .index_documents_with_cancel(vec![DocumentPayload::new("a.py", python_source(2))], token)
        .await
        .expect("run");
    assert_eq!(summary.status, RunStatus::Cancelled);
    assert_eq!(summary.indexed, 0);
    assert_eq!(store.count().await.expect("count"), 0);
}

#[tokio::test]
async fn paused_indexer_waits_for_resume() {
    let store = Arc::new(InMemoryVectorStore::new());
    let indexer = Arc::new(indexer(store.clone(), config()));
    indexer.pause();
    assert!(indexer.get_stats().paused);

    let running = {
        let indexer = Arc::clone(&indexer);
        tokio::spawn(async move { indexer.index_documents(vec![DocumentPayload::new("a.py", python_source(2))]).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(store.count().await.expect("count"), 0);

    indexer.resume();
    let summary = running.await.expect("join").expect("run");
    assert_eq!(summary.status, RunStatus::Success);
    assert_eq!(store.count().await.expect("count"), 2);
    assert!(!indexer.is_paused());
}

#[tokio::test]
async fn cancelling_while_paused_stops_the_run() {
    let store = Arc::new(InMemoryVectorStore::new());
    let indexer = Arc::new(indexer(store.clone(), config()));
    indexer.pause();
    let token = CancellationToken::new();

    let running = {
        let indexer = Arc::clone(&indexer);
        let token = token.clone();
        tokio::spawn(async move {
            indexer.index_documents_with_cancel(vec![DocumentPayload::new("a.py", python_source(2))], token).await
        })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    token.cancel();
    let summary = running.await.expect("join").expect("run");
    assert_eq!(summary.status, RunStatus::Cancelled);
    assert_eq!(store.count().await.expect("count"), 0);
}

#[tokio::test]
async fn text_sink_follows_the_vector_side() {
    let store = Arc::new(InMemoryVectorStore::new());
    let sink = Arc::new(RecordingSink::default());
    let indexer = indexer(store.clone(), config()).with_text_sink(sink.clone());

    indexer
        .index_documents(vec![DocumentPayload::new("a.py", python_source(2)), DocumentPayload::new("b.py", python_source(1))])
        .await
        .expect("run");
    assert_eq!(sink.ids(), ["a.py#func_f0_1", "a.py#func_f1_4", "b.py#func_f0_1"]);

    assert_eq!(indexer.remove_document("a.py").await.expect("remove"), 2);
    assert_eq!(sink.ids(), ["b.py#func_f0_1"]);
    assert_eq!(indexer.get_stats().total_documents, 1);

    indexer.clear_index().await.expect("clear");
    assert!(sink.ids().is_empty());
    assert_eq!(store.count().await.expect("count"), 0);
    let stats = indexer.get_stats();
    assert_eq!(stats.total_documents, 0);
    assert_eq!(stats.failed_documents, 0);
    assert!(indexer.health_check().await);
}

#[tokio::test]
async fn empty_documents_index_without_chunks() {
    let store = Arc::new(InMemoryVectorStore::new());
    let indexer = indexer(store.clone(), config());
    let summary = indexer.index_documents(vec![DocumentPayload::new("empty.md", "")]).await.expect("run");
    assert_eq!(summary.status, RunStatus::Success);
    assert_eq!(summary.documents_indexed, 1);
    assert_eq!(summary.total_chunks, 0);
}
