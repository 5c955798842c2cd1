use std::sync::Arc;

use async_trait::async_trait;

use ragdb_chunk::CodeChunker;
use ragdb_core::config::{BackendConfig, ChunkerConfig, EmbeddingBackendsConfig, IndexerConfig, ProviderKind, SearchConfig};
use ragdb_core::error::{Error, Result};
use ragdb_core::traits::{Embedder, EmbeddingProvider, VectorStore};
use ragdb_core::types::{DocumentPayload, EvaluationMetrics, IndexedText, Meta, ResultType, RunStatus, VectorMatch, VectorRecord};
use ragdb_embed::{mock_vector, BackendRegistry, EmbeddingService};
use ragdb_hybrid::evaluation::estimate_memory_usage;
use ragdb_hybrid::{
    code_search_benchmark, generate_report, rank_models, sample_corpus, FusionWeights, HybridSearchEngine, ModelEvaluator,
    KEYWORD_RANK, SEMANTIC_RANK,
};
use ragdb_indexer::DocumentIndexer;
use ragdb_vector::InMemoryVectorStore;

const DIM: usize = 16;

const FIB: &str = "def fibonacci(n):\n    if n < 2:\n        return n\n    return fibonacci(n - 1) + fibonacci(n - 2)\n";
const GREET: &str = "def greet(name):\n    return 'hello ' + name\n";

/// Embeds every query as the unit x axis.
struct AxisEmbedder;

#[async_trait]
impl Embedder for AxisEmbedder {
    fn dimensions(&self) -> usize { 2 }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> { Ok(texts.iter().map(|_| vec![1.0, 0.0]).collect()) }
}

struct OfflineStore;

#[async_trait]
impl VectorStore for OfflineStore {
    async fn add(&self, _records: Vec<VectorRecord>) -> Result<()> { Err(Error::VectorStore("offline".into())) }

    async fn similarity_search(&self, _vector: &[f32], _k: usize) -> Result<Vec<VectorMatch>> {
        Err(Error::VectorStore("offline".into()))
    }

    async fn delete_document(&self, _doc_path: &str) -> Result<usize> { Ok(0) }

    async fn clear(&self) -> Result<()> { Ok(()) }

    async fn count(&self) -> Result<usize> { Err(Error::VectorStore("offline".into())) }
}

fn meta(pairs: &[(&str, &str)]) -> Meta { pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect() }

fn text(id: &str, content: &str, lang: &str) -> IndexedText {
    IndexedText { id: id.into(), content: content.into(), metadata: meta(&[("chunk_id", id), ("document_id", id), ("lang", lang)]) }
}

/// Semantic order for the x-axis query is a, b, c; only c mentions "parser".
async fn ranked_fixture(with_keywords: bool) -> HybridSearchEngine {
    let store = Arc::new(InMemoryVectorStore::new());
    let docs = [text("a", "alpha widget", "python"), text("b", "beta widget", "python"), text("c", "gamma parser", "rust")];
    let vectors = [vec![1.0, 0.0], vec![0.8, 0.6], vec![0.6, 0.8]];
    let records = docs
        .iter()
        .zip(vectors)
        .map(|(d, vector)| VectorRecord {
            id: d.id.clone(),
            doc_path: d.id.clone(),
            text: d.content.clone(),
            vector,
            metadata: d.metadata.clone(),
        })
        .collect();
    store.add(records).await.expect("seed vectors");
    let engine = HybridSearchEngine::new(SearchConfig::default(), Arc::new(AxisEmbedder), store).expect("engine");
    if with_keywords {
        engine.index_documents(docs.to_vec()).await.expect("keyword side");
    }
    engine
}

fn ids(results: &[ragdb_core::types::SearchResult]) -> Vec<&str> { results.iter().map(|r| r.id.as_str()).collect() }

#[tokio::test]
async fn indexed_code_is_found_by_hybrid_search() {
    let store = Arc::new(InMemoryVectorStore::new());
    let embedder: Arc<dyn Embedder> = Arc::new(EmbeddingService::mock(DIM));
    let engine = Arc::new(HybridSearchEngine::new(SearchConfig::default(), embedder.clone(), store.clone()).expect("engine"));
    let indexer = DocumentIndexer::new(IndexerConfig::default(), CodeChunker::new(ChunkerConfig::default()), embedder, store)
        .with_text_sink(engine.clone());

    let summary = indexer
        .index_documents(vec![DocumentPayload::new("math.py", FIB), DocumentPayload::new("greet.py", GREET)])
        .await
        .expect("index");
    assert_eq!(summary.status, RunStatus::Success);

    let results = engine.hybrid_search("fibonacci", 5, None).await;
    assert!(!results.is_empty());
    assert!(results.len() <= 5);
    assert!(results.iter().all(|r| r.result_type == ResultType::Hybrid));
    assert!(results[0].score > 0.0);
    let fib = results.iter().find(|r| r.content.contains("fibonacci")).expect("fibonacci chunk");
    assert!(fib.metadata.contains_key(SEMANTIC_RANK));
    assert_eq!(fib.metadata.get(KEYWORD_RANK).map(String::as_str), Some("1"));
    assert_eq!(fib.metadata.get("document_id").map(String::as_str), Some("math.py"));

    let stats = engine.get_statistics().await;
    assert_eq!(stats.hybrid_searches, 1);
    assert_eq!(stats.vector_count, Some(summary.indexed));
    assert_eq!(stats.keyword_documents, summary.indexed);
}

#[tokio::test]
async fn reindexing_through_the_indexer_replaces_keyword_entries() {
    let store = Arc::new(InMemoryVectorStore::new());
    let embedder: Arc<dyn Embedder> = Arc::new(EmbeddingService::mock(DIM));
    let engine = Arc::new(HybridSearchEngine::new(SearchConfig::default(), embedder.clone(), store.clone()).expect("engine"));
    let indexer = DocumentIndexer::new(IndexerConfig::default(), CodeChunker::new(ChunkerConfig::default()), embedder, store)
        .with_text_sink(engine.clone());

    indexer.index_documents(vec![DocumentPayload::new("math.py", FIB)]).await.expect("first");
    assert!(!engine.keyword_search("fibonacci", 5).is_empty());

    let factorial = "def factorial(n):\n    return 1 if n < 2 else n * factorial(n - 1)\n";
    indexer.index_documents(vec![DocumentPayload::new("math.py", factorial)]).await.expect("second");
    assert!(engine.keyword_search("fibonacci", 5).is_empty());
    assert_eq!(engine.keyword_search("factorial", 5).len(), 1);

    indexer.remove_document("math.py").await.expect("remove");
    assert!(engine.keyword_search("factorial", 5).is_empty());
}

#[tokio::test]
async fn fusion_rewards_agreement_between_rankings() {
    let engine = ranked_fixture(true).await;

    let fused = engine.hybrid_search("parser", 3, None).await;
    assert_eq!(ids(&fused), ["c", "a", "b"]);
    let expected_c = 0.7 / 63.0 + 0.3 / 61.0;
    assert!((fused[0].score - expected_c).abs() < 1e-6, "score={}", fused[0].score);
    assert_eq!(fused[0].metadata.get(SEMANTIC_RANK).map(String::as_str), Some("3"));

    let semantic_only = engine.hybrid_search("parser", 3, Some(FusionWeights::new(1.0, 0.0))).await;
    assert_eq!(ids(&semantic_only), ["a", "b", "c"]);

    assert_eq!(engine.hybrid_search("parser", 1, None).await.len(), 1);
}

#[tokio::test]
async fn empty_keyword_side_falls_back_to_semantic_order() {
    let engine = ranked_fixture(false).await;
    let fused = engine.hybrid_search("parser", 5, None).await;
    assert_eq!(ids(&fused), ["a", "b", "c"]);
    assert!(fused.iter().all(|r| r.result_type == ResultType::Hybrid && !r.metadata.contains_key(KEYWORD_RANK)));
}

#[tokio::test]
async fn failing_vector_store_degrades_to_keyword_results() {
    let engine = HybridSearchEngine::new(SearchConfig::default(), Arc::new(AxisEmbedder), Arc::new(OfflineStore)).expect("engine");
    engine.index_documents(vec![text("c", "gamma parser", "rust")]).await.expect("keyword side");

    let fused = engine.hybrid_search("parser", 5, None).await;
    assert_eq!(ids(&fused), ["c"]);
    assert!(engine.search("parser", ResultType::Semantic, 5).await.is_err());

    let stats = engine.get_statistics().await;
    assert_eq!(stats.semantic_failures, 2);
    assert_eq!(stats.vector_count, None);
    assert_eq!(stats.searches_performed, 2);
}

#[tokio::test]
async fn search_dispatches_by_type_and_filters_on_metadata() {
    let engine = ranked_fixture(true).await;

    let semantic = engine.search("anything", ResultType::Semantic, 2).await.expect("semantic");
    assert_eq!(ids(&semantic), ["a", "b"]);
    assert!(semantic.iter().all(|r| r.result_type == ResultType::Semantic));

    let keyword = engine.search("widget", ResultType::Keyword, 5).await.expect("keyword");
    assert_eq!(ids(&keyword), ["a", "b"]);

    let bm25 = engine.search("widget", ResultType::Bm25, 5).await.expect("bm25");
    assert_eq!(bm25.len(), 2);
    assert!(bm25.iter().all(|r| r.result_type == ResultType::Bm25));

    let rust_only = engine.search_with_filters("parser", ResultType::Hybrid, 5, &meta(&[("lang", "rust")])).await.expect("filtered");
    assert_eq!(ids(&rust_only), ["c"]);
    let none = engine.search_with_filters("widget", ResultType::Keyword, 5, &meta(&[("lang", "go")])).await.expect("filtered");
    assert!(none.is_empty());

    let stats = engine.get_statistics().await;
    assert_eq!((stats.semantic_searches, stats.keyword_searches, stats.bm25_searches), (1, 2, 1));
    assert_eq!(stats.hybrid_searches, 1);
}

#[tokio::test]
async fn index_documents_reports_empty_texts() {
    let engine = HybridSearchEngine::new(SearchConfig::default(), Arc::new(AxisEmbedder), Arc::new(InMemoryVectorStore::new())).expect("engine");
    let report = engine
        .index_documents(vec![text("a", "alpha widget", "python"), text("blank", "   ", "python")])
        .await
        .expect("index");
    assert_eq!((report.indexed, report.total), (1, 2));
    assert_eq!(report.errors.len(), 1);
    assert!(report.errors[0].starts_with("blank"));
}

async fn lexical_sizes(engine: &HybridSearchEngine) -> (u64, u64) {
    let stats = engine.get_statistics().await;
    (stats.keyword_documents as u64, stats.bm25_documents)
}

#[tokio::test]
async fn keyword_and_bm25_indexes_stay_in_step() {
    let engine = ranked_fixture(true).await;
    assert_eq!(lexical_sizes(&engine).await, (3, 3));

    engine.index_documents(vec![text("a", "alpha gadget", "python")]).await.expect("upsert");
    assert_eq!(lexical_sizes(&engine).await, (3, 3));
    assert_eq!(ids(&engine.keyword_search("gadget", 5)), ["a"]);
    assert_eq!(ids(&engine.bm25_search("gadget", 5).expect("bm25")), ["a"]);
    assert!(engine.bm25_search("widget", 5).expect("bm25").iter().all(|r| r.id != "a"));

    engine.index_documents(vec![text("blank", "  ", "rust")]).await.expect("rejected text");
    assert_eq!(lexical_sizes(&engine).await, (3, 3));

    engine.remove_document("b").expect("remove");
    assert_eq!(lexical_sizes(&engine).await, (2, 2));
}

#[tokio::test]
async fn remove_and_clear_touch_only_the_keyword_side() {
    let engine = ranked_fixture(true).await;
    assert_eq!(engine.remove_document("c").expect("remove"), 1);
    assert!(engine.keyword_search("parser", 5).is_empty());
    assert_eq!(engine.remove_document("missing").expect("remove"), 0);

    engine.clear_index().expect("clear");
    let stats = engine.get_statistics().await;
    assert_eq!((stats.keyword_documents, stats.bm25_documents, stats.tracked_documents), (0, 0, 0));
    assert_eq!(stats.vector_count, Some(3));
}

#[tokio::test]
async fn benchmark_leaves_counters_untouched() {
    let engine = ranked_fixture(true).await;
    let queries = vec!["parser".to_string(), "widget".to_string()];
    let report = engine.benchmark_search_performance(&queries, 3).await;
    for timing in [report.semantic_only, report.keyword_only, report.hybrid] {
        assert_eq!(timing.total_queries, 6);
        assert!(timing.min_ms <= timing.average_ms && timing.average_ms <= timing.max_ms);
    }
    let stats = engine.get_statistics().await;
    assert_eq!(stats.searches_performed, 0);
    assert_eq!(stats.keyword_documents, 3);
}

/// Serves mock vectors except for the model named `broken`.
struct ModelAwareProvider;

#[async_trait]
impl EmbeddingProvider for ModelAwareProvider {
    fn name(&self) -> &str { "stub" }

    fn dimensions(&self, _model: &str) -> Option<usize> { Some(DIM) }

    async fn embed(&self, texts: &[String], model: &str) -> Result<Vec<Vec<f32>>> {
        if model == "broken" {
            return Err(Error::backend("stub", "model not loaded"));
        }
        Ok(texts.iter().map(|t| mock_vector(t, DIM)).collect())
    }
}

fn stub_service() -> Arc<EmbeddingService> {
    let backend = BackendConfig {
        base_url: Some("http://127.0.0.1:9".into()),
        default_model: "nomic-embed-text".into(),
        max_retries: 0,
        retry_delay: 0.0,
        ..BackendConfig::new("stub", ProviderKind::LocalServer)
    };
    let config = EmbeddingBackendsConfig { mock_mode: false, default_backend: None, backends: vec![backend], ..EmbeddingBackendsConfig::default() };
    Arc::new(EmbeddingService::with_providers(Arc::new(BackendRegistry::new(config)), vec![Arc::new(ModelAwareProvider)]))
}

#[tokio::test]
async fn evaluation_measures_each_model_and_ranks_failures_last() {
    let evaluator = ModelEvaluator::new(stub_service()).with_top_k(3);
    let corpus = sample_corpus();
    let queries = code_search_benchmark();

    let good = evaluator.evaluate_model("nomic-embed-text", &corpus, &queries).await.expect("evaluate");
    assert_eq!(good.error_rate, 0.0);
    assert_eq!(good.memory_usage_mb, 1.5);
    assert!((0.0..=1.0).contains(&good.retrieval_accuracy));
    assert!((good.code_specificity - (0.5 + 0.3 * good.retrieval_accuracy)).abs() < 1e-9);
    assert!(good.throughput_per_second > 0.0);

    let models = vec!["broken".to_string(), "embeddinggemma:latest".to_string()];
    let results = evaluator.evaluate_models(&models, &corpus, &queries).await;
    assert_eq!(results.len(), 2);
    assert_eq!(results[0].error_rate, 1.0);
    assert_eq!(results[0].retrieval_accuracy, 0.0);
    assert!(results[1].code_specificity >= 0.7);

    let ranking = rank_models(&results);
    assert_eq!(ranking[0].0, "embeddinggemma:latest");
    assert_eq!(ranking[1].0, "broken");

    let report = generate_report(&results, queries.len());
    assert!(report.starts_with("# Embedding Model Evaluation Report"));
    assert!(report.contains("**Best Overall Model**: embeddinggemma:latest"));
    assert!(report.contains("| broken | 0.000 |"));
    assert!(report.contains("- **Test Queries**: 11"));
}

#[test]
fn ranking_weights_accuracy_reliability_and_cost() {
    let metrics = |name: &str, accuracy: f64, latency_ms: f64| EvaluationMetrics {
        model_name: name.into(),
        retrieval_accuracy: accuracy,
        latency_ms,
        memory_usage_mb: estimate_memory_usage(name),
        code_specificity: 0.5,
        throughput_per_second: 10.0,
        error_rate: 0.0,
        timestamp: chrono::Utc::now(),
    };
    let ranked = rank_models(&[metrics("bge-m3", 0.5, 10.0), metrics("nomic-embed-text", 0.9, 10.0), metrics("slow", 0.9, 900.0)]);
    let names: Vec<&str> = ranked.iter().map(|(n, _)| n.as_str()).collect();
    assert_eq!(names, ["nomic-embed-text", "slow", "bge-m3"]);
    let top = 0.9 * 0.4 + 0.2 + 0.5 * 0.2 + (1.0 / 1.1) * 0.1 + (1.0 / 1.15) * 0.1;
    assert!((ranked[0].1 - top).abs() < 1e-9);
}
