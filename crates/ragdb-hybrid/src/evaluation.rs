//! Embedding model comparison on a fixed code-search query set.

use std::fmt::Write as _;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use serde::Serialize;
use tracing::{error, info, warn};

use ragdb_core::error::{Error, Result};
use ragdb_core::traits::VectorStore;
use ragdb_core::types::{EvaluationMetrics, IndexedText, VectorMatch, VectorRecord};
use ragdb_embed::EmbeddingService;
use ragdb_vector::InMemoryVectorStore;

pub const DEFAULT_TOP_K: usize = 10;
const DEFAULT_MEMORY_MB: f64 = 2.0;
const CODE_MODELS: &[&str] = &["embeddinggemma", "mxbai-embed-large"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryKind {
    Function,
    Class,
    BugFix,
    Concept,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Difficulty {
    Easy,
    Medium,
    Hard,
}

#[derive(Debug, Clone, Serialize)]
pub struct TestQuery {
    pub query: String,
    pub expected: Vec<String>,
    pub kind: QueryKind,
    pub difficulty: Difficulty,
}

impl TestQuery {
    pub fn new(query: &str, expected: &[&str], kind: QueryKind, difficulty: Difficulty) -> Self {
        Self { query: query.to_string(), expected: expected.iter().map(|s| s.to_string()).collect(), kind, difficulty }
    }
}

pub fn code_search_benchmark() -> Vec<TestQuery> {
    use Difficulty::*;
    use QueryKind::*;
    vec![
        TestQuery::new("function that calculates fibonacci numbers", &["fibonacci", "fib", "calculate_fibonacci"], Function, Easy),
        TestQuery::new("authentication login function", &["login", "authenticate", "auth", "signin"], Function, Medium),
        TestQuery::new("database connection pool management", &["connection_pool", "db_pool", "pool_manager"], Concept, Hard),
        TestQuery::new("HTTP client class for API requests", &["HttpClient", "ApiClient", "RequestClient"], Class, Medium),
        TestQuery::new("user authentication service class", &["AuthService", "UserAuth", "AuthenticationService"], Class, Medium),
        TestQuery::new("memory leak in image processing", &["memory_leak", "image_processing", "cleanup"], BugFix, Hard),
        TestQuery::new("null pointer exception handling", &["null_check", "exception_handling", "null_pointer"], BugFix, Medium),
        TestQuery::new("dependency injection container", &["di_container", "dependency_injection", "container"], Concept, Hard),
        TestQuery::new("async await pattern implementation", &["async", "await", "promise", "async_await"], Concept, Medium),
        TestQuery::new("singleton pattern implementation", &["singleton", "get_instance", "instance"], Concept, Easy),
        TestQuery::new("observer pattern with event handling", &["observer", "event_handler", "subscribe", "notify"], Concept, Hard),
    ]
}

/// Small code corpus covering the benchmark queries, for offline runs.
pub fn sample_corpus() -> Vec<IndexedText> {
    const SNIPPETS: &[(&str, &str)] = &[
        ("math.py", "def calculate_fibonacci(n):\n    a, b = 0, 1\n    for _ in range(n):\n        a, b = b, a + b\n    return a\n"),
        ("auth.py", "def login(username, password):\n    user = authenticate(username, password)\n    return user is not None\n"),
        ("auth_service.py", "class AuthService:\n    def authenticate(self, user, token):\n        return self.store.verify(user, token)\n"),
        ("db.py", "class PoolManager:\n    def __init__(self, size):\n        self.connection_pool = create_pool(size)\n"),
        ("http.py", "class HttpClient:\n    def get(self, url):\n        return self.session.request('GET', url)\n"),
        ("images.py", "def process_image(img):\n    buf = load(img)\n    cleanup(buf)  # fixes memory_leak in image_processing\n"),
        ("checks.py", "def null_check(value):\n    if value is None:\n        raise ValueError('null_pointer')\n"),
        ("container.py", "class Container:\n    def register(self, name, factory):\n        self.providers[name] = factory  # dependency_injection\n"),
        ("tasks.py", "async def fetch_all(urls):\n    return await gather(*(fetch(u) for u in urls))\n"),
        ("singleton.py", "class Config:\n    _instance = None\n    @classmethod\n    def get_instance(cls):\n        return cls._instance\n"),
        ("events.py", "class Observer:\n    def subscribe(self, event_handler):\n        self.handlers.append(event_handler)\n    def notify(self, event):\n        pass\n"),
    ];
    SNIPPETS
        .iter()
        .map(|(path, code)| IndexedText {
            id: (*path).to_string(),
            content: (*code).to_string(),
            metadata: [("document_id".to_string(), (*path).to_string())].into_iter().collect(),
        })
        .collect()
}

pub fn estimate_memory_usage(model: &str) -> f64 {
    match model {
        "embeddinggemma:latest" => 2.0,
        "nomic-embed-text" => 1.5,
        "mxbai-embed-large" => 2.5,
        "bge-m3" => 2.2,
        "bge-large-en-v1.5" => 2.8,
        _ => DEFAULT_MEMORY_MB,
    }
}

pub fn code_specificity(model: &str, accuracy: f64) -> f64 {
    let base = if CODE_MODELS.iter().any(|m| model.contains(m)) { 0.7 } else { 0.5 };
    (base + accuracy * 0.3).min(1.0)
}

/// Share of expected terms found, case-insensitively, in any retrieved text.
pub fn retrieval_accuracy(results: &[VectorMatch], expected: &[String]) -> f64 {
    if results.is_empty() || expected.is_empty() {
        return 0.0;
    }
    let texts: Vec<String> = results.iter().map(|r| r.text.to_lowercase()).collect();
    let found = expected
        .iter()
        .filter(|term| {
            let term = term.to_lowercase();
            texts.iter().any(|t| t.contains(&term))
        })
        .count();
    found as f64 / expected.len() as f64
}

pub fn overall_score(m: &EvaluationMetrics) -> f64 {
    m.retrieval_accuracy * 0.4
        + (1.0 - m.error_rate) * 0.2
        + m.code_specificity * 0.2
        + (1.0 / (1.0 + m.latency_ms / 100.0)) * 0.1
        + (1.0 / (1.0 + m.memory_usage_mb / 10.0)) * 0.1
}

/// Best first; equal scores keep input order.
pub fn rank_models(results: &[EvaluationMetrics]) -> Vec<(String, f64)> {
    let mut ranked: Vec<(String, f64)> = results.iter().map(|m| (m.model_name.clone(), overall_score(m))).collect();
    ranked.sort_by(|a, b| b.1.total_cmp(&a.1));
    ranked
}

fn failed_metrics(model: &str) -> EvaluationMetrics {
    EvaluationMetrics {
        model_name: model.to_string(),
        retrieval_accuracy: 0.0,
        latency_ms: 0.0,
        memory_usage_mb: 0.0,
        code_specificity: 0.0,
        throughput_per_second: 0.0,
        error_rate: 1.0,
        timestamp: Utc::now(),
    }
}

pub struct ModelEvaluator {
    service: Arc<EmbeddingService>,
    top_k: usize,
}

impl ModelEvaluator {
    pub fn new(service: Arc<EmbeddingService>) -> Self { Self { service, top_k: DEFAULT_TOP_K } }

    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k.max(1);
        self
    }

    /// Embeds `corpus` with `model` into a private store, then runs every
    /// query against it. Fails only when the corpus cannot be embedded.
    pub async fn evaluate_model(&self, model: &str, corpus: &[IndexedText], queries: &[TestQuery]) -> Result<EvaluationMetrics> {
        let started = Instant::now();
        let texts: Vec<String> = corpus.iter().map(|d| d.content.clone()).collect();
        let vectors = self.service.embed_batch_with_model(&texts, Some(model)).await?;
        if vectors.len() != corpus.len() {
            return Err(Error::Operation(format!("expected {} corpus vectors, got {}", corpus.len(), vectors.len())));
        }
        let store = InMemoryVectorStore::new();
        let records = corpus
            .iter()
            .zip(vectors)
            .map(|(d, vector)| VectorRecord {
                id: d.id.clone(),
                doc_path: d.metadata.get("document_id").cloned().unwrap_or_else(|| d.id.clone()),
                text: d.content.clone(),
                vector,
                metadata: d.metadata.clone(),
            })
            .collect();
        store.add(records).await?;

        let mut accuracy_sum = 0.0;
        let mut latency_sum = 0.0;
        let mut answered = 0usize;
        let mut failed = 0usize;
        for q in queries {
            let query_started = Instant::now();
            let outcome = match self.service.embed_text(&q.query, Some(model)).await {
                Ok(vector) => store.similarity_search(&vector, self.top_k).await,
                Err(e) => Err(e),
            };
            match outcome {
                Ok(results) => {
                    latency_sum += query_started.elapsed().as_secs_f64() * 1000.0;
                    accuracy_sum += retrieval_accuracy(&results, &q.expected);
                    answered += 1;
                }
                Err(e) => {
                    warn!(model, query = %q.query, error = %e, "evaluation query failed");
                    failed += 1;
                }
            }
        }

        let elapsed = started.elapsed().as_secs_f64();
        let mean = |sum: f64| if answered == 0 { 0.0 } else { sum / answered as f64 };
        let accuracy = mean(accuracy_sum);
        Ok(EvaluationMetrics {
            model_name: model.to_string(),
            retrieval_accuracy: accuracy,
            latency_ms: mean(latency_sum),
            memory_usage_mb: estimate_memory_usage(model),
            code_specificity: code_specificity(model, accuracy),
            throughput_per_second: if elapsed > 0.0 { answered as f64 / elapsed } else { 0.0 },
            error_rate: if queries.is_empty() { 0.0 } else { failed as f64 / queries.len() as f64 },
            timestamp: Utc::now(),
        })
    }

    /// One entry per model, in input order. A model that cannot be
    /// evaluated gets zeroed metrics with an error rate of 1.
    pub async fn evaluate_models(&self, models: &[String], corpus: &[IndexedText], queries: &[TestQuery]) -> Vec<EvaluationMetrics> {
        let mut out = Vec::with_capacity(models.len());
        for model in models {
            info!(model = %model, "evaluating embedding model");
            match self.evaluate_model(model, corpus, queries).await {
                Ok(m) => out.push(m),
                Err(e) => {
                    error!(model = %model, error = %e, "model evaluation failed");
                    out.push(failed_metrics(model));
                }
            }
        }
        out
    }
}

/// Markdown summary: rankings, a metrics table and recommendations.
pub fn generate_report(results: &[EvaluationMetrics], query_count: usize) -> String {
    let mut r = String::new();
    let _ = writeln!(r, "# Embedding Model Evaluation Report");
    let _ = writeln!(r, "Generated: {}\n", Utc::now().format("%Y-%m-%d %H:%M:%S"));

    let rankings = rank_models(results);
    let _ = writeln!(r, "## Model Rankings\n");
    for (i, (model, score)) in rankings.iter().enumerate() {
        let _ = writeln!(r, "{}. **{model}** - Score: {score:.3}", i + 1);
    }

    let _ = writeln!(r, "\n## Detailed Metrics\n");
    let _ = writeln!(r, "| Model | Accuracy | Latency (ms) | Memory (MB) | Code Specificity | Throughput | Error Rate |");
    let _ = writeln!(r, "|-------|----------|--------------|-------------|------------------|------------|------------|");
    for m in results {
        let _ = writeln!(
            r,
            "| {} | {:.3} | {:.1} | {:.1} | {:.3} | {:.1} | {:.3} |",
            m.model_name, m.retrieval_accuracy, m.latency_ms, m.memory_usage_mb, m.code_specificity, m.throughput_per_second, m.error_rate
        );
    }

    let _ = writeln!(r, "\n## Recommendations\n");
    let best = rankings.first().map_or("None", |(m, _)| m.as_str());
    let _ = writeln!(r, "**Best Overall Model**: {best}\n");
    let by = |f: fn(&EvaluationMetrics) -> f64, lowest: bool| {
        results.iter().reduce(|a, b| {
            let better = if lowest { f(b) < f(a) } else { f(b) > f(a) };
            if better { b } else { a }
        })
    };
    if let Some(m) = by(|m| m.retrieval_accuracy, false) {
        let _ = writeln!(r, "**Best Accuracy**: {} ({:.3})", m.model_name, m.retrieval_accuracy);
    }
    if let Some(m) = by(|m| m.latency_ms, true) {
        let _ = writeln!(r, "**Best Speed**: {} ({:.1}ms)", m.model_name, m.latency_ms);
    }
    if let Some(m) = by(|m| m.memory_usage_mb, true) {
        let _ = writeln!(r, "**Best Memory Efficiency**: {} ({:.1}MB)", m.model_name, m.memory_usage_mb);
    }

    if !results.is_empty() {
        let n = results.len() as f64;
        let _ = writeln!(r, "\n## Performance Analysis\n");
        let _ = writeln!(r, "- **Average Accuracy**: {:.3}", results.iter().map(|m| m.retrieval_accuracy).sum::<f64>() / n);
        let _ = writeln!(r, "- **Average Latency**: {:.1}ms", results.iter().map(|m| m.latency_ms).sum::<f64>() / n);
        let _ = writeln!(r, "- **Models Evaluated**: {}", results.len());
        let _ = writeln!(r, "- **Test Queries**: {query_count}");
    }
    r
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn specificity_favors_code_models() {
        assert!((code_specificity("embeddinggemma:latest", 0.5) - 0.85).abs() < 1e-9);
        assert!((code_specificity("bge-m3", 0.0) - 0.5).abs() < 1e-9);
        assert_eq!(code_specificity("mxbai-embed-large", 1.0), 1.0);
    }

    #[test]
    fn accuracy_counts_each_term_once() {
        let hit = |text: &str| VectorMatch { id: "x".into(), text: text.into(), similarity: 1.0, metadata: Default::default() };
        let expected: Vec<String> = ["Login", "auth", "signin"].iter().map(|s| s.to_string()).collect();
        let acc = retrieval_accuracy(&[hit("def login(): auth()"), hit("login again")], &expected);
        assert!((acc - 2.0 / 3.0).abs() < 1e-9);
        assert_eq!(retrieval_accuracy(&[], &expected), 0.0);
    }

    #[test]
    fn benchmark_has_eleven_queries() {
        assert_eq!(code_search_benchmark().len(), 11);
        assert_eq!(sample_corpus().len(), 11);
    }
}
