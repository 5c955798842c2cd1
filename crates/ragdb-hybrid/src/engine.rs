use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Instant;

use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, info, warn};

use ragdb_core::config::SearchConfig;
use ragdb_core::error::{Error, Result};
use ragdb_core::traits::{Embedder, TextSink, VectorStore};
use ragdb_core::types::{IndexedText, Meta, ResultType, SearchResult, VectorMatch};
use ragdb_text::{Bm25Index, KeywordIndex};

use crate::fusion::{reciprocal_rank_fusion, FusionWeights};

#[derive(Debug, Clone, Default, Serialize)]
pub struct IndexReport {
    pub indexed: usize,
    pub errors: Vec<String>,
    pub total: usize,
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
struct SearchMetrics {
    searches_performed: u64,
    semantic_searches: u64,
    keyword_searches: u64,
    bm25_searches: u64,
    hybrid_searches: u64,
    semantic_failures: u64,
    total_time_ms: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchStatistics {
    pub keyword_documents: usize,
    pub keyword_terms: usize,
    pub bm25_documents: u64,
    pub tracked_documents: usize,
    /// `None` when the vector store could not be counted.
    pub vector_count: Option<usize>,
    pub searches_performed: u64,
    pub semantic_searches: u64,
    pub keyword_searches: u64,
    pub bm25_searches: u64,
    pub hybrid_searches: u64,
    pub semantic_failures: u64,
    pub average_search_time_ms: f64,
    pub weights: FusionWeights,
    pub rrf_k: f32,
}

/// Combines vector similarity with the keyword and BM25 indexes. The
/// engine owns the lexical side; the vector side is shared with the indexer.
pub struct HybridSearchEngine {
    config: SearchConfig,
    embedder: Arc<dyn Embedder>,
    store: Arc<dyn VectorStore>,
    keyword: KeywordIndex,
    bm25: Bm25Index,
    /// document_id -> text ids, for removal by document path.
    doc_ids: RwLock<HashMap<String, BTreeSet<String>>>,
    metrics: Mutex<SearchMetrics>,
}

fn document_of(doc: &IndexedText) -> String {
    doc.metadata.get("document_id").filter(|d| !d.is_empty()).cloned().unwrap_or_else(|| doc.id.clone())
}

fn matches_filters(result: &SearchResult, filters: &Meta) -> bool {
    filters.iter().all(|(k, v)| result.metadata.get(k) == Some(v))
}

fn semantic_result(m: VectorMatch) -> SearchResult {
    SearchResult { id: m.id, content: m.text, score: m.similarity, result_type: ResultType::Semantic, metadata: m.metadata }
}

impl HybridSearchEngine {
    pub fn new(config: SearchConfig, embedder: Arc<dyn Embedder>, store: Arc<dyn VectorStore>) -> Result<Self> {
        Ok(Self {
            config,
            embedder,
            store,
            keyword: KeywordIndex::new(),
            bm25: Bm25Index::new()?,
            doc_ids: RwLock::new(HashMap::new()),
            metrics: Mutex::new(SearchMetrics::default()),
        })
    }

    pub fn config(&self) -> &SearchConfig { &self.config }

    pub fn default_weights(&self) -> FusionWeights {
        FusionWeights::new(self.config.semantic_weight, self.config.keyword_weight)
    }

    fn metrics(&self) -> MutexGuard<'_, SearchMetrics> { self.metrics.lock().unwrap_or_else(PoisonError::into_inner) }

    fn record(&self, kind: ResultType, started: Instant) {
        let elapsed = started.elapsed().as_secs_f64() * 1000.0;
        let mut m = self.metrics();
        m.searches_performed += 1;
        m.total_time_ms += elapsed;
        match kind {
            ResultType::Semantic => m.semantic_searches += 1,
            ResultType::Keyword => m.keyword_searches += 1,
            ResultType::Bm25 => m.bm25_searches += 1,
            ResultType::Hybrid => m.hybrid_searches += 1,
        }
    }

    fn candidates(&self, limit: usize) -> usize { limit.saturating_mul(self.config.candidate_multiplier.max(1)) }

    pub(crate) async fn run_semantic(&self, query: &str, k: usize) -> Result<Vec<SearchResult>> {
        if k == 0 || query.trim().is_empty() {
            return Ok(Vec::new());
        }
        let vector = self.embedder.embed_query(query).await?;
        let matches = self.store.similarity_search(&vector, k).await?;
        Ok(matches.into_iter().map(semantic_result).collect())
    }

    pub(crate) fn run_keyword(&self, query: &str, k: usize) -> Vec<SearchResult> { self.keyword.search_keywords(query, k) }

    /// Returns the fused list and whether the semantic side failed.
    pub(crate) async fn run_hybrid(&self, query: &str, limit: usize, weights: FusionWeights) -> (Vec<SearchResult>, bool) {
        let k = self.candidates(limit);
        let (semantic, keyword) = tokio::join!(self.run_semantic(query, k), async { self.run_keyword(query, k) });
        let (semantic, failed) = match semantic {
            Ok(list) => (list, false),
            Err(e) => {
                warn!(error = %e, "semantic side unavailable, using keyword results only");
                (Vec::new(), true)
            }
        };
        debug!(semantic = semantic.len(), keyword = keyword.len(), "fusing rankings");
        (reciprocal_rank_fusion(&semantic, &keyword, weights, self.config.rrf_k, limit), failed)
    }

    pub async fn semantic_search(&self, query: &str, limit: usize) -> Result<Vec<SearchResult>> {
        let started = Instant::now();
        let out = self.run_semantic(query, limit).await;
        if out.is_err() {
            self.metrics().semantic_failures += 1;
        }
        self.record(ResultType::Semantic, started);
        out
    }

    pub fn keyword_search(&self, query: &str, limit: usize) -> Vec<SearchResult> {
        let started = Instant::now();
        let out = self.run_keyword(query, limit);
        self.record(ResultType::Keyword, started);
        out
    }

    pub fn bm25_search(&self, query: &str, limit: usize) -> Result<Vec<SearchResult>> {
        let started = Instant::now();
        let out = self.bm25.search(query, limit);
        self.record(ResultType::Bm25, started);
        out
    }

    /// RRF over semantic and keyword rankings. `weights` defaults to the
    /// configured pair. A failing semantic side degrades to keyword only.
    pub async fn hybrid_search(&self, query: &str, limit: usize, weights: Option<FusionWeights>) -> Vec<SearchResult> {
        let started = Instant::now();
        let (results, semantic_failed) = self.run_hybrid(query, limit, weights.unwrap_or_else(|| self.default_weights())).await;
        if semantic_failed {
            self.metrics().semantic_failures += 1;
        }
        self.record(ResultType::Hybrid, started);
        results
    }

    pub async fn search(&self, query: &str, search_type: ResultType, limit: usize) -> Result<Vec<SearchResult>> {
        match search_type {
            ResultType::Semantic => self.semantic_search(query, limit).await,
            ResultType::Keyword => Ok(self.keyword_search(query, limit)),
            ResultType::Bm25 => self.bm25_search(query, limit),
            ResultType::Hybrid => Ok(self.hybrid_search(query, limit, None).await),
        }
    }

    /// Like `search`, keeping only results whose metadata equals every filter
    /// value. Candidates are over-fetched before filtering.
    pub async fn search_with_filters(
        &self,
        query: &str,
        search_type: ResultType,
        limit: usize,
        filters: &Meta,
    ) -> Result<Vec<SearchResult>> {
        if filters.is_empty() {
            return self.search(query, search_type, limit).await;
        }
        let mut results = self.search(query, search_type, self.candidates(limit)).await?;
        results.retain(|r| matches_filters(r, filters));
        results.truncate(limit);
        Ok(results)
    }

    /// Adds texts to the keyword and BM25 indexes. Texts without content are
    /// reported and skipped.
    pub async fn index_documents(&self, docs: Vec<IndexedText>) -> Result<IndexReport> {
        let total = docs.len();
        let mut errors = Vec::new();
        let accepted: Vec<IndexedText> = docs
            .into_iter()
            .filter(|d| {
                let ok = !d.content.trim().is_empty();
                if !ok {
                    errors.push(format!("{}: empty content", d.id));
                }
                ok
            })
            .collect();

        // BM25 can fail; the keyword index cannot, so it is written second.
        self.bm25.add_documents(&accepted)?;
        for d in &accepted {
            self.keyword.add_document(&d.id, &d.content, d.metadata.clone());
        }
        {
            let mut map = self.doc_ids.write().unwrap_or_else(PoisonError::into_inner);
            for d in &accepted {
                map.entry(document_of(d)).or_default().insert(d.id.clone());
            }
        }
        debug!(indexed = accepted.len(), total, "keyword side updated");
        Ok(IndexReport { indexed: accepted.len(), errors, total })
    }

    fn take_document(&self, doc_id: &str) -> Option<Vec<String>> {
        let mut map = self.doc_ids.write().unwrap_or_else(PoisonError::into_inner);
        map.remove(doc_id).map(|set| set.into_iter().collect())
    }

    fn drop_texts(&self, ids: &[String]) -> Result<usize> {
        let removed = ids.iter().filter(|id| self.keyword.remove_document(id)).count();
        self.bm25.remove_documents(ids)?;
        Ok(removed)
    }

    /// Removes a whole document when `id` is a tracked document id, otherwise
    /// the single text with that id. Returns the number of texts removed.
    pub fn remove_document(&self, id: &str) -> Result<usize> {
        if let Some(ids) = self.take_document(id) {
            return self.drop_texts(&ids);
        }
        self.doc_ids.write().unwrap_or_else(PoisonError::into_inner).retain(|_, set| {
            set.remove(id);
            !set.is_empty()
        });
        self.drop_texts(&[id.to_string()])
    }

    /// Empties the keyword side. Vectors stay with their store.
    pub fn clear_index(&self) -> Result<()> {
        self.keyword.clear();
        self.bm25.clear()?;
        self.doc_ids.write().unwrap_or_else(PoisonError::into_inner).clear();
        info!("keyword index cleared");
        Ok(())
    }

    pub async fn get_statistics(&self) -> SearchStatistics {
        let vector_count = match self.store.count().await {
            Ok(n) => Some(n),
            Err(e) => {
                debug!(error = %e, "vector count unavailable");
                None
            }
        };
        let m = *self.metrics();
        let tracked_documents = self.doc_ids.read().unwrap_or_else(PoisonError::into_inner).len();
        SearchStatistics {
            keyword_documents: self.keyword.len(),
            keyword_terms: self.keyword.term_count(),
            bm25_documents: self.bm25.len(),
            tracked_documents,
            vector_count,
            searches_performed: m.searches_performed,
            semantic_searches: m.semantic_searches,
            keyword_searches: m.keyword_searches,
            bm25_searches: m.bm25_searches,
            hybrid_searches: m.hybrid_searches,
            semantic_failures: m.semantic_failures,
            average_search_time_ms: if m.searches_performed == 0 {
                0.0
            } else {
                m.total_time_ms / m.searches_performed as f64
            },
            weights: self.default_weights().normalized(),
            rrf_k: self.config.rrf_k,
        }
    }
}

#[async_trait]
impl TextSink for HybridSearchEngine {
    async fn index_texts(&self, docs: Vec<IndexedText>) -> Result<()> {
        let report = self.index_documents(docs).await?;
        if report.indexed == 0 && report.total > 0 {
            return Err(Error::Index(report.errors.join("; ")));
        }
        Ok(())
    }

    async fn remove_texts(&self, doc_path: &str) -> Result<usize> {
        match self.take_document(doc_path) {
            Some(ids) => self.drop_texts(&ids),
            None => Ok(0),
        }
    }

    async fn clear_texts(&self) -> Result<()> { self.clear_index() }
}
