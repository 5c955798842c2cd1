//! Reciprocal Rank Fusion of a semantic and a keyword ranking.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use ragdb_core::types::{ResultType, SearchResult};

pub const SEMANTIC_RANK: &str = "semantic_rank";
pub const KEYWORD_RANK: &str = "keyword_rank";

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FusionWeights {
    pub semantic: f32,
    pub keyword: f32,
}

impl Default for FusionWeights {
    fn default() -> Self { Self { semantic: 0.7, keyword: 0.3 } }
}

impl FusionWeights {
    pub fn new(semantic: f32, keyword: f32) -> Self { Self { semantic, keyword } }

    /// Scaled to sum to 1. Negative or non-finite weights count as zero; if
    /// nothing positive is left the defaults apply.
    pub fn normalized(self) -> Self {
        let clean = |w: f32| if w.is_finite() && w > 0.0 { w } else { 0.0 };
        let (s, k) = (clean(self.semantic), clean(self.keyword));
        let sum = s + k;
        if sum <= 0.0 {
            return Self::default();
        }
        Self { semantic: s / sum, keyword: k / sum }
    }
}

/// Identity used to match the same item across rankings: metadata
/// `chunk_id`, then `document_id`, then the result id, then a content hash.
pub fn fusion_key(result: &SearchResult) -> String {
    let from_meta = |key: &str| result.metadata.get(key).filter(|v| !v.is_empty()).cloned();
    from_meta("chunk_id")
        .or_else(|| from_meta("document_id"))
        .or_else(|| (!result.id.is_empty()).then(|| result.id.clone()))
        .unwrap_or_else(|| blake3::hash(result.content.as_bytes()).to_hex().to_string())
}

struct Fused {
    result: SearchResult,
    score: f32,
}

/// `w_s / (k + rank_s) + w_k / (k + rank_k)` with 1-based ranks. An item in
/// both lists keeps the semantic copy's content and metadata. Equal scores
/// keep first-appearance order. Only the first occurrence of a key in each
/// list is ranked.
pub fn reciprocal_rank_fusion(
    semantic: &[SearchResult],
    keyword: &[SearchResult],
    weights: FusionWeights,
    k: f32,
    limit: usize,
) -> Vec<SearchResult> {
    let weights = weights.normalized();
    let mut fused: Vec<Fused> = Vec::with_capacity(semantic.len() + keyword.len());
    let mut slots: HashMap<String, usize> = HashMap::new();

    for (list, weight, rank_key) in [(semantic, weights.semantic, SEMANTIC_RANK), (keyword, weights.keyword, KEYWORD_RANK)] {
        let mut seen: HashSet<String> = HashSet::new();
        for result in list {
            let key = fusion_key(result);
            if !seen.insert(key.clone()) {
                continue;
            }
            let slot = match slots.get(&key).copied() {
                Some(i) => i,
                None => {
                    slots.insert(key, fused.len());
                    fused.push(Fused { result: result.clone(), score: 0.0 });
                    fused.len() - 1
                }
            };
            let rank = seen.len();
            let entry = &mut fused[slot];
            entry.score += weight / (k + rank as f32);
            entry.result.metadata.insert(rank_key.to_string(), rank.to_string());
        }
    }

    fused.sort_by(|a, b| b.score.total_cmp(&a.score));
    fused
        .into_iter()
        .take(limit)
        .map(|f| SearchResult { score: f.score, result_type: ResultType::Hybrid, ..f.result })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ragdb_core::types::Meta;

    fn result(id: &str, result_type: ResultType) -> SearchResult {
        SearchResult { id: id.into(), content: format!("content {id}"), score: 1.0, result_type, metadata: Meta::new() }
    }

    #[test]
    fn weights_normalize() {
        let w = FusionWeights::new(2.0, 2.0).normalized();
        assert!((w.semantic - 0.5).abs() < 1e-6);
        assert_eq!(FusionWeights::new(-1.0, 0.0).normalized(), FusionWeights::default());
        assert_eq!(FusionWeights::new(0.0, 5.0).normalized(), FusionWeights::new(0.0, 1.0));
    }

    #[test]
    fn key_falls_back_to_content_hash() {
        let mut r = result("", ResultType::Keyword);
        assert_eq!(fusion_key(&r).len(), 64);
        r.metadata.insert("document_id".into(), "a.py".into());
        assert_eq!(fusion_key(&r), "a.py");
        r.metadata.insert("chunk_id".into(), "a.py#func_x_1".into());
        assert_eq!(fusion_key(&r), "a.py#func_x_1");
    }

    #[test]
    fn duplicates_within_one_list_rank_once() {
        let sem = [result("a", ResultType::Semantic), result("a", ResultType::Semantic), result("b", ResultType::Semantic)];
        let fused = reciprocal_rank_fusion(&sem, &[], FusionWeights::new(1.0, 0.0), 60.0, 10);
        assert_eq!(fused.len(), 2);
        assert_eq!(fused[1].metadata.get(SEMANTIC_RANK).map(String::as_str), Some("2"));
    }
}
