//! Latency comparison of the three search paths.

use std::time::Instant;

use serde::Serialize;
use tracing::info;

use crate::engine::HybridSearchEngine;

const BENCH_LIMIT: usize = 10;

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct TimingSummary {
    pub average_ms: f64,
    pub min_ms: f64,
    pub max_ms: f64,
    pub total_queries: usize,
}

impl TimingSummary {
    fn from_samples(samples: &[f64]) -> Self {
        if samples.is_empty() {
            return Self::default();
        }
        let min_ms = samples.iter().copied().fold(f64::INFINITY, f64::min);
        let max_ms = samples.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        Self { average_ms: samples.iter().sum::<f64>() / samples.len() as f64, min_ms, max_ms, total_queries: samples.len() }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct BenchmarkReport {
    pub semantic_only: TimingSummary,
    pub keyword_only: TimingSummary,
    pub hybrid: TimingSummary,
}

fn elapsed_ms(started: Instant) -> f64 { started.elapsed().as_secs_f64() * 1000.0 }

impl HybridSearchEngine {
    /// Times every query `iterations` times on each path. Search counters are
    /// left untouched; a failing semantic query is still timed.
    pub async fn benchmark_search_performance(&self, queries: &[String], iterations: usize) -> BenchmarkReport {
        let mut semantic = Vec::new();
        let mut keyword = Vec::new();
        let mut hybrid = Vec::new();
        let weights = self.default_weights();

        for _ in 0..iterations {
            for query in queries {
                let started = Instant::now();
                let _ = self.run_semantic(query, BENCH_LIMIT).await;
                semantic.push(elapsed_ms(started));

                let started = Instant::now();
                self.run_keyword(query, BENCH_LIMIT);
                keyword.push(elapsed_ms(started));

                let started = Instant::now();
                self.run_hybrid(query, BENCH_LIMIT, weights).await;
                hybrid.push(elapsed_ms(started));
            }
        }

        let report = BenchmarkReport {
            semantic_only: TimingSummary::from_samples(&semantic),
            keyword_only: TimingSummary::from_samples(&keyword),
            hybrid: TimingSummary::from_samples(&hybrid),
        };
        info!(
            queries = queries.len(),
            iterations,
            semantic_ms = report.semantic_only.average_ms,
            keyword_ms = report.keyword_only.average_ms,
            hybrid_ms = report.hybrid.average_ms,
            "search benchmark finished"
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn summary_of_samples() {
        let s = TimingSummary::from_samples(&[2.0, 4.0, 6.0]);
        assert_eq!(s.total_queries, 3);
        assert!((s.average_ms - 4.0).abs() < 1e-9);
        assert_eq!((s.min_ms, s.max_ms), (2.0, 6.0));
        assert_eq!(TimingSummary::from_samples(&[]), TimingSummary::default());
    }
}
