//! Process-local vector store with exact cosine search.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;

use ragdb_core::error::{Error, Result};
use ragdb_core::traits::VectorStore;
use ragdb_core::types::{VectorMatch, VectorRecord};

#[derive(Default)]
struct Rows {
	/// Locked by the first insert, released by `clear`.
	dim: Option<usize>,
	records: Vec<VectorRecord>,
	positions: HashMap<String, usize>,
}

impl Rows {
	fn reindex(&mut self) {
		self.positions = self.records.iter().enumerate().map(|(i, r)| (r.id.clone(), i)).collect();
	}
}

#[derive(Default)]
pub struct InMemoryVectorStore {
	rows: RwLock<Rows>,
}

impl InMemoryVectorStore {
	pub fn new() -> Self { Self::default() }

	pub fn dimension(&self) -> Option<usize> { self.rows.read().unwrap_or_else(PoisonError::into_inner).dim }
}

/// Cosine similarity rescaled from `[-1, 1]` to `[0, 1]`. Zero vectors score 0.5.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
	let (mut dot, mut na, mut nb) = (0.0f32, 0.0f32, 0.0f32);
	for (x, y) in a.iter().zip(b) {
		dot += x * y;
		na += x * x;
		nb += y * y;
	}
	let cos = if na == 0.0 || nb == 0.0 { 0.0 } else { dot / (na.sqrt() * nb.sqrt()) };
	((cos + 1.0) / 2.0).clamp(0.0, 1.0)
}

fn dim_mismatch(expected: usize, got: usize) -> Error {
	Error::VectorStore(format!("dimension mismatch: store holds {expected}-d vectors, got {got}"))
}

#[async_trait]
impl VectorStore for InMemoryVectorStore {
	async fn add(&self, records: Vec<VectorRecord>) -> Result<()> {
		let Some(first) = records.first() else { return Ok(()) };
		let mut rows = self.rows.write().unwrap_or_else(PoisonError::into_inner);
		let dim = rows.dim.unwrap_or(first.vector.len());
		if dim == 0 {
			return Err(Error::VectorStore("empty vector".into()));
		}
		if let Some(bad) = records.iter().find(|r| r.vector.len() != dim) {
			return Err(dim_mismatch(dim, bad.vector.len()));
		}
		rows.dim = Some(dim);
		for record in records {
			match rows.positions.get(&record.id).copied() {
				Some(i) => rows.records[i] = record,
				None => {
					let next = rows.records.len();
					rows.positions.insert(record.id.clone(), next);
					rows.records.push(record);
				}
			}
		}
		Ok(())
	}

	async fn similarity_search(&self, vector: &[f32], k: usize) -> Result<Vec<VectorMatch>> {
		let rows = self.rows.read().unwrap_or_else(PoisonError::into_inner);
		let Some(dim) = rows.dim else { return Ok(Vec::new()) };
		if vector.len() != dim {
			return Err(dim_mismatch(dim, vector.len()));
		}
		let mut scored: Vec<(usize, f32)> =
			rows.records.iter().enumerate().map(|(i, r)| (i, cosine_similarity(vector, &r.vector))).collect();
		// Stable: equal scores keep insertion order.
		scored.sort_by(|a, b| b.1.total_cmp(&a.1));
		Ok(scored
			.into_iter()
			.take(k)
			.map(|(i, similarity)| {
				let r = &rows.records[i];
				VectorMatch { id: r.id.clone(), text: r.text.clone(), similarity, metadata: r.metadata.clone() }
			})
			.collect())
	}

	async fn delete_document(&self, doc_path: &str) -> Result<usize> {
		let mut rows = self.rows.write().unwrap_or_else(PoisonError::into_inner);
		let before = rows.records.len();
		rows.records.retain(|r| r.doc_path != doc_path);
		let removed = before - rows.records.len();
		if removed > 0 {
			rows.reindex();
		}
		Ok(removed)
	}

	async fn clear(&self) -> Result<()> {
		*self.rows.write().unwrap_or_else(PoisonError::into_inner) = Rows::default();
		Ok(())
	}

	async fn count(&self) -> Result<usize> { Ok(self.rows.read().unwrap_or_else(PoisonError::into_inner).records.len()) }
}
