use std::fmt::Display;
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};

use arrow_array::types::Float32Type;
use arrow_array::{Array, FixedSizeListArray, Float32Array, RecordBatch, RecordBatchIterator, StringArray};
use async_trait::async_trait;
use futures::TryStreamExt;
use lancedb::query::{ExecutableQuery, QueryBase};
use lancedb::{connect, Connection, DistanceType, Table};
use tracing::{debug, info};

use ragdb_core::error::{Error, Result};
use ragdb_core::traits::VectorStore;
use ragdb_core::types::{Meta, VectorMatch, VectorRecord};

use crate::schema::{build_chunk_schema, vector_dim, CHUNK_ID, CONTENT, DISTANCE, DOC_PATH, ID, METADATA};

fn store_err(e: impl Display) -> Error { Error::VectorStore(e.to_string()) }

fn quote(value: &str) -> String { format!("'{}'", value.replace('\'', "''")) }

/// LanceDB-backed store. The table is created by the first insert and its
/// vector width is fixed from then on.
pub struct LanceVectorStore {
	db: Connection,
	table_name: String,
	dim: Mutex<Option<usize>>,
	/// Serializes table creation and upserts.
	write_lock: tokio::sync::Mutex<()>,
}

impl LanceVectorStore {
	pub async fn open(db_path: &Path, table_name: &str) -> Result<Self> {
		let db = connect(db_path.to_string_lossy().as_ref()).execute().await.map_err(store_err)?;
		let store = Self { db, table_name: table_name.to_string(), dim: Mutex::new(None), write_lock: tokio::sync::Mutex::new(()) };
		if let Some(table) = store.table().await? {
			let schema = table.schema().await.map_err(store_err)?;
			*store.dim.lock().unwrap_or_else(PoisonError::into_inner) = vector_dim(&schema);
		}
		info!(path = %db_path.display(), table = table_name, dim = ?store.dimension(), "opened lancedb vector store");
		Ok(store)
	}

	pub fn dimension(&self) -> Option<usize> { *self.dim.lock().unwrap_or_else(PoisonError::into_inner) }

	async fn table(&self) -> Result<Option<Table>> {
		let names = self.db.table_names().execute().await.map_err(store_err)?;
		if !names.contains(&self.table_name) {
			return Ok(None);
		}
		self.db.open_table(&self.table_name).execute().await.map(Some).map_err(store_err)
	}

	fn check_dim(&self, got: usize) -> Result<()> {
		match self.dimension() {
			Some(dim) if dim != got => {
				Err(Error::VectorStore(format!("dimension mismatch: table holds {dim}-d vectors, got {got}")))
			}
			_ => Ok(()),
		}
	}

	fn to_record_batch(records: &[VectorRecord], dim: i32) -> Result<RecordBatch> {
		let mut ids = Vec::with_capacity(records.len());
		let mut paths = Vec::with_capacity(records.len());
		let mut chunk_ids = Vec::with_capacity(records.len());
		let mut contents = Vec::with_capacity(records.len());
		let mut metas = Vec::with_capacity(records.len());
		let mut vectors: Vec<Option<Vec<Option<f32>>>> = Vec::with_capacity(records.len());
		for r in records {
			ids.push(r.id.clone());
			paths.push(r.doc_path.clone());
			chunk_ids.push(r.metadata.get(CHUNK_ID).unwrap_or(&r.id).clone());
			contents.push(r.text.clone());
			metas.push(serde_json::to_string(&r.metadata)?);
			vectors.push(Some(r.vector.iter().map(|&x| Some(x)).collect()));
		}
		RecordBatch::try_new(
			build_chunk_schema(dim),
			vec![
				Arc::new(StringArray::from(ids)),
				Arc::new(StringArray::from(paths)),
				Arc::new(StringArray::from(chunk_ids)),
				Arc::new(StringArray::from(contents)),
				Arc::new(StringArray::from(metas)),
				Arc::new(FixedSizeListArray::from_iter_primitive::<Float32Type, _, _>(vectors.into_iter(), dim)),
			],
		)
		.map_err(store_err)
	}
}

fn string_column<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a StringArray> {
	batch
		.column_by_name(name)
		.and_then(|c| c.as_any().downcast_ref::<StringArray>())
		.ok_or_else(|| Error::VectorStore(format!("result batch is missing column '{name}'")))
}

#[async_trait]
impl VectorStore for LanceVectorStore {
	async fn add(&self, records: Vec<VectorRecord>) -> Result<()> {
		let Some(first) = records.first() else { return Ok(()) };
		let dim = first.vector.len();
		if dim == 0 {
			return Err(Error::VectorStore("empty vector".into()));
		}
		self.check_dim(dim)?;
		if let Some(bad) = records.iter().find(|r| r.vector.len() != dim) {
			return Err(Error::VectorStore(format!("dimension mismatch: batch mixes {dim}-d and {}-d vectors", bad.vector.len())));
		}
		let width = i32::try_from(dim).map_err(store_err)?;
		let batch = Self::to_record_batch(&records, width)?;
		let schema = batch.schema();
		let reader = Box::new(RecordBatchIterator::new(vec![Ok(batch)].into_iter(), schema));

		let _guard = self.write_lock.lock().await;
		match self.table().await? {
			Some(table) => {
				let mut upsert = table.merge_insert(&[ID]);
				upsert.when_matched_update_all(None).when_not_matched_insert_all();
				upsert.execute(reader).await.map_err(store_err)?;
			}
			None => {
				self.db.create_table(&self.table_name, reader).execute().await.map_err(store_err)?;
				*self.dim.lock().unwrap_or_else(PoisonError::into_inner) = Some(dim);
				debug!(table = %self.table_name, dim, "created vector table");
			}
		}
		Ok(())
	}

	async fn similarity_search(&self, vector: &[f32], k: usize) -> Result<Vec<VectorMatch>> {
		if k == 0 {
			return Ok(Vec::new());
		}
		let Some(table) = self.table().await? else { return Ok(Vec::new()) };
		self.check_dim(vector.len())?;
		let mut stream = table
			.vector_search(vector.to_vec())
			.map_err(store_err)?
			.distance_type(DistanceType::Cosine)
			.limit(k)
			.execute()
			.await
			.map_err(store_err)?;

		let mut out = Vec::new();
		while let Some(batch) = stream.try_next().await.map_err(store_err)? {
			let ids = string_column(&batch, ID)?;
			let contents = string_column(&batch, CONTENT)?;
			let metas = string_column(&batch, METADATA)?;
			let distances = batch.column_by_name(DISTANCE).and_then(|c| c.as_any().downcast_ref::<Float32Array>());
			for i in 0..batch.num_rows() {
				// Cosine distance is in [0, 2].
				let similarity = distances.map_or(0.5, |d| (1.0 - d.value(i) / 2.0).clamp(0.0, 1.0));
				let metadata: Meta = serde_json::from_str(metas.value(i)).unwrap_or_default();
				out.push(VectorMatch { id: ids.value(i).to_string(), text: contents.value(i).to_string(), similarity, metadata });
			}
		}
		out.sort_by(|a, b| b.similarity.total_cmp(&a.similarity));
		out.truncate(k);
		Ok(out)
	}

	async fn delete_document(&self, doc_path: &str) -> Result<usize> {
		let _guard = self.write_lock.lock().await;
		let Some(table) = self.table().await? else { return Ok(0) };
		let predicate = format!("{DOC_PATH} = {}", quote(doc_path));
		let matching = table.count_rows(Some(predicate.clone())).await.map_err(store_err)?;
		if matching > 0 {
			table.delete(&predicate).await.map_err(store_err)?;
		}
		Ok(matching)
	}

	/// Removes every row; the table and its vector width survive.
	async fn clear(&self) -> Result<()> {
		let _guard = self.write_lock.lock().await;
		if let Some(table) = self.table().await? {
			table.delete(&format!("{ID} IS NOT NULL")).await.map_err(store_err)?;
		}
		Ok(())
	}

	async fn count(&self) -> Result<usize> {
		match self.table().await? {
			Some(table) => table.count_rows(None).await.map_err(store_err),
			None => Ok(0),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::quote;

	#[test]
	fn quotes_are_doubled_in_predicates() {
		assert_eq!(quote("src/it's.py"), "'src/it''s.py'");
	}
}
