use std::fmt::Display;
use std::sync::{Mutex, PoisonError};

use tantivy::collector::TopDocs;
use tantivy::query::QueryParser;
use tantivy::schema::{Field, Value};
use tantivy::{doc, Index, IndexReader, IndexWriter, ReloadPolicy, TantivyDocument, Term};
use tracing::debug;

use ragdb_core::error::{Error, Result};
use ragdb_core::types::{IndexedText, Meta, ResultType, SearchResult};

use crate::tantivy_utils::{build_schema, register_tokenizer};

const WRITER_HEAP_BYTES: usize = 15_000_000;

fn index_err(e: impl Display) -> Error { Error::Index(e.to_string()) }

/// RAM-backed tantivy index scored with BM25. Writes are serialized through
/// one writer and become visible after each commit.
pub struct Bm25Index {
	index: Index,
	reader: IndexReader,
	writer: Mutex<IndexWriter>,
	id_field: Field,
	text_field: Field,
	meta_field: Field,
}

impl Bm25Index {
	pub fn new() -> Result<Self> {
		let schema = build_schema();
		let index = Index::create_in_ram(schema.clone());
		register_tokenizer(&index);
		let writer = index.writer_with_num_threads(1, WRITER_HEAP_BYTES).map_err(index_err)?;
		let reader = index.reader_builder().reload_policy(ReloadPolicy::Manual).try_into().map_err(index_err)?;
		Ok(Self {
			id_field: schema.get_field("id").map_err(index_err)?,
			text_field: schema.get_field("text").map_err(index_err)?,
			meta_field: schema.get_field("metadata").map_err(index_err)?,
			index,
			reader,
			writer: Mutex::new(writer),
		})
	}

	/// Upserts by id. A failed batch is rolled back as a whole.
	pub fn add_documents(&self, docs: &[IndexedText]) -> Result<()> {
		if docs.is_empty() { return Ok(()); }
		let mut writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
		let mut written = docs.iter().try_for_each(|d| self.stage(&writer, d));
		if written.is_ok() {
			written = self.commit(&mut writer);
		}
		if written.is_err() {
			if let Err(e) = writer.rollback() { debug!(error = %e, "bm25 rollback failed"); }
		}
		written
	}

	fn stage(&self, writer: &IndexWriter, d: &IndexedText) -> Result<()> {
		writer.delete_term(Term::from_field_text(self.id_field, &d.id));
		let meta = serde_json::to_string(&d.metadata)?;
		writer
			.add_document(doc!(self.id_field => d.id.clone(), self.text_field => d.content.clone(), self.meta_field => meta))
			.map_err(index_err)?;
		Ok(())
	}

	pub fn remove_document(&self, id: &str) -> Result<()> { self.remove_documents(&[id]) }

	/// One commit for the whole set.
	pub fn remove_documents<S: AsRef<str>>(&self, ids: &[S]) -> Result<()> {
		if ids.is_empty() { return Ok(()); }
		let mut writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
		for id in ids {
			writer.delete_term(Term::from_field_text(self.id_field, id.as_ref()));
		}
		self.commit(&mut writer)
	}

	pub fn clear(&self) -> Result<()> {
		let mut writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
		writer.delete_all_documents().map_err(index_err)?;
		self.commit(&mut writer)
	}

	fn commit(&self, writer: &mut IndexWriter) -> Result<()> {
		writer.commit().map_err(index_err)?;
		self.reader.reload().map_err(index_err)
	}

	/// Query syntax errors are tolerated: the parsable part of the query runs.
	pub fn search(&self, query: &str, limit: usize) -> Result<Vec<SearchResult>> {
		if limit == 0 || query.trim().is_empty() { return Ok(Vec::new()); }
		let searcher = self.reader.searcher();
		let qp = QueryParser::for_index(&self.index, vec![self.text_field]);
		let (q, errors) = qp.parse_query_lenient(query);
		if !errors.is_empty() { debug!(query, errors = errors.len(), "bm25 query parsed leniently"); }
		let top_docs = searcher.search(&q, &TopDocs::with_limit(limit)).map_err(index_err)?;
		let mut results = Vec::with_capacity(top_docs.len());
		for (score, addr) in top_docs {
			let doc: TantivyDocument = searcher.doc(addr).map_err(index_err)?;
			let text = |f: Field| doc.get_first(f).and_then(|v| v.as_str()).unwrap_or_default().to_string();
			let metadata: Meta = serde_json::from_str(&text(self.meta_field)).unwrap_or_default();
			results.push(SearchResult { id: text(self.id_field), content: text(self.text_field), score, result_type: ResultType::Bm25, metadata });
		}
		Ok(results)
	}

	pub fn len(&self) -> u64 { self.reader.searcher().num_docs() }

	pub fn is_empty(&self) -> bool { self.len() == 0 }
}
