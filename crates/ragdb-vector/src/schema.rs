use arrow_schema::{DataType, Field, Schema};
use std::sync::Arc;

pub const ID: &str = "id";
pub const DOC_PATH: &str = "doc_path";
pub const CHUNK_ID: &str = "chunk_id";
pub const CONTENT: &str = "content";
pub const METADATA: &str = "metadata";
pub const VECTOR: &str = "vector";
pub const DISTANCE: &str = "_distance";

/// One row per chunk. `metadata` is the chunk's string map as JSON.
pub fn build_chunk_schema(dim: i32) -> Arc<Schema> {
	Arc::new(Schema::new(vec![
		Field::new(ID, DataType::Utf8, false),
		Field::new(DOC_PATH, DataType::Utf8, false),
		Field::new(CHUNK_ID, DataType::Utf8, false),
		Field::new(CONTENT, DataType::Utf8, false),
		Field::new(METADATA, DataType::Utf8, false),
		Field::new(VECTOR, DataType::FixedSizeList(Arc::new(Field::new("item", DataType::Float32, true)), dim), true),
	]))
}

/// Vector width of an existing table, read back from its schema.
pub fn vector_dim(schema: &Schema) -> Option<usize> {
	match schema.field_with_name(VECTOR).ok()?.data_type() {
		DataType::FixedSizeList(_, n) => usize::try_from(*n).ok(),
		_ => None,
	}
}
