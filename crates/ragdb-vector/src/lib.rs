//! Vector stores for chunk embeddings.
//!
//! [`InMemoryVectorStore`] keeps everything in process and is what tests and
//! mock runs use; [`LanceVectorStore`] persists to a LanceDB directory.

pub mod lance;
pub mod memory;
pub mod schema;

pub use lance::LanceVectorStore;
pub use memory::{cosine_similarity, InMemoryVectorStore};
