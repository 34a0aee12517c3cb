#![deny(clippy::print_stdout, clippy::print_stderr)]
//! The VectorStore component of spec §4.3: embeddings keyed by composite
//! entity id, cosine similarity, and a tag/time pre-filter applied before
//! the nearest-neighbor scan.

mod cosine;
mod memory;
mod model;

pub use cosine::cosine_similarity;
pub use cosine::decay_factor;
pub use memory::InMemoryVectorStore;
pub use model::QueryOptions;
pub use model::ScoredVector;
pub use model::VectorRecord;
pub use model::VectorStore;
pub use model::VectorStoreError;
pub use model::VectorStoreResult;
