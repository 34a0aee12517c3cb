#![deny(clippy::print_stdout, clippy::print_stderr)]
//! The DocStore component of spec §4.2: Document/Version/Part persistence,
//! the tag index, the fulltext index over summaries, and the edge table.
//!
//! Two implementations are provided: [`memory::InMemoryDocumentStore`] for
//! tests and ephemeral sessions, and [`sqlite::SqliteDocumentStore`] for the
//! durable, crash-recoverable store the write protocol (spec §4.1 Phase D)
//! depends on. Both implement the same [`DocumentStore`] trait so the
//! Keeper's behavior does not depend on which backend is wired in.

mod memory;
mod model;
mod sqlite;

pub use memory::InMemoryDocumentStore;
pub use model::Document;
pub use model::DocStoreError;
pub use model::DocStoreResult;
pub use model::DocumentStore;
pub use model::DocumentWrite;
pub use model::Edge;
pub use model::ListQuery;
pub use model::NewDocument;
pub use model::NewPart;
pub use model::Part;
pub use model::Version;
pub use sqlite::SqliteDocumentStore;
