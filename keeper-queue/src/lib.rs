#![deny(clippy::print_stdout, clippy::print_stderr)]
//! The PendingQueue component of spec §4.4: a durable FIFO of deferred work
//! (summarize, analyze, embed, reembed, ocr, backfill-edges, tag-classify)
//! with claim/ack/nack semantics and per-doc serialization.

mod memory;
mod model;

pub use memory::InMemoryPendingQueue;
pub use model::NackOutcome;
pub use model::NewTask;
pub use model::PendingQueue;
pub use model::PendingTask;
pub use model::QueueError;
pub use model::QueueResult;
pub use model::TaskKind;
