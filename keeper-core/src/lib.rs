#![deny(clippy::print_stdout, clippy::print_stderr)]
//! The Keeper component of spec §4.1: the facade that orchestrates
//! DocStore, VectorStore, PendingQueue and ProviderRouter into the
//! `put`/`get`/`find`/`tag`/`delete`/`revert`/`get_version`/`list_versions`/
//! `get_now`/`set_now`/`move`/`analyze`/`export_iter`/`import_data` surface
//! every other crate in this workspace exists to serve.

mod analyze;
mod config;
mod deepfind;
mod edges;
mod error;
mod export_import;
mod find;
mod get;
mod keeper;
mod model;
mod nowdoc;
mod write;
pub mod worker;

pub use config::StoreConfig;
pub use error::KeeperError;
pub use error::KeeperResult;
pub use keeper::Keeper;
pub use model::AnalysisOutcome;
pub use model::EntityView;
pub use model::ExportEntry;
pub use model::ExportHeader;
pub use model::ExportRecord;
pub use model::FindInput;
pub use model::FindQuery;
pub use model::FindResult;
pub use model::GetResult;
pub use model::ImportMode;
pub use model::ImportStats;
pub use model::InverseBlock;
pub use model::Item;
pub use model::MetaBlock;
pub use model::MoveResult;
pub use model::PartManifestEntry;
pub use model::PutInput;
pub use model::VersionNavEntry;
pub use worker::WorkerPool;
