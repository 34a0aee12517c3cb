#![deny(clippy::print_stdout, clippy::print_stderr)]
//! The ProviderRouter component of spec §4.6: lazily-loaded capability
//! dispatch (embed/summarize/analyze/describe/fetch), provider identity
//! tracking, the embedding cache (spec §5), and the advisory file lock
//! local model providers use to avoid saturating shared hardware.

mod advisory_lock;
mod cache;
mod error;
mod identity;
mod lazy;
mod router;
mod traits;

pub use advisory_lock::FileLock;
pub use cache::CacheKey;
pub use cache::EmbeddingCacheStore;
pub use cache::FileCacheStore;
pub use cache::LruEmbeddingCache;
pub use cache::NullCacheStore;
pub use error::ProviderError;
pub use error::ProviderResult;
pub use identity::ProviderIdentity;
pub use identity::ReindexState;
pub use identity::identity_changed;
pub use lazy::LazySlot;
pub use router::ProviderRouter;
pub use traits::AnalyzeProvider;
pub use traits::AnalyzedPart;
pub use traits::DescribeProvider;
pub use traits::EmbeddingProvider;
pub use traits::FetchProvider;
pub use traits::SummarizeProvider;
