use async_trait::async_trait;
use chrono::DateTime;
use chrono::Utc;
use keeper_model::TagFilter;
use keeper_model::Tags;
use thiserror::Error;

pub type VectorStoreResult<T> = Result<T, VectorStoreError>;

#[derive(Debug, Error)]
pub enum VectorStoreError {
    #[error("dimension mismatch: collection is {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },
    #[error("storage failure: {0}")]
    Storage(String),
}

/// One embedding, keyed by a composite entity key (spec §3.1: `{doc_id}`,
/// `{doc_id}@v{n}`, `{doc_id}@p{n}`). Carries the summary and tags alongside
/// the vector so `find` can answer without a DocStore join (spec §4.3).
#[derive(Debug, Clone, PartialEq)]
pub struct VectorRecord {
    pub key: String,
    pub vector: Vec<f32>,
    pub summary: String,
    pub tags: Tags,
    pub updated_at: DateTime<Utc>,
}

/// Pre-filter and scoring parameters for [`VectorStore::query`]. The tag
/// filter and time window are applied **before** the nearest-neighbor scan
/// (spec §4.3 "a correctness feature... not a performance one").
#[derive(Debug, Clone, Default)]
pub struct QueryOptions {
    pub tag_filter: TagFilter,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    pub limit: usize,
    /// When set, candidates whose key equals this are skipped (`find`'s
    /// `similar_to` excludes the document its own embedding came from).
    pub exclude_key: Option<String>,
}

/// A query result: the raw cosine score plus enough of the record to render
/// without a second lookup.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredVector {
    pub key: String,
    pub summary: String,
    pub tags: Tags,
    pub updated_at: DateTime<Utc>,
    pub cosine: f32,
}

/// Persists embeddings keyed by entity id and answers nearest-neighbor
/// queries under a tag/time pre-filter (spec §4.3). Every implementation
/// pins a dimension on first upsert; later upserts of a different length
/// return [`VectorStoreError::DimensionMismatch`] rather than silently
/// truncating or padding.
#[async_trait]
pub trait VectorStore: Send + Sync {
    async fn upsert(&self, record: VectorRecord) -> VectorStoreResult<()>;
    async fn delete(&self, key: &str) -> VectorStoreResult<bool>;
    async fn get(&self, key: &str) -> VectorStoreResult<Option<VectorRecord>>;

    /// Cosine-ranked candidates matching `options`' pre-filter, highest
    /// score first, truncated to `options.limit`.
    async fn query(
        &self,
        vector: &[f32],
        options: QueryOptions,
    ) -> VectorStoreResult<Vec<ScoredVector>>;

    /// Convenience wrapper: look up `key`'s own vector, then `query` with it
    /// (used by `find(similar_to = id)` and `get`'s similar-items block).
    async fn query_by_key(
        &self,
        key: &str,
        options: QueryOptions,
    ) -> VectorStoreResult<Vec<ScoredVector>> {
        let Some(record) = self.get(key).await? else {
            return Ok(Vec::new());
        };
        self.query(&record.vector, options).await
    }

    /// The dimension pinned by the first upsert, if any vectors exist yet.
    async fn dimension(&self) -> Option<usize>;

    /// Drop every record and release the pinned dimension. Called when the
    /// engine begins a reindex (spec §4.6, §7 `DimensionMismatch`): the
    /// collection can only ever hold one dimension at a time, and the stale
    /// vectors are about to be superseded by `reembed` tasks anyway, so there
    /// is nothing worth keeping across the transition.
    async fn clear(&self) -> VectorStoreResult<()>;
}
