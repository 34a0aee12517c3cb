use async_trait::async_trait;
use chrono::DateTime;
use chrono::Utc;
use keeper_model::Tags;
use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

pub type DocStoreResult<T> = Result<T, DocStoreError>;

#[derive(Debug, Error)]
pub enum DocStoreError {
    #[error("document not found: {0}")]
    NotFound(String),
    #[error("tag constraint violated for {key}: {message}")]
    TagConstraintViolation { key: String, message: String },
    #[error("version conflict for {0}")]
    Conflict(String),
    #[error("storage failure: {0}")]
    Storage(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub summary: String,
    pub tags: Tags,
    pub content_hash: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub accessed_at: DateTime<Utc>,
    pub part_count: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Version {
    pub doc_id: String,
    pub version_ordinal: u32,
    pub summary: String,
    pub tags: Tags,
    pub content_hash: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Part {
    pub doc_id: String,
    pub part_num: u32,
    pub summary: String,
    pub tags: Tags,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Edge {
    pub source_doc: String,
    pub tag_key: String,
    pub target_doc: String,
}

#[derive(Debug, Clone)]
pub struct NewDocument {
    pub id: String,
    pub summary: String,
    pub tags: Tags,
    pub content_hash: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// A versioned or tag-only update to an existing document (Phase D).
#[derive(Debug, Clone)]
pub struct DocumentWrite {
    pub summary: String,
    pub tags: Tags,
    pub content_hash: Option<String>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewPart {
    pub part_num: u32,
    pub summary: String,
    pub tags: Tags,
    pub content: String,
}

#[derive(Debug, Clone, Default)]
pub struct ListQuery {
    pub tag_filter: keeper_model::TagFilter,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
    /// When false (the default), ids starting with `.` are excluded, per I8.
    pub include_system: bool,
}

/// Persists Document/Version/Part state, the tag index, the fulltext index,
/// and the edge table (spec §4.2). All writes that touch more than one table
/// (archive-then-update, tag write plus edge delta) are expected to be
/// atomic within a single call.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn create(&self, doc: NewDocument) -> DocStoreResult<Document>;
    async fn get(&self, id: &str) -> DocStoreResult<Option<Document>>;

    /// Archive the current state as the next version ordinal, then install
    /// `write` as the new current state (Phase D, versioned update).
    async fn update_versioned(&self, id: &str, write: DocumentWrite) -> DocStoreResult<Document>;

    /// Update tags on the current row without archiving (Phase D, tag-only
    /// update).
    async fn update_tags_only(
        &self,
        id: &str,
        tags: Tags,
        updated_at: DateTime<Utc>,
    ) -> DocStoreResult<Document>;

    /// Replace the current row's summary without archiving a version: the
    /// `summarize` background task fills in a deferred summary for content
    /// that was already written, it does not itself constitute a content
    /// change.
    async fn update_summary_only(
        &self,
        id: &str,
        summary: String,
        updated_at: DateTime<Utc>,
    ) -> DocStoreResult<Document>;

    /// Replace the current row's summary, tags and content_hash without
    /// archiving a version: the `ocr` background task uses this to install
    /// the extracted text it was deferred to produce, since the original
    /// `put` already "happened" from the caller's perspective.
    async fn update_current(&self, id: &str, write: DocumentWrite) -> DocStoreResult<Document>;

    /// Remove the current document and its parts. When `delete_versions` is
    /// true, also purge its archived versions.
    async fn delete(&self, id: &str, delete_versions: bool) -> DocStoreResult<bool>;

    /// Promote the newest archived version back to current, shrinking the
    /// version tail by one. Returns `None` if the document has no versions.
    async fn revert(&self, id: &str) -> DocStoreResult<Option<Document>>;

    async fn touch_accessed(&self, id: &str, accessed_at: DateTime<Utc>) -> DocStoreResult<()>;

    /// offset 0 = current row's state snapshot; offset k >= 1 = the kth
    /// newest archived version (ordinal = max - k + 1).
    async fn get_version(&self, id: &str, offset: u32) -> DocStoreResult<Option<Version>>;

    /// Newest-archived-first: ordinals `N, N-1, ..., 1`.
    async fn list_versions(&self, id: &str) -> DocStoreResult<Vec<Version>>;

    async fn replace_parts(&self, id: &str, parts: Vec<NewPart>) -> DocStoreResult<Vec<Part>>;
    async fn list_parts(&self, id: &str) -> DocStoreResult<Vec<Part>>;
    async fn get_part(&self, id: &str, part_num: u32) -> DocStoreResult<Option<Part>>;
    async fn tag_part(&self, id: &str, part_num: u32, tags: Tags) -> DocStoreResult<Part>;

    /// Dedup probe (Phase C.1): the first other document sharing `hash`.
    async fn find_by_content_hash(
        &self,
        hash: &str,
        exclude_id: Option<&str>,
    ) -> DocStoreResult<Option<Document>>;

    async fn list(&self, query: ListQuery) -> DocStoreResult<Vec<Document>>;

    /// Substring/token match over summaries only (spec Non-goals: no ranking
    /// beyond this).
    async fn fulltext_search(&self, text: &str, query: ListQuery) -> DocStoreResult<Vec<Document>>;

    async fn upsert_edge(&self, edge: Edge) -> DocStoreResult<()>;
    async fn delete_edge(&self, edge: Edge) -> DocStoreResult<()>;

    /// Documents `d` such that `d.tags[tag_key] == target_doc` (I7).
    async fn inverse_edges(&self, target_doc: &str, tag_key: &str) -> DocStoreResult<Vec<String>>;

    /// All `(tag_key, target_doc)` edges sourced from `source_doc`, used by
    /// Phase F to diff old vs new edge sets.
    async fn edges_from(&self, source_doc: &str) -> DocStoreResult<Vec<Edge>>;
}
