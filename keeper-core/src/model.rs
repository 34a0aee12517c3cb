use chrono::DateTime;
use chrono::Utc;
use keeper_docstore::Document;
use keeper_docstore::Part;
use keeper_docstore::Version;
use keeper_model::TagFilter;
use keeper_model::Tags;
use serde::Deserialize;
use serde::Serialize;

/// One of `{content, uri}` supplies the new state; both or neither is
/// [`crate::KeeperError::InvalidInput`] (spec §4.1 Phase A.1).
#[derive(Debug, Clone, Default)]
pub struct PutInput {
    pub id: Option<String>,
    pub content: Option<String>,
    pub uri: Option<String>,
    pub summary: Option<String>,
    pub tags: Tags,
    pub created_at: Option<DateTime<Utc>>,
}

impl PutInput {
    #[must_use]
    pub fn content(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn uri(uri: impl Into<String>) -> Self {
        Self {
            uri: Some(uri.into()),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    #[must_use]
    pub fn with_tags(mut self, tags: Tags) -> Self {
        self.tags = tags;
        self
    }

    #[must_use]
    pub fn with_summary(mut self, summary: impl Into<String>) -> Self {
        self.summary = Some(summary.into());
        self
    }
}

/// `find`'s query is either free text (embedded fresh) or a reference to an
/// existing entity's vector (spec §4.1 "query text or `similar_to` id").
#[derive(Debug, Clone)]
pub enum FindQuery {
    Text(String),
    SimilarTo(String),
}

#[derive(Debug, Clone)]
pub struct FindInput {
    pub query: FindQuery,
    pub tag_filter: TagFilter,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    pub limit: usize,
    pub fulltext: bool,
    /// Deep-find expansion (spec §4.1 "Deep-find and token budget").
    pub deep: bool,
}

impl FindInput {
    #[must_use]
    pub fn text(query: impl Into<String>) -> Self {
        Self {
            query: FindQuery::Text(query.into()),
            tag_filter: TagFilter::new(),
            since: None,
            until: None,
            limit: 10,
            fulltext: false,
            deep: false,
        }
    }

    #[must_use]
    pub fn similar_to(id: impl Into<String>) -> Self {
        Self {
            query: FindQuery::SimilarTo(id.into()),
            tag_filter: TagFilter::new(),
            since: None,
            until: None,
            limit: 10,
            fulltext: false,
            deep: false,
        }
    }

    #[must_use]
    pub fn with_tag_filter(mut self, filter: TagFilter) -> Self {
        self.tag_filter = filter;
        self
    }

    #[must_use]
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }
}

/// One scored result from `find` or one of `get`'s derived blocks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Item {
    pub id: String,
    pub summary: String,
    pub tags: Tags,
    pub updated_at: DateTime<Utc>,
    /// Raw cosine similarity (spec §4.1 step 7: "Attach the raw cosine as
    /// `score`").
    pub score: f32,
    /// `score · decay_factor(updated_at)`, the value `find` sorts by.
    pub effective_score: f32,
}

#[derive(Debug, Clone, Default)]
pub struct FindResult {
    pub items: Vec<Item>,
    /// Populated only when `FindInput::deep` was set: summaries gathered
    /// by the breadth-first edge/similar-items walk, trimmed to the
    /// character budget (spec §4.1).
    pub deep_context: Vec<Item>,
}

/// The tagged-sum entity a `get` resolved to (spec §9 "Tagged-value entity
/// kinds"): Document, Version and Part look similar but are not
/// substitutable in search, so each keeps its own shape through to the
/// caller.
#[derive(Debug, Clone)]
pub enum EntityView {
    Document(Document),
    Version(Version),
    Part(Part),
}

#[derive(Debug, Clone)]
pub struct MetaBlock {
    pub label: String,
    pub items: Vec<Item>,
}

#[derive(Debug, Clone)]
pub struct InverseBlock {
    pub verb: String,
    pub doc_ids: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct VersionNavEntry {
    pub offset: u32,
    pub summary: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct PartManifestEntry {
    pub part_num: u32,
    pub summary: String,
}

/// The full frontmatter view `get` assembles (spec §4.1 steps 5-9).
#[derive(Debug, Clone)]
pub struct GetResult {
    pub entity: EntityView,
    pub similar: Vec<Item>,
    pub meta: Vec<MetaBlock>,
    pub inverse_edges: Vec<InverseBlock>,
    pub versions_before: Vec<VersionNavEntry>,
    pub versions_after: Vec<VersionNavEntry>,
    pub parts: Vec<PartManifestEntry>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportMode {
    Merge,
    Replace,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ImportStats {
    pub created: usize,
    pub updated: usize,
    pub skipped: usize,
    pub reembed_enqueued: usize,
}

/// Streaming export header (spec §6.3): always the first record written by
/// [`crate::Keeper::export_iter`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportHeader {
    pub format: String,
    pub version: u32,
    pub exported_at: DateTime<Utc>,
    pub store_info: String,
}

impl ExportHeader {
    #[must_use]
    pub fn new(exported_at: DateTime<Utc>, store_info: impl Into<String>) -> Self {
        Self {
            format: "keep-export".to_string(),
            version: 1,
            exported_at,
            store_info: store_info.into(),
        }
    }
}

/// One per-document export record (spec §6.3): self-contained, with
/// versions and parts inlined. Embeddings are never exported; import
/// re-enqueues `reembed` tasks instead.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportRecord {
    pub id: String,
    pub summary: String,
    pub tags: Tags,
    pub content_hash: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub accessed_at: DateTime<Utc>,
    pub versions: Vec<Version>,
    pub parts: Vec<Part>,
}

/// One streamed export entry: the header once, then one record per
/// document.
#[derive(Debug, Clone)]
pub enum ExportEntry {
    Header(ExportHeader),
    Record(Box<ExportRecord>),
}

#[derive(Debug, Clone, Copy, Default)]
pub struct MoveResult {
    pub moved: usize,
}

/// `analyze`'s result: the provider ran synchronously, or the work was
/// deferred to a `analyze` task because the provider was unavailable.
#[derive(Debug, Clone)]
pub enum AnalysisOutcome {
    Completed(Vec<Part>),
    Enqueued,
}
