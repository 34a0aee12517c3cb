use keeper_docstore::DocumentStore;
use keeper_docstore::ListQuery;
use keeper_model::TagFilter;
use keeper_model::Tags;

use crate::dsl::build_query_filters;
use crate::error::MetaError;
use crate::error::MetaResult;

const META_PREFIX: &str = ".meta/";

/// One `.meta/NAME` doc's evaluated query, ready to hand to the VectorStore
/// pre-filter. `filters` are OR'd: each is run as a separate query and the
/// results merged (spec §4.5).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetaQueryMatch {
    pub meta_doc_id: String,
    /// The part of the id after `.meta/`, used as the result block's label.
    pub label: String,
    pub filters: Vec<TagFilter>,
}

/// Evaluate every `.meta/*` doc against `current_tags`, dropping docs whose
/// prerequisites are unmet (spec §4.5). Invoked by `get` to build the meta
/// block and by the write path to pick a summarization/analysis prompt
/// selector's candidate set.
pub async fn applicable_meta_queries(
    docstore: &dyn DocumentStore,
    current_tags: &Tags,
) -> MetaResult<Vec<MetaQueryMatch>> {
    let docs = docstore
        .list(ListQuery {
            include_system: true,
            ..Default::default()
        })
        .await
        .map_err(|e| MetaError::Storage(e.to_string()))?;

    Ok(docs
        .into_iter()
        .filter(|d| d.id.starts_with(META_PREFIX))
        .filter_map(|d| {
            let filters = build_query_filters(&d.summary, current_tags)?;
            if filters.is_empty() {
                return None;
            }
            let label = d.id[META_PREFIX.len()..].to_string();
            Some(MetaQueryMatch {
                meta_doc_id: d.id,
                label,
                filters,
            })
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use keeper_docstore::InMemoryDocumentStore;
    use keeper_docstore::NewDocument;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn skips_meta_docs_with_unmet_prerequisites() {
        let store = InMemoryDocumentStore::new();
        store
            .create(NewDocument {
                id: ".meta/related-by-speaker".to_string(),
                summary: "speaker=*\nspeaker=".to_string(),
                tags: Tags::new(),
                content_hash: None,
                created_at: Utc::now(),
            })
            .await
            .expect("create");

        let no_speaker = Tags::new();
        let matches = applicable_meta_queries(&store, &no_speaker).await.expect("eval");
        assert!(matches.is_empty());

        let mut with_speaker = Tags::new();
        with_speaker.set("speaker", "Kate");
        let matches = applicable_meta_queries(&store, &with_speaker).await.expect("eval");
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].label, "related-by-speaker");
    }
}
