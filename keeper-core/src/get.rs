use chrono::Utc;
use keeper_docstore::Part;
use keeper_docstore::Version;
use keeper_model::EntityRef;
use keeper_model::TagFilter;
use keeper_vectorstore::QueryOptions;

use crate::error::KeeperError;
use crate::error::KeeperResult;
use crate::find::decay_age;
use crate::keeper::Keeper;
use crate::model::EntityView;
use crate::model::GetResult;
use crate::model::InverseBlock;
use crate::model::Item;
use crate::model::MetaBlock;
use crate::model::PartManifestEntry;
use crate::model::VersionNavEntry;

const SIMILAR_ITEMS_LIMIT: usize = 5;
const META_ITEMS_PER_DOC: usize = 3;
const VERSION_NAV_LIMIT: usize = 3;

impl Keeper {
    /// The `get` read protocol (spec §4.1 "The read protocol"): resolves an
    /// address, optionally filters by tags, and assembles the similar-items,
    /// meta, inverse-edge, version-nav and parts-manifest blocks a caller
    /// needs to render frontmatter around the entity.
    pub async fn get(&self, raw_id: &str, tag_filter: Option<&TagFilter>) -> KeeperResult<GetResult> {
        let entity_ref = keeper_model::parse_entity_ref(raw_id)
            .map_err(|e| KeeperError::InvalidInput(e.to_string()))?;

        match entity_ref {
            EntityRef::Version(doc_id, offset) => self.get_version_entity(&doc_id, offset).await,
            EntityRef::Part(doc_id, part_num) => self.get_part_entity(&doc_id, part_num).await,
            EntityRef::Document(doc_id) => self.get_document_entity(&doc_id, tag_filter).await,
        }
    }

    async fn get_version_entity(&self, doc_id: &str, offset: u32) -> KeeperResult<GetResult> {
        let version = self
            .docstore
            .get_version(doc_id, offset)
            .await?
            .ok_or_else(|| KeeperError::NotFound(format!("{doc_id}@V{offset}")))?;

        let versions_after = self.version_nav_after(doc_id, offset).await?;
        let versions_before = self.version_nav_before(doc_id, offset).await?;

        Ok(GetResult {
            entity: EntityView::Version(version),
            similar: Vec::new(),
            meta: Vec::new(),
            inverse_edges: Vec::new(),
            versions_before,
            versions_after,
            parts: Vec::new(),
        })
    }

    async fn get_part_entity(&self, doc_id: &str, part_num: u32) -> KeeperResult<GetResult> {
        let part = self
            .docstore
            .get_part(doc_id, part_num)
            .await?
            .ok_or_else(|| KeeperError::NotFound(format!("{doc_id}@P{part_num}")))?;

        Ok(GetResult {
            entity: EntityView::Part(part),
            similar: Vec::new(),
            meta: Vec::new(),
            inverse_edges: Vec::new(),
            versions_before: Vec::new(),
            versions_after: Vec::new(),
            parts: Vec::new(),
        })
    }

    async fn get_document_entity(
        &self,
        doc_id: &str,
        tag_filter: Option<&TagFilter>,
    ) -> KeeperResult<GetResult> {
        let doc = self
            .docstore
            .get(doc_id)
            .await?
            .ok_or_else(|| KeeperError::NotFound(doc_id.to_string()))?;

        if let Some(filter) = tag_filter
            && !doc.tags.matches_filter(filter)
        {
            return Err(KeeperError::NotFound(doc_id.to_string()));
        }

        let now = Utc::now();
        let half_life = self.config.read().await.half_life_seconds;

        let similar = self.build_similar_items(doc_id, now, half_life).await?;
        let meta = self.build_meta_blocks(&doc, now, half_life).await?;
        let inverse_edges = self.build_inverse_edges(doc_id).await?;
        let parts = self.build_parts_manifest(doc_id).await?;
        let versions_before = self.version_nav_before(doc_id, 0).await?;

        self.docstore.touch_accessed(doc_id, now).await?;

        Ok(GetResult {
            entity: EntityView::Document(doc),
            similar,
            meta,
            inverse_edges,
            versions_before,
            versions_after: Vec::new(),
            parts,
        })
    }

    /// Step 5: similar items from the VectorStore, self excluded, decayed
    /// and limited to 3-5 results.
    async fn build_similar_items(
        &self,
        doc_id: &str,
        now: chrono::DateTime<Utc>,
        half_life: f64,
    ) -> KeeperResult<Vec<Item>> {
        let candidates = self
            .vectorstore
            .query_by_key(
                doc_id,
                QueryOptions {
                    limit: SIMILAR_ITEMS_LIMIT,
                    exclude_key: Some(doc_id.to_string()),
                    ..Default::default()
                },
            )
            .await?;

        Ok(candidates
            .into_iter()
            .filter(|candidate| candidate.tags.get("_embed_pending") != Some("1"))
            .map(|candidate| {
                let decay = decay_age(now, candidate.updated_at, half_life);
                Item {
                    id: candidate.key,
                    summary: candidate.summary,
                    tags: candidate.tags,
                    updated_at: candidate.updated_at,
                    score: candidate.cosine,
                    effective_score: candidate.cosine * decay as f32,
                }
            })
            .collect())
    }

    /// Step 6: every applicable `.meta/*` doc's query, run as an OR of its
    /// filter clauses against this doc's own vector, up to 3 results each.
    async fn build_meta_blocks(
        &self,
        doc: &keeper_docstore::Document,
        now: chrono::DateTime<Utc>,
        half_life: f64,
    ) -> KeeperResult<Vec<MetaBlock>> {
        let matches = keeper_meta::applicable_meta_queries(self.docstore.as_ref(), &doc.tags).await?;
        let Some(own_vector) = self.vectorstore.get(&doc.id).await? else {
            return Ok(Vec::new());
        };

        let mut blocks = Vec::with_capacity(matches.len());
        for query_match in matches {
            let mut seen = std::collections::HashSet::new();
            let mut items = Vec::new();
            for filter in &query_match.filters {
                let candidates = self
                    .vectorstore
                    .query(
                        &own_vector.vector,
                        QueryOptions {
                            tag_filter: filter.clone(),
                            limit: META_ITEMS_PER_DOC,
                            exclude_key: Some(doc.id.clone()),
                            ..Default::default()
                        },
                    )
                    .await?;
                for candidate in candidates {
                    if !seen.insert(candidate.key.clone()) {
                        continue;
                    }
                    let decay = decay_age(now, candidate.updated_at, half_life);
                    items.push(Item {
                        id: candidate.key,
                        summary: candidate.summary,
                        tags: candidate.tags,
                        updated_at: candidate.updated_at,
                        score: candidate.cosine,
                        effective_score: candidate.cosine * decay as f32,
                    });
                }
            }
            items.sort_by(|a, b| {
                b.effective_score
                    .partial_cmp(&a.effective_score)
                    .unwrap_or(std::cmp::Ordering::Equal)
            });
            items.truncate(META_ITEMS_PER_DOC);
            if !items.is_empty() {
                blocks.push(MetaBlock {
                    label: query_match.label,
                    items,
                });
            }
        }
        Ok(blocks)
    }

    /// Step 7: for each declared edge key, the documents pointing at `doc_id`
    /// through it, grouped under `tags/{verb}:` (spec I7).
    async fn build_inverse_edges(&self, doc_id: &str) -> KeeperResult<Vec<InverseBlock>> {
        let declared = keeper_meta::edge_keys(self.docstore.as_ref()).await?;
        let mut blocks = Vec::new();
        for (key, verb) in declared {
            let doc_ids = self.docstore.inverse_edges(doc_id, &key).await?;
            if !doc_ids.is_empty() {
                blocks.push(InverseBlock { verb, doc_ids });
            }
        }
        Ok(blocks)
    }

    /// Step 9: `@P{n}` manifest lines with summaries.
    async fn build_parts_manifest(&self, doc_id: &str) -> KeeperResult<Vec<PartManifestEntry>> {
        let parts: Vec<Part> = self.docstore.list_parts(doc_id).await?;
        Ok(parts
            .into_iter()
            .map(|part| PartManifestEntry {
                part_num: part.part_num,
                summary: part.summary,
            })
            .collect())
    }

    /// Up to 3 versions older than `offset` (nearest-first among the older
    /// ones), used both by a current-doc `get` and by a viewed-version `get`.
    async fn version_nav_before(&self, doc_id: &str, offset: u32) -> KeeperResult<Vec<VersionNavEntry>> {
        let versions: Vec<Version> = self.docstore.list_versions(doc_id).await?;
        let max_ordinal = versions.iter().map(|v| v.version_ordinal).max().unwrap_or(0);

        let mut before: Vec<VersionNavEntry> = versions
            .into_iter()
            .filter_map(|v| {
                let this_offset = max_ordinal - v.version_ordinal + 1;
                if this_offset > offset {
                    Some(VersionNavEntry {
                        offset: this_offset,
                        summary: v.summary,
                        created_at: v.created_at,
                    })
                } else {
                    None
                }
            })
            .collect();
        before.sort_by(|a, b| a.offset.cmp(&b.offset));
        before.truncate(VERSION_NAV_LIMIT);
        Ok(before)
    }

    /// Up to 3 versions newer than `offset` (i.e. closer to current), used
    /// when a version is being viewed (spec §4.1 step 8).
    async fn version_nav_after(&self, doc_id: &str, offset: u32) -> KeeperResult<Vec<VersionNavEntry>> {
        if offset == 0 {
            return Ok(Vec::new());
        }
        let versions: Vec<Version> = self.docstore.list_versions(doc_id).await?;
        let max_ordinal = versions.iter().map(|v| v.version_ordinal).max().unwrap_or(0);

        let mut after: Vec<VersionNavEntry> = versions
            .into_iter()
            .filter_map(|v| {
                let this_offset = max_ordinal - v.version_ordinal + 1;
                if this_offset < offset {
                    Some(VersionNavEntry {
                        offset: this_offset,
                        summary: v.summary,
                        created_at: v.created_at,
                    })
                } else {
                    None
                }
            })
            .collect();
        after.sort_by(|a, b| a.offset.cmp(&b.offset));
        after.truncate(VERSION_NAV_LIMIT);
        Ok(after)
    }
}
