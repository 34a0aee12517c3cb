use chrono::DateTime;
use chrono::Utc;
use keeper_docstore::Edge;
use keeper_docstore::ListQuery;
use keeper_docstore::NewDocument;
use keeper_model::SystemTags;
use keeper_model::Tags;
use keeper_providers::ProviderIdentity;
use keeper_queue::NewTask;
use keeper_queue::TaskKind;

use crate::error::KeeperResult;
use crate::keeper::Keeper;

impl Keeper {
    /// Phase F: diff `old_tags` vs `new_tags` against the currently
    /// declared edge keys (`.tag/K` with `_inverse=V`) and reconcile the
    /// edge table, auto-vivifying any target document that does not exist
    /// yet (spec §4.1 Phase F, I7).
    pub(crate) async fn maintain_edges(
        &self,
        doc_id: &str,
        old_tags: &Tags,
        new_tags: &Tags,
        now: DateTime<Utc>,
    ) -> KeeperResult<()> {
        if doc_id.starts_with('.') {
            return Ok(());
        }

        let declared = keeper_meta::edge_keys(self.docstore.as_ref()).await?;
        for (key, _verb) in declared {
            let old_value = old_tags.get(&key);
            let new_value = new_tags.get(&key);
            if old_value == new_value {
                continue;
            }

            if let Some(target) = old_value
                && !target.starts_with('.')
            {
                self.docstore
                    .delete_edge(Edge {
                        source_doc: doc_id.to_string(),
                        tag_key: key.clone(),
                        target_doc: target.to_string(),
                    })
                    .await?;
            }

            if let Some(target) = new_value
                && !target.starts_with('.')
            {
                self.ensure_autovivified(target, now).await?;
                self.docstore
                    .upsert_edge(Edge {
                        source_doc: doc_id.to_string(),
                        tag_key: key.clone(),
                        target_doc: target.to_string(),
                    })
                    .await?;
            }
        }
        Ok(())
    }

    /// Create `target` as an empty placeholder document if it does not
    /// exist yet, so an edge never points at a missing id (spec §4.1 Phase
    /// F "auto-vivify"). Also used by the `backfill-edges` task, which
    /// materializes the same edges retroactively.
    pub(crate) async fn ensure_autovivified(&self, target: &str, now: DateTime<Utc>) -> KeeperResult<()> {
        if self.docstore.get(target).await?.is_some() {
            return Ok(());
        }
        let mut tags = Tags::new();
        keeper_model::stamp_system_tags(&mut tags, now, now);
        tags.set("_source", keeper_model::TagSource::AutoVivify.as_str());
        self.docstore
            .create(NewDocument {
                id: target.to_string(),
                summary: String::new(),
                tags,
                content_hash: None,
                created_at: now,
            })
            .await?;
        Ok(())
    }

    /// When the document just written is itself a `.tag/K` declaration
    /// (not a `.tag/K/value` constrained child) and its `_inverse` tag has
    /// just been set for the first time, enqueue a backfill so existing
    /// documents already carrying tag `K` get the edge retroactively.
    pub(crate) async fn maybe_backfill_tag_declaration(
        &self,
        doc_id: &str,
        old_tags: Option<&Tags>,
        new_tags: &Tags,
        now: DateTime<Utc>,
    ) -> KeeperResult<()> {
        let Some(key) = doc_id.strip_prefix(".tag/") else {
            return Ok(());
        };
        if key.contains('/') || key.is_empty() {
            return Ok(());
        }

        let had_inverse = old_tags.is_some_and(|t| SystemTags(t).inverse().is_some());
        let has_inverse = SystemTags(new_tags).inverse().is_some();
        if had_inverse || !has_inverse {
            return Ok(());
        }

        self.queue
            .enqueue(
                NewTask {
                    doc_id: doc_id.to_string(),
                    task_kind: TaskKind::BackfillEdges,
                    payload: key.to_string(),
                },
                now,
            )
            .await?;
        Ok(())
    }

    /// Flip the store into `Reindexing` and enqueue a `reembed` task for
    /// every non-system document (spec §4.6): triggered when
    /// [`keeper_providers::ProviderRouter::embed`] reports the embedding
    /// provider's identity changed since the last recorded one.
    pub(crate) async fn begin_reindex(
        &self,
        previous_identity: ProviderIdentity,
        now: DateTime<Utc>,
    ) -> KeeperResult<()> {
        let mut state = self.reindex.lock().await;
        if state.is_reindexing() {
            return Ok(());
        }
        let _ = previous_identity;

        // The collection can only pin one dimension at a time (spec §4.3);
        // dropping the stale vectors here is what lets the new dimension's
        // embeddings land as `reembed` tasks complete, rather than every
        // upsert failing with `DimensionMismatch` for the rest of the
        // transition.
        self.vectorstore.clear().await?;

        let docs = self
            .docstore
            .list(ListQuery {
                include_system: false,
                ..Default::default()
            })
            .await?;
        let total = docs.len();
        for doc in &docs {
            self.queue
                .enqueue(
                    NewTask {
                        doc_id: doc.id.clone(),
                        task_kind: TaskKind::Reembed,
                        payload: String::new(),
                    },
                    now,
                )
                .await?;
        }

        *state = keeper_providers::ReindexState::Reindexing {
            since: now,
            total,
            remaining: total,
        };
        Ok(())
    }
}
