use chrono::DateTime;
use chrono::Utc;
use keeper_docstore::NewPart;
use keeper_docstore::Part;
use keeper_model::Tags;
use keeper_providers::AnalyzedPart;
use keeper_providers::ProviderError;
use keeper_queue::NewTask;
use keeper_queue::TaskKind;
use keeper_vectorstore::VectorRecord;

use crate::error::KeeperError;
use crate::error::KeeperResult;
use crate::keeper::Keeper;
use crate::model::AnalysisOutcome;

impl Keeper {
    /// `analyze`: decompose a document's content into parts, either
    /// synchronously if the analyze provider is loaded, or deferred to an
    /// `analyze` task otherwise (spec §4.1, §4.4).
    pub async fn analyze(&self, id: &str, guide_tag_keys: &[String]) -> KeeperResult<AnalysisOutcome> {
        let now = Utc::now();
        let doc = self
            .docstore
            .get(id)
            .await?
            .ok_or_else(|| KeeperError::NotFound(id.to_string()))?;

        let guide = resolve_guide(guide_tag_keys, &doc.tags);
        match self.providers.analyze(&doc.summary, &guide, None).await {
            Ok(parts) => {
                let applied = self.apply_analysis(id, parts, now).await?;
                Ok(AnalysisOutcome::Completed(applied))
            }
            Err(ProviderError::Unavailable(_)) => {
                self.queue
                    .enqueue(
                        NewTask {
                            doc_id: id.to_string(),
                            task_kind: TaskKind::Analyze,
                            payload: guide.join(","),
                        },
                        now,
                    )
                    .await?;
                Ok(AnalysisOutcome::Enqueued)
            }
            Err(other) => Err(other.into()),
        }
    }

    /// Atomically replace a document's parts, then embed each one (Phase
    /// D/E applied to the part namespace). Shared by [`Keeper::analyze`]'s
    /// synchronous path and the `analyze` background task.
    pub(crate) async fn apply_analysis(
        &self,
        id: &str,
        parts: Vec<AnalyzedPart>,
        now: DateTime<Utc>,
    ) -> KeeperResult<Vec<Part>> {
        let stale = self.docstore.list_parts(id).await?;
        for part in &stale {
            self.vectorstore.delete(&format!("{id}@p{}", part.part_num)).await?;
        }

        let new_parts: Vec<NewPart> = parts
            .into_iter()
            .enumerate()
            .map(|(i, part)| NewPart {
                part_num: (i + 1) as u32,
                summary: part.summary,
                tags: part.tags,
                content: part.content,
            })
            .collect();
        let replaced = self.docstore.replace_parts(id, new_parts).await?;

        for part in &replaced {
            let key = format!("{id}@p{}", part.part_num);
            let vector = match self.providers.embed(&part.content).await {
                Ok((vector, changed)) => {
                    if let Some(previous) = changed {
                        self.begin_reindex(previous, now).await?;
                    }
                    vector
                }
                Err(ProviderError::Unavailable(_)) => {
                    vec![0.0; self.placeholder_dimension().await]
                }
                Err(other) => return Err(other.into()),
            };
            self.vectorstore
                .upsert(VectorRecord {
                    key,
                    vector,
                    summary: part.summary.clone(),
                    tags: part.tags.clone(),
                    updated_at: now,
                })
                .await?;
        }
        Ok(replaced)
    }
}

impl Keeper {
    /// Enqueue a `tag-classify` task: the worker scans this document's parts
    /// against every constrained `.tag/K` vocabulary and tags matches (spec
    /// §4.4). Always deferred; there is no synchronous path because the
    /// classifier works over parts, not the summary `analyze` already has
    /// loaded.
    pub async fn classify_tags(&self, id: &str) -> KeeperResult<()> {
        let now = Utc::now();
        self.docstore
            .get(id)
            .await?
            .ok_or_else(|| KeeperError::NotFound(id.to_string()))?;
        self.queue
            .enqueue(
                NewTask {
                    doc_id: id.to_string(),
                    task_kind: TaskKind::TagClassify,
                    payload: String::new(),
                },
                now,
            )
            .await?;
        Ok(())
    }
}

fn resolve_guide(guide_tag_keys: &[String], tags: &Tags) -> Vec<String> {
    guide_tag_keys
        .iter()
        .filter_map(|key| tags.get(key).map(str::to_string))
        .collect()
}
