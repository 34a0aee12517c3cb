use chrono::DateTime;
use chrono::Utc;
use keeper_docstore::ListQuery;
use keeper_vectorstore::QueryOptions;
use keeper_vectorstore::decay_factor;

use crate::error::KeeperResult;
use crate::keeper::Keeper;
use crate::model::FindInput;
use crate::model::FindQuery;
use crate::model::FindResult;
use crate::model::Item;

impl Keeper {
    /// The `find` protocol (spec §4.1 "The find protocol"): fulltext or
    /// semantic search under a tag/time pre-filter, ranked by cosine times
    /// recency decay.
    pub async fn find(&self, input: FindInput) -> KeeperResult<FindResult> {
        let now = Utc::now();
        let half_life = self.config.read().await.half_life_seconds;

        let mut items = if input.fulltext {
            self.find_fulltext(&input, now, half_life).await?
        } else {
            self.find_semantic(&input, now, half_life).await?
        };

        items.sort_by(|a, b| {
            b.effective_score
                .partial_cmp(&a.effective_score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        items.truncate(input.limit);

        let deep_context = if input.deep {
            self.deep_expand(&items, now, half_life).await?
        } else {
            Vec::new()
        };

        Ok(FindResult { items, deep_context })
    }

    async fn find_fulltext(
        &self,
        input: &FindInput,
        now: DateTime<Utc>,
        half_life: f64,
    ) -> KeeperResult<Vec<Item>> {
        let text = match &input.query {
            FindQuery::Text(text) => text.clone(),
            FindQuery::SimilarTo(id) => self
                .docstore
                .get(id)
                .await?
                .map(|doc| doc.summary)
                .unwrap_or_default(),
        };

        let capped = input.limit.saturating_mul(4).min(200);
        let docs = self
            .docstore
            .fulltext_search(
                &text,
                ListQuery {
                    tag_filter: input.tag_filter.clone(),
                    since: input.since,
                    until: input.until,
                    limit: Some(capped),
                    include_system: false,
                },
            )
            .await?;

        Ok(docs
            .into_iter()
            .map(|doc| {
                let decay = decay_age(now, doc.updated_at, half_life);
                Item {
                    id: doc.id,
                    summary: doc.summary,
                    tags: doc.tags,
                    updated_at: doc.updated_at,
                    score: 1.0,
                    effective_score: decay as f32,
                }
            })
            .collect())
    }

    async fn find_semantic(
        &self,
        input: &FindInput,
        now: DateTime<Utc>,
        half_life: f64,
    ) -> KeeperResult<Vec<Item>> {
        let capped = input.limit.saturating_mul(4).min(200);
        let mut options = QueryOptions {
            tag_filter: input.tag_filter.clone(),
            since: input.since,
            until: input.until,
            limit: capped,
            exclude_key: None,
        };

        let candidates = match &input.query {
            FindQuery::Text(text) => {
                let (vector, changed) = self.providers.embed(text).await?;
                if let Some(previous) = changed {
                    self.begin_reindex(previous, now).await?;
                }
                self.vectorstore.query(&vector, options).await?
            }
            FindQuery::SimilarTo(id) => {
                options.exclude_key = Some(id.clone());
                self.vectorstore.query_by_key(id, options).await?
            }
        };

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
}

pub(crate) fn decay_age(now: DateTime<Utc>, updated_at: DateTime<Utc>, half_life: f64) -> f64 {
    let age_seconds = (now - updated_at).num_seconds().max(0) as f64;
    decay_factor(age_seconds, half_life)
}
