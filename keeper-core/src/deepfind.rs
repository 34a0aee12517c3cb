use std::collections::VecDeque;
use std::collections::HashSet;

use chrono::DateTime;
use chrono::Utc;
use keeper_vectorstore::QueryOptions;
use keeper_vectorstore::decay_factor;

use crate::error::KeeperResult;
use crate::keeper::Keeper;
use crate::model::Item;

/// Default deep-find token budget (spec §4.1 "Deep-find and token budget":
/// "approximated as characters ÷ 4"), chosen to hold a handful of
/// multi-sentence summaries without dominating a prompt.
const DEFAULT_TOKEN_BUDGET: usize = 2_000;
const MAX_DEPTH: u32 = 2;
const SIMILAR_ITEMS_PER_HOP: usize = 3;

impl Keeper {
    /// Breadth-first one-or-two-hop expansion over outbound edges and
    /// similar-items relations, trimmed to the character budget, with a
    /// visited-set so cycles terminate (spec §4.1, §9 "Graph with
    /// cycles").
    pub(crate) async fn deep_expand(
        &self,
        seeds: &[Item],
        now: DateTime<Utc>,
        half_life: f64,
    ) -> KeeperResult<Vec<Item>> {
        let char_budget = DEFAULT_TOKEN_BUDGET * 4;
        let mut accumulated = 0usize;
        let mut visited: HashSet<String> = seeds.iter().map(|item| item.id.clone()).collect();
        let mut queue: VecDeque<(String, u32)> = seeds.iter().map(|item| (item.id.clone(), 0)).collect();
        let mut collected = Vec::new();

        while let Some((id, depth)) = queue.pop_front() {
            if depth >= MAX_DEPTH || accumulated >= char_budget {
                continue;
            }

            let mut neighbors: Vec<String> = self
                .docstore
                .edges_from(&id)
                .await?
                .into_iter()
                .map(|edge| edge.target_doc)
                .collect();

            let similar = self
                .vectorstore
                .query_by_key(
                    &id,
                    QueryOptions {
                        limit: SIMILAR_ITEMS_PER_HOP,
                        exclude_key: Some(id.clone()),
                        ..Default::default()
                    },
                )
                .await?;
            neighbors.extend(similar.into_iter().map(|candidate| candidate.key));

            for neighbor in neighbors {
                if visited.contains(&neighbor) || accumulated >= char_budget {
                    continue;
                }
                visited.insert(neighbor.clone());

                let Some(doc) = self.docstore.get(&neighbor).await? else {
                    continue;
                };
                let summary_len = doc.summary.chars().count();
                if accumulated + summary_len > char_budget && accumulated > 0 {
                    continue;
                }
                accumulated += summary_len;

                let age_seconds = (now - doc.updated_at).num_seconds().max(0) as f64;
                let decay = decay_factor(age_seconds, half_life);
                collected.push(Item {
                    id: doc.id.clone(),
                    summary: doc.summary,
                    tags: doc.tags,
                    updated_at: doc.updated_at,
                    score: 0.0,
                    effective_score: decay as f32,
                });
                queue.push_back((doc.id, depth + 1));
            }
        }

        Ok(collected)
    }
}
