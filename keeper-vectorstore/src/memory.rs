use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::cosine::cosine_similarity;
use crate::model::QueryOptions;
use crate::model::ScoredVector;
use crate::model::VectorRecord;
use crate::model::VectorStore;
use crate::model::VectorStoreError;
use crate::model::VectorStoreResult;

#[derive(Default)]
struct State {
    records: HashMap<String, VectorRecord>,
    dimension: Option<usize>,
}

/// Reference [`VectorStore`] backed by a single in-process map, scanned
/// linearly on every query. Fine for tests and small stores; production
/// scale needs an ANN index, which is out of scope for the core engine
/// (spec §4.3 names only cosine-over-a-pre-filtered-set).
#[derive(Default)]
pub struct InMemoryVectorStore {
    state: RwLock<State>,
}

impl InMemoryVectorStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

fn record_matches(record: &VectorRecord, options: &QueryOptions) -> bool {
    if options.exclude_key.as_deref() == Some(record.key.as_str()) {
        return false;
    }
    if !record.tags.matches_filter(&options.tag_filter) {
        return false;
    }
    if let Some(since) = options.since
        && record.updated_at < since
    {
        return false;
    }
    if let Some(until) = options.until
        && record.updated_at > until
    {
        return false;
    }
    true
}

#[async_trait]
impl VectorStore for InMemoryVectorStore {
    async fn upsert(&self, record: VectorRecord) -> VectorStoreResult<()> {
        let mut state = self.state.write().await;
        match state.dimension {
            Some(expected) if expected != record.vector.len() => {
                return Err(VectorStoreError::DimensionMismatch {
                    expected,
                    got: record.vector.len(),
                });
            }
            None => state.dimension = Some(record.vector.len()),
            Some(_) => {}
        }
        state.records.insert(record.key.clone(), record);
        Ok(())
    }

    async fn delete(&self, key: &str) -> VectorStoreResult<bool> {
        let mut state = self.state.write().await;
        Ok(state.records.remove(key).is_some())
    }

    async fn get(&self, key: &str) -> VectorStoreResult<Option<VectorRecord>> {
        let state = self.state.read().await;
        Ok(state.records.get(key).cloned())
    }

    async fn query(
        &self,
        vector: &[f32],
        options: QueryOptions,
    ) -> VectorStoreResult<Vec<ScoredVector>> {
        let state = self.state.read().await;
        let mut scored: Vec<ScoredVector> = state
            .records
            .values()
            .filter(|record| record_matches(record, &options))
            .map(|record| ScoredVector {
                key: record.key.clone(),
                summary: record.summary.clone(),
                tags: record.tags.clone(),
                updated_at: record.updated_at,
                cosine: cosine_similarity(vector, &record.vector),
            })
            .collect();
        scored.sort_by(|a, b| b.cosine.partial_cmp(&a.cosine).unwrap_or(std::cmp::Ordering::Equal));
        if options.limit > 0 {
            scored.truncate(options.limit);
        }
        Ok(scored)
    }

    async fn dimension(&self) -> Option<usize> {
        self.state.read().await.dimension
    }

    async fn clear(&self) -> VectorStoreResult<()> {
        let mut state = self.state.write().await;
        state.records.clear();
        state.dimension = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use keeper_model::TagFilter;
    use keeper_model::Tags;
    use pretty_assertions::assert_eq;

    fn record(key: &str, vector: Vec<f32>) -> VectorRecord {
        let mut tags = Tags::new();
        tags.set("topic", "api");
        VectorRecord {
            key: key.to_string(),
            vector,
            summary: key.to_string(),
            tags,
            updated_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn upsert_then_query_ranks_by_cosine() {
        let store = InMemoryVectorStore::new();
        store.upsert(record("%a", vec![1.0, 0.0])).await.expect("upsert");
        store.upsert(record("%b", vec![0.0, 1.0])).await.expect("upsert");

        let results = store
            .query(
                &[1.0, 0.0],
                QueryOptions {
                    limit: 5,
                    ..Default::default()
                },
            )
            .await
            .expect("query");
        assert_eq!(results[0].key, "%a");
        assert!(results[0].cosine > results[1].cosine);
    }

    #[tokio::test]
    async fn dimension_mismatch_is_rejected() {
        let store = InMemoryVectorStore::new();
        store.upsert(record("%a", vec![1.0, 0.0, 0.0])).await.expect("upsert");
        let result = store.upsert(record("%b", vec![1.0, 0.0])).await;
        assert!(matches!(
            result,
            Err(VectorStoreError::DimensionMismatch {
                expected: 3,
                got: 2
            })
        ));
    }

    #[tokio::test]
    async fn tag_pre_filter_excludes_non_matching_records() {
        let store = InMemoryVectorStore::new();
        store.upsert(record("%a", vec![1.0, 0.0])).await.expect("upsert");
        let mut other = record("%b", vec![1.0, 0.0]);
        other.tags.set("topic", "billing");
        store.upsert(other).await.expect("upsert");

        let results = store
            .query(
                &[1.0, 0.0],
                QueryOptions {
                    tag_filter: TagFilter::new().equals("topic", "api"),
                    limit: 10,
                    ..Default::default()
                },
            )
            .await
            .expect("query");
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].key, "%a");
    }

    #[tokio::test]
    async fn clear_releases_the_pinned_dimension() {
        let store = InMemoryVectorStore::new();
        store.upsert(record("%a", vec![1.0, 0.0, 0.0])).await.expect("upsert");
        assert_eq!(store.dimension().await, Some(3));

        store.clear().await.expect("clear");
        assert_eq!(store.dimension().await, None);
        assert!(store.get("%a").await.expect("get").is_none());

        store.upsert(record("%a", vec![1.0, 0.0])).await.expect("upsert at new dimension");
        assert_eq!(store.dimension().await, Some(2));
    }

    #[tokio::test]
    async fn query_by_key_excludes_nothing_by_default() {
        let store = InMemoryVectorStore::new();
        store.upsert(record("%a", vec![1.0, 0.0])).await.expect("upsert");
        store.upsert(record("%b", vec![0.9, 0.1])).await.expect("upsert");

        let results = store
            .query_by_key(
                "%a",
                QueryOptions {
                    exclude_key: Some("%a".to_string()),
                    limit: 10,
                    ..Default::default()
                },
            )
            .await
            .expect("query_by_key");
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].key, "%b");
    }
}
