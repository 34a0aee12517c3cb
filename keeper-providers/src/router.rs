use std::sync::Arc;

use tokio::sync::Mutex;

use crate::error::ProviderResult;
use crate::identity::ProviderIdentity;
use crate::identity::identity_changed;
use crate::lazy::LazySlot;
use crate::traits::AnalyzedPart;
use crate::traits::AnalyzeProvider;
use crate::traits::DescribeProvider;
use crate::traits::EmbeddingProvider;
use crate::traits::FetchProvider;
use crate::traits::SummarizeProvider;

/// Dispatches to per-capability providers, lazily loaded on first use
/// (spec §4.6). Also tracks the embedding provider's identity across
/// restarts: [`ProviderRouter::embed`] reports the previous identity
/// whenever it differs from the current one, so the Keeper can drive the
/// reindex transition.
pub struct ProviderRouter {
    embed: LazySlot<dyn EmbeddingProvider>,
    summarize: LazySlot<dyn SummarizeProvider>,
    analyze: LazySlot<dyn AnalyzeProvider>,
    describe: LazySlot<dyn DescribeProvider>,
    fetch: LazySlot<dyn FetchProvider>,
    recorded_identity: Mutex<Option<ProviderIdentity>>,
}

impl ProviderRouter {
    #[must_use]
    pub fn new() -> Self {
        Self {
            embed: LazySlot::empty("embed"),
            summarize: LazySlot::empty("summarize"),
            analyze: LazySlot::empty("analyze"),
            describe: LazySlot::empty("describe"),
            fetch: LazySlot::empty("fetch"),
            recorded_identity: Mutex::new(None),
        }
    }

    #[must_use]
    pub fn with_embedding_provider(mut self, provider: Arc<dyn EmbeddingProvider>) -> Self {
        self.embed = LazySlot::with_instance("embed", provider);
        self
    }

    #[must_use]
    pub fn with_summarize_provider(mut self, provider: Arc<dyn SummarizeProvider>) -> Self {
        self.summarize = LazySlot::with_instance("summarize", provider);
        self
    }

    #[must_use]
    pub fn with_analyze_provider(mut self, provider: Arc<dyn AnalyzeProvider>) -> Self {
        self.analyze = LazySlot::with_instance("analyze", provider);
        self
    }

    #[must_use]
    pub fn with_describe_provider(mut self, provider: Arc<dyn DescribeProvider>) -> Self {
        self.describe = LazySlot::with_instance("describe", provider);
        self
    }

    #[must_use]
    pub fn with_fetch_provider(mut self, provider: Arc<dyn FetchProvider>) -> Self {
        self.fetch = LazySlot::with_instance("fetch", provider);
        self
    }

    /// Restore the identity a store was last indexed with, e.g. read from
    /// `StoreConfig` at open (spec §9 "Global state").
    pub async fn seed_recorded_identity(&self, identity: ProviderIdentity) {
        *self.recorded_identity.lock().await = Some(identity);
    }

    pub async fn recorded_identity(&self) -> Option<ProviderIdentity> {
        self.recorded_identity.lock().await.clone()
    }

    /// Embed `text`, then compare the provider's current identity against
    /// the last recorded one. Returns `(vector, previous_identity_if_changed)`:
    /// the Keeper uses the second element to decide whether to flip the
    /// store into "reindexing" and enqueue `reembed` for every document.
    pub async fn embed(&self, text: &str) -> ProviderResult<(Vec<f32>, Option<ProviderIdentity>)> {
        let provider = self.embed.get().await?;
        let vector = provider.embed(text).await?;
        let current = provider.identity();

        let mut recorded = self.recorded_identity.lock().await;
        let changed = match recorded.as_ref() {
            Some(previous) if identity_changed(previous, &current) => Some(previous.clone()),
            _ => None,
        };
        *recorded = Some(current);
        Ok((vector, changed))
    }

    pub async fn summarize(&self, text: &str, system_prompt: Option<&str>) -> ProviderResult<String> {
        self.summarize.get().await?.summarize(text, system_prompt).await
    }

    pub async fn analyze(
        &self,
        text: &str,
        guide: &[String],
        system_prompt: Option<&str>,
    ) -> ProviderResult<Vec<AnalyzedPart>> {
        self.analyze.get().await?.analyze(text, guide, system_prompt).await
    }

    pub async fn describe(&self, media_bytes: &[u8], content_type: &str) -> ProviderResult<String> {
        self.describe.get().await?.describe(media_bytes, content_type).await
    }

    pub async fn fetch(&self, uri: &str) -> ProviderResult<(Vec<u8>, String)> {
        self.fetch.get().await?.fetch(uri).await
    }
}

impl Default for ProviderRouter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProviderError;
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;

    struct FixedEmbedder {
        dimension: usize,
    }

    #[async_trait]
    impl EmbeddingProvider for FixedEmbedder {
        async fn embed(&self, _text: &str) -> ProviderResult<Vec<f32>> {
            Ok(vec![0.0; self.dimension])
        }

        fn identity(&self) -> ProviderIdentity {
            ProviderIdentity {
                name: "fixed".into(),
                model: "v1".into(),
                dimension: self.dimension,
            }
        }
    }

    #[tokio::test]
    async fn missing_provider_is_unavailable() {
        let router = ProviderRouter::new();
        let result = router.embed("hello").await;
        assert!(matches!(result, Err(ProviderError::Unavailable(cap)) if cap == "embed"));
    }

    #[tokio::test]
    async fn dimension_swap_is_reported_once() {
        let router = ProviderRouter::new().with_embedding_provider(Arc::new(FixedEmbedder { dimension: 384 }));
        let (vector, changed) = router.embed("hello").await.expect("embed");
        assert_eq!(vector.len(), 384);
        assert!(changed.is_none(), "first call has nothing to compare against");

        let router = router.with_embedding_provider(Arc::new(FixedEmbedder { dimension: 1536 }));
        let (vector, changed) = router.embed("hello").await.expect("embed");
        assert_eq!(vector.len(), 1536);
        assert_eq!(changed.map(|p| p.dimension), Some(384));
    }
}
