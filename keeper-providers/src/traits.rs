use async_trait::async_trait;
use keeper_model::Tags;

use crate::error::ProviderResult;
use crate::identity::ProviderIdentity;

/// One part produced by [`AnalyzeProvider::analyze`], mirrored onto
/// DocStore's `Part` by the Keeper.
#[derive(Debug, Clone)]
pub struct AnalyzedPart {
    pub summary: String,
    pub content: String,
    pub tags: Tags,
}

#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    async fn embed(&self, text: &str) -> ProviderResult<Vec<f32>>;
    fn identity(&self) -> ProviderIdentity;
}

#[async_trait]
pub trait SummarizeProvider: Send + Sync {
    async fn summarize(&self, text: &str, system_prompt: Option<&str>) -> ProviderResult<String>;
}

#[async_trait]
pub trait AnalyzeProvider: Send + Sync {
    async fn analyze(
        &self,
        text: &str,
        guide: &[String],
        system_prompt: Option<&str>,
    ) -> ProviderResult<Vec<AnalyzedPart>>;
}

#[async_trait]
pub trait DescribeProvider: Send + Sync {
    async fn describe(&self, media_bytes: &[u8], content_type: &str) -> ProviderResult<String>;
}

#[async_trait]
pub trait FetchProvider: Send + Sync {
    /// Returns the raw bytes and the resolved content type.
    async fn fetch(&self, uri: &str) -> ProviderResult<(Vec<u8>, String)>;
}
