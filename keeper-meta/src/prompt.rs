use keeper_docstore::DocumentStore;
use keeper_docstore::ListQuery;
use keeper_model::Tags;

use crate::dsl::count_satisfied;
use crate::dsl::split_prompt_body;
use crate::error::MetaError;
use crate::error::MetaResult;

/// The three prompt-override categories `.prompt/{category}/NAME` declares
/// (spec §4.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptCategory {
    Summarize,
    Analyze,
    Agent,
}

impl PromptCategory {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            PromptCategory::Summarize => "summarize",
            PromptCategory::Analyze => "analyze",
            PromptCategory::Agent => "agent",
        }
    }
}

/// A selected prompt override: its doc id (for the tie-break rule, and for
/// callers that want to report which override fired) and the literal text
/// after `## Prompt`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectedPrompt {
    pub doc_id: String,
    pub prompt_text: String,
}

/// Pick the best-matching `.prompt/{category}/*` doc for `current_tags`:
/// most satisfied match rules wins, ties broken by lexical id order (spec
/// §4.5). Returns `None` when no prompt docs exist for the category.
pub async fn select_prompt(
    docstore: &dyn DocumentStore,
    category: PromptCategory,
    current_tags: &Tags,
) -> MetaResult<Option<SelectedPrompt>> {
    let prefix = format!(".prompt/{}/", category.as_str());
    let docs = docstore
        .list(ListQuery {
            include_system: true,
            ..Default::default()
        })
        .await
        .map_err(|e| MetaError::Storage(e.to_string()))?;

    let mut candidates: Vec<(String, usize, String)> = docs
        .into_iter()
        .filter(|d| d.id.starts_with(&prefix))
        .map(|d| {
            let (rules, prompt_text) = split_prompt_body(&d.summary);
            let satisfied = count_satisfied(&rules, current_tags);
            (d.id, satisfied, prompt_text)
        })
        .collect();

    candidates.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));

    Ok(candidates
        .into_iter()
        .next()
        .map(|(doc_id, _, prompt_text)| SelectedPrompt { doc_id, prompt_text }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use keeper_docstore::InMemoryDocumentStore;
    use keeper_docstore::NewDocument;
    use pretty_assertions::assert_eq;

    async fn seed_prompt(store: &InMemoryDocumentStore, id: &str, body: &str) {
        store
            .create(NewDocument {
                id: id.to_string(),
                summary: body.to_string(),
                tags: Tags::new(),
                content_hash: None,
                created_at: Utc::now(),
            })
            .await
            .expect("create prompt doc");
    }

    #[tokio::test]
    async fn most_satisfied_rules_wins() {
        let store = InMemoryDocumentStore::new();
        seed_prompt(
            &store,
            ".prompt/summarize/generic",
            "## Prompt\nUse a neutral tone.",
        )
        .await;
        seed_prompt(
            &store,
            ".prompt/summarize/api-docs",
            "topic=api\n## Prompt\nUse a terse, technical tone.",
        )
        .await;

        let mut tags = Tags::new();
        tags.set("topic", "api");

        let selected = select_prompt(&store, PromptCategory::Summarize, &tags)
            .await
            .expect("select")
            .expect("some");
        assert_eq!(selected.doc_id, ".prompt/summarize/api-docs");
        assert_eq!(selected.prompt_text, "Use a terse, technical tone.");
    }

    #[tokio::test]
    async fn ties_break_by_lexical_id_order() {
        let store = InMemoryDocumentStore::new();
        seed_prompt(&store, ".prompt/agent/zeta", "## Prompt\nZ").await;
        seed_prompt(&store, ".prompt/agent/alpha", "## Prompt\nA").await;

        let selected = select_prompt(&store, PromptCategory::Agent, &Tags::new())
            .await
            .expect("select")
            .expect("some");
        assert_eq!(selected.doc_id, ".prompt/agent/alpha");
    }
}
