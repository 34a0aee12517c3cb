//! The background worker pool that drains the PendingQueue (spec §4.4):
//! claims one task at a time, dispatches on `task_kind`, and applies the
//! error-propagation policy (spec §7) on the way out — ack on success,
//! requeue-with-backoff on a transient failure, dead-letter plus a `_error`
//! tag on a fatal one or an exhausted retry budget.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::DateTime;
use chrono::Utc;
use keeper_docstore::DocumentWrite;
use keeper_docstore::Edge;
use keeper_docstore::ListQuery;
use keeper_meta::PromptCategory;
use keeper_model::SystemTags;
use keeper_model::content_hash;
use keeper_queue::NackOutcome;
use keeper_queue::NewTask;
use keeper_queue::PendingTask;
use keeper_queue::TaskKind;
use keeper_vectorstore::VectorRecord;
use tokio::task::JoinHandle;

use crate::error::KeeperError;
use crate::error::KeeperResult;
use crate::keeper::Keeper;
use crate::write::decode_ocr_payload;
use crate::write::normalize_text;

const POLL_INTERVAL: StdDuration = StdDuration::from_millis(500);
const ERROR_TAG_MAX_LEN: usize = 200;

/// Owns the polling loops that drain a [`Keeper`]'s PendingQueue. One pool
/// can run several concurrent workers; the queue's per-doc serialization
/// means extra workers beyond the number of documents with outstanding work
/// just idle on an empty claim.
pub struct WorkerPool {
    keeper: Arc<Keeper>,
}

impl WorkerPool {
    #[must_use]
    pub fn new(keeper: Arc<Keeper>) -> Self {
        Self { keeper }
    }

    /// Spawn `worker_count` polling loops onto the current tokio runtime.
    /// The caller owns the returned handles, e.g. to abort them on shutdown.
    pub fn spawn(&self, worker_count: usize) -> Vec<JoinHandle<()>> {
        (0..worker_count)
            .map(|_| {
                let keeper = Arc::clone(&self.keeper);
                tokio::spawn(run_loop(keeper))
            })
            .collect()
    }

    /// Claim and process a single task, if one is available. `true` means a
    /// task was claimed (regardless of whether it succeeded); `false` means
    /// the queue had nothing claimable. Exposed so tests and a `--drain`
    /// style caller can step the queue without spawning a loop.
    pub async fn process_one(&self) -> KeeperResult<bool> {
        process_one(&self.keeper).await
    }
}

async fn run_loop(keeper: Arc<Keeper>) {
    loop {
        match process_one(&keeper).await {
            Ok(true) => {}
            Ok(false) => tokio::time::sleep(POLL_INTERVAL).await,
            Err(err) => {
                tracing::warn!(error = %err, "worker loop iteration failed outside task handling");
                tokio::time::sleep(POLL_INTERVAL).await;
            }
        }
    }
}

async fn process_one(keeper: &Arc<Keeper>) -> KeeperResult<bool> {
    let now = Utc::now();
    let config = keeper.config().await;
    let Some(task) = keeper.queue.claim(now, config.claim_timeout()).await? else {
        return Ok(false);
    };

    match dispatch(keeper, &task).await {
        Ok(()) => {
            keeper.queue.ack(task.id).await?;
            clear_error_tag(keeper, &task.doc_id, now).await;
        }
        Err(err) => handle_failure(keeper, &task, err, now, config.max_attempts).await?,
    }
    Ok(true)
}

async fn dispatch(keeper: &Keeper, task: &PendingTask) -> KeeperResult<()> {
    match task.task_kind {
        TaskKind::Embed => handle_embed(keeper, task).await,
        TaskKind::Summarize => handle_summarize(keeper, task).await,
        TaskKind::Analyze => handle_analyze(keeper, task).await,
        TaskKind::Reembed => handle_reembed(keeper, task).await,
        TaskKind::Ocr => handle_ocr(keeper, task).await,
        TaskKind::BackfillEdges => handle_backfill_edges(keeper, task).await,
        TaskKind::TagClassify => handle_tag_classify(keeper, task).await,
    }
}

/// Fatal errors dead-letter on the spot by nacking with `max_attempts` set
/// to the task's own attempt count (already `>=` itself); transient errors
/// get the configured budget, requeuing until it's exhausted.
async fn handle_failure(
    keeper: &Keeper,
    task: &PendingTask,
    err: KeeperError,
    now: DateTime<Utc>,
    max_attempts: u32,
) -> KeeperResult<()> {
    let message = err.to_string();
    tracing::warn!(
        task_id = task.id,
        doc_id = %task.doc_id,
        kind = task.task_kind.as_str(),
        error = %message,
        "task failed"
    );

    let budget = if err.is_retryable() { max_attempts } else { task.attempts };
    let outcome = keeper.queue.nack(task.id, now, budget, message.clone()).await?;
    if outcome == NackOutcome::DeadLettered {
        set_error_tag(keeper, &task.doc_id, task.task_kind, &message, now).await;
    }
    Ok(())
}

async fn set_error_tag(keeper: &Keeper, doc_id: &str, kind: TaskKind, message: &str, now: DateTime<Utc>) {
    let Ok(Some(doc)) = keeper.docstore.get(doc_id).await else {
        return;
    };
    let truncated: String = message.chars().take(ERROR_TAG_MAX_LEN).collect();
    let mut tags = doc.tags.clone();
    tags.set("_error", format!("{}: {truncated}", kind.as_str()));
    let _ = keeper.docstore.update_tags_only(doc_id, tags, now).await;
}

/// A successful task run clears any `_error` the doc was carrying, since a
/// later success is the spec's observable recovery signal (spec §7).
async fn clear_error_tag(keeper: &Keeper, doc_id: &str, now: DateTime<Utc>) {
    let Ok(Some(doc)) = keeper.docstore.get(doc_id).await else {
        return;
    };
    if SystemTags(&doc.tags).error().is_none() {
        return;
    }
    let mut tags = doc.tags.clone();
    tags.set("_error", "");
    let _ = keeper.docstore.update_tags_only(doc_id, tags, now).await;
}

/// `embed`: the payload is the original normalized text (Phase C deferred
/// it because the provider was unavailable at write time).
async fn handle_embed(keeper: &Keeper, task: &PendingTask) -> KeeperResult<()> {
    let now = Utc::now();
    let (vector, previous_identity) = keeper.providers.embed(&task.payload).await?;
    if let Some(previous) = previous_identity {
        keeper.begin_reindex(previous, now).await?;
    }

    let Some(existing) = keeper.docstore.get(&task.doc_id).await? else {
        return Ok(());
    };
    let mut tags = existing.tags.clone();
    tags.set("_embed_pending", "");
    let updated = keeper.docstore.update_tags_only(&task.doc_id, tags, now).await?;

    keeper
        .vectorstore
        .upsert(VectorRecord {
            key: task.doc_id.clone(),
            vector,
            summary: updated.summary.clone(),
            tags: updated.tags.clone(),
            updated_at: now,
        })
        .await?;
    Ok(())
}

/// `summarize`: the payload is the full original text Phase C.3 truncated
/// for the placeholder summary. Always re-embeds off that same text, per
/// the spec's "implementations may always re-embed" allowance.
async fn handle_summarize(keeper: &Keeper, task: &PendingTask) -> KeeperResult<()> {
    let now = Utc::now();
    let Some(existing) = keeper.docstore.get(&task.doc_id).await? else {
        return Ok(());
    };

    let prompt = keeper_meta::select_prompt(keeper.docstore.as_ref(), PromptCategory::Summarize, &existing.tags).await?;
    let summary = keeper
        .providers
        .summarize(&task.payload, prompt.as_ref().map(|p| p.prompt_text.as_str()))
        .await?;
    keeper.docstore.update_summary_only(&task.doc_id, summary.clone(), now).await?;

    let (vector, previous_identity) = keeper.providers.embed(&task.payload).await?;
    if let Some(previous) = previous_identity {
        keeper.begin_reindex(previous, now).await?;
    }
    if let Some(record) = keeper.vectorstore.get(&task.doc_id).await? {
        keeper
            .vectorstore
            .upsert(VectorRecord {
                key: task.doc_id.clone(),
                vector,
                summary,
                tags: record.tags,
                updated_at: now,
            })
            .await?;
    }
    Ok(())
}

/// `analyze`: the payload is the comma-joined guide tag values `analyze`
/// resolved before deferring.
async fn handle_analyze(keeper: &Keeper, task: &PendingTask) -> KeeperResult<()> {
    let now = Utc::now();
    let Some(doc) = keeper.docstore.get(&task.doc_id).await? else {
        return Ok(());
    };
    let guide: Vec<String> = task
        .payload
        .split(',')
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect();

    let prompt = keeper_meta::select_prompt(keeper.docstore.as_ref(), PromptCategory::Analyze, &doc.tags).await?;
    let parts = keeper
        .providers
        .analyze(&doc.summary, &guide, prompt.as_ref().map(|p| p.prompt_text.as_str()))
        .await?;
    keeper.apply_analysis(&task.doc_id, parts, now).await?;
    Ok(())
}

/// `reembed`: triggered by a provider identity change (spec §4.6). The
/// document's original content text is not retained once `put` returns, so
/// this re-embeds off the current summary, the only text the store still
/// holds.
async fn handle_reembed(keeper: &Keeper, task: &PendingTask) -> KeeperResult<()> {
    let now = Utc::now();
    let doc = keeper.docstore.get(&task.doc_id).await?;
    if let Some(doc) = doc {
        let (vector, _) = keeper.providers.embed(&doc.summary).await?;
        keeper
            .vectorstore
            .upsert(VectorRecord {
                key: task.doc_id.clone(),
                vector,
                summary: doc.summary,
                tags: doc.tags,
                updated_at: now,
            })
            .await?;
    }
    let mut state = keeper.reindex.lock().await;
    *state = std::mem::replace(&mut *state, keeper_providers::ReindexState::Current).advance();
    Ok(())
}

/// `ocr`: the payload is `{content_type}\n{base64 bytes}` (Phase A deferred
/// it because the describe provider was unavailable). Installs the
/// extracted text via [`keeper_docstore::DocumentStore::update_current`]
/// rather than a new version, since the original `put` already happened
/// from the caller's perspective.
async fn handle_ocr(keeper: &Keeper, task: &PendingTask) -> KeeperResult<()> {
    let now = Utc::now();
    let Some((content_type, bytes)) = decode_ocr_payload(&task.payload) else {
        return Err(KeeperError::FormatError(format!(
            "malformed ocr payload for {}",
            task.doc_id
        )));
    };
    let Some(existing) = keeper.docstore.get(&task.doc_id).await? else {
        return Ok(());
    };

    let extracted = keeper.providers.describe(&bytes, &content_type).await?;
    let normalized = normalize_text(&extracted);
    let hash = content_hash(&normalized);

    let max_len = keeper.config().await.max_summary_length;
    let summary = if normalized.chars().count() <= max_len {
        normalized.clone()
    } else {
        let truncated: String = normalized.chars().take(max_len).collect();
        keeper
            .queue
            .enqueue(
                NewTask {
                    doc_id: task.doc_id.clone(),
                    task_kind: TaskKind::Summarize,
                    payload: normalized.clone(),
                },
                now,
            )
            .await?;
        format!("{truncated}…")
    };

    let mut tags = existing.tags.clone();
    tags.set("_embed_pending", "");
    let updated = keeper
        .docstore
        .update_current(
            &task.doc_id,
            DocumentWrite {
                summary,
                tags,
                content_hash: Some(hash),
                updated_at: now,
            },
        )
        .await?;

    let (vector, previous_identity) = keeper.providers.embed(&normalized).await?;
    if let Some(previous) = previous_identity {
        keeper.begin_reindex(previous, now).await?;
    }
    keeper
        .vectorstore
        .upsert(VectorRecord {
            key: task.doc_id.clone(),
            vector,
            summary: updated.summary,
            tags: updated.tags,
            updated_at: now,
        })
        .await?;
    Ok(())
}

/// `backfill-edges`: the payload is a tag key that just had `_inverse` set
/// on its `.tag/K` declaration. Scans every document for that key and
/// materializes the edge retroactively (spec §4.1 Phase F, generalized).
async fn handle_backfill_edges(keeper: &Keeper, task: &PendingTask) -> KeeperResult<()> {
    let key = task.payload.clone();
    let now = Utc::now();
    let docs = keeper
        .docstore
        .list(ListQuery {
            include_system: false,
            ..Default::default()
        })
        .await?;

    for doc in docs {
        let Some(target) = doc.tags.get(&key) else {
            continue;
        };
        if target.is_empty() || target.starts_with('.') {
            continue;
        }
        let target = target.to_string();
        keeper.ensure_autovivified(&target, now).await?;
        keeper
            .docstore
            .upsert_edge(Edge {
                source_doc: doc.id.clone(),
                tag_key: key.clone(),
                target_doc: target,
            })
            .await?;
    }
    Ok(())
}

/// `tag-classify`: match each part's text against every constrained
/// `.tag/K` vocabulary, tagging the first value that appears verbatim. A
/// heuristic substring match, not a learned classifier — grounded in the
/// same case-insensitive matching `fulltext_search` already does over
/// summaries.
async fn handle_tag_classify(keeper: &Keeper, task: &PendingTask) -> KeeperResult<()> {
    let docs = keeper
        .docstore
        .list(ListQuery {
            include_system: true,
            ..Default::default()
        })
        .await?;

    let mut constrained: Vec<(String, Vec<String>)> = Vec::new();
    for d in &docs {
        let Some(key) = d.id.strip_prefix(".tag/") else {
            continue;
        };
        if key.is_empty() || key.contains('/') || !SystemTags(&d.tags).constrained() {
            continue;
        }
        let prefix = format!(".tag/{key}/");
        let values: Vec<String> = docs
            .iter()
            .filter_map(|c| c.id.strip_prefix(prefix.as_str()).map(str::to_string))
            .collect();
        if !values.is_empty() {
            constrained.push((key.to_string(), values));
        }
    }

    let parts = keeper.docstore.list_parts(&task.doc_id).await?;
    for part in parts {
        let haystack = format!("{} {}", part.summary, part.content).to_lowercase();
        let mut tags = part.tags.clone();
        let mut changed = false;
        for (key, values) in &constrained {
            if tags.contains_key(key) {
                continue;
            }
            if let Some(value) = values.iter().find(|v| haystack.contains(&v.to_lowercase())) {
                tags.set(key.clone(), value.clone());
                changed = true;
            }
        }
        if changed {
            keeper.docstore.tag_part(&task.doc_id, part.part_num, tags).await?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use keeper_docstore::InMemoryDocumentStore;
    use keeper_docstore::NewDocument;
    use keeper_model::Tags;
    use keeper_providers::AnalyzedPart;
    use keeper_providers::EmbeddingProvider;
    use keeper_providers::ProviderIdentity;
    use keeper_providers::ProviderResult;
    use keeper_providers::ProviderRouter;
    use keeper_providers::SummarizeProvider;
    use keeper_queue::InMemoryPendingQueue;
    use keeper_vectorstore::InMemoryVectorStore;
    use pretty_assertions::assert_eq;

    struct FixedEmbedder;

    #[async_trait]
    impl EmbeddingProvider for FixedEmbedder {
        async fn embed(&self, text: &str) -> ProviderResult<Vec<f32>> {
            Ok(vec![text.len() as f32, 1.0])
        }

        fn identity(&self) -> ProviderIdentity {
            ProviderIdentity {
                name: "fixed".into(),
                model: "v1".into(),
                dimension: 2,
            }
        }
    }

    struct UppercaseSummarizer;

    #[async_trait]
    impl SummarizeProvider for UppercaseSummarizer {
        async fn summarize(&self, text: &str, _system_prompt: Option<&str>) -> ProviderResult<String> {
            Ok(text.to_uppercase())
        }
    }

    fn test_keeper() -> Arc<Keeper> {
        let providers = ProviderRouter::new()
            .with_embedding_provider(Arc::new(FixedEmbedder))
            .with_summarize_provider(Arc::new(UppercaseSummarizer));
        Arc::new(Keeper::new(
            Arc::new(InMemoryDocumentStore::new()),
            Arc::new(InMemoryVectorStore::new()),
            Arc::new(InMemoryPendingQueue::new()),
            Arc::new(providers),
            crate::config::StoreConfig::default(),
        ))
    }

    #[tokio::test]
    async fn embed_task_clears_pending_and_upserts_vector() {
        let keeper = test_keeper();
        let now = Utc::now();
        let mut tags = Tags::new();
        tags.set("_embed_pending", "1");
        keeper
            .docstore
            .create(NewDocument {
                id: "%abc".into(),
                summary: "hello".into(),
                tags,
                content_hash: None,
                created_at: now,
            })
            .await
            .expect("create");
        keeper
            .queue
            .enqueue(
                NewTask {
                    doc_id: "%abc".into(),
                    task_kind: TaskKind::Embed,
                    payload: "hello world".into(),
                },
                now,
            )
            .await
            .expect("enqueue");

        let pool = WorkerPool::new(Arc::clone(&keeper));
        assert!(pool.process_one().await.expect("process"));

        let doc = keeper.docstore.get("%abc").await.expect("get").expect("present");
        assert!(!doc.tags.contains_key("_embed_pending"));
        let record = keeper.vectorstore.get("%abc").await.expect("get").expect("present");
        assert_eq!(record.vector, vec!["hello world".len() as f32, 1.0]);
    }

    #[tokio::test]
    async fn summarize_task_updates_summary_without_archiving() {
        let keeper = test_keeper();
        let now = Utc::now();
        keeper
            .docstore
            .create(NewDocument {
                id: "%abc".into(),
                summary: "trunc…".into(),
                tags: Tags::new(),
                content_hash: None,
                created_at: now,
            })
            .await
            .expect("create");
        keeper
            .queue
            .enqueue(
                NewTask {
                    doc_id: "%abc".into(),
                    task_kind: TaskKind::Summarize,
                    payload: "the full text".into(),
                },
                now,
            )
            .await
            .expect("enqueue");

        let pool = WorkerPool::new(Arc::clone(&keeper));
        assert!(pool.process_one().await.expect("process"));

        let doc = keeper.docstore.get("%abc").await.expect("get").expect("present");
        assert_eq!(doc.summary, "THE FULL TEXT");
        assert!(keeper.docstore.list_versions("%abc").await.expect("versions").is_empty());
    }

    #[tokio::test]
    async fn fatal_error_dead_letters_and_sets_error_tag() {
        let keeper = test_keeper();
        let now = Utc::now();
        keeper
            .docstore
            .create(NewDocument {
                id: "%abc".into(),
                summary: "s".into(),
                tags: Tags::new(),
                content_hash: None,
                created_at: now,
            })
            .await
            .expect("create");
        // analyze has no provider loaded on this router: ProviderError::Unavailable
        // surfaces as KeeperError::ProviderUnavailable, which IS retryable, so use
        // an ocr task with a malformed payload to exercise the fatal path instead.
        keeper
            .queue
            .enqueue(
                NewTask {
                    doc_id: "%abc".into(),
                    task_kind: TaskKind::Ocr,
                    payload: "not-a-valid-payload-without-separator".into(),
                },
                now,
            )
            .await
            .expect("enqueue");

        let pool = WorkerPool::new(Arc::clone(&keeper));
        assert!(pool.process_one().await.expect("process"));

        assert_eq!(keeper.queue.len().await.expect("len"), 0);
        let doc = keeper.docstore.get("%abc").await.expect("get").expect("present");
        assert!(doc.tags.get("_error").is_some_and(|v| v.starts_with("ocr:")));
    }
}
