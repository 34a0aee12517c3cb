use chrono::DateTime;
use chrono::Utc;
use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

pub type QueueResult<T> = Result<T, QueueError>;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("unknown task {0}")]
    UnknownTask(u64),
    #[error("storage failure: {0}")]
    Storage(String),
}

/// Background task kinds deferred from the synchronous write path (spec
/// §4.4). Each one is idempotent: a task that runs twice (e.g. after a
/// crash-and-redeliver) must settle into the same state it would from a
/// single run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskKind {
    Summarize,
    Analyze,
    Embed,
    Reembed,
    Ocr,
    BackfillEdges,
    TagClassify,
}

impl TaskKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            TaskKind::Summarize => "summarize",
            TaskKind::Analyze => "analyze",
            TaskKind::Embed => "embed",
            TaskKind::Reembed => "reembed",
            TaskKind::Ocr => "ocr",
            TaskKind::BackfillEdges => "backfill-edges",
            TaskKind::TagClassify => "tag-classify",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "summarize" => Some(TaskKind::Summarize),
            "analyze" => Some(TaskKind::Analyze),
            "embed" => Some(TaskKind::Embed),
            "reembed" => Some(TaskKind::Reembed),
            "ocr" => Some(TaskKind::Ocr),
            "backfill-edges" => Some(TaskKind::BackfillEdges),
            "tag-classify" => Some(TaskKind::TagClassify),
            _ => None,
        }
    }
}

/// A task awaiting creation; `payload` is opaque to the queue (the Keeper
/// encodes whatever the task kind needs, e.g. the original text for
/// `summarize`, which is never persisted on the Document itself).
#[derive(Debug, Clone)]
pub struct NewTask {
    pub doc_id: String,
    pub task_kind: TaskKind,
    pub payload: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingTask {
    pub id: u64,
    pub doc_id: String,
    pub task_kind: TaskKind,
    pub payload: String,
    pub attempts: u32,
    pub enqueued_at: DateTime<Utc>,
    pub claim_expires_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

/// What happened to a task after [`PendingQueue::nack`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NackOutcome {
    /// Attempts remain; the task is available for re-claim.
    Requeued,
    /// `attempts >= max_attempts`: the task was removed. The caller is
    /// responsible for marking the owning doc with `_error` (spec §3.2,
    /// §7) since the queue itself has no DocStore handle.
    DeadLettered,
}

/// A persistent FIFO of deferred work with claim/ack/nack semantics and
/// per-doc serialization: at most one in-flight (claimed) task per
/// `doc_id` (spec §4.4, §5 "Claim lock in PendingQueue").
#[async_trait::async_trait]
pub trait PendingQueue: Send + Sync {
    async fn enqueue(&self, task: NewTask, now: DateTime<Utc>) -> QueueResult<PendingTask>;

    /// The oldest unclaimed task whose `doc_id` has no other in-flight
    /// claim. Expired claims (`claim_expires_at < now`) are swept and
    /// treated as unclaimed before picking. Increments `attempts`.
    async fn claim(
        &self,
        now: DateTime<Utc>,
        claim_timeout: chrono::Duration,
    ) -> QueueResult<Option<PendingTask>>;

    async fn ack(&self, task_id: u64) -> QueueResult<()>;

    async fn nack(
        &self,
        task_id: u64,
        now: DateTime<Utc>,
        max_attempts: u32,
        error: String,
    ) -> QueueResult<NackOutcome>;

    async fn tasks_for_doc(&self, doc_id: &str) -> QueueResult<Vec<PendingTask>>;

    async fn len(&self) -> QueueResult<usize>;

    async fn is_empty(&self) -> QueueResult<bool> {
        Ok(self.len().await? == 0)
    }
}
