use std::collections::HashMap;
use std::collections::HashSet;

use chrono::DateTime;
use chrono::Duration;
use chrono::Utc;
use tokio::sync::Mutex;

use crate::model::NackOutcome;
use crate::model::NewTask;
use crate::model::PendingQueue;
use crate::model::PendingTask;
use crate::model::QueueError;
use crate::model::QueueResult;

#[derive(Default)]
struct State {
    tasks: HashMap<u64, PendingTask>,
    next_id: u64,
    /// doc_ids with an unexpired claim outstanding, enforcing "at most one
    /// in-flight task per doc_id" independent of `claim_expires_at` checks
    /// (belt-and-suspenders, matching the source's in-memory claim set).
    claimed_docs: HashSet<String>,
}

/// Reference [`PendingQueue`] backed by a single `Mutex`-guarded map, FIFO
/// by insertion order (`next_id` is monotonic). Grounded on the claim/ack
/// state machine the source's approval-workflow queue uses for its
/// pending-to-resolved lifecycle, generalized to timeout-based re-claim
/// and a dead-letter outcome instead of a terminal decision.
#[derive(Default)]
pub struct InMemoryPendingQueue {
    state: Mutex<State>,
}

impl InMemoryPendingQueue {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl PendingQueue for InMemoryPendingQueue {
    async fn enqueue(&self, task: NewTask, now: DateTime<Utc>) -> QueueResult<PendingTask> {
        let mut state = self.state.lock().await;
        let id = state.next_id;
        state.next_id += 1;
        let pending = PendingTask {
            id,
            doc_id: task.doc_id,
            task_kind: task.task_kind,
            payload: task.payload,
            attempts: 0,
            enqueued_at: now,
            claim_expires_at: None,
            last_error: None,
        };
        state.tasks.insert(id, pending.clone());
        Ok(pending)
    }

    async fn claim(
        &self,
        now: DateTime<Utc>,
        claim_timeout: Duration,
    ) -> QueueResult<Option<PendingTask>> {
        let mut state = self.state.lock().await;

        let expired_docs: Vec<String> = state
            .tasks
            .values()
            .filter(|t| matches!(t.claim_expires_at, Some(expiry) if expiry <= now))
            .map(|t| t.doc_id.clone())
            .collect();
        for doc_id in &expired_docs {
            state.claimed_docs.remove(doc_id);
        }
        for task in state.tasks.values_mut() {
            if matches!(task.claim_expires_at, Some(expiry) if expiry <= now) {
                task.claim_expires_at = None;
            }
        }

        let mut candidates: Vec<u64> = state
            .tasks
            .values()
            .filter(|t| t.claim_expires_at.is_none() && !state.claimed_docs.contains(&t.doc_id))
            .map(|t| t.id)
            .collect();
        candidates.sort_unstable();
        let Some(&chosen_id) = candidates.first() else {
            return Ok(None);
        };

        let task = state.tasks.get_mut(&chosen_id).expect("candidate exists");
        task.claim_expires_at = Some(now + claim_timeout);
        task.attempts += 1;
        state.claimed_docs.insert(task.doc_id.clone());
        Ok(Some(task.clone()))
    }

    async fn ack(&self, task_id: u64) -> QueueResult<()> {
        let mut state = self.state.lock().await;
        let task = state
            .tasks
            .remove(&task_id)
            .ok_or(QueueError::UnknownTask(task_id))?;
        state.claimed_docs.remove(&task.doc_id);
        Ok(())
    }

    async fn nack(
        &self,
        task_id: u64,
        _now: DateTime<Utc>,
        max_attempts: u32,
        error: String,
    ) -> QueueResult<NackOutcome> {
        let mut state = self.state.lock().await;
        let task = state
            .tasks
            .get(&task_id)
            .ok_or(QueueError::UnknownTask(task_id))?
            .clone();
        state.claimed_docs.remove(&task.doc_id);

        if task.attempts >= max_attempts {
            state.tasks.remove(&task_id);
            return Ok(NackOutcome::DeadLettered);
        }

        let task = state.tasks.get_mut(&task_id).expect("task exists");
        task.claim_expires_at = None;
        task.last_error = Some(error);
        Ok(NackOutcome::Requeued)
    }

    async fn tasks_for_doc(&self, doc_id: &str) -> QueueResult<Vec<PendingTask>> {
        let state = self.state.lock().await;
        let mut tasks: Vec<PendingTask> = state
            .tasks
            .values()
            .filter(|t| t.doc_id == doc_id)
            .cloned()
            .collect();
        tasks.sort_by_key(|t| t.id);
        Ok(tasks)
    }

    async fn len(&self) -> QueueResult<usize> {
        Ok(self.state.lock().await.tasks.len())
    }
}
