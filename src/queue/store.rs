use std::{
    cmp::{Ordering as CmpOrdering, Reverse},
    collections::BinaryHeap,
    sync::atomic::{AtomicU64, Ordering},
};

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::{error::Result, models::job::Job};

/// Backing structure of one job queue.
///
/// `pop` must hand out the waiting job with the lowest priority value, and
/// among equal priorities the one pushed first. A popped job stays active in
/// the store until `complete` is called for it. Implementations are shared
/// by every worker of the queue and must be safe for concurrent use.
#[async_trait]
pub trait JobStore: Send + Sync {
    async fn push(&self, job: &Job) -> Result<()>;

    async fn pop(&self) -> Result<Option<Job>>;

    /// Forgets a job that reached `completed` or `failed`.
    async fn complete(&self, job: &Job) -> Result<()>;

    /// Moves jobs left active by a previous process back to waiting and
    /// returns how many were moved.
    async fn requeue_active(&self) -> Result<u64>;

    /// Number of waiting jobs.
    async fn len(&self) -> Result<u64>;

    async fn ping(&self) -> Result<()>;
}

struct QueuedJob {
    priority: u8,
    sequence: u64,
    job: Job,
}

impl QueuedJob {
    fn key(&self) -> (u8, u64) {
        (self.priority, self.sequence)
    }
}

impl PartialEq for QueuedJob {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for QueuedJob {}

impl PartialOrd for QueuedJob {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueuedJob {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        self.key().cmp(&other.key())
    }
}

/// In-process store; jobs do not survive a restart.
#[derive(Default)]
pub struct MemoryJobStore {
    heap: Mutex<BinaryHeap<Reverse<QueuedJob>>>,
    sequence: AtomicU64,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn push(&self, job: &Job) -> Result<()> {
        let sequence = self.sequence.fetch_add(1, Ordering::SeqCst);

        self.heap.lock().push(Reverse(QueuedJob {
            priority: job.options.priority,
            sequence,
            job: job.clone(),
        }));

        Ok(())
    }

    async fn pop(&self) -> Result<Option<Job>> {
        Ok(self.heap.lock().pop().map(|Reverse(queued)| queued.job))
    }

    async fn complete(&self, _job: &Job) -> Result<()> {
        Ok(())
    }

    async fn requeue_active(&self) -> Result<u64> {
        Ok(0)
    }

    async fn len(&self) -> Result<u64> {
        Ok(self.heap.lock().len() as u64)
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}
