use std::{collections::HashMap, future::Future, sync::Arc, time::Duration};

use futures_util::{FutureExt, future::BoxFuture};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio::{sync::Notify, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    error::{DispatchError, Result},
    models::{
        job::{Job, JobId, JobOptions, JobState},
        stats::JobCounts,
    },
    queue::{store::JobStore, worker},
};

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Executes one attempt of a job. An `Err` consumes one of the job's attempts.
pub type JobHandler = Arc<dyn Fn(Job) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

pub(crate) struct RegisteredQueue {
    pub(crate) name: String,
    pub(crate) store: Arc<dyn JobStore>,
    pub(crate) handlers: RwLock<HashMap<String, JobHandler>>,
    pub(crate) counters: Mutex<JobCounts>,
    pub(crate) ready: Notify,
}

impl RegisteredQueue {
    /// Moves one job between two counters under a single lock.
    pub(crate) fn transition(&self, from: JobState, to: JobState) {
        let mut counters = self.counters.lock();
        counters.decrement(from);
        counters.increment(to);
    }

    pub(crate) fn handler(&self, job_name: &str) -> Option<JobHandler> {
        self.handlers.read().get(job_name).cloned()
    }
}

/// Registry of named job queues and the workers draining them.
pub struct JobQueueEngine {
    queues: RwLock<HashMap<String, Arc<RegisteredQueue>>>,
    poll_interval: Duration,
    shutdown: CancellationToken,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl Default for JobQueueEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl JobQueueEngine {
    pub fn new() -> Self {
        Self {
            queues: RwLock::new(HashMap::new()),
            poll_interval: DEFAULT_POLL_INTERVAL,
            shutdown: CancellationToken::new(),
            workers: Mutex::new(Vec::new()),
        }
    }

    /// How long an idle worker sleeps before polling its store again when no
    /// submission wakes it earlier.
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Registers `name` backed by `store`. Jobs a previous run left active are
    /// moved back to waiting, and everything waiting is counted. Registering an existing name keeps the first store.
    pub async fn register_queue(&self, name: &str, store: Arc<dyn JobStore>) -> Result<()> {
        if self.is_registered(name) {
            warn!(queue = %name, "Queue already registered");
            return Ok(());
        }

        let requeued = store.requeue_active().await?;
        if requeued > 0 {
            warn!(queue = %name, requeued, "Requeued jobs left active by a previous run");
        }

        let waiting = store.len().await?;

        let queue = Arc::new(RegisteredQueue {
            name: name.to_string(),
            store,
            handlers: RwLock::new(HashMap::new()),
            counters: Mutex::new(JobCounts {
                waiting,
                ..JobCounts::default()
            }),
            ready: Notify::new(),
        });

        self.queues.write().entry(name.to_string()).or_insert(queue);
        info!(queue = %name, waiting, "Registered job queue");
        Ok(())
    }

    pub fn is_registered(&self, name: &str) -> bool {
        self.queues.read().contains_key(name)
    }

    /// Registers the handler for jobs named `job_name` on `queue`.
    pub fn register_handler<F, Fut>(&self, queue: &str, job_name: &str, handler: F) -> Result<()>
    where
        F: Fn(Job) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let registered = self.queue(queue)?;
        let handler: JobHandler = Arc::new(move |job: Job| handler(job).boxed());

        registered
            .handlers
            .write()
            .insert(job_name.to_string(), handler);

        debug!(queue = %queue, job_name = %job_name, "Registered job handler");
        Ok(())
    }

    /// Enqueues a job and wakes one idle worker.
    pub async fn submit<T>(
        &self,
        queue: &str,
        job_name: &str,
        payload: &T,
        options: JobOptions,
    ) -> Result<JobId>
    where
        T: Serialize + ?Sized,
    {
        let registered = self.queue(queue)?;
        let job = Job::new(queue, job_name, serde_json::to_value(payload)?, options);

        // Counted before the push so a worker can never see it uncounted.
        registered.counters.lock().increment(JobState::Waiting);

        if let Err(e) = registered.store.push(&job).await {
            registered.counters.lock().decrement(JobState::Waiting);
            warn!(queue = %queue, job_name = %job_name, error = %e, "Failed to enqueue job");
            return Err(e);
        }

        registered.ready.notify_one();

        info!(
            queue = %queue,
            job_name = %job_name,
            job_id = %job.id,
            priority = job.options.priority,
            attempts = job.options.attempts,
            "Job submitted"
        );

        Ok(job.id)
    }

    /// Snapshot of the counters of `queue`.
    pub fn job_counts(&self, queue: &str) -> Result<JobCounts> {
        Ok(*self.queue(queue)?.counters.lock())
    }

    /// Spawns `concurrency` workers pulling from `queue`.
    pub fn start_workers(&self, queue: &str, concurrency: usize) -> Result<()> {
        let registered = self.queue(queue)?;
        let mut workers = self.workers.lock();

        for index in 0..concurrency {
            workers.push(tokio::spawn(worker::run(
                Arc::clone(&registered),
                index,
                self.poll_interval,
                self.shutdown.child_token(),
            )));
        }

        info!(queue = %queue, concurrency, "Started job workers");
        Ok(())
    }

    pub async fn ping(&self, queue: &str) -> Result<()> {
        self.queue(queue)?.store.ping().await
    }

    /// Stops all workers. Jobs already picked up run to their terminal state.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();

        let workers = std::mem::take(&mut *self.workers.lock());
        let count = workers.len();

        for handle in workers {
            if let Err(e) = handle.await {
                warn!(error = %e, "Job worker ended abnormally");
            }
        }

        info!(workers = count, "Job workers stopped");
    }

    fn queue(&self, name: &str) -> Result<Arc<RegisteredQueue>> {
        self.queues
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| DispatchError::QueueNotRegistered(name.to_string()))
    }
}
