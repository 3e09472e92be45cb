use std::{sync::Arc, time::Duration};

use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    error::DispatchError,
    models::job::{Job, JobState},
    queue::engine::RegisteredQueue,
    utils::retry_with_backoff,
};

/// Pulls jobs from one queue until cancelled. Cancellation is only observed
/// between jobs.
pub(crate) async fn run(
    queue: Arc<RegisteredQueue>,
    index: usize,
    poll_interval: Duration,
    cancel: CancellationToken,
) {
    debug!(queue = %queue.name, worker = index, "Worker started");

    while !cancel.is_cancelled() {
        match queue.store.pop().await {
            Ok(Some(job)) => {
                queue.transition(JobState::Waiting, JobState::Active);
                execute(&queue, index, &job).await;
                release(&queue, &job).await;
                continue;
            }
            Ok(None) => {}
            Err(e) => {
                error!(queue = %queue.name, worker = index, error = %e, "Failed to fetch job");
            }
        }

        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = queue.ready.notified() => {}
            _ = sleep(poll_interval) => {}
        }
    }

    debug!(queue = %queue.name, worker = index, "Worker stopped");
}

async fn release(queue: &RegisteredQueue, job: &Job) {
    if let Err(e) = queue.store.complete(job).await {
        error!(queue = %queue.name, job_id = %job.id, error = %e, "Failed to release finished job");
    }
}

async fn execute(queue: &RegisteredQueue, index: usize, job: &Job) {
    let Some(handler) = queue.handler(&job.name) else {
        queue.transition(JobState::Active, JobState::Failed);
        error!(
            queue = %queue.name,
            job_id = %job.id,
            job_name = %job.name,
            "No handler registered for job"
        );
        return;
    };

    let policy = job.options.retry_policy();
    let max_attempts = policy.max_attempts;

    debug!(
        queue = %queue.name,
        worker = index,
        job_id = %job.id,
        job_name = %job.name,
        priority = job.options.priority,
        "Processing job"
    );

    let result = retry_with_backoff(&policy, |attempt| {
        let mut current = job.clone();
        current.attempts_made = attempt;
        let handler = Arc::clone(&handler);

        async move {
            let job_id = current.id;
            let result = handler(current).await;

            if let Err(e) = &result {
                warn!(
                    job_id = %job_id,
                    attempt,
                    max_attempts,
                    error = %e,
                    "Job attempt failed"
                );
            }

            result
        }
    })
    .await;

    match result {
        Ok(()) => {
            queue.transition(JobState::Active, JobState::Completed);
            info!(queue = %queue.name, job_id = %job.id, job_name = %job.name, "Job completed");
        }
        Err(e) => {
            queue.transition(JobState::Active, JobState::Failed);

            let failure = DispatchError::JobExecutionFailed {
                job_id: job.id,
                job_name: job.name.clone(),
                attempts: max_attempts,
                reason: e.to_string(),
            };
            error!(queue = %queue.name, error = %failure, "Job failed");
        }
    }
}
