use std::sync::Arc;

use tracing::error;

use crate::{error::Result, models::stats::NotificationStats, queue::JobQueueEngine};

/// Reads the job counters of one queue.
pub struct StatsAggregator {
    jobs: Arc<JobQueueEngine>,
    queue: String,
}

impl StatsAggregator {
    pub fn new(jobs: Arc<JobQueueEngine>, queue: impl Into<String>) -> Self {
        Self {
            jobs,
            queue: queue.into(),
        }
    }

    pub fn get_stats(&self) -> Result<NotificationStats> {
        let counts = self.jobs.job_counts(&self.queue).map_err(|e| {
            error!(queue = %self.queue, error = %e, "Failed to get notification stats");
            e
        })?;

        Ok(counts.into())
    }
}
