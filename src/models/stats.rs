use serde::{Deserialize, Serialize};

use crate::models::job::JobState;

/// Per-state job counters of one queue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobCounts {
    pub waiting: u64,
    pub active: u64,
    pub completed: u64,
    pub failed: u64,
}

impl JobCounts {
    pub fn get(&self, state: JobState) -> u64 {
        match state {
            JobState::Waiting => self.waiting,
            JobState::Active => self.active,
            JobState::Completed => self.completed,
            JobState::Failed => self.failed,
        }
    }

    pub(crate) fn increment(&mut self, state: JobState) {
        *self.slot(state) += 1;
    }

    pub(crate) fn decrement(&mut self, state: JobState) {
        let slot = self.slot(state);
        *slot = slot.saturating_sub(1);
    }

    fn slot(&mut self, state: JobState) -> &mut u64 {
        match state {
            JobState::Waiting => &mut self.waiting,
            JobState::Active => &mut self.active,
            JobState::Completed => &mut self.completed,
            JobState::Failed => &mut self.failed,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationStats {
    pub pending_jobs: u64,
    pub active_jobs: u64,
    pub completed_jobs: u64,
    pub failed_jobs: u64,
}

impl From<JobCounts> for NotificationStats {
    fn from(counts: JobCounts) -> Self {
        Self {
            pending_jobs: counts.get(JobState::Waiting),
            active_jobs: counts.get(JobState::Active),
            completed_jobs: counts.get(JobState::Completed),
            failed_jobs: counts.get(JobState::Failed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decrement_never_underflows() {
        let mut counts = JobCounts::default();
        counts.decrement(JobState::Waiting);
        assert_eq!(counts.waiting, 0);
    }

    #[test]
    fn stats_serialize_with_camel_case_keys() {
        let stats = NotificationStats::from(JobCounts {
            waiting: 1,
            active: 2,
            completed: 3,
            failed: 4,
        });

        assert_eq!(
            serde_json::to_value(stats).unwrap(),
            serde_json::json!({
                "pendingJobs": 1,
                "activeJobs": 2,
                "completedJobs": 3,
                "failedJobs": 4
            })
        );
    }
}
