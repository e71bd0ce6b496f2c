//! Job manager configuration, statistics and job snapshots.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::JobId;

/// Configuration for the job manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagerConfig {
    /// Number of concurrent workers.
    pub concurrency: u32,
    /// How often idle workers poll for runnable jobs.
    pub poll_interval: Duration,
    /// Backoff after the first failed run; doubles with each further run.
    pub backoff_base: Duration,
    /// Upper bound for the backoff.
    pub backoff_max: Duration,
    /// Optional execution timeout per run.
    pub job_timeout: Option<Duration>,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            concurrency: 4,
            poll_interval: Duration::from_millis(100),
            backoff_base: Duration::from_secs(1),
            backoff_max: Duration::from_secs(300),
            job_timeout: None,
        }
    }
}

impl ManagerConfig {
    pub fn with_concurrency(mut self, concurrency: u32) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn with_backoff(mut self, base: Duration, max: Duration) -> Self {
        self.backoff_base = base;
        self.backoff_max = max.max(base);
        self
    }

    pub fn with_job_timeout(mut self, timeout: Duration) -> Self {
        self.job_timeout = Some(timeout);
        self
    }

    /// Backoff before the attempt following run number `run_count`.
    pub fn backoff_for(&self, run_count: u32) -> Duration {
        let exponent = run_count.saturating_sub(1).min(31);
        self.backoff_base
            .saturating_mul(1u32 << exponent)
            .min(self.backoff_max)
    }
}

/// Where a job is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Pending,
    Running,
}

/// Point-in-time view of a job held by the manager.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobSnapshot {
    pub id: JobId,
    pub job_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group_id: Option<String>,
    pub state: JobState,
    pub run_count: u32,
}

/// Counters for the manager's current state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ManagerStats {
    pub pending: u64,
    pub running: u64,
    pub completed: u64,
    pub failed: u64,
    pub duplicates_dropped: u64,
}

impl ManagerStats {
    /// Total jobs in the manager (pending + running).
    pub fn active(&self) -> u64 {
        self.pending + self.running
    }

    /// Total processed jobs.
    pub fn processed(&self) -> u64 {
        self.completed + self.failed
    }
}
