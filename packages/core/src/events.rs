//! Event types emitted by the job manager.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::JobId;

/// Events emitted as jobs move through their lifecycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum JobEvent {
    /// A new job was accepted.
    JobAdded {
        job_id: JobId,
        job_type: String,
        timestamp: DateTime<Utc>,
    },
    /// A job was dropped because its group already had a queued job.
    DuplicateDropped {
        job_type: String,
        group_id: String,
        timestamp: DateTime<Utc>,
    },
    /// A job started executing.
    JobStarted {
        job_id: JobId,
        worker_id: String,
        run_count: u32,
        timestamp: DateTime<Utc>,
    },
    /// A job completed successfully.
    JobCompleted {
        job_id: JobId,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },
    /// A job ran into an unmet precondition and went back to pending.
    JobDeferred {
        job_id: JobId,
        reason: String,
        timestamp: DateTime<Utc>,
    },
    /// A job failed and will be retried after a backoff.
    JobRetrying {
        job_id: JobId,
        error: String,
        run_count: u32,
        backoff_ms: u64,
        timestamp: DateTime<Utc>,
    },
    /// A job failed for good and was removed.
    JobFailed {
        job_id: JobId,
        error: String,
        run_count: u32,
        timestamp: DateTime<Utc>,
    },
}

impl JobEvent {
    /// Get the timestamp of the event.
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            JobEvent::JobAdded { timestamp, .. } => *timestamp,
            JobEvent::DuplicateDropped { timestamp, .. } => *timestamp,
            JobEvent::JobStarted { timestamp, .. } => *timestamp,
            JobEvent::JobCompleted { timestamp, .. } => *timestamp,
            JobEvent::JobDeferred { timestamp, .. } => *timestamp,
            JobEvent::JobRetrying { timestamp, .. } => *timestamp,
            JobEvent::JobFailed { timestamp, .. } => *timestamp,
        }
    }

    /// Get the job ID associated with this event, if any.
    pub fn job_id(&self) -> Option<JobId> {
        match self {
            JobEvent::JobAdded { job_id, .. } => Some(*job_id),
            JobEvent::DuplicateDropped { .. } => None,
            JobEvent::JobStarted { job_id, .. } => Some(*job_id),
            JobEvent::JobCompleted { job_id, .. } => Some(*job_id),
            JobEvent::JobDeferred { job_id, .. } => Some(*job_id),
            JobEvent::JobRetrying { job_id, .. } => Some(*job_id),
            JobEvent::JobFailed { job_id, .. } => Some(*job_id),
        }
    }

    /// Get a short description of this event for logging.
    pub fn description(&self) -> String {
        match self {
            JobEvent::JobAdded {
                job_id, job_type, ..
            } => format!("Job {} ({}) added", job_id, job_type),
            JobEvent::DuplicateDropped {
                job_type, group_id, ..
            } => format!("Duplicate {} dropped for group {}", job_type, group_id),
            JobEvent::JobStarted {
                job_id,
                worker_id,
                run_count,
                ..
            } => format!("Job {} started by {} (run {})", job_id, worker_id, run_count),
            JobEvent::JobCompleted {
                job_id,
                duration_ms,
                ..
            } => format!("Job {} completed in {}ms", job_id, duration_ms),
            JobEvent::JobDeferred { job_id, reason, .. } => {
                format!("Job {} deferred: {}", job_id, reason)
            }
            JobEvent::JobRetrying {
                job_id,
                error,
                backoff_ms,
                ..
            } => format!("Job {} failed: {} (retry in {}ms)", job_id, error, backoff_ms),
            JobEvent::JobFailed {
                job_id,
                error,
                run_count,
                ..
            } => format!("Job {} failed after {} runs: {}", job_id, run_count, error),
        }
    }
}
