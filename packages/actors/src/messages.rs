//! Message types for actor communication.

use std::fmt;

use db::DbError;
use queue_core::{DynJob, InjectError, JobError, JobId, JobSnapshot, ManagerStats, QueuedJob};
use ractor::RpcReplyPort;

/// Result of adding a job to the manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddOutcome {
    /// The job was accepted under this id.
    Queued(JobId),
    /// The job's group already had a job queued and duplicates are ignored.
    Dropped,
}

impl AddOutcome {
    pub fn is_queued(&self) -> bool {
        matches!(self, AddOutcome::Queued(_))
    }

    pub fn job_id(&self) -> Option<JobId> {
        match self {
            AddOutcome::Queued(id) => Some(*id),
            AddOutcome::Dropped => None,
        }
    }
}

/// Messages for the JobManager actor.
pub enum ManagerMessage {
    /// Add a new job.
    Add {
        job: Box<dyn DynJob>,
        reply: RpcReplyPort<Result<AddOutcome, ManagerError>>,
    },

    /// Request the next runnable job for a worker.
    RequestJob {
        worker_id: String,
        reply: RpcReplyPort<Option<Box<QueuedJob>>>,
    },

    /// Report the outcome of a run; the job is handed back to the manager.
    JobFinished {
        job: Box<QueuedJob>,
        worker_id: String,
        outcome: Result<(), JobError>,
        duration_ms: u64,
    },

    /// Re-evaluate pending jobs now instead of at the next poll.
    Wake,

    /// Get manager stats.
    GetStats { reply: RpcReplyPort<ManagerStats> },

    /// List pending and running jobs.
    ListJobs { reply: RpcReplyPort<Vec<JobSnapshot>> },

    /// Stop workers and the manager.
    Shutdown,
}

impl fmt::Debug for ManagerMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ManagerMessage::Add { job, .. } => f
                .debug_struct("Add")
                .field("job_type", &job.job_type())
                .finish_non_exhaustive(),
            ManagerMessage::RequestJob { worker_id, .. } => f
                .debug_struct("RequestJob")
                .field("worker_id", worker_id)
                .finish_non_exhaustive(),
            ManagerMessage::JobFinished {
                job,
                worker_id,
                outcome,
                duration_ms,
            } => f
                .debug_struct("JobFinished")
                .field("job", job)
                .field("worker_id", worker_id)
                .field("outcome", outcome)
                .field("duration_ms", duration_ms)
                .finish(),
            ManagerMessage::Wake => f.write_str("Wake"),
            ManagerMessage::GetStats { .. } => f.write_str("GetStats"),
            ManagerMessage::ListJobs { .. } => f.write_str("ListJobs"),
            ManagerMessage::Shutdown => f.write_str("Shutdown"),
        }
    }
}

/// Messages for the WorkerActor.
#[derive(Debug)]
pub enum WorkerMessage {
    /// Run a job handed out by the manager.
    ProcessJob { job: Box<QueuedJob> },

    /// Shutdown the worker.
    Shutdown,

    /// Heartbeat tick; an idle worker asks the manager for work.
    Heartbeat,
}

/// Error type for job manager operations.
#[derive(Debug, thiserror::Error)]
pub enum ManagerError {
    #[error("Job rejected: {0}")]
    Inject(#[from] InjectError),

    #[error("Failed to persist job: {0}")]
    Persist(#[from] DbError),

    #[error("Job manager unavailable: {0}")]
    Unavailable(String),

    #[error("Failed to start job manager: {0}")]
    Spawn(String),
}
