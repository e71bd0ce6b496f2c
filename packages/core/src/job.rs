//! Job abstraction: typed jobs, their type-erased form, and the queued
//! wrapper the scheduler owns.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::context::ContextDependent;
use crate::error::JobError;
use crate::parameters::JobParameters;
use crate::requirement::Requirement;

/// Identity of a queued job.
///
/// Persistent jobs get theirs from the queue store on insert, so ordering by
/// id matches insertion order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub Ulid);

impl JobId {
    /// Create a new unique job ID.
    pub fn new() -> Self {
        Self(Ulid::new())
    }

    /// Parse a job ID from a string.
    pub fn parse(s: &str) -> Result<Self, ulid::DecodeError> {
        Ok(Self(Ulid::from_string(s)?))
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Future returned by a job run.
pub type JobFuture<'a> = Pin<Box<dyn Future<Output = Result<(), JobError>> + Send + 'a>>;

/// Future returned by the cancellation hook.
pub type HookFuture<'a> = Pin<Box<dyn Future<Output = ()> + Send + 'a>>;

/// A unit of retryable background work.
///
/// The job's persisted form is its `State`, kept separate from any runtime
/// collaborators, which are bound through [`Job::context_dependent`] after
/// construction or reload. Runs may be repeated after a crash, so `run`
/// must be safe to execute more than once for the same state.
pub trait Job: Sized + Send + Sync + 'static {
    /// Serializable state, without collaborators.
    type State: Serialize + DeserializeOwned;

    /// Stable type name used to find the decoder on reload.
    const JOB_TYPE: &'static str;

    fn from_state(state: Self::State) -> Self;

    fn to_state(&self) -> Self::State;

    fn parameters(&self) -> JobParameters {
        JobParameters::default()
    }

    fn run(&self) -> impl Future<Output = Result<(), JobError>> + Send;

    /// Decide whether a failed run should be retried.
    fn should_retry(&self, error: &JobError) -> bool {
        error.is_transient()
    }

    /// Called once when a fresh job is accepted by the manager.
    fn on_added(&self) {}

    /// Cleanup after the job failed for good.
    fn on_canceled(&self) -> impl Future<Output = ()> + Send {
        async {}
    }

    fn context_dependent(&mut self) -> Option<&mut dyn ContextDependent> {
        None
    }
}

/// Object-safe view of a [`Job`], used by the scheduler.
pub trait DynJob: Send + Sync + 'static {
    fn job_type(&self) -> &'static str;
    fn parameters(&self) -> JobParameters;
    fn encode_state(&self) -> Result<serde_json::Value, serde_json::Error>;
    fn run(&self) -> JobFuture<'_>;
    fn should_retry(&self, error: &JobError) -> bool;
    fn on_added(&self);
    fn on_canceled(&self) -> HookFuture<'_>;
    fn context_dependent(&mut self) -> Option<&mut dyn ContextDependent>;
}

impl<J: Job> DynJob for J {
    fn job_type(&self) -> &'static str {
        J::JOB_TYPE
    }

    fn parameters(&self) -> JobParameters {
        Job::parameters(self)
    }

    fn encode_state(&self) -> Result<serde_json::Value, serde_json::Error> {
        serde_json::to_value(self.to_state())
    }

    fn run(&self) -> JobFuture<'_> {
        Box::pin(Job::run(self))
    }

    fn should_retry(&self, error: &JobError) -> bool {
        Job::should_retry(self, error)
    }

    fn on_added(&self) {
        Job::on_added(self)
    }

    fn on_canceled(&self) -> HookFuture<'_> {
        Box::pin(Job::on_canceled(self))
    }

    fn context_dependent(&mut self) -> Option<&mut dyn ContextDependent> {
        Job::context_dependent(self)
    }
}

/// Serialized envelope of a job as written to the queue store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedJob {
    pub job_type: String,
    pub state: serde_json::Value,
    pub parameters: JobParameters,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub run_count: u32,
}

/// A job owned by the scheduler, with its reconstructed requirements.
pub struct QueuedJob {
    /// Identity, replaced by the store's id when the job is persisted.
    pub id: JobId,
    pub parameters: JobParameters,
    pub created_at: DateTime<Utc>,
    /// Number of counted runs so far.
    pub run_count: u32,
    /// Backoff: the job is not eligible before this instant.
    pub not_before: Option<Instant>,
    job: Box<dyn DynJob>,
    requirements: Vec<Box<dyn Requirement>>,
}

impl QueuedJob {
    pub fn new(
        job: Box<dyn DynJob>,
        parameters: JobParameters,
        requirements: Vec<Box<dyn Requirement>>,
    ) -> Self {
        Self {
            id: JobId::new(),
            parameters,
            created_at: Utc::now(),
            run_count: 0,
            not_before: None,
            job,
            requirements,
        }
    }

    pub fn job(&self) -> &dyn DynJob {
        self.job.as_ref()
    }

    pub fn job_mut(&mut self) -> &mut dyn DynJob {
        self.job.as_mut()
    }

    pub fn job_type(&self) -> &'static str {
        self.job.job_type()
    }

    pub fn group_id(&self) -> Option<&str> {
        self.parameters.group_id.as_deref()
    }

    pub fn requirements(&self) -> &[Box<dyn Requirement>] {
        &self.requirements
    }

    pub fn requirements_mut(&mut self) -> &mut [Box<dyn Requirement>] {
        &mut self.requirements
    }

    /// Name of the first requirement that is currently absent.
    pub fn missing_requirement(&self) -> Option<&'static str> {
        self.requirements
            .iter()
            .find(|requirement| !requirement.is_present())
            .map(|requirement| requirement.name())
    }

    pub fn is_requirements_met(&self) -> bool {
        self.missing_requirement().is_none()
    }

    pub fn is_backoff_elapsed(&self, now: Instant) -> bool {
        self.not_before.is_none_or(|not_before| now >= not_before)
    }

    /// Whether another retry fits in the job's count or duration budget.
    pub fn has_retry_budget(&self, now: DateTime<Utc>) -> bool {
        if self.run_count <= self.parameters.retry_count {
            return true;
        }

        match self.parameters.retry_duration() {
            Some(window) => (now - self.created_at)
                .to_std()
                .map_or(true, |age| age < window),
            None => false,
        }
    }

    /// Schedule the next attempt after `delay`.
    pub fn back_off(&mut self, delay: Duration) {
        self.not_before = Some(Instant::now() + delay);
    }

    pub fn to_persisted(&self) -> Result<PersistedJob, serde_json::Error> {
        Ok(PersistedJob {
            job_type: self.job.job_type().to_string(),
            state: self.job.encode_state()?,
            parameters: self.parameters.clone(),
            created_at: self.created_at,
            run_count: self.run_count,
        })
    }
}

impl fmt::Debug for QueuedJob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueuedJob")
            .field("id", &self.id)
            .field("job_type", &self.job.job_type())
            .field("group_id", &self.parameters.group_id)
            .field("run_count", &self.run_count)
            .finish_non_exhaustive()
    }
}
