//! Core domain types for the job queue.
//!
//! This crate contains shared types used across all packages:
//! - Job, DynJob and QueuedJob for units of work
//! - Requirements gating job execution
//! - JobContext and DependencyInjector for late-bound collaborators
//! - JobRegistry for restoring persisted jobs
//! - Events, configuration and statistics for the manager

mod context;
mod error;
mod events;
mod job;
mod manager;
mod parameters;
mod registry;
mod requirement;

pub use context::{ContextDependent, DependencyInjector, JobContext};
pub use error::{DecodeError, InjectError, JobError};
pub use events::JobEvent;
pub use job::{DynJob, HookFuture, Job, JobFuture, JobId, PersistedJob, QueuedJob};
pub use manager::{JobSnapshot, JobState, ManagerConfig, ManagerStats};
pub use parameters::{DEFAULT_RETRY_COUNT, JobParameters};
pub use registry::JobRegistry;
pub use requirement::{
    AnyRequirement, NetworkOrServiceRequirement, NetworkRequirement, NetworkState, Requirement,
    ServiceRequirement,
};
