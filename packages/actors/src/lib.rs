//! Actor system for the job queue.
//!
//! This crate provides the Ractor-based job manager and its workers.
//!
//! # Architecture
//!
//! - `JobManager` - Owns pending jobs, applies requirement gating, group
//!   ordering and the retry policy, and keeps the queue store in sync
//! - `WorkerActor` - Pulls runnable jobs from the manager and executes them
//!
//! # Usage
//!
//! ```ignore
//! use actors::start_job_manager;
//!
//! let (manager, _join) = start_job_manager(ManagerConfig::default(), storage).await?;
//! manager.add(UploadAttachment::new(id)).await?;
//! ```

mod handle;
mod manager;
mod messages;
mod worker_actor;

pub use handle::{JobManagerHandle, start_job_manager};
pub use manager::{JobManager, JobManagerArgs, JobManagerState};
pub use messages::{AddOutcome, ManagerError, ManagerMessage, WorkerMessage};
pub use worker_actor::{WorkerActor, WorkerArgs};

/// Re-export ractor types for convenience.
pub use ractor::{Actor, ActorRef, RpcReplyPort, concurrency};
