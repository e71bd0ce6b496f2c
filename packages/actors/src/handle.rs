//! Client-side handle to a running job manager.

use std::sync::Arc;

use db::PersistentStorage;
use queue_core::{DynJob, Job, JobEvent, JobSnapshot, ManagerConfig, ManagerStats};
use ractor::{Actor, ActorRef};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::manager::{JobManager, JobManagerArgs};
use crate::messages::{AddOutcome, ManagerError, ManagerMessage};

/// Cloneable handle for adding jobs and observing the manager.
#[derive(Clone)]
pub struct JobManagerHandle {
    actor: ActorRef<ManagerMessage>,
    event_tx: broadcast::Sender<JobEvent>,
}

impl JobManagerHandle {
    /// Queue a job.
    ///
    /// An error means the job was not queued; with `Ok(AddOutcome::Queued)`
    /// a persistent job is already in the queue store.
    pub async fn add<J: Job>(&self, job: J) -> Result<AddOutcome, ManagerError> {
        self.add_boxed(Box::new(job)).await
    }

    pub async fn add_boxed(&self, job: Box<dyn DynJob>) -> Result<AddOutcome, ManagerError> {
        let (tx, rx) = ractor::concurrency::oneshot();
        self.actor
            .send_message(ManagerMessage::Add {
                job,
                reply: tx.into(),
            })
            .map_err(|e| ManagerError::Unavailable(e.to_string()))?;
        rx.await
            .map_err(|_| ManagerError::Unavailable("no reply to add".into()))?
    }

    /// Ask workers to re-check pending jobs right away.
    pub fn wake(&self) {
        let _ = self.actor.send_message(ManagerMessage::Wake);
    }

    /// Wake the manager every time `signals` yields, until it closes.
    pub fn wake_on<T>(&self, mut signals: broadcast::Receiver<T>) -> JoinHandle<()>
    where
        T: Clone + Send + 'static,
    {
        let actor = self.actor.clone();
        tokio::spawn(async move {
            loop {
                match signals.recv().await {
                    Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {
                        if actor.send_message(ManagerMessage::Wake).is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }

    pub async fn stats(&self) -> Result<ManagerStats, ManagerError> {
        let (tx, rx) = ractor::concurrency::oneshot();
        self.actor
            .send_message(ManagerMessage::GetStats { reply: tx.into() })
            .map_err(|e| ManagerError::Unavailable(e.to_string()))?;
        rx.await
            .map_err(|_| ManagerError::Unavailable("no reply to stats".into()))
    }

    /// Snapshot of pending and running jobs.
    pub async fn jobs(&self) -> Result<Vec<JobSnapshot>, ManagerError> {
        let (tx, rx) = ractor::concurrency::oneshot();
        self.actor
            .send_message(ManagerMessage::ListJobs { reply: tx.into() })
            .map_err(|e| ManagerError::Unavailable(e.to_string()))?;
        rx.await
            .map_err(|_| ManagerError::Unavailable("no reply to list".into()))
    }

    /// Subscribe to job lifecycle events.
    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.event_tx.subscribe()
    }

    pub fn shutdown(&self) {
        let _ = self.actor.send_message(ManagerMessage::Shutdown);
    }

    pub fn actor(&self) -> &ActorRef<ManagerMessage> {
        &self.actor
    }
}

/// Start a job manager over `storage`.
///
/// Stored jobs are loaded before any worker starts. Startup fails if a
/// stored job cannot be wired with its collaborators.
pub async fn start_job_manager(
    config: ManagerConfig,
    storage: Arc<PersistentStorage>,
) -> Result<(JobManagerHandle, JoinHandle<()>), ManagerError> {
    let (event_tx, _) = broadcast::channel(1024);
    let args = JobManagerArgs {
        config,
        storage,
        event_tx: event_tx.clone(),
    };

    let (actor, handle) = Actor::spawn(None, JobManager, args)
        .await
        .map_err(|e| ManagerError::Spawn(e.to_string()))?;

    Ok((JobManagerHandle { actor, event_tx }, handle))
}
