//! Worker actor for executing jobs.

use std::time::{Duration, Instant};

use queue_core::{JobError, JobId};
use ractor::{Actor, ActorProcessingErr, ActorRef};

use crate::messages::{ManagerMessage, WorkerMessage};

/// State for the worker actor.
pub struct WorkerActorState {
    /// Unique worker ID.
    pub worker_id: String,
    /// Job currently claimed by this worker.
    pub current_job: Option<JobId>,
    /// Manager actor reference.
    pub manager: ActorRef<ManagerMessage>,
    /// Optional per-run timeout.
    pub job_timeout: Option<Duration>,
}

impl WorkerActorState {
    /// Create a new worker actor state.
    pub fn new(worker_id: impl Into<String>, manager: ActorRef<ManagerMessage>) -> Self {
        Self {
            worker_id: worker_id.into(),
            current_job: None,
            manager,
            job_timeout: None,
        }
    }

    pub fn with_job_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.job_timeout = timeout;
        self
    }

    /// Check if the worker is idle.
    pub fn is_idle(&self) -> bool {
        self.current_job.is_none()
    }
}

/// Worker actor arguments.
pub struct WorkerArgs {
    pub worker_id: String,
    pub manager: ActorRef<ManagerMessage>,
    pub poll_interval: Duration,
    pub job_timeout: Option<Duration>,
}

/// Worker actor that executes jobs.
pub struct WorkerActor;

impl Actor for WorkerActor {
    type Msg = WorkerMessage;
    type State = WorkerActorState;
    type Arguments = WorkerArgs;

    async fn pre_start(
        &self,
        myself: ActorRef<Self::Msg>,
        args: Self::Arguments,
    ) -> Result<Self::State, ActorProcessingErr> {
        tracing::info!("Starting worker: {}", args.worker_id);

        let state = WorkerActorState::new(args.worker_id, args.manager)
            .with_job_timeout(args.job_timeout);

        // Start the work loop
        let myself_clone = myself.clone();
        let poll_interval = args.poll_interval;
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(poll_interval).await;
                if myself_clone.send_message(WorkerMessage::Heartbeat).is_err() {
                    break;
                }
            }
        });

        Ok(state)
    }

    async fn handle(
        &self,
        myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            WorkerMessage::ProcessJob { job } => {
                state.current_job = Some(job.id);
                tracing::debug!(
                    "Worker {} running job {} ({}), run {}",
                    state.worker_id,
                    job.id,
                    job.job_type(),
                    job.run_count
                );

                let started = Instant::now();
                let outcome = match state.job_timeout {
                    Some(timeout) => tokio::time::timeout(timeout, job.job().run())
                        .await
                        .unwrap_or_else(|_| Err(JobError::transient("job timed out"))),
                    None => job.job().run().await,
                };
                let duration_ms = started.elapsed().as_millis() as u64;

                state.current_job = None;
                state.manager.send_message(ManagerMessage::JobFinished {
                    job,
                    worker_id: state.worker_id.clone(),
                    outcome,
                    duration_ms,
                })?;
            }

            WorkerMessage::Shutdown => {
                tracing::info!("Shutting down worker: {}", state.worker_id);
                myself.stop(None);
                return Ok(());
            }

            WorkerMessage::Heartbeat => {
                // If idle, request a job. The manager always answers, so the
                // call waits as long as it takes.
                if state.is_idle() {
                    let result = ractor::rpc::call(
                        &state.manager,
                        |reply| ManagerMessage::RequestJob {
                            worker_id: state.worker_id.clone(),
                            reply,
                        },
                        None,
                    )
                    .await;
                    if let Ok(ractor::rpc::CallResult::Success(Some(job))) = result {
                        // Claim now so queued heartbeats don't ask for more.
                        state.current_job = Some(job.id);
                        myself.send_message(WorkerMessage::ProcessJob { job })?;
                    }
                }
            }
        }

        Ok(())
    }
}
