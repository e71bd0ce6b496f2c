//! Job manager actor: owns pending jobs, hands them to workers and applies
//! the retry policy to finished runs.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use db::PersistentStorage;
use queue_core::{
    DynJob, JobError, JobEvent, JobId, JobSnapshot, JobState, ManagerConfig, ManagerStats,
    QueuedJob,
};
use ractor::{
    Actor, ActorId, ActorProcessingErr, ActorRef, MessagingErr, RpcReplyPort, SupervisionEvent,
};
use tokio::sync::broadcast;

use crate::messages::{AddOutcome, ManagerError, ManagerMessage, WorkerMessage};
use crate::worker_actor::{WorkerActor, WorkerArgs};

/// Bookkeeping for a job handed to a worker.
struct RunningJob {
    seq: u64,
    job_type: &'static str,
    group_id: Option<String>,
    run_count: u32,
    worker_id: String,
}

/// State for the job manager actor.
pub struct JobManagerState {
    config: ManagerConfig,
    storage: Arc<PersistentStorage>,
    /// Pending jobs keyed by admission sequence, so iteration is FIFO.
    pending: BTreeMap<u64, QueuedJob>,
    running: HashMap<JobId, RunningJob>,
    /// Groups with a job currently on a worker.
    active_groups: HashSet<String>,
    workers: HashMap<ActorId, (String, ActorRef<WorkerMessage>)>,
    event_tx: broadcast::Sender<JobEvent>,
    stats: ManagerStats,
    next_seq: u64,
    worker_counter: u64,
}

impl JobManagerState {
    fn new(
        config: ManagerConfig,
        storage: Arc<PersistentStorage>,
        event_tx: broadcast::Sender<JobEvent>,
    ) -> Self {
        Self {
            config,
            storage,
            pending: BTreeMap::new(),
            running: HashMap::new(),
            active_groups: HashSet::new(),
            workers: HashMap::new(),
            event_tx,
            stats: ManagerStats::default(),
            next_seq: 0,
            worker_counter: 0,
        }
    }

    fn broadcast(&self, event: JobEvent) {
        tracing::debug!("{}", event.description());
        let _ = self.event_tx.send(event);
    }

    fn push_pending(&mut self, job: QueuedJob) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.pending.insert(seq, job);
    }

    /// Whether a job of `group_id` is pending or running.
    fn is_group_queued(&self, group_id: &str) -> bool {
        self.active_groups.contains(group_id)
            || self
                .pending
                .values()
                .any(|job| job.group_id() == Some(group_id))
    }

    /// Pick the oldest runnable job.
    ///
    /// A job is runnable when its backoff has elapsed, its requirements are
    /// present, no job of its group is running, and no older job of its
    /// group is still waiting.
    fn next_runnable(&self, now: Instant) -> Option<u64> {
        let mut blocked_groups: HashSet<&str> = HashSet::new();

        for (seq, job) in &self.pending {
            if let Some(group) = job.group_id()
                && (self.active_groups.contains(group) || blocked_groups.contains(group))
            {
                continue;
            }

            if job.is_backoff_elapsed(now) && job.is_requirements_met() {
                return Some(*seq);
            }

            if let Some(group) = job.group_id() {
                blocked_groups.insert(group);
            }
        }

        None
    }

    fn next_worker_id(&mut self) -> String {
        self.worker_counter += 1;
        format!("worker-{}", self.worker_counter)
    }

    fn snapshot_stats(&self) -> ManagerStats {
        ManagerStats {
            pending: self.pending.len() as u64,
            running: self.running.len() as u64,
            ..self.stats.clone()
        }
    }

    fn snapshots(&self) -> Vec<JobSnapshot> {
        let pending = self.pending.values().map(|job| JobSnapshot {
            id: job.id,
            job_type: job.job_type().to_string(),
            group_id: job.parameters.group_id.clone(),
            state: JobState::Pending,
            run_count: job.run_count,
        });
        let running = self.running.iter().map(|(id, job)| JobSnapshot {
            id: *id,
            job_type: job.job_type.to_string(),
            group_id: job.group_id.clone(),
            state: JobState::Running,
            run_count: job.run_count,
        });
        pending.chain(running).collect()
    }

    fn wake_workers(&self) {
        for (_, worker) in self.workers.values() {
            let _ = worker.send_message(WorkerMessage::Heartbeat);
        }
    }

    async fn forget(&self, job: &QueuedJob) {
        if !job.parameters.persistent {
            return;
        }
        if let Err(e) = self.storage.remove(job.id).await {
            tracing::warn!("Failed to remove job {} from the queue store: {}", job.id, e);
        }
    }

    async fn add(&mut self, job: Box<dyn DynJob>) -> Result<AddOutcome, ManagerError> {
        let mut queued = self.storage.registry().prepare(job)?;

        if queued.parameters.ignore_duplicates
            && let Some(group) = queued.group_id()
            && self.is_group_queued(group)
        {
            let group = group.to_string();
            self.stats.duplicates_dropped += 1;
            self.broadcast(JobEvent::DuplicateDropped {
                job_type: queued.job_type().to_string(),
                group_id: group,
                timestamp: Utc::now(),
            });
            return Ok(AddOutcome::Dropped);
        }

        if let Err(e) = self.storage.injector().inject(&mut queued) {
            tracing::error!("Rejecting {} job: {}", queued.job_type(), e);
            return Err(e.into());
        }

        if queued.parameters.persistent {
            queued.id = self.storage.store(&queued).await?;
        }

        queued.job().on_added();

        let id = queued.id;
        self.broadcast(JobEvent::JobAdded {
            job_id: id,
            job_type: queued.job_type().to_string(),
            timestamp: Utc::now(),
        });
        self.push_pending(queued);
        self.wake_workers();

        Ok(AddOutcome::Queued(id))
    }

    /// Answer a worker's job request.
    ///
    /// A job that cannot be delivered goes back to its place in the queue.
    fn hand_out(&mut self, worker_id: String, reply: RpcReplyPort<Option<Box<QueuedJob>>>) {
        if reply.is_closed() {
            tracing::debug!("{} stopped waiting for a job", worker_id);
            return;
        }

        let job = self.dispatch(worker_id);
        if let Err(MessagingErr::SendErr(Some(job))) = reply.send(job) {
            self.return_undelivered(*job);
        }
    }

    fn return_undelivered(&mut self, mut job: QueuedJob) {
        let Some(running) = self.running.remove(&job.id) else {
            return;
        };
        if let Some(group) = &running.group_id {
            self.active_groups.remove(group);
        }
        tracing::warn!(
            "Job {} could not be handed to {}; returning it to the queue",
            job.id,
            running.worker_id
        );
        job.run_count = job.run_count.saturating_sub(1);
        self.pending.insert(running.seq, job);
    }

    fn dispatch(&mut self, worker_id: String) -> Option<Box<QueuedJob>> {
        let seq = self.next_runnable(Instant::now())?;
        let mut job = self.pending.remove(&seq)?;
        job.run_count += 1;
        job.not_before = None;

        if let Some(group) = job.group_id() {
            self.active_groups.insert(group.to_string());
        }
        self.running.insert(
            job.id,
            RunningJob {
                seq,
                job_type: job.job_type(),
                group_id: job.parameters.group_id.clone(),
                run_count: job.run_count,
                worker_id: worker_id.clone(),
            },
        );

        self.broadcast(JobEvent::JobStarted {
            job_id: job.id,
            worker_id,
            run_count: job.run_count,
            timestamp: Utc::now(),
        });

        Some(Box::new(job))
    }

    async fn finish(&mut self, mut job: QueuedJob, outcome: Result<(), JobError>, duration_ms: u64) {
        let Some(running) = self.running.remove(&job.id) else {
            tracing::warn!("Finished job {} was not marked running", job.id);
            return;
        };
        if let Some(group) = &running.group_id {
            self.active_groups.remove(group);
        }

        match outcome {
            Ok(()) => {
                self.forget(&job).await;
                self.stats.completed += 1;
                self.broadcast(JobEvent::JobCompleted {
                    job_id: job.id,
                    duration_ms,
                    timestamp: Utc::now(),
                });
            }

            Err(error) if error.is_requirement_not_met() => {
                // Deferral does not consume the retry budget.
                job.run_count = job.run_count.saturating_sub(1);
                job.back_off(self.config.poll_interval);
                self.broadcast(JobEvent::JobDeferred {
                    job_id: job.id,
                    reason: error.to_string(),
                    timestamp: Utc::now(),
                });
                self.pending.insert(running.seq, job);
            }

            Err(error) => {
                if job.job().should_retry(&error) && job.has_retry_budget(Utc::now()) {
                    let backoff = self.config.backoff_for(job.run_count);
                    job.back_off(backoff);
                    self.broadcast(JobEvent::JobRetrying {
                        job_id: job.id,
                        error: error.to_string(),
                        run_count: job.run_count,
                        backoff_ms: backoff.as_millis() as u64,
                        timestamp: Utc::now(),
                    });
                    self.pending.insert(running.seq, job);
                } else {
                    tracing::info!(
                        "Job {} ({}) failed after {} runs: {}",
                        job.id,
                        job.job_type(),
                        job.run_count,
                        error
                    );
                    self.forget(&job).await;
                    self.stats.failed += 1;
                    self.broadcast(JobEvent::JobFailed {
                        job_id: job.id,
                        error: error.to_string(),
                        run_count: job.run_count,
                        timestamp: Utc::now(),
                    });

                    // Detached from the manager loop.
                    tokio::spawn(async move {
                        job.job().on_canceled().await;
                        tracing::debug!("Cancel hook for job {} finished", job.id);
                    });
                }
            }
        }
    }

    /// Release whatever a dead worker was holding.
    fn abandon_worker_jobs(&mut self, worker_id: &str) {
        let abandoned: Vec<JobId> = self
            .running
            .iter()
            .filter(|(_, job)| job.worker_id == worker_id)
            .map(|(id, _)| *id)
            .collect();

        for id in abandoned {
            if let Some(job) = self.running.remove(&id) {
                if let Some(group) = &job.group_id {
                    self.active_groups.remove(group);
                }
                tracing::error!(
                    "Job {} ({}) was lost with {}; it stays in the queue store until restart",
                    id,
                    job.job_type,
                    worker_id
                );
            }
        }
    }
}

async fn spawn_worker(
    myself: &ActorRef<ManagerMessage>,
    state: &mut JobManagerState,
) -> Result<(), ActorProcessingErr> {
    let worker_id = state.next_worker_id();
    let args = WorkerArgs {
        worker_id: worker_id.clone(),
        manager: myself.clone(),
        poll_interval: state.config.poll_interval,
        job_timeout: state.config.job_timeout,
    };

    let (worker, _handle) = Actor::spawn_linked(None, WorkerActor, args, myself.get_cell())
        .await
        .map_err(|e| ActorProcessingErr::from(format!("Failed to spawn worker: {}", e)))?;

    state
        .workers
        .insert(worker.get_id(), (worker_id, worker));
    Ok(())
}

/// Arguments for the job manager actor.
pub struct JobManagerArgs {
    pub config: ManagerConfig,
    pub storage: Arc<PersistentStorage>,
    pub event_tx: broadcast::Sender<JobEvent>,
}

/// Job manager actor.
pub struct JobManager;

impl Actor for JobManager {
    type Msg = ManagerMessage;
    type State = JobManagerState;
    type Arguments = JobManagerArgs;

    async fn pre_start(
        &self,
        _myself: ActorRef<Self::Msg>,
        args: Self::Arguments,
    ) -> Result<Self::State, ActorProcessingErr> {
        tracing::info!(
            "Starting job manager with {} workers",
            args.config.concurrency
        );

        let mut state = JobManagerState::new(args.config, args.storage, args.event_tx);

        let jobs = state.storage.load_all().await.map_err(|e| {
            tracing::error!("Refusing to start job manager: {}", e);
            ActorProcessingErr::from(e)
        })?;
        for job in jobs {
            state.push_pending(job);
        }

        Ok(state)
    }

    async fn post_start(
        &self,
        myself: ActorRef<Self::Msg>,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        for _ in 0..state.config.concurrency {
            spawn_worker(&myself, state).await?;
        }
        Ok(())
    }

    async fn handle(
        &self,
        myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            ManagerMessage::Add { job, reply } => {
                let result = state.add(job).await;
                let _ = reply.send(result);
            }

            ManagerMessage::RequestJob { worker_id, reply } => {
                state.hand_out(worker_id, reply);
            }

            ManagerMessage::JobFinished {
                job,
                worker_id,
                outcome,
                duration_ms,
            } => {
                tracing::debug!("Job {} returned by {}", job.id, worker_id);
                state.finish(*job, outcome, duration_ms).await;
                state.wake_workers();
            }

            ManagerMessage::Wake => {
                state.wake_workers();
            }

            ManagerMessage::GetStats { reply } => {
                let _ = reply.send(state.snapshot_stats());
            }

            ManagerMessage::ListJobs { reply } => {
                let _ = reply.send(state.snapshots());
            }

            ManagerMessage::Shutdown => {
                tracing::info!("Shutting down job manager");
                for (_, worker) in state.workers.values() {
                    let _ = worker.send_message(WorkerMessage::Shutdown);
                }
                myself.stop(None);
                return Ok(());
            }
        }

        Ok(())
    }

    async fn handle_supervisor_evt(
        &self,
        myself: ActorRef<Self::Msg>,
        message: SupervisionEvent,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            SupervisionEvent::ActorFailed(cell, error) => {
                if let Some((worker_id, _)) = state.workers.remove(&cell.get_id()) {
                    tracing::warn!("Worker {} failed: {}", worker_id, error);
                    state.abandon_worker_jobs(&worker_id);
                    spawn_worker(&myself, state).await?;
                }
            }
            SupervisionEvent::ActorTerminated(cell, _, reason) => {
                if let Some((worker_id, _)) = state.workers.remove(&cell.get_id()) {
                    tracing::debug!("Worker {} terminated: {:?}", worker_id, reason);
                }
            }
            _ => {}
        }
        Ok(())
    }
}
