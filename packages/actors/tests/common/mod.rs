#![allow(dead_code)]

use std::collections::HashMap;
use std::error::Error;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use queue_core::{
    ContextDependent, DependencyInjector, InjectError, Job, JobContext, JobError, JobParameters,
    JobRegistry, ManagerConfig, ManagerStats,
};
use serde::{Deserialize, Serialize};

use actors::JobManagerHandle;
use db::{Database, DbConfig, DbError, PersistentStorage, SurrealQueueTable};

/// Shared recorder the test jobs report into.
#[derive(Debug, Default)]
pub struct Probe {
    runs: Mutex<HashMap<String, u32>>,
    log: Mutex<Vec<String>>,
    canceled: Mutex<Vec<String>>,
}

impl Probe {
    pub fn runs(&self, name: &str) -> u32 {
        self.runs.lock().get(name).copied().unwrap_or(0)
    }

    pub fn log(&self) -> Vec<String> {
        self.log.lock().clone()
    }

    pub fn canceled(&self) -> Vec<String> {
        self.canceled.lock().clone()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Failure {
    #[default]
    Transient,
    Permanent,
    RequirementNotMet,
}

/// Serializable description of what a [`Task`] does.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskSpec {
    pub name: String,
    pub group: Option<String>,
    pub retry_count: u32,
    /// Number of initial runs that fail.
    pub failures: u32,
    pub failure: Failure,
    pub needs_network: bool,
    pub ignore_duplicates: bool,
    pub transient_only: bool,
    pub sleep_ms: u64,
    pub cancel_sleep_ms: u64,
    /// Number of initial runs that panic.
    pub panics: u32,
}

impl TaskSpec {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Default::default()
        }
    }

    pub fn in_group(mut self, group: &str) -> Self {
        self.group = Some(group.to_string());
        self
    }

    pub fn retries(mut self, retry_count: u32) -> Self {
        self.retry_count = retry_count;
        self
    }

    pub fn failing(mut self, failures: u32, failure: Failure) -> Self {
        self.failures = failures;
        self.failure = failure;
        self
    }

    pub fn needing_network(mut self) -> Self {
        self.needs_network = true;
        self
    }

    pub fn ignoring_duplicates(mut self) -> Self {
        self.ignore_duplicates = true;
        self
    }

    pub fn in_memory_only(mut self) -> Self {
        self.transient_only = true;
        self
    }

    pub fn sleeping(mut self, sleep_ms: u64) -> Self {
        self.sleep_ms = sleep_ms;
        self
    }

    pub fn slow_to_cancel(mut self, cancel_sleep_ms: u64) -> Self {
        self.cancel_sleep_ms = cancel_sleep_ms;
        self
    }

    pub fn panicking(mut self, panics: u32) -> Self {
        self.panics = panics;
        self
    }
}

pub struct Task {
    spec: TaskSpec,
    probe: Option<Arc<Probe>>,
}

impl Task {
    pub fn new(spec: TaskSpec) -> Self {
        Self { spec, probe: None }
    }
}

impl Job for Task {
    type State = TaskSpec;
    const JOB_TYPE: &'static str = "test_task";

    fn from_state(state: TaskSpec) -> Self {
        Self::new(state)
    }

    fn to_state(&self) -> TaskSpec {
        self.spec.clone()
    }

    fn parameters(&self) -> JobParameters {
        let mut parameters = JobParameters::new()
            .with_retry_count(self.spec.retry_count)
            .with_duplicates_ignored(self.spec.ignore_duplicates)
            .with_persistence(!self.spec.transient_only);
        if let Some(group) = &self.spec.group {
            parameters = parameters.with_group_id(group.clone());
        }
        if self.spec.needs_network {
            parameters = parameters.with_network_requirement();
        }
        parameters
    }

    async fn run(&self) -> Result<(), JobError> {
        let probe = self
            .probe
            .as_ref()
            .ok_or_else(|| JobError::permanent("probe not injected"))?;
        let name = &self.spec.name;

        let run = {
            let mut runs = probe.runs.lock();
            let count = runs.entry(name.clone()).or_default();
            *count += 1;
            *count
        };
        probe.log.lock().push(format!("start:{}", name));
        if run <= self.spec.panics {
            panic!("{} crashed on run {}", name, run);
        }

        if self.spec.sleep_ms > 0 {
            tokio::time::sleep(Duration::from_millis(self.spec.sleep_ms)).await;
        }
        probe.log.lock().push(format!("end:{}", name));

        if run <= self.spec.failures {
            let reason = format!("{} run {} failed", name, run);
            return Err(match self.spec.failure {
                Failure::Transient => JobError::transient(reason),
                Failure::Permanent => JobError::permanent(reason),
                Failure::RequirementNotMet => JobError::requirement_not_met(reason),
            });
        }
        Ok(())
    }

    async fn on_canceled(&self) {
        if self.spec.cancel_sleep_ms > 0 {
            tokio::time::sleep(Duration::from_millis(self.spec.cancel_sleep_ms)).await;
        }
        if let Some(probe) = &self.probe {
            probe.canceled.lock().push(self.spec.name.clone());
        }
    }

    fn context_dependent(&mut self) -> Option<&mut dyn ContextDependent> {
        Some(self)
    }
}

impl ContextDependent for Task {
    fn set_context(&mut self, context: &JobContext) -> Result<(), InjectError> {
        self.probe = Some(context.require::<Probe>()?);
        Ok(())
    }
}

pub fn config() -> ManagerConfig {
    ManagerConfig::default()
        .with_concurrency(2)
        .with_poll_interval(Duration::from_millis(10))
        .with_backoff(Duration::from_millis(1), Duration::from_millis(5))
}

pub async fn memory_db() -> Result<Database, DbError> {
    let config = DbConfig::memory().with_database(ulid::Ulid::new().to_string());
    db::connect(&config).await
}

pub async fn storage(db: Database, context: JobContext) -> Result<Arc<PersistentStorage>, DbError> {
    let mut registry = JobRegistry::with_builtin_requirements();
    registry.register::<Task>();
    let table = SurrealQueueTable::new(db).await?;
    Ok(Arc::new(PersistentStorage::new(
        Arc::new(table),
        Arc::new(registry),
        DependencyInjector::new(context),
    )))
}

/// Poll the manager's stats until `done` holds.
pub async fn wait_for_stats<F>(handle: &JobManagerHandle, done: F) -> Result<ManagerStats, Box<dyn Error>>
where
    F: Fn(&ManagerStats) -> bool,
{
    for _ in 0..500 {
        let stats = handle.stats().await?;
        if done(&stats) {
            return Ok(stats);
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    Err(format!("timed out waiting for manager, last stats {:?}", handle.stats().await?).into())
}

/// Poll `condition` until it holds.
pub async fn eventually<F>(condition: F) -> Result<(), Box<dyn Error>>
where
    F: Fn() -> bool,
{
    for _ in 0..500 {
        if condition() {
            return Ok(());
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    Err("condition never held".into())
}
