use std::sync::Arc;

use queue_core::{
    ContextDependent, DependencyInjector, InjectError, Job, JobContext, JobError, JobParameters,
    JobRegistry, NetworkState,
};
use serde::{Deserialize, Serialize};

use db::{Database, DbConfig, DbError, PersistentStorage, SurrealQueueTable};

pub async fn memory_db() -> Result<Database, DbError> {
    let config = DbConfig::memory().with_database(ulid::Ulid::new().to_string());
    db::connect(&config).await
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NoteState {
    pub text: String,
}

/// Job that needs the network and a shared outbox.
pub struct SendNote {
    pub text: String,
    pub outbox: Option<Arc<Outbox>>,
}

#[derive(Debug, Default)]
pub struct Outbox {
    pub sent: parking_lot::Mutex<Vec<String>>,
}

impl SendNote {
    pub fn new(text: &str) -> Self {
        Self {
            text: text.to_string(),
            outbox: None,
        }
    }
}

impl Job for SendNote {
    type State = NoteState;
    const JOB_TYPE: &'static str = "send_note";

    fn from_state(state: NoteState) -> Self {
        Self {
            text: state.text,
            outbox: None,
        }
    }

    fn to_state(&self) -> NoteState {
        NoteState {
            text: self.text.clone(),
        }
    }

    fn parameters(&self) -> JobParameters {
        JobParameters::new()
            .with_group_id("notes")
            .with_network_requirement()
    }

    async fn run(&self) -> Result<(), JobError> {
        let outbox = self
            .outbox
            .as_ref()
            .ok_or_else(|| JobError::permanent("outbox not injected"))?;
        outbox.sent.lock().push(self.text.clone());
        Ok(())
    }

    fn context_dependent(&mut self) -> Option<&mut dyn ContextDependent> {
        Some(self)
    }
}

impl ContextDependent for SendNote {
    fn set_context(&mut self, context: &JobContext) -> Result<(), InjectError> {
        self.outbox = Some(context.require::<Outbox>()?);
        Ok(())
    }
}

pub fn registry() -> Arc<JobRegistry> {
    let mut registry = JobRegistry::with_builtin_requirements();
    registry.register::<SendNote>();
    Arc::new(registry)
}

pub fn context(network: Arc<NetworkState>, outbox: Arc<Outbox>) -> JobContext {
    JobContext::new().with(network).with(outbox)
}

pub async fn storage(db: Database, context: JobContext) -> Result<PersistentStorage, DbError> {
    let table = SurrealQueueTable::new(db).await?;
    Ok(PersistentStorage::new(
        Arc::new(table),
        registry(),
        DependencyInjector::new(context),
    ))
}
