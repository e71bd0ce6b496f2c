//! Registry of job decoders and requirement factories.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use crate::error::{DecodeError, InjectError};
use crate::job::{DynJob, Job, JobId, PersistedJob, QueuedJob};
use crate::parameters::JobParameters;
use crate::requirement::{
    NetworkOrServiceRequirement, NetworkRequirement, Requirement, ServiceRequirement,
};

type JobDecoder = fn(serde_json::Value) -> Result<Box<dyn DynJob>, serde_json::Error>;

type RequirementFactory = Arc<dyn Fn() -> Box<dyn Requirement> + Send + Sync>;

fn decode_job<J: Job>(state: serde_json::Value) -> Result<Box<dyn DynJob>, serde_json::Error> {
    let state: J::State = serde_json::from_value(state)?;
    Ok(Box::new(J::from_state(state)))
}

/// Maps persisted job types and requirement names back to live objects.
#[derive(Default)]
pub struct JobRegistry {
    decoders: HashMap<&'static str, JobDecoder>,
    requirements: HashMap<String, RequirementFactory>,
}

impl JobRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry that knows the connectivity requirements.
    pub fn with_builtin_requirements() -> Self {
        let mut registry = Self::new();
        registry.register_requirement(NetworkRequirement::NAME, || {
            Box::new(NetworkRequirement::default())
        });
        registry.register_requirement(ServiceRequirement::NAME, || {
            Box::new(ServiceRequirement::default())
        });
        registry.register_requirement(NetworkOrServiceRequirement::NAME, || {
            Box::new(NetworkOrServiceRequirement::new())
        });
        registry
    }

    /// Register a job type so it can be restored from the queue store.
    pub fn register<J: Job>(&mut self) {
        if self.decoders.insert(J::JOB_TYPE, decode_job::<J>).is_some() {
            debug!("Job type {} registered again", J::JOB_TYPE);
        }
    }

    /// Register a requirement constructor under a persisted name.
    pub fn register_requirement<F>(&mut self, name: impl Into<String>, factory: F)
    where
        F: Fn() -> Box<dyn Requirement> + Send + Sync + 'static,
    {
        self.requirements.insert(name.into(), Arc::new(factory));
    }

    fn build_requirements(
        &self,
        parameters: &JobParameters,
    ) -> Result<Vec<Box<dyn Requirement>>, String> {
        parameters
            .requirements
            .iter()
            .map(|name| {
                self.requirements
                    .get(name)
                    .map(|factory| factory())
                    .ok_or_else(|| name.clone())
            })
            .collect()
    }

    /// Wrap a freshly created job for scheduling.
    pub fn prepare(&self, job: Box<dyn DynJob>) -> Result<QueuedJob, InjectError> {
        let parameters = job.parameters();
        let requirements = self
            .build_requirements(&parameters)
            .map_err(InjectError::UnknownRequirement)?;
        Ok(QueuedJob::new(job, parameters, requirements))
    }

    /// Rebuild a job read back from the queue store.
    pub fn restore(&self, id: JobId, persisted: PersistedJob) -> Result<QueuedJob, DecodeError> {
        let Some(decoder) = self.decoders.get(persisted.job_type.as_str()) else {
            debug!("No decoder for job {} of type {}", id, persisted.job_type);
            return Err(DecodeError::UnknownJobType(persisted.job_type));
        };

        let job = decoder(persisted.state).map_err(|source| DecodeError::State {
            job_type: persisted.job_type.clone(),
            source,
        })?;

        let requirements = self
            .build_requirements(&persisted.parameters)
            .map_err(|name| {
                debug!("Job {} declares unknown requirement {}", id, name);
                DecodeError::UnknownRequirement(name)
            })?;

        debug!("Restored job {} ({})", id, persisted.job_type);
        let mut queued = QueuedJob::new(job, persisted.parameters, requirements);
        queued.id = id;
        queued.created_at = persisted.created_at;
        queued.run_count = persisted.run_count;
        Ok(queued)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::JobError;
    use serde::{Deserialize, Serialize};

    #[derive(Serialize, Deserialize)]
    struct UploadState {
        attachment_id: u64,
    }

    struct Upload {
        attachment_id: u64,
    }

    impl Job for Upload {
        type State = UploadState;
        const JOB_TYPE: &'static str = "attachment_upload";

        fn from_state(state: UploadState) -> Self {
            Self {
                attachment_id: state.attachment_id,
            }
        }

        fn to_state(&self) -> UploadState {
            UploadState {
                attachment_id: self.attachment_id,
            }
        }

        fn parameters(&self) -> JobParameters {
            JobParameters::new().with_network_requirement()
        }

        async fn run(&self) -> Result<(), JobError> {
            Ok(())
        }
    }

    #[test]
    fn test_restore_registered_job() -> Result<(), Box<dyn std::error::Error>> {
        let mut registry = JobRegistry::with_builtin_requirements();
        registry.register::<Upload>();

        let fresh = registry.prepare(Box::new(Upload { attachment_id: 7 }))?;
        assert_eq!(fresh.requirements().len(), 1);

        let persisted = fresh.to_persisted()?;
        let id = JobId::new();
        let restored = registry.restore(id, persisted)?;
        assert_eq!(restored.id, id);
        assert_eq!(restored.job_type(), "attachment_upload");
        assert_eq!(restored.job().encode_state()?, serde_json::json!({"attachment_id": 7}));
        assert_eq!(restored.requirements()[0].name(), NetworkRequirement::NAME);
        Ok(())
    }

    #[test]
    fn test_unknown_job_type() {
        let registry = JobRegistry::new();
        let persisted = PersistedJob {
            job_type: "legacy_job".to_string(),
            state: serde_json::Value::Null,
            parameters: JobParameters::default(),
            created_at: chrono::Utc::now(),
            run_count: 0,
        };
        let result = registry.restore(JobId::new(), persisted);
        assert!(matches!(result, Err(DecodeError::UnknownJobType(t)) if t == "legacy_job"));
    }

    #[test]
    fn test_unknown_requirement_on_prepare() {
        let registry = JobRegistry::new();
        let result = registry.prepare(Box::new(Upload { attachment_id: 1 }));
        assert!(matches!(result, Err(InjectError::UnknownRequirement(_))));
    }
}
