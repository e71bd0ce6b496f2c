//! Runtime collaborators and their injection into jobs and requirements.

use std::any::{Any, TypeId, type_name};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::error::InjectError;
use crate::job::QueuedJob;

/// Type-keyed map of the services jobs may need at runtime.
///
/// Nothing in here is ever serialized; it is attached to jobs after they are
/// constructed or loaded from the queue store.
#[derive(Clone, Default)]
pub struct JobContext {
    services: HashMap<TypeId, Arc<dyn Any + Send + Sync>>,
}

impl JobContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a service, replacing any previous one of the same type.
    pub fn with<T: Any + Send + Sync>(mut self, service: Arc<T>) -> Self {
        self.insert(service);
        self
    }

    pub fn insert<T: Any + Send + Sync>(&mut self, service: Arc<T>) {
        self.services.insert(TypeId::of::<T>(), service);
    }

    pub fn get<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        self.services
            .get(&TypeId::of::<T>())
            .cloned()
            .and_then(|service| service.downcast::<T>().ok())
    }

    /// Get a service that must be present.
    pub fn require<T: Any + Send + Sync>(&self) -> Result<Arc<T>, InjectError> {
        self.get::<T>()
            .ok_or(InjectError::MissingCollaborator(type_name::<T>()))
    }

    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }
}

impl fmt::Debug for JobContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobContext")
            .field("services", &self.services.len())
            .finish()
    }
}

/// Capability of jobs and requirements that need late-bound collaborators.
pub trait ContextDependent {
    /// Bind collaborators from the context. Must be idempotent.
    fn set_context(&mut self, context: &JobContext) -> Result<(), InjectError>;
}

/// Wires a job and every requirement it declares before the job is exposed
/// to the scheduler.
#[derive(Debug, Clone, Default)]
pub struct DependencyInjector {
    context: Arc<JobContext>,
}

impl DependencyInjector {
    pub fn new(context: JobContext) -> Self {
        Self {
            context: Arc::new(context),
        }
    }

    pub fn context(&self) -> &JobContext {
        &self.context
    }

    pub fn inject(&self, job: &mut QueuedJob) -> Result<(), InjectError> {
        if let Some(dependent) = job.job_mut().context_dependent() {
            dependent.set_context(&self.context)?;
        }

        for requirement in job.requirements_mut() {
            if let Some(dependent) = requirement.context_dependent() {
                dependent.set_context(&self.context)?;
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Sender {
        endpoint: String,
    }

    #[test]
    fn test_context_lookup() {
        let context = JobContext::new().with(Arc::new(Sender {
            endpoint: "https://chat.example".to_string(),
        }));

        let sender = context.require::<Sender>().map(|s| s.endpoint.clone());
        assert_eq!(sender.as_deref(), Ok("https://chat.example"));
        assert!(context.get::<String>().is_none());
        assert!(matches!(
            context.require::<String>(),
            Err(InjectError::MissingCollaborator(_))
        ));
    }
}
