//! Error taxonomy shared by jobs, the injector and the job registry.

use thiserror::Error;

/// Errors a job can return from its run.
///
/// The variant decides how the scheduler reacts: transient failures are
/// retried within the job's budget, unmet requirements defer the job without
/// touching the budget, and permanent failures cancel it immediately.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum JobError {
    /// Network unreachable, timeout and similar conditions.
    #[error("transient failure: {0}")]
    Transient(String),
    /// A precondition (unlocked key, connectivity) is not satisfied yet.
    #[error("requirement not met: {0}")]
    RequirementNotMet(String),
    /// The job can never succeed.
    #[error("permanent failure: {0}")]
    Permanent(String),
}

impl JobError {
    pub fn transient(reason: impl Into<String>) -> Self {
        Self::Transient(reason.into())
    }

    pub fn requirement_not_met(reason: impl Into<String>) -> Self {
        Self::RequirementNotMet(reason.into())
    }

    pub fn permanent(reason: impl Into<String>) -> Self {
        Self::Permanent(reason.into())
    }

    /// Check if this error is a transient execution failure.
    pub fn is_transient(&self) -> bool {
        matches!(self, JobError::Transient(_))
    }

    /// Check if this error only signals an unmet precondition.
    pub fn is_requirement_not_met(&self) -> bool {
        matches!(self, JobError::RequirementNotMet(_))
    }
}

/// Dependency injection failures.
///
/// These indicate a wiring mistake in the embedding application, never a
/// runtime condition.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InjectError {
    #[error("missing collaborator in job context: {0}")]
    MissingCollaborator(&'static str),
    #[error("no requirement registered under name: {0}")]
    UnknownRequirement(String),
}

/// Failures turning a persisted record back into a runnable job.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("malformed job record: {0}")]
    Format(serde_json::Error),
    #[error("no job registered for type: {0}")]
    UnknownJobType(String),
    #[error("invalid state for job type {job_type}: {source}")]
    State {
        job_type: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("no requirement registered under name: {0}")]
    UnknownRequirement(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds() {
        assert!(JobError::transient("offline").is_transient());
        assert!(!JobError::transient("offline").is_requirement_not_met());
        assert!(JobError::requirement_not_met("locked").is_requirement_not_met());
        assert!(!JobError::permanent("bad input").is_transient());
        assert_eq!(
            JobError::permanent("bad input").to_string(),
            "permanent failure: bad input"
        );
    }
}
