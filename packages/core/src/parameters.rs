//! Scheduling parameters declared by a job.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::requirement::{NetworkOrServiceRequirement, NetworkRequirement};

/// Default retry budget for jobs that don't declare one.
pub const DEFAULT_RETRY_COUNT: u32 = 100;

/// Parameters controlling how a job is queued, deduplicated and retried.
///
/// Persisted alongside the job state so a reloaded job keeps the budget and
/// requirements it was created with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct JobParameters {
    /// Jobs sharing a group id run strictly one at a time, in FIFO order.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group_id: Option<String>,
    /// Drop this job on add if another job of the same group is queued.
    pub ignore_duplicates: bool,
    /// Names of the requirements gating this job, resolved via the registry.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub requirements: Vec<String>,
    /// Number of retries after the first run.
    pub retry_count: u32,
    /// Keep retrying while the job is younger than this, regardless of count.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_duration_ms: Option<u64>,
    /// Whether the job is written to the queue store.
    pub persistent: bool,
}

impl Default for JobParameters {
    fn default() -> Self {
        Self {
            group_id: None,
            ignore_duplicates: false,
            requirements: Vec::new(),
            retry_count: DEFAULT_RETRY_COUNT,
            retry_duration_ms: None,
            persistent: true,
        }
    }
}

impl JobParameters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the group id for this job.
    pub fn with_group_id(mut self, group_id: impl Into<String>) -> Self {
        self.group_id = Some(group_id.into());
        self
    }

    /// Drop the job on add when its group already has a queued job.
    pub fn with_duplicates_ignored(mut self, ignored: bool) -> Self {
        self.ignore_duplicates = ignored;
        self
    }

    /// Gate the job on a registered requirement.
    pub fn with_requirement(mut self, name: impl Into<String>) -> Self {
        let name = name.into();
        if !self.requirements.contains(&name) {
            self.requirements.push(name);
        }
        self
    }

    /// Gate the job on network connectivity.
    pub fn with_network_requirement(self) -> Self {
        self.with_requirement(NetworkRequirement::NAME)
    }

    /// Gate the job on network or push-service reachability.
    pub fn with_network_or_service_requirement(self) -> Self {
        self.with_requirement(NetworkOrServiceRequirement::NAME)
    }

    /// Set the number of retries.
    pub fn with_retry_count(mut self, retry_count: u32) -> Self {
        self.retry_count = retry_count;
        self
    }

    /// Keep retrying for at least this long after creation.
    pub fn with_retry_duration(mut self, duration: Duration) -> Self {
        self.retry_duration_ms = Some(duration.as_millis().min(u64::MAX as u128) as u64);
        self
    }

    /// Control whether the job survives a restart.
    pub fn with_persistence(mut self, persistent: bool) -> Self {
        self.persistent = persistent;
        self
    }

    pub fn retry_duration(&self) -> Option<Duration> {
        self.retry_duration_ms.map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder() {
        let params = JobParameters::new()
            .with_group_id("fcm-refresh")
            .with_duplicates_ignored(true)
            .with_network_requirement()
            .with_network_requirement()
            .with_retry_count(1)
            .with_retry_duration(Duration::from_secs(86_400));

        assert_eq!(params.group_id.as_deref(), Some("fcm-refresh"));
        assert!(params.ignore_duplicates);
        assert_eq!(params.requirements, vec![NetworkRequirement::NAME.to_string()]);
        assert_eq!(params.retry_count, 1);
        assert_eq!(params.retry_duration(), Some(Duration::from_secs(86_400)));
        assert!(params.persistent);
    }

    #[test]
    fn test_missing_fields_use_defaults() {
        let params: JobParameters = serde_json::from_str(r#"{"retry_count": 3}"#).unwrap();
        assert_eq!(params.retry_count, 3);
        assert!(params.persistent);
        assert!(params.requirements.is_empty());
    }
}
