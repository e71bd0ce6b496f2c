//! Conversion between persisted job envelopes and stored strings.

use queue_core::{DecodeError, PersistedJob};

use crate::DbError;

/// Encodes jobs for the queue table.
pub trait JobSerializer: Send + Sync + 'static {
    fn serialize(&self, job: &PersistedJob) -> Result<String, DbError>;

    fn deserialize(&self, item: &str) -> Result<PersistedJob, DecodeError>;
}

/// JSON encoding of [`PersistedJob`].
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonJobSerializer;

impl JobSerializer for JsonJobSerializer {
    fn serialize(&self, job: &PersistedJob) -> Result<String, DbError> {
        serde_json::to_string(job).map_err(|e| DbError::Serialization(e.to_string()))
    }

    fn deserialize(&self, item: &str) -> Result<PersistedJob, DecodeError> {
        serde_json::from_str(item).map_err(DecodeError::Format)
    }
}
