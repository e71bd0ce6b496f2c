//! Durable queue of jobs on top of a [`QueueTable`].

use std::sync::Arc;

use queue_core::{DecodeError, DependencyInjector, JobId, JobRegistry, QueuedJob};
use tracing::{debug, info, warn};

use crate::serializer::{JobSerializer, JsonJobSerializer};
use crate::table::QueueTable;
use crate::DbError;

/// Stores, reloads and removes queued jobs.
///
/// Loaded jobs are decoded through the [`JobRegistry`] and wired by the
/// [`DependencyInjector`] before they are handed out.
pub struct PersistentStorage {
    table: Arc<dyn QueueTable>,
    serializer: Arc<dyn JobSerializer>,
    registry: Arc<JobRegistry>,
    injector: DependencyInjector,
}

impl PersistentStorage {
    pub fn new(
        table: Arc<dyn QueueTable>,
        registry: Arc<JobRegistry>,
        injector: DependencyInjector,
    ) -> Self {
        Self {
            table,
            serializer: Arc::new(JsonJobSerializer),
            registry,
            injector,
        }
    }

    /// Replace the default JSON serializer.
    pub fn with_serializer(mut self, serializer: Arc<dyn JobSerializer>) -> Self {
        self.serializer = serializer;
        self
    }

    pub fn registry(&self) -> &JobRegistry {
        &self.registry
    }

    pub fn injector(&self) -> &DependencyInjector {
        &self.injector
    }

    /// Persist a job and return its store identity.
    pub async fn store(&self, job: &QueuedJob) -> Result<JobId, DbError> {
        let persisted = job
            .to_persisted()
            .map_err(|e| DbError::Serialization(e.to_string()))?;
        let item = self.serializer.serialize(&persisted)?;
        let id = self.table.insert(item).await?;
        debug!("Stored {} job as {}", job.job_type(), id);
        Ok(id)
    }

    /// Load every stored job in insertion order.
    ///
    /// Records that can no longer be decoded are deleted. A job whose
    /// collaborators are missing from the context fails the whole load.
    pub async fn load_all(&self) -> Result<Vec<QueuedJob>, DbError> {
        let rows = self.table.select_all_ordered().await?;
        let mut jobs = Vec::with_capacity(rows.len());

        for (id, item) in rows {
            let mut job = match self.decode(id, &item) {
                Ok(job) => job,
                Err(e) => {
                    warn!("Dropping unreadable queue record {}: {}", id, e);
                    if let Err(e) = self.table.delete(id).await {
                        warn!("Failed to delete queue record {}: {}", id, e);
                    }
                    continue;
                }
            };

            self.injector.inject(&mut job)?;
            jobs.push(job);
        }

        info!("Loaded {} jobs from the queue store", jobs.len());
        Ok(jobs)
    }

    /// Remove a job. Removing an unknown id succeeds.
    pub async fn remove(&self, id: JobId) -> Result<(), DbError> {
        self.table.delete(id).await?;
        debug!("Removed job {} from the queue store", id);
        Ok(())
    }

    fn decode(&self, id: JobId, item: &str) -> Result<QueuedJob, DecodeError> {
        let persisted = self.serializer.deserialize(item)?;
        self.registry.restore(id, persisted)
    }
}
