//! Row-level access to the queue table.

use std::future::Future;
use std::pin::Pin;

use parking_lot::Mutex;
use queue_core::JobId;
use serde::{Deserialize, Serialize};
use surrealdb::sql::Thing;
use ulid::Generator;

use crate::schema::{QUEUE_TABLE, init_schema};
use crate::{Database, DbConfig, DbError, connect};

/// Future returned by queue table operations.
pub type TableFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, DbError>> + Send + 'a>>;

/// Minimal structured-store surface the queue needs.
///
/// Every operation is a single statement, so each one either happens
/// completely or not at all.
pub trait QueueTable: Send + Sync + 'static {
    /// Insert a serialized job and return the new record's identity.
    fn insert(&self, item: String) -> TableFuture<'_, JobId>;

    /// Read every record in insertion order.
    fn select_all_ordered(&self) -> TableFuture<'_, Vec<(JobId, String)>>;

    /// Delete a record. Deleting a missing record is not an error.
    fn delete(&self, id: JobId) -> TableFuture<'_, ()>;
}

#[derive(Debug, Serialize, Deserialize)]
struct QueueRow {
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<Thing>,
    key: String,
    item: String,
}

/// SurrealDB-backed queue table.
pub struct SurrealQueueTable {
    db: Database,
    ids: Mutex<Generator>,
}

impl SurrealQueueTable {
    /// Connect with the given configuration and prepare the schema.
    pub async fn open(config: &DbConfig) -> Result<Self, DbError> {
        let db = connect(config).await?;
        Self::new(db).await
    }

    /// Use an existing connection.
    pub async fn new(db: Database) -> Result<Self, DbError> {
        init_schema(&db).await?;
        Ok(Self {
            db,
            ids: Mutex::new(Generator::new()),
        })
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    fn next_id(&self) -> Result<JobId, DbError> {
        self.ids
            .lock()
            .generate()
            .map(JobId)
            .map_err(|e| DbError::Query(format!("Failed to generate record id: {}", e)))
    }

    async fn insert_row(&self, item: String) -> Result<JobId, DbError> {
        let id = self.next_id()?;
        let key = id.to_string();

        let record: Option<QueueRow> = self
            .db
            .create((QUEUE_TABLE, key.clone()))
            .content(QueueRow {
                id: None,
                key,
                item,
            })
            .await?;

        record
            .map(|_| id)
            .ok_or_else(|| DbError::Query("Failed to insert queue record".into()))
    }

    async fn select_rows(&self) -> Result<Vec<(JobId, String)>, DbError> {
        let mut response = self
            .db
            .query("SELECT * FROM type::table($table) ORDER BY key ASC")
            .bind(("table", QUEUE_TABLE))
            .await?;
        let rows: Vec<QueueRow> = response.take(0)?;

        rows.into_iter()
            .map(|row| {
                JobId::parse(&row.key)
                    .map(|id| (id, row.item))
                    .map_err(|e| DbError::Query(format!("Invalid queue key {}: {}", row.key, e)))
            })
            .collect()
    }

    async fn delete_row(&self, id: JobId) -> Result<(), DbError> {
        let _: Option<QueueRow> = self.db.delete((QUEUE_TABLE, id.to_string())).await?;
        Ok(())
    }
}

impl QueueTable for SurrealQueueTable {
    fn insert(&self, item: String) -> TableFuture<'_, JobId> {
        Box::pin(self.insert_row(item))
    }

    fn select_all_ordered(&self) -> TableFuture<'_, Vec<(JobId, String)>> {
        Box::pin(self.select_rows())
    }

    fn delete(&self, id: JobId) -> TableFuture<'_, ()> {
        Box::pin(self.delete_row(id))
    }
}
