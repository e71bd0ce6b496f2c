//! Database schema definitions using SurrealQL.

use crate::{Database, DbError};

/// Name of the table holding queued jobs.
pub const QUEUE_TABLE: &str = "job_queue";

/// Initialize the database schema.
pub async fn init_schema(db: &Database) -> Result<(), DbError> {
    tracing::info!("Initializing database schema...");

    db.query(QUEUE_SCHEMA).await?.check()?;

    tracing::info!("Database schema initialized");

    Ok(())
}

/// Queue table schema.
const QUEUE_SCHEMA: &str = r#"
-- One row per persisted job; key is a monotonic ULID defining FIFO order
DEFINE TABLE IF NOT EXISTS job_queue SCHEMAFULL;

DEFINE FIELD IF NOT EXISTS key ON job_queue TYPE string;
DEFINE FIELD IF NOT EXISTS item ON job_queue TYPE string;

DEFINE INDEX IF NOT EXISTS job_queue_key ON job_queue FIELDS key UNIQUE;
"#;
