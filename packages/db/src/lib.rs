//! SurrealDB persistence for the job queue.
//!
//! This crate provides the database connection, the queue table and the
//! [`PersistentStorage`] that turns stored rows back into runnable jobs.
//!
//! # Features
//!
//! - `memory` (default): Use in-memory storage for testing
//! - `rocksdb`: Use RocksDB for persistent file-based storage

mod connection;
mod schema;
mod serializer;
mod storage;
mod table;

pub use connection::{
    DATABASE_ENV, Database, DbConfig, DbError, ENDPOINT_ENV, NAMESPACE_ENV, connect,
};
pub use schema::{QUEUE_TABLE, init_schema};
pub use serializer::{JobSerializer, JsonJobSerializer};
pub use storage::PersistentStorage;
pub use table::{QueueTable, SurrealQueueTable, TableFuture};
