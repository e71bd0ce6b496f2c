#![allow(dead_code)]

use std::sync::Arc;

use queue_core::{DependencyInjector, JobContext, JobRegistry};

use db::{DbConfig, DbError, PersistentStorage, SurrealQueueTable};
use keycache::MasterSecret;

pub fn secret(seed: u8) -> MasterSecret {
    MasterSecret::new(vec![seed; 32], vec![seed.wrapping_add(1); 32])
}

pub async fn storage(
    registry: JobRegistry,
    context: JobContext,
) -> Result<Arc<PersistentStorage>, DbError> {
    let config = DbConfig::memory().with_database(ulid::Ulid::new().to_string());
    let db = db::connect(&config).await?;
    let table = SurrealQueueTable::new(db).await?;
    Ok(Arc::new(PersistentStorage::new(
        Arc::new(table),
        Arc::new(registry),
        DependencyInjector::new(context),
    )))
}
