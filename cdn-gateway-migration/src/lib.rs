pub use sea_orm_migration::prelude::*;
use sea_orm_migration::sea_orm::{ConnectionTrait, DatabaseConnection, Statement, TransactionTrait};

mod m20240115_000001_create_publish_tables;
mod m20240214_101500_create_queue_tables;
mod m20240610_083000_add_published_paths;
mod m20241002_140700_add_task_deadline;

pub struct Migrator;

/// Arbitrary constant used for the schema advisory lock.
const MIGRATION_LOCK_ID: i64 = 682_834;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20240115_000001_create_publish_tables::Migration),
            Box::new(m20240214_101500_create_queue_tables::Migration),
            Box::new(m20240610_083000_add_published_paths::Migration),
            Box::new(m20241002_140700_add_task_deadline::Migration),
        ]
    }
}

/// Apply all pending migrations while holding a transaction-scoped advisory
/// lock, so that concurrently booting processes apply the schema at most
/// once. The lock is released automatically when the transaction ends.
pub async fn apply_with_lock(db: &DatabaseConnection) -> Result<(), DbErr> {
    let txn = db.begin().await?;
    txn.execute(Statement::from_sql_and_values(
        db.get_database_backend(),
        "SELECT pg_advisory_xact_lock($1)",
        [MIGRATION_LOCK_ID.into()],
    ))
    .await?;

    Migrator::up(&txn, None).await?;
    txn.commit().await
}

pub async fn from_sql(manager: &SchemaManager<'_>, content: &str) -> Result<(), DbErr> {
    let stmnts: Vec<&str> = content.split(';').collect();
    let txn = manager.get_connection().begin().await?;
    for st in stmnts.into_iter() {
        txn.execute(Statement::from_string(
            manager.get_database_backend(),
            st.to_string(),
        ))
        .await
        .map_err(|e| DbErr::Migration(format!("{e}\nQuery: {st}")))?;
    }
    txn.commit().await
}
