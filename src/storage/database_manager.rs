use redb::{Database, TableDefinition};
use std::path::Path;
use std::sync::Arc;

use crate::storage::{StoreError, StoreResult};

/// Open (or create) a redb database, creating its parent directory first
pub fn open_database(db_path: &Path) -> StoreResult<Arc<Database>> {
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    tracing::info!("🗄️  Opening index database: {}", db_path.display());
    let db = Database::create(db_path)?;
    Ok(Arc::new(db))
}

/// Create the given tables so later read transactions can open them
pub fn initialize_tables(
    db: &Database,
    table_definitions: &[TableDefinition<&'static str, &'static str>],
) -> StoreResult<()> {
    DatabaseOperation::write(db, |txn| {
        for table_def in table_definitions {
            txn.open_table(*table_def)?;
        }
        Ok(())
    })?;

    tracing::debug!("✅ Initialized {} tables", table_definitions.len());
    Ok(())
}

/// Wrapper for database operations with error handling
pub struct DatabaseOperation;

impl DatabaseOperation {
    /// Execute a read operation
    pub fn read<F, R>(db: &Database, operation: F) -> StoreResult<R>
    where
        F: FnOnce(&redb::ReadTransaction) -> StoreResult<R>,
    {
        let read_txn = db.begin_read()?;
        operation(&read_txn)
    }

    /// Execute a write operation, committing only if it succeeds.
    /// Dropping an uncommitted transaction aborts it.
    pub fn write<F, R>(db: &Database, operation: F) -> StoreResult<R>
    where
        F: FnOnce(&redb::WriteTransaction) -> StoreResult<R>,
    {
        let write_txn = db.begin_write()?;
        let result = operation(&write_txn)?;
        write_txn.commit()?;
        Ok(result)
    }
}

/// Run blocking index or file work off the async worker threads
pub async fn blocking<F, R>(operation: F) -> StoreResult<R>
where
    F: FnOnce() -> StoreResult<R> + Send + 'static,
    R: Send + 'static,
{
    tokio::task::spawn_blocking(operation)
        .await
        .map_err(|e| StoreError::Io(std::io::Error::other(e)))?
}
