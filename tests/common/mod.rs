use std::sync::Arc;

use anyhow::Result;
use parking_lot::RwLock;
use tempfile::NamedTempFile;

use rookdb::catalog::{Catalog, Column, DataType, DataValue, Schema};
use rookdb::query::executor::ExecutorContext;
use rookdb::storage::buffer::BufferPoolManager;
use rookdb::transaction::{IsolationLevel, LockManager, Transaction, TransactionManager};

// Create a temporary database file for testing
#[allow(dead_code)]
pub fn create_temp_db_file() -> Result<(NamedTempFile, String)> {
    let _ = env_logger::builder().is_test(true).try_init();
    let file = NamedTempFile::new()?;
    let path = file.path().to_str().unwrap().to_string();
    Ok((file, path))
}

// Create a buffer pool manager with a temporary database
#[allow(dead_code)]
pub fn create_test_buffer_pool(
    pool_size: usize,
    replacer_k: usize,
) -> Result<(Arc<BufferPoolManager>, NamedTempFile)> {
    let (file, path) = create_temp_db_file()?;
    let buffer_pool = Arc::new(BufferPoolManager::new(pool_size, replacer_k, path)?);
    Ok((buffer_pool, file))
}

/// A full set of engine collaborators over one temporary database file
#[allow(dead_code)]
pub struct TestEngine {
    pub buffer_pool: Arc<BufferPoolManager>,
    pub catalog: Arc<RwLock<Catalog>>,
    pub lock_manager: Arc<LockManager>,
    pub transaction_manager: Arc<TransactionManager>,
    _db_file: NamedTempFile,
}

#[allow(dead_code)]
pub fn create_test_engine(pool_size: usize) -> Result<TestEngine> {
    let (buffer_pool, db_file) = create_test_buffer_pool(pool_size, 2)?;
    let catalog = Arc::new(RwLock::new(Catalog::new(Arc::clone(&buffer_pool))));
    let lock_manager = LockManager::new();
    let transaction_manager = Arc::new(TransactionManager::new(Arc::clone(&lock_manager)));
    Ok(TestEngine {
        buffer_pool,
        catalog,
        lock_manager,
        transaction_manager,
        _db_file: db_file,
    })
}

#[allow(dead_code)]
impl TestEngine {
    pub fn begin(&self, isolation_level: IsolationLevel) -> Arc<Transaction> {
        self.transaction_manager.begin(isolation_level)
    }

    pub fn context(&self, txn: &Arc<Transaction>) -> Arc<ExecutorContext> {
        Arc::new(ExecutorContext::new(
            Arc::clone(&self.buffer_pool),
            Arc::clone(&self.catalog),
            Arc::clone(&self.lock_manager),
            Arc::clone(&self.transaction_manager),
            Arc::clone(txn),
        ))
    }
}

/// (id INTEGER, value INTEGER)
#[allow(dead_code)]
pub fn two_int_schema() -> Schema {
    Schema::new(vec![
        Column::new("id", DataType::Integer),
        Column::new("value", DataType::Integer),
    ])
}

#[allow(dead_code)]
pub fn int_row(id: i64, value: i64) -> Vec<DataValue> {
    vec![DataValue::Integer(id), DataValue::Integer(value)]
}
