use std::sync::Arc;

use parking_lot::RwLock;

use crate::catalog::Catalog;
use crate::storage::buffer::BufferPoolManager;
use crate::transaction::{LockManager, Transaction, TransactionManager};

/// Everything an executor needs to run: the storage and concurrency
/// collaborators plus the transaction it runs under. All shared state is
/// passed explicitly; there are no globals.
pub struct ExecutorContext {
    pub buffer_pool: Arc<BufferPoolManager>,
    pub catalog: Arc<RwLock<Catalog>>,
    pub lock_manager: Arc<LockManager>,
    pub transaction_manager: Arc<TransactionManager>,
    pub txn: Arc<Transaction>,
}

impl ExecutorContext {
    pub fn new(
        buffer_pool: Arc<BufferPoolManager>,
        catalog: Arc<RwLock<Catalog>>,
        lock_manager: Arc<LockManager>,
        transaction_manager: Arc<TransactionManager>,
        txn: Arc<Transaction>,
    ) -> Self {
        Self {
            buffer_pool,
            catalog,
            lock_manager,
            transaction_manager,
            txn,
        }
    }
}
