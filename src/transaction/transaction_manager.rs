use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use log::debug;

use crate::transaction::error::TransactionError;
use crate::transaction::lock_manager::LockManager;
use crate::transaction::transaction::{IsolationLevel, Transaction, TransactionState};

/// Creates transactions and drives their commit/abort lifecycle. Ids grow
/// monotonically, so a larger id always marks a younger transaction.
pub struct TransactionManager {
    next_txn_id: AtomicU32,
    lock_manager: Arc<LockManager>,
}

impl TransactionManager {
    pub fn new(lock_manager: Arc<LockManager>) -> Self {
        Self {
            next_txn_id: AtomicU32::new(1),
            lock_manager,
        }
    }

    pub fn lock_manager(&self) -> &Arc<LockManager> {
        &self.lock_manager
    }

    /// Begin a new transaction in GROWING state
    pub fn begin(&self, isolation_level: IsolationLevel) -> Arc<Transaction> {
        let txn_id = self.next_txn_id.fetch_add(1, Ordering::SeqCst);
        let txn = Arc::new(Transaction::new(txn_id, isolation_level));
        self.lock_manager.register_transaction(&txn);
        txn
    }

    /// Commit: release every held lock (rows before tables) and retire the
    /// transaction.
    pub fn commit(&self, txn: &Arc<Transaction>) -> Result<(), TransactionError> {
        match txn.state() {
            TransactionState::Committed | TransactionState::Aborted => {
                return Err(TransactionError::NotActive(txn.id()));
            }
            _ => {}
        }

        txn.set_state(TransactionState::Committed);
        self.lock_manager.release_all_locks(txn);
        self.lock_manager.deregister_transaction(txn.id());
        debug!("txn {} committed", txn.id());
        Ok(())
    }

    /// Abort: release every held lock and retire the transaction. Also the
    /// cleanup path for deadlock victims that are already ABORTED.
    pub fn abort(&self, txn: &Arc<Transaction>) {
        txn.set_state(TransactionState::Aborted);
        self.lock_manager.release_all_locks(txn);
        self.lock_manager.deregister_transaction(txn.id());
        debug!("txn {} aborted", txn.id());
    }
}
