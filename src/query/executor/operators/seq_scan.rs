use std::sync::Arc;

use crate::catalog::{Expression, TableInfo};
use crate::common::types::{Rid, TableOid};
use crate::query::executor::context::ExecutorContext;
use crate::query::executor::error::ExecutionError;
use crate::query::executor::Executor;
use crate::storage::table::{TableIterator, Tuple};
use crate::transaction::{IsolationLevel, LockMode};

/// Sequential scan over a table heap with an optional filter predicate.
///
/// Locking: init takes IS on the table (skipped under READ_UNCOMMITTED or
/// when the transaction already holds a table lock). Each row is read under
/// an S lock (skipped under READ_UNCOMMITTED or when already X-locked);
/// READ_COMMITTED drops the row lock right after the read and the table
/// lock on exhaustion.
pub struct SeqScanExecutor {
    context: Arc<ExecutorContext>,
    table_oid: TableOid,
    predicate: Option<Expression>,
    table: Option<Arc<TableInfo>>,
    iter: Option<TableIterator>,
    acquired_table_lock: bool,
}

impl SeqScanExecutor {
    pub fn new(
        context: Arc<ExecutorContext>,
        table_oid: TableOid,
        predicate: Option<Expression>,
    ) -> Self {
        Self {
            context,
            table_oid,
            predicate,
            table: None,
            iter: None,
            acquired_table_lock: false,
        }
    }
}

impl Executor for SeqScanExecutor {
    fn init(&mut self) -> Result<(), ExecutionError> {
        let table = self
            .context
            .catalog
            .read()
            .get_table(self.table_oid)
            .ok_or(ExecutionError::TableNotFound(self.table_oid))?;

        let txn = &self.context.txn;
        if txn.isolation_level() != IsolationLevel::ReadUncommitted
            && txn.table_lock_mode(self.table_oid).is_none()
        {
            self.context
                .lock_manager
                .lock_table(txn, LockMode::IntentionShared, self.table_oid)?;
            self.acquired_table_lock = true;
        }

        self.iter = Some(table.heap.iter());
        self.table = Some(table);
        Ok(())
    }

    fn next(&mut self) -> Result<Option<(Tuple, Rid)>, ExecutionError> {
        let Some(table) = self.table.clone() else {
            return Ok(None);
        };
        let txn = Arc::clone(&self.context.txn);
        let level = txn.isolation_level();

        loop {
            let step = match self.iter.as_mut() {
                Some(iter) => iter.next()?,
                None => None,
            };
            let Some((_, rid)) = step else {
                // Exhausted. READ_COMMITTED lets the table IS lock go as
                // soon as the scan is over.
                if level == IsolationLevel::ReadCommitted
                    && self.acquired_table_lock
                    && txn.table_lock_mode(self.table_oid) == Some(LockMode::IntentionShared)
                    && !txn.holds_row_locks_on(self.table_oid)
                {
                    self.context.lock_manager.unlock_table(&txn, self.table_oid)?;
                    self.acquired_table_lock = false;
                }
                return Ok(None);
            };

            let mut locked_row = false;
            if level != IsolationLevel::ReadUncommitted
                && txn.row_lock_mode(self.table_oid, rid) != Some(LockMode::Exclusive)
            {
                self.context
                    .lock_manager
                    .lock_row(&txn, LockMode::Shared, self.table_oid, rid)?;
                locked_row = true;
            }

            // Read under the lock; the iterator's copy may predate a
            // concurrent write.
            let current = table.heap.get_tuple(rid)?;

            if level == IsolationLevel::ReadCommitted && locked_row {
                self.context.lock_manager.unlock_row(&txn, self.table_oid, rid)?;
            }

            let Some(tuple) = current else {
                continue; // deleted while unlatched
            };

            if let Some(predicate) = &self.predicate {
                if !predicate.evaluate(&tuple, &table.schema).is_true() {
                    continue;
                }
            }

            return Ok(Some((tuple, rid)));
        }
    }
}
