use std::sync::Arc;

use crate::catalog::{DataValue, TableInfo};
use crate::common::types::{Rid, TableOid};
use crate::query::executor::context::ExecutorContext;
use crate::query::executor::error::ExecutionError;
use crate::query::executor::Executor;
use crate::storage::table::Tuple;
use crate::transaction::LockMode;

/// Inserts every child tuple into the table heap, X-locking each new row
/// and maintaining all of the table's indexes. Emits one tuple carrying the
/// insert count.
pub struct InsertExecutor {
    context: Arc<ExecutorContext>,
    table_oid: TableOid,
    child: Box<dyn Executor>,
    table: Option<Arc<TableInfo>>,
    done: bool,
}

impl InsertExecutor {
    pub fn new(
        context: Arc<ExecutorContext>,
        table_oid: TableOid,
        child: Box<dyn Executor>,
    ) -> Self {
        Self {
            context,
            table_oid,
            child,
            table: None,
            done: false,
        }
    }
}

impl Executor for InsertExecutor {
    fn init(&mut self) -> Result<(), ExecutionError> {
        self.child.init()?;

        let table = self
            .context
            .catalog
            .read()
            .get_table(self.table_oid)
            .ok_or(ExecutionError::TableNotFound(self.table_oid))?;

        let txn = &self.context.txn;
        if !matches!(
            txn.table_lock_mode(self.table_oid),
            Some(
                LockMode::IntentionExclusive
                    | LockMode::SharedIntentionExclusive
                    | LockMode::Exclusive
            )
        ) {
            self.context
                .lock_manager
                .lock_table(txn, LockMode::IntentionExclusive, self.table_oid)?;
        }

        self.table = Some(table);
        self.done = false;
        Ok(())
    }

    fn next(&mut self) -> Result<Option<(Tuple, Rid)>, ExecutionError> {
        if self.done {
            return Ok(None);
        }
        let table = self
            .table
            .clone()
            .ok_or(ExecutionError::TableNotFound(self.table_oid))?;
        let txn = Arc::clone(&self.context.txn);

        let mut count: i64 = 0;
        while let Some((tuple, _)) = self.child.next()? {
            let rid = table.heap.insert_tuple(&tuple)?;
            self.context
                .lock_manager
                .lock_row(&txn, LockMode::Exclusive, self.table_oid, rid)?;

            let indexes = self.context.catalog.read().get_table_indexes(&table.name);
            for index_info in indexes {
                if let DataValue::Integer(key) = tuple.value(index_info.key_column) {
                    // add or replace
                    if !index_info.index.insert(*key, rid)? {
                        index_info.index.remove(key)?;
                        index_info.index.insert(*key, rid)?;
                    }
                }
            }
            count += 1;
        }

        self.done = true;
        Ok(Some((
            Tuple::new(vec![DataValue::Integer(count)]),
            Rid::INVALID,
        )))
    }
}
