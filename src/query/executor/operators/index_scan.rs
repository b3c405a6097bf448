use std::sync::Arc;

use crate::catalog::TableInfo;
use crate::common::types::{IndexOid, Rid};
use crate::query::executor::context::ExecutorContext;
use crate::query::executor::error::ExecutionError;
use crate::query::executor::Executor;
use crate::index::btree::BPlusTreeIter;
use crate::storage::table::Tuple;

/// Walks a B+ tree index in key order, translating each (key, rid) pair
/// into the full tuple through the table heap. Tombstoned rids are skipped.
pub struct IndexScanExecutor {
    context: Arc<ExecutorContext>,
    index_oid: IndexOid,
    start_key: Option<i64>,
    table: Option<Arc<TableInfo>>,
    iter: Option<BPlusTreeIter<i64>>,
}

impl IndexScanExecutor {
    pub fn new(context: Arc<ExecutorContext>, index_oid: IndexOid, start_key: Option<i64>) -> Self {
        Self {
            context,
            index_oid,
            start_key,
            table: None,
            iter: None,
        }
    }
}

impl Executor for IndexScanExecutor {
    fn init(&mut self) -> Result<(), ExecutionError> {
        let (index_info, table) = {
            let catalog = self.context.catalog.read();
            let index_info = catalog
                .get_index(self.index_oid)
                .ok_or(ExecutionError::IndexNotFound(self.index_oid))?;
            let table = catalog
                .get_table_by_name(&index_info.table_name)
                .ok_or(ExecutionError::IndexNotFound(self.index_oid))?;
            (index_info, table)
        };

        self.iter = Some(match self.start_key {
            Some(key) => index_info.index.iter_from(&key)?,
            None => index_info.index.iter()?,
        });
        self.table = Some(table);
        Ok(())
    }

    fn next(&mut self) -> Result<Option<(Tuple, Rid)>, ExecutionError> {
        let Some(table) = self.table.clone() else {
            return Ok(None);
        };
        let Some(iter) = self.iter.as_mut() else {
            return Ok(None);
        };

        for entry in iter {
            let (_, rid) = entry?;
            if let Some(tuple) = table.heap.get_tuple(rid)? {
                return Ok(Some((tuple, rid)));
            }
        }
        Ok(None)
    }
}
