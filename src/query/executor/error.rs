use thiserror::Error;

use crate::index::btree::BTreeError;
use crate::storage::buffer::BufferPoolError;
use crate::storage::table::TableHeapError;
use crate::transaction::TransactionError;

#[derive(Error, Debug)]
pub enum ExecutionError {
    #[error("Transaction error: {0}")]
    Transaction(#[from] TransactionError),

    #[error("Table heap error: {0}")]
    TableHeap(#[from] TableHeapError),

    #[error("Index error: {0}")]
    Index(#[from] BTreeError),

    #[error("Buffer pool error: {0}")]
    BufferPool(#[from] BufferPoolError),

    #[error("Table not found: oid {0}")]
    TableNotFound(u32),

    #[error("Index not found: oid {0}")]
    IndexNotFound(u32),
}
