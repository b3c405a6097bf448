use thiserror::Error;

use crate::storage::buffer::BufferPoolError;

#[derive(Error, Debug)]
pub enum BTreeError {
    #[error("Buffer pool error: {0}")]
    BufferPool(#[from] BufferPoolError),

    #[error("Index name too long: {0}")]
    IndexNameTooLong(String),

    #[error("Header page is full")]
    HeaderPageFull,

    #[error("Tree corruption: {0}")]
    Corrupted(String),
}
