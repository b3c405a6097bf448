// Export public modules
pub mod catalog;
pub mod common;
pub mod index;
pub mod query;
pub mod storage;
pub mod transaction;

// Re-export key items for convenient access
pub use catalog::Catalog;
pub use index::btree::BPlusTree;
pub use index::hash::ExtendibleHashTable;
pub use query::executor::{ExecutionEngine, Executor, ExecutorContext};
pub use storage::buffer::{BufferPoolError, BufferPoolManager};
pub use storage::buffer::LruKReplacer;
pub use storage::disk::DiskManager;
pub use storage::table::TableHeap;
pub use transaction::{LockManager, TransactionManager};
