//! Volcano-style pull executors.
//!
//! Each executor exposes `init` and `next` and drives its own lock
//! acquisition against the lock manager according to the transaction's
//! isolation level. Lock violations surface as `ExecutionError` and carry
//! the transaction's abort reason to the driver.

pub mod context;
pub mod engine;
pub mod error;
pub mod operators;

use crate::common::types::Rid;
use crate::storage::table::Tuple;

pub use context::ExecutorContext;
pub use engine::ExecutionEngine;
pub use error::ExecutionError;

/// The pull-pipeline executor interface. Executors are not `Send`: an open
/// index scan holds its leaf latch between calls.
pub trait Executor {
    /// Prepare the executor; called before the first `next`
    fn init(&mut self) -> Result<(), ExecutionError>;

    /// Produce the next tuple, or None when exhausted
    fn next(&mut self) -> Result<Option<(Tuple, Rid)>, ExecutionError>;
}
