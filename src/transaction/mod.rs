pub mod error;
pub mod lock_manager;
pub mod transaction;
pub mod transaction_manager;
pub mod wait_for_graph;

pub use error::{AbortReason, TransactionError};
pub use lock_manager::{LockManager, LockMode};
pub use transaction::{IsolationLevel, Transaction, TransactionState};
pub use transaction_manager::TransactionManager;
