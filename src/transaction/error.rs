use thiserror::Error;

use crate::common::types::TxnId;

/// The abort reasons the lock manager can surface. Every violation sets the
/// transaction ABORTED before the error is returned.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbortReason {
    #[error("lock requested while shrinking")]
    LockOnShrinking,

    #[error("shared lock requested under READ_UNCOMMITTED")]
    LockSharedOnReadUncommitted,

    #[error("another transaction is already upgrading on this resource")]
    UpgradeConflict,

    #[error("requested mode is not an upgrade of the held mode")]
    IncompatibleUpgrade,

    #[error("attempted to unlock a resource with no lock held")]
    AttemptedUnlockButNoLockHeld,

    #[error("table unlocked before its row locks were released")]
    TableUnlockedBeforeUnlockingRows,

    #[error("intention lock requested on a row")]
    AttemptedIntentionLockOnRow,

    #[error("row lock requested without a sufficient table lock")]
    TableLockNotPresent,

    #[error("chosen as deadlock victim")]
    Deadlock,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransactionError {
    #[error("transaction {txn_id} aborted: {reason}")]
    Aborted { txn_id: TxnId, reason: AbortReason },

    #[error("transaction {0} is not active")]
    NotActive(TxnId),
}

impl TransactionError {
    pub fn aborted(txn_id: TxnId, reason: AbortReason) -> Self {
        TransactionError::Aborted { txn_id, reason }
    }
}
