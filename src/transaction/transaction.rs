use std::collections::{HashMap, HashSet};

use parking_lot::Mutex;

use crate::common::types::{Rid, TableOid, TxnId};
use crate::transaction::lock_manager::LockMode;

/// Transaction isolation levels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IsolationLevel {
    ReadUncommitted,
    ReadCommitted,
    RepeatableRead,
}

/// Two-phase locking states. A transaction is born GROWING and moves to
/// SHRINKING on the first unlock that matters for its isolation level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    Growing,
    Shrinking,
    Committed,
    Aborted,
}

/// Lock bookkeeping: one oid set per table mode, one rid map per row mode
#[derive(Debug, Default)]
struct LockSets {
    shared_table: HashSet<TableOid>,
    exclusive_table: HashSet<TableOid>,
    intention_shared_table: HashSet<TableOid>,
    intention_exclusive_table: HashSet<TableOid>,
    shared_intention_exclusive_table: HashSet<TableOid>,
    shared_rows: HashMap<TableOid, HashSet<Rid>>,
    exclusive_rows: HashMap<TableOid, HashSet<Rid>>,
}

impl LockSets {
    fn table_set(&mut self, mode: LockMode) -> &mut HashSet<TableOid> {
        match mode {
            LockMode::Shared => &mut self.shared_table,
            LockMode::Exclusive => &mut self.exclusive_table,
            LockMode::IntentionShared => &mut self.intention_shared_table,
            LockMode::IntentionExclusive => &mut self.intention_exclusive_table,
            LockMode::SharedIntentionExclusive => &mut self.shared_intention_exclusive_table,
        }
    }
}

/// A transaction: id, isolation level, 2PL state and lock bookkeeping.
/// Shared across threads (the deadlock detector aborts victims remotely),
/// so state and lock sets sit behind their own locks.
pub struct Transaction {
    id: TxnId,
    isolation_level: IsolationLevel,
    state: Mutex<TransactionState>,
    lock_sets: Mutex<LockSets>,
}

impl Transaction {
    pub fn new(id: TxnId, isolation_level: IsolationLevel) -> Self {
        Self {
            id,
            isolation_level,
            state: Mutex::new(TransactionState::Growing),
            lock_sets: Mutex::new(LockSets::default()),
        }
    }

    pub fn id(&self) -> TxnId {
        self.id
    }

    pub fn isolation_level(&self) -> IsolationLevel {
        self.isolation_level
    }

    pub fn state(&self) -> TransactionState {
        *self.state.lock()
    }

    pub fn set_state(&self, state: TransactionState) {
        *self.state.lock() = state;
    }

    // ---- table lock bookkeeping ----

    pub fn insert_table_lock(&self, oid: TableOid, mode: LockMode) {
        self.lock_sets.lock().table_set(mode).insert(oid);
    }

    pub fn remove_table_lock(&self, oid: TableOid, mode: LockMode) {
        self.lock_sets.lock().table_set(mode).remove(&oid);
    }

    /// The mode this transaction holds on a table, if any
    pub fn table_lock_mode(&self, oid: TableOid) -> Option<LockMode> {
        let sets = self.lock_sets.lock();
        if sets.exclusive_table.contains(&oid) {
            Some(LockMode::Exclusive)
        } else if sets.shared_intention_exclusive_table.contains(&oid) {
            Some(LockMode::SharedIntentionExclusive)
        } else if sets.shared_table.contains(&oid) {
            Some(LockMode::Shared)
        } else if sets.intention_exclusive_table.contains(&oid) {
            Some(LockMode::IntentionExclusive)
        } else if sets.intention_shared_table.contains(&oid) {
            Some(LockMode::IntentionShared)
        } else {
            None
        }
    }

    pub fn table_lock_set(&self, mode: LockMode) -> HashSet<TableOid> {
        self.lock_sets.lock().table_set(mode).clone()
    }

    pub fn locked_tables(&self) -> Vec<(TableOid, LockMode)> {
        let sets = self.lock_sets.lock();
        let mut tables = Vec::new();
        for &oid in &sets.intention_shared_table {
            tables.push((oid, LockMode::IntentionShared));
        }
        for &oid in &sets.intention_exclusive_table {
            tables.push((oid, LockMode::IntentionExclusive));
        }
        for &oid in &sets.shared_table {
            tables.push((oid, LockMode::Shared));
        }
        for &oid in &sets.shared_intention_exclusive_table {
            tables.push((oid, LockMode::SharedIntentionExclusive));
        }
        for &oid in &sets.exclusive_table {
            tables.push((oid, LockMode::Exclusive));
        }
        tables
    }

    // ---- row lock bookkeeping ----

    pub fn insert_row_lock(&self, oid: TableOid, rid: Rid, mode: LockMode) {
        let mut sets = self.lock_sets.lock();
        let map = match mode {
            LockMode::Shared => &mut sets.shared_rows,
            LockMode::Exclusive => &mut sets.exclusive_rows,
            _ => unreachable!("intention locks are not taken on rows"),
        };
        map.entry(oid).or_default().insert(rid);
    }

    pub fn remove_row_lock(&self, oid: TableOid, rid: Rid, mode: LockMode) {
        let mut sets = self.lock_sets.lock();
        let map = match mode {
            LockMode::Shared => &mut sets.shared_rows,
            LockMode::Exclusive => &mut sets.exclusive_rows,
            _ => unreachable!("intention locks are not taken on rows"),
        };
        if let Some(rids) = map.get_mut(&oid) {
            rids.remove(&rid);
            if rids.is_empty() {
                map.remove(&oid);
            }
        }
    }

    pub fn row_lock_mode(&self, oid: TableOid, rid: Rid) -> Option<LockMode> {
        let sets = self.lock_sets.lock();
        if sets
            .exclusive_rows
            .get(&oid)
            .is_some_and(|rids| rids.contains(&rid))
        {
            Some(LockMode::Exclusive)
        } else if sets
            .shared_rows
            .get(&oid)
            .is_some_and(|rids| rids.contains(&rid))
        {
            Some(LockMode::Shared)
        } else {
            None
        }
    }

    /// Whether any row lock under the table is still held
    pub fn holds_row_locks_on(&self, oid: TableOid) -> bool {
        let sets = self.lock_sets.lock();
        sets.shared_rows
            .get(&oid)
            .is_some_and(|rids| !rids.is_empty())
            || sets
                .exclusive_rows
                .get(&oid)
                .is_some_and(|rids| !rids.is_empty())
    }

    pub fn locked_rows(&self) -> Vec<(TableOid, Rid, LockMode)> {
        let sets = self.lock_sets.lock();
        let mut rows = Vec::new();
        for (&oid, rids) in &sets.shared_rows {
            for &rid in rids {
                rows.push((oid, rid, LockMode::Shared));
            }
        }
        for (&oid, rids) in &sets.exclusive_rows {
            for &rid in rids {
                rows.push((oid, rid, LockMode::Exclusive));
            }
        }
        rows
    }

    /// True when every lock set is empty
    pub fn holds_no_locks(&self) -> bool {
        let sets = self.lock_sets.lock();
        sets.shared_table.is_empty()
            && sets.exclusive_table.is_empty()
            && sets.intention_shared_table.is_empty()
            && sets.intention_exclusive_table.is_empty()
            && sets.shared_intention_exclusive_table.is_empty()
            && sets.shared_rows.is_empty()
            && sets.exclusive_rows.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_transaction_state() {
        let txn = Transaction::new(1, IsolationLevel::RepeatableRead);
        assert_eq!(txn.id(), 1);
        assert_eq!(txn.state(), TransactionState::Growing);
        assert_eq!(txn.isolation_level(), IsolationLevel::RepeatableRead);
        assert!(txn.holds_no_locks());
    }

    #[test]
    fn test_lock_set_bookkeeping() {
        let txn = Transaction::new(2, IsolationLevel::ReadCommitted);
        txn.insert_table_lock(10, LockMode::IntentionExclusive);
        txn.insert_row_lock(10, Rid::new(1, 0), LockMode::Exclusive);

        assert_eq!(txn.table_lock_mode(10), Some(LockMode::IntentionExclusive));
        assert_eq!(
            txn.row_lock_mode(10, Rid::new(1, 0)),
            Some(LockMode::Exclusive)
        );
        assert!(txn.holds_row_locks_on(10));
        assert!(!txn.holds_no_locks());

        txn.remove_row_lock(10, Rid::new(1, 0), LockMode::Exclusive);
        assert!(!txn.holds_row_locks_on(10));
        txn.remove_table_lock(10, LockMode::IntentionExclusive);
        assert!(txn.holds_no_locks());
    }
}
