//! Hierarchical two-phase lock manager.
//!
//! Tables and rows are locked in five modes with intention hierarchy. Each
//! resource owns a FIFO request queue with its own mutex and condition
//! variable; at most one upgrade is in flight per resource. A background
//! thread wakes every 50 ms, builds the wait-for graph over both queue maps
//! and aborts the youngest transaction on any cycle.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::debug;
use parking_lot::{Condvar, Mutex};

use crate::common::types::{Rid, TableOid, TxnId, INVALID_TXN_ID};
use crate::transaction::error::{AbortReason, TransactionError};
use crate::transaction::transaction::{IsolationLevel, Transaction, TransactionState};
use crate::transaction::wait_for_graph::WaitForGraph;

pub const DEADLOCK_DETECTION_INTERVAL: Duration = Duration::from_millis(50);

/// Lock modes, from weakest intention to exclusive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LockMode {
    IntentionShared,
    IntentionExclusive,
    Shared,
    SharedIntentionExclusive,
    Exclusive,
}

impl LockMode {
    /// The compatibility matrix; symmetric.
    pub fn compatible_with(self, other: LockMode) -> bool {
        use LockMode::*;
        match (self, other) {
            (IntentionShared, Exclusive) | (Exclusive, IntentionShared) => false,
            (IntentionShared, _) | (_, IntentionShared) => true,
            (IntentionExclusive, IntentionExclusive) => true,
            (Shared, Shared) => true,
            _ => false,
        }
    }

    /// The upgrade lattice: IS -> {S, X, IX, SIX}; S -> {X, SIX};
    /// IX -> {X, SIX}; SIX -> X.
    pub fn can_upgrade_to(self, target: LockMode) -> bool {
        use LockMode::*;
        match self {
            IntentionShared => !matches!(target, IntentionShared),
            Shared | IntentionExclusive => {
                matches!(target, Exclusive | SharedIntentionExclusive)
            }
            SharedIntentionExclusive => matches!(target, Exclusive),
            Exclusive => false,
        }
    }

    pub fn is_intention(self) -> bool {
        matches!(
            self,
            LockMode::IntentionShared
                | LockMode::IntentionExclusive
                | LockMode::SharedIntentionExclusive
        )
    }
}

/// The resource a request is against, for lock-set bookkeeping
#[derive(Debug, Clone, Copy)]
enum Resource {
    Table(TableOid),
    Row(TableOid, Rid),
}

#[derive(Debug, Clone)]
struct LockRequest {
    txn_id: TxnId,
    mode: LockMode,
    granted: bool,
}

struct QueueInner {
    /// Granted and waiting requests in FIFO order
    requests: Vec<LockRequest>,
    /// Transaction currently upgrading on this resource, if any
    upgrading: TxnId,
}

struct LockRequestQueue {
    inner: Mutex<QueueInner>,
    cv: Condvar,
}

impl LockRequestQueue {
    fn new() -> Self {
        Self {
            inner: Mutex::new(QueueInner {
                requests: Vec::new(),
                upgrading: INVALID_TXN_ID,
            }),
            cv: Condvar::new(),
        }
    }
}

/// Coordinates concurrent transaction access to tables and rows
pub struct LockManager {
    table_queues: Mutex<HashMap<TableOid, Arc<LockRequestQueue>>>,
    row_queues: Mutex<HashMap<Rid, Arc<LockRequestQueue>>>,
    /// Live transactions, so the detector can abort victims by id
    registry: Mutex<HashMap<TxnId, Arc<Transaction>>>,
    shutdown: AtomicBool,
    detector: Mutex<Option<JoinHandle<()>>>,
}

impl LockManager {
    /// Create the lock manager and start its deadlock detection thread
    pub fn new() -> Arc<Self> {
        let manager = Arc::new(Self {
            table_queues: Mutex::new(HashMap::new()),
            row_queues: Mutex::new(HashMap::new()),
            registry: Mutex::new(HashMap::new()),
            shutdown: AtomicBool::new(false),
            detector: Mutex::new(None),
        });

        let weak = Arc::downgrade(&manager);
        let handle = thread::spawn(move || loop {
            thread::sleep(DEADLOCK_DETECTION_INTERVAL);
            match weak.upgrade() {
                Some(lock_manager) => {
                    if lock_manager.shutdown.load(Ordering::Acquire) {
                        break;
                    }
                    lock_manager.run_deadlock_detection();
                }
                None => break,
            }
        });
        *manager.detector.lock() = Some(handle);

        manager
    }

    pub fn register_transaction(&self, txn: &Arc<Transaction>) {
        self.registry.lock().insert(txn.id(), Arc::clone(txn));
    }

    pub fn deregister_transaction(&self, txn_id: TxnId) {
        self.registry.lock().remove(&txn_id);
    }

    // ---- table locks ----

    pub fn lock_table(
        &self,
        txn: &Arc<Transaction>,
        mode: LockMode,
        oid: TableOid,
    ) -> Result<(), TransactionError> {
        self.check_request(txn, mode)?;
        let queue = self.table_queue(oid);
        self.acquire(txn, mode, &queue, Resource::Table(oid))
    }

    pub fn unlock_table(
        &self,
        txn: &Arc<Transaction>,
        oid: TableOid,
    ) -> Result<(), TransactionError> {
        let txn_id = txn.id();

        if txn.holds_row_locks_on(oid) {
            txn.set_state(TransactionState::Aborted);
            return Err(TransactionError::aborted(
                txn_id,
                AbortReason::TableUnlockedBeforeUnlockingRows,
            ));
        }

        let queue = self.table_queues.lock().get(&oid).cloned();
        let Some(queue) = queue else {
            txn.set_state(TransactionState::Aborted);
            return Err(TransactionError::aborted(
                txn_id,
                AbortReason::AttemptedUnlockButNoLockHeld,
            ));
        };

        let mode = {
            let mut inner = queue.inner.lock();
            let Some(position) = inner
                .requests
                .iter()
                .position(|r| r.txn_id == txn_id && r.granted)
            else {
                drop(inner);
                txn.set_state(TransactionState::Aborted);
                return Err(TransactionError::aborted(
                    txn_id,
                    AbortReason::AttemptedUnlockButNoLockHeld,
                ));
            };
            let mode = inner.requests[position].mode;
            inner.requests.remove(position);
            queue.cv.notify_all();
            mode
        };

        txn.remove_table_lock(oid, mode);
        self.apply_unlock_transition(txn, mode);
        Ok(())
    }

    // ---- row locks ----

    pub fn lock_row(
        &self,
        txn: &Arc<Transaction>,
        mode: LockMode,
        oid: TableOid,
        rid: Rid,
    ) -> Result<(), TransactionError> {
        let txn_id = txn.id();

        if mode.is_intention() {
            txn.set_state(TransactionState::Aborted);
            return Err(TransactionError::aborted(
                txn_id,
                AbortReason::AttemptedIntentionLockOnRow,
            ));
        }
        self.check_request(txn, mode)?;

        // Hierarchy: a row lock needs an appropriate table lock above it
        let table_mode = txn.table_lock_mode(oid);
        let table_ok = match mode {
            LockMode::Exclusive => matches!(
                table_mode,
                Some(
                    LockMode::Exclusive
                        | LockMode::IntentionExclusive
                        | LockMode::SharedIntentionExclusive
                )
            ),
            LockMode::Shared => table_mode.is_some(),
            _ => unreachable!("intention modes rejected above"),
        };
        if !table_ok {
            txn.set_state(TransactionState::Aborted);
            return Err(TransactionError::aborted(
                txn_id,
                AbortReason::TableLockNotPresent,
            ));
        }

        let queue = self.row_queue(rid);
        self.acquire(txn, mode, &queue, Resource::Row(oid, rid))
    }

    pub fn unlock_row(
        &self,
        txn: &Arc<Transaction>,
        oid: TableOid,
        rid: Rid,
    ) -> Result<(), TransactionError> {
        let txn_id = txn.id();

        let queue = self.row_queues.lock().get(&rid).cloned();
        let Some(queue) = queue else {
            txn.set_state(TransactionState::Aborted);
            return Err(TransactionError::aborted(
                txn_id,
                AbortReason::AttemptedUnlockButNoLockHeld,
            ));
        };

        let mode = {
            let mut inner = queue.inner.lock();
            let Some(position) = inner
                .requests
                .iter()
                .position(|r| r.txn_id == txn_id && r.granted)
            else {
                drop(inner);
                txn.set_state(TransactionState::Aborted);
                return Err(TransactionError::aborted(
                    txn_id,
                    AbortReason::AttemptedUnlockButNoLockHeld,
                ));
            };
            let mode = inner.requests[position].mode;
            inner.requests.remove(position);
            queue.cv.notify_all();
            mode
        };

        txn.remove_row_lock(oid, rid, mode);
        self.apply_unlock_transition(txn, mode);
        Ok(())
    }

    /// Release every lock a finished transaction still holds, rows before
    /// tables. Used by commit/abort; performs no state transitions.
    pub fn release_all_locks(&self, txn: &Arc<Transaction>) {
        let txn_id = txn.id();

        for (oid, rid, mode) in txn.locked_rows() {
            let queue = self.row_queues.lock().get(&rid).cloned();
            if let Some(queue) = queue {
                let mut inner = queue.inner.lock();
                if let Some(position) = inner
                    .requests
                    .iter()
                    .position(|r| r.txn_id == txn_id && r.granted)
                {
                    inner.requests.remove(position);
                }
                queue.cv.notify_all();
            }
            txn.remove_row_lock(oid, rid, mode);
        }

        for (oid, mode) in txn.locked_tables() {
            let queue = self.table_queues.lock().get(&oid).cloned();
            if let Some(queue) = queue {
                let mut inner = queue.inner.lock();
                if let Some(position) = inner
                    .requests
                    .iter()
                    .position(|r| r.txn_id == txn_id && r.granted)
                {
                    inner.requests.remove(position);
                }
                queue.cv.notify_all();
            }
            txn.remove_table_lock(oid, mode);
        }
    }

    // ---- request admission ----

    /// Isolation-level and lifecycle gates shared by table and row requests
    fn check_request(
        &self,
        txn: &Arc<Transaction>,
        mode: LockMode,
    ) -> Result<(), TransactionError> {
        use LockMode::*;

        let txn_id = txn.id();
        let state = txn.state();
        if state == TransactionState::Committed || state == TransactionState::Aborted {
            return Err(TransactionError::NotActive(txn_id));
        }
        let shrinking = state == TransactionState::Shrinking;

        match txn.isolation_level() {
            IsolationLevel::ReadUncommitted => {
                if matches!(mode, Shared | IntentionShared | SharedIntentionExclusive) {
                    txn.set_state(TransactionState::Aborted);
                    return Err(TransactionError::aborted(
                        txn_id,
                        AbortReason::LockSharedOnReadUncommitted,
                    ));
                }
                if shrinking {
                    txn.set_state(TransactionState::Aborted);
                    return Err(TransactionError::aborted(txn_id, AbortReason::LockOnShrinking));
                }
            }
            IsolationLevel::ReadCommitted => {
                if shrinking && !matches!(mode, Shared | IntentionShared) {
                    txn.set_state(TransactionState::Aborted);
                    return Err(TransactionError::aborted(txn_id, AbortReason::LockOnShrinking));
                }
            }
            IsolationLevel::RepeatableRead => {
                if shrinking {
                    txn.set_state(TransactionState::Aborted);
                    return Err(TransactionError::aborted(txn_id, AbortReason::LockOnShrinking));
                }
            }
        }
        Ok(())
    }

    /// Queue a request (or an upgrade) and block until it is granted or the
    /// transaction is aborted by the deadlock detector.
    fn acquire(
        &self,
        txn: &Arc<Transaction>,
        mode: LockMode,
        queue: &Arc<LockRequestQueue>,
        resource: Resource,
    ) -> Result<(), TransactionError> {
        let txn_id = txn.id();
        let mut inner = queue.inner.lock();

        if let Some(position) = inner.requests.iter().position(|r| r.txn_id == txn_id) {
            let held_mode = inner.requests[position].mode;
            if held_mode == mode {
                return Ok(());
            }
            if inner.upgrading != INVALID_TXN_ID {
                drop(inner);
                txn.set_state(TransactionState::Aborted);
                return Err(TransactionError::aborted(txn_id, AbortReason::UpgradeConflict));
            }
            if !held_mode.can_upgrade_to(mode) {
                drop(inner);
                txn.set_state(TransactionState::Aborted);
                return Err(TransactionError::aborted(
                    txn_id,
                    AbortReason::IncompatibleUpgrade,
                ));
            }

            // Upgrade: drop the held lock and queue the new request ahead of
            // every other waiter.
            inner.requests.remove(position);
            match resource {
                Resource::Table(oid) => txn.remove_table_lock(oid, held_mode),
                Resource::Row(oid, rid) => txn.remove_row_lock(oid, rid, held_mode),
            }
            let insert_at = inner
                .requests
                .iter()
                .position(|r| !r.granted)
                .unwrap_or(inner.requests.len());
            inner.requests.insert(
                insert_at,
                LockRequest {
                    txn_id,
                    mode,
                    granted: false,
                },
            );
            inner.upgrading = txn_id;
        } else {
            inner.requests.push(LockRequest {
                txn_id,
                mode,
                granted: false,
            });
        }

        loop {
            if Self::grantable(&inner, txn_id, mode) {
                break;
            }
            queue.cv.wait(&mut inner);

            if txn.state() == TransactionState::Aborted {
                // Deadlock victim: deregister the request and let peers run
                if inner.upgrading == txn_id {
                    inner.upgrading = INVALID_TXN_ID;
                }
                if let Some(position) = inner.requests.iter().position(|r| r.txn_id == txn_id) {
                    inner.requests.remove(position);
                }
                queue.cv.notify_all();
                return Err(TransactionError::aborted(txn_id, AbortReason::Deadlock));
            }
        }

        if inner.upgrading == txn_id {
            inner.upgrading = INVALID_TXN_ID;
        }
        let position = inner
            .requests
            .iter()
            .position(|r| r.txn_id == txn_id)
            .expect("own request is still queued");
        inner.requests[position].granted = true;
        match resource {
            Resource::Table(oid) => txn.insert_table_lock(oid, mode),
            Resource::Row(oid, rid) => txn.insert_row_lock(oid, rid, mode),
        }
        if mode != LockMode::Exclusive {
            queue.cv.notify_all();
        }

        Ok(())
    }

    /// The granting policy: an upgrade has priority; every granted request
    /// and every earlier waiting request must be compatible.
    fn grantable(inner: &QueueInner, txn_id: TxnId, mode: LockMode) -> bool {
        if inner.upgrading != INVALID_TXN_ID && inner.upgrading != txn_id {
            return false;
        }

        let mut reached_self = false;
        for request in &inner.requests {
            if request.txn_id == txn_id {
                reached_self = true;
                continue;
            }
            if request.granted {
                if !request.mode.compatible_with(mode) {
                    return false;
                }
            } else if !reached_self && !request.mode.compatible_with(mode) {
                return false;
            }
        }
        true
    }

    fn apply_unlock_transition(&self, txn: &Arc<Transaction>, mode: LockMode) {
        if txn.state() != TransactionState::Growing {
            return;
        }
        let matters = match txn.isolation_level() {
            IsolationLevel::RepeatableRead => {
                matches!(mode, LockMode::Shared | LockMode::Exclusive)
            }
            IsolationLevel::ReadCommitted | IsolationLevel::ReadUncommitted => {
                mode == LockMode::Exclusive
            }
        };
        if matters {
            txn.set_state(TransactionState::Shrinking);
        }
    }

    fn table_queue(&self, oid: TableOid) -> Arc<LockRequestQueue> {
        Arc::clone(
            self.table_queues
                .lock()
                .entry(oid)
                .or_insert_with(|| Arc::new(LockRequestQueue::new())),
        )
    }

    fn row_queue(&self, rid: Rid) -> Arc<LockRequestQueue> {
        Arc::clone(
            self.row_queues
                .lock()
                .entry(rid)
                .or_insert_with(|| Arc::new(LockRequestQueue::new())),
        )
    }

    // ---- deadlock detection ----

    /// One detection pass: build the wait-for graph with both queue maps
    /// held, then abort the youngest transaction on each cycle and wake the
    /// queues it waits on.
    fn run_deadlock_detection(&self) {
        let mut graph = WaitForGraph::new();
        let mut waiter_queues: HashMap<TxnId, Vec<Arc<LockRequestQueue>>> = HashMap::new();

        {
            let table_queues = self.table_queues.lock();
            let row_queues = self.row_queues.lock();
            for queue in table_queues.values().chain(row_queues.values()) {
                let inner = queue.inner.lock();
                for waiting in inner.requests.iter().filter(|r| !r.granted) {
                    for granted in inner.requests.iter().filter(|r| r.granted) {
                        graph.add_edge(waiting.txn_id, granted.txn_id);
                    }
                    waiter_queues
                        .entry(waiting.txn_id)
                        .or_default()
                        .push(Arc::clone(queue));
                }
            }
        }

        if graph.is_empty() {
            return;
        }

        while let Some(cycle) = graph.find_cycle() {
            // The youngest transaction (largest id) on the cycle dies
            let victim = *cycle.iter().max().expect("cycle is non-empty");
            debug!("deadlock cycle {:?}: aborting youngest txn {}", cycle, victim);

            let txn = self.registry.lock().get(&victim).cloned();
            if let Some(txn) = txn {
                txn.set_state(TransactionState::Aborted);
            }
            if let Some(queues) = waiter_queues.get(&victim) {
                for queue in queues {
                    queue.cv.notify_all();
                }
            }
            graph.remove_transaction(victim);
        }
    }
}

impl Drop for LockManager {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::Release);
        if let Some(handle) = self.detector.lock().take() {
            // The detector only holds a weak reference; it exits on its
            // next tick once the manager is gone.
            drop(handle);
        }
    }
}
