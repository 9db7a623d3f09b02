use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use log::debug;
use parking_lot::{Condvar, Mutex};

use crate::common::types::{Rid, TxnId};
use crate::transaction::transaction::{
    AbortReason, IsolationLevel, Transaction, TransactionError, TransactionState,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LockMode {
    Shared,
    Exclusive,
}

/// Which entries a lock request may wound on arrival
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WoundPolicy {
    /// Shared requests conflict with exclusive entries and with an active
    /// upgrader
    SharedRequest,
    /// Exclusive requests conflict with every entry
    ExclusiveRequest,
    /// Upgrades conflict with the other granted holders at the queue head
    GrantedPrefix,
}

struct LockRequest {
    txn_id: TxnId,
    mode: LockMode,
    granted: bool,
    txn: Arc<Transaction>,
}

struct LockRequestQueue {
    requests: VecDeque<LockRequest>,
    /// Transaction currently upgrading S to X on this row, if any
    upgrading: Option<TxnId>,
    cv: Arc<Condvar>,
}

impl LockRequestQueue {
    fn new() -> Self {
        Self {
            requests: VecDeque::new(),
            upgrading: None,
            cv: Arc::new(Condvar::new()),
        }
    }

    /// Whether any grant is live; grants always form a prefix of the queue
    fn is_locked(&self) -> bool {
        self.requests.front().map_or(false, |r| r.granted)
    }
}

struct LockTable {
    queues: HashMap<Rid, LockRequestQueue>,
    /// The rid each sleeping transaction is blocked on. Wounding a waiter
    /// parked on some other row notifies that row's queue so the victim
    /// re-checks its predicate and leaves.
    blocking: HashMap<TxnId, Rid>,
}

/// Row-level shared/exclusive lock manager with wound-wait deadlock
/// prevention
///
/// One mutex guards the whole lock table; every queue shares it and
/// carries its own condition variable. Strict two-phase locking is
/// enforced against the transaction's state: acquiring while Shrinking
/// aborts, and any release flips Growing to Shrinking except a shared
/// release under ReadCommitted.
///
/// Wounding marks younger conflicting transactions Aborted but leaves
/// their granted entries in place; an aborted holder removes itself on
/// its next lock-manager call. Wounded waiters observe the abort in
/// their wait predicate and return false.
pub struct LockManager {
    latch: Mutex<LockTable>,
}

impl LockManager {
    pub fn new() -> Self {
        Self {
            latch: Mutex::new(LockTable {
                queues: HashMap::new(),
                blocking: HashMap::new(),
            }),
        }
    }

    /// Acquire a shared lock on `rid`. Returns false when the transaction
    /// was aborted (by wound-wait or otherwise) instead of granted.
    pub fn lock_shared(&self, txn: &Arc<Transaction>, rid: Rid) -> Result<bool, TransactionError> {
        debug!("transaction {} lock_shared {:?}", txn.id(), rid);
        if txn.isolation_level() == IsolationLevel::ReadUncommitted {
            return Err(TransactionError::Abort {
                txn_id: txn.id(),
                reason: AbortReason::LockSharedOnReadUncommitted,
            });
        }
        if txn.is_shared_locked(&rid) {
            panic!(
                "transaction {} already holds a shared lock on {:?}",
                txn.id(),
                rid
            );
        }
        if txn.state() == TransactionState::Shrinking {
            txn.set_state(TransactionState::Aborted);
            return Err(TransactionError::Abort {
                txn_id: txn.id(),
                reason: AbortReason::LockOnShrinking,
            });
        }
        if txn.state() == TransactionState::Aborted {
            return Ok(false);
        }

        let mut table = self.latch.lock();
        Self::wound_younger(&mut table, rid, txn.id(), WoundPolicy::SharedRequest);

        let cv = {
            let queue = table.queues.entry(rid).or_insert_with(LockRequestQueue::new);
            queue.requests.push_back(LockRequest {
                txn_id: txn.id(),
                mode: LockMode::Shared,
                granted: false,
                txn: txn.clone(),
            });
            queue.cv.clone()
        };

        loop {
            if txn.state() == TransactionState::Aborted {
                break;
            }
            let grantable = {
                let queue = &table.queues[&rid];
                Self::shared_grantable(queue, txn.id())
            };
            if grantable {
                break;
            }
            table.blocking.insert(txn.id(), rid);
            cv.wait(&mut table);
        }
        table.blocking.remove(&txn.id());

        if txn.state() == TransactionState::Aborted {
            if let Some(queue) = table.queues.get_mut(&rid) {
                // Only our ungranted request leaves; grants we already
                // hold on this row are released during rollback
                queue.requests.retain(|r| r.txn_id != txn.id() || r.granted);
                queue.cv.notify_all();
            }
            return Ok(false);
        }

        let queue = table
            .queues
            .get_mut(&rid)
            .expect("queue exists while a request is enqueued");
        if let Some(request) = queue
            .requests
            .iter_mut()
            .find(|r| r.txn_id == txn.id() && r.mode == LockMode::Shared)
        {
            request.granted = true;
        }
        txn.insert_shared_lock(rid);
        Ok(true)
    }

    /// Acquire an exclusive lock on `rid`
    pub fn lock_exclusive(
        &self,
        txn: &Arc<Transaction>,
        rid: Rid,
    ) -> Result<bool, TransactionError> {
        debug!("transaction {} lock_exclusive {:?}", txn.id(), rid);
        if txn.is_exclusive_locked(&rid) {
            panic!(
                "transaction {} already holds an exclusive lock on {:?}",
                txn.id(),
                rid
            );
        }
        if txn.state() == TransactionState::Shrinking {
            txn.set_state(TransactionState::Aborted);
            return Err(TransactionError::Abort {
                txn_id: txn.id(),
                reason: AbortReason::LockOnShrinking,
            });
        }
        if txn.state() == TransactionState::Aborted {
            return Ok(false);
        }

        let mut table = self.latch.lock();
        Self::wound_younger(&mut table, rid, txn.id(), WoundPolicy::ExclusiveRequest);

        let cv = {
            let queue = table.queues.entry(rid).or_insert_with(LockRequestQueue::new);
            queue.requests.push_back(LockRequest {
                txn_id: txn.id(),
                mode: LockMode::Exclusive,
                granted: false,
                txn: txn.clone(),
            });
            queue.cv.clone()
        };

        loop {
            if txn.state() == TransactionState::Aborted {
                break;
            }
            let at_head = {
                let queue = &table.queues[&rid];
                queue.requests.front().map_or(false, |r| r.txn_id == txn.id())
            };
            if at_head {
                break;
            }
            table.blocking.insert(txn.id(), rid);
            cv.wait(&mut table);
        }
        table.blocking.remove(&txn.id());

        if txn.state() == TransactionState::Aborted {
            if let Some(queue) = table.queues.get_mut(&rid) {
                queue.requests.retain(|r| r.txn_id != txn.id() || r.granted);
                queue.cv.notify_all();
            }
            return Ok(false);
        }

        let queue = table
            .queues
            .get_mut(&rid)
            .expect("queue exists while a request is enqueued");
        if let Some(request) = queue
            .requests
            .iter_mut()
            .find(|r| r.txn_id == txn.id() && r.mode == LockMode::Exclusive)
        {
            request.granted = true;
        }
        txn.insert_exclusive_lock(rid);
        Ok(true)
    }

    /// Upgrade an already-held shared lock to exclusive. Only one upgrade
    /// may be in flight per row; a second upgrader aborts with
    /// UpgradeConflict.
    pub fn lock_upgrade(
        &self,
        txn: &Arc<Transaction>,
        rid: Rid,
    ) -> Result<bool, TransactionError> {
        debug!("transaction {} lock_upgrade {:?}", txn.id(), rid);
        if txn.state() == TransactionState::Shrinking {
            txn.set_state(TransactionState::Aborted);
            return Err(TransactionError::Abort {
                txn_id: txn.id(),
                reason: AbortReason::LockOnShrinking,
            });
        }
        if txn.state() == TransactionState::Aborted {
            return Ok(false);
        }
        if txn.is_exclusive_locked(&rid) {
            panic!(
                "transaction {} already holds an exclusive lock on {:?}",
                txn.id(),
                rid
            );
        }

        let mut table = self.latch.lock();
        {
            let queue = table.queues.entry(rid).or_insert_with(LockRequestQueue::new);
            if queue.upgrading.is_some() {
                return Err(TransactionError::Abort {
                    txn_id: txn.id(),
                    reason: AbortReason::UpgradeConflict,
                });
            }
        }
        Self::wound_younger(&mut table, rid, txn.id(), WoundPolicy::GrantedPrefix);

        let cv = {
            let queue = table
                .queues
                .get_mut(&rid)
                .expect("queue was just created or already existed");
            let position = queue
                .requests
                .iter()
                .position(|r| r.txn_id == txn.id())
                .unwrap_or_else(|| {
                    panic!(
                        "transaction {} upgrading {:?} without a held lock",
                        txn.id(),
                        rid
                    )
                });
            let request = queue
                .requests
                .remove(position)
                .expect("position is in range");
            assert!(
                request.granted && request.mode == LockMode::Shared,
                "transaction {} upgrading {:?} without a granted shared lock",
                txn.id(),
                rid
            );
            // Move the upgrader to the head: wound-wait already resolved
            // conflicts with older holders, and later arrivals must queue
            // behind the upgraded lock anyway.
            queue.requests.push_front(request);
            queue.upgrading = Some(txn.id());
            queue.cv.clone()
        };

        loop {
            if txn.state() == TransactionState::Aborted {
                break;
            }
            let sole_grant = {
                let queue = &table.queues[&rid];
                queue
                    .requests
                    .iter()
                    .take_while(|r| r.granted)
                    .all(|r| r.txn_id == txn.id())
            };
            if sole_grant {
                break;
            }
            table.blocking.insert(txn.id(), rid);
            cv.wait(&mut table);
        }
        table.blocking.remove(&txn.id());

        if txn.state() == TransactionState::Aborted {
            if let Some(queue) = table.queues.get_mut(&rid) {
                if queue.upgrading == Some(txn.id()) {
                    queue.upgrading = None;
                }
                queue.cv.notify_all();
            }
            return Ok(false);
        }

        let queue = table
            .queues
            .get_mut(&rid)
            .expect("queue exists while a request is enqueued");
        queue.upgrading = None;
        let head = queue
            .requests
            .front_mut()
            .expect("upgrader's own entry is at the head");
        assert_eq!(head.txn_id, txn.id());
        head.mode = LockMode::Exclusive;
        txn.remove_shared_lock(&rid);
        txn.insert_exclusive_lock(rid);
        Ok(true)
    }

    /// Release `txn`'s lock on `rid`, applying the strict-2PL state
    /// transition
    pub fn unlock(&self, txn: &Arc<Transaction>, rid: Rid) -> bool {
        debug!("transaction {} unlock {:?}", txn.id(), rid);
        let mut table = self.latch.lock();
        let queue = table
            .queues
            .get_mut(&rid)
            .unwrap_or_else(|| panic!("unlock of {:?} which has no lock queue", rid));
        let position = queue
            .requests
            .iter()
            .position(|r| r.txn_id == txn.id())
            .unwrap_or_else(|| {
                panic!(
                    "transaction {} does not hold a lock on {:?}",
                    txn.id(),
                    rid
                )
            });
        let request = queue
            .requests
            .remove(position)
            .expect("position is in range");

        if txn.state() == TransactionState::Growing {
            // ReadCommitted may release shared locks while still growing
            let keeps_growing = request.mode == LockMode::Shared
                && txn.isolation_level() == IsolationLevel::ReadCommitted;
            if !keeps_growing {
                txn.set_state(TransactionState::Shrinking);
            }
        }

        if queue.upgrading.is_some() || !queue.is_locked() {
            queue.cv.notify_all();
        }

        txn.remove_shared_lock(&rid);
        txn.remove_exclusive_lock(&rid);
        true
    }

    /// A shared request can be granted once nothing exclusive sits ahead
    /// of it and no upgrade is pending
    fn shared_grantable(queue: &LockRequestQueue, txn_id: TxnId) -> bool {
        if queue.upgrading.map_or(false, |u| u != txn_id) {
            return false;
        }
        for request in &queue.requests {
            if request.txn_id == txn_id {
                return true;
            }
            if request.mode == LockMode::Exclusive {
                return false;
            }
        }
        unreachable!("request queue must contain the waiting transaction");
    }

    /// Wound-wait: abort every younger, still-growing transaction in the
    /// queue that conflicts under `policy`. Granted victims stay queued
    /// until they remove themselves; never-granted victims are dropped
    /// eagerly. Victims sleeping on other rows are woken through the
    /// blocking map.
    fn wound_younger(table: &mut LockTable, rid: Rid, txn_id: TxnId, policy: WoundPolicy) {
        let queue = match table.queues.get_mut(&rid) {
            Some(queue) => queue,
            None => return,
        };

        let mut to_wake = Vec::new();
        let mut idx = 0;
        while idx < queue.requests.len() {
            let granted = queue.requests[idx].granted;
            if policy == WoundPolicy::GrantedPrefix && !granted {
                break;
            }
            let request = &queue.requests[idx];
            let conflicts = match policy {
                WoundPolicy::SharedRequest => {
                    request.mode == LockMode::Exclusive
                        || queue.upgrading == Some(request.txn_id)
                }
                WoundPolicy::ExclusiveRequest | WoundPolicy::GrantedPrefix => true,
            };
            let wound = conflicts
                && request.txn_id > txn_id
                && request.txn.state() == TransactionState::Growing;
            if wound {
                debug!(
                    "transaction {} wounds {} over conflict on {:?}",
                    txn_id, request.txn_id, rid
                );
                request.txn.set_state(TransactionState::Aborted);
                if queue.upgrading == Some(request.txn_id) {
                    queue.upgrading = None;
                }
                if let Some(&blocked_on) = table.blocking.get(&request.txn_id) {
                    to_wake.push(blocked_on);
                }
                if !granted {
                    queue.requests.remove(idx);
                    continue;
                }
            }
            idx += 1;
        }

        for wake_rid in to_wake {
            if let Some(queue) = table.queues.get(&wake_rid) {
                queue.cv.notify_all();
            }
        }
    }
}

impl Default for LockManager {
    fn default() -> Self {
        Self::new()
    }
}
