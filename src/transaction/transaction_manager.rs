use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::common::types::TxnId;
use crate::transaction::lock_manager::LockManager;
use crate::transaction::transaction::{
    IsolationLevel, Transaction, TransactionError, TransactionState,
};

/// Creates and tracks transactions
///
/// Ids ascend monotonically, which fixes wound-wait seniority: a
/// transaction begun earlier is always older than one begun later.
pub struct TransactionManager {
    next_txn_id: AtomicU32,
    lock_manager: Arc<LockManager>,
    active_transactions: Mutex<HashMap<TxnId, Arc<Transaction>>>,
}

impl TransactionManager {
    pub fn new(lock_manager: Arc<LockManager>) -> Self {
        Self {
            next_txn_id: AtomicU32::new(0),
            lock_manager,
            active_transactions: Mutex::new(HashMap::new()),
        }
    }

    /// Begin a new transaction
    pub fn begin(&self, isolation_level: IsolationLevel) -> Arc<Transaction> {
        let txn_id = self.next_txn_id.fetch_add(1, Ordering::SeqCst);
        let txn = Arc::new(Transaction::new(txn_id, isolation_level));
        self.active_transactions.lock().insert(txn_id, txn.clone());
        txn
    }

    /// Commit a transaction, releasing every lock it still holds
    pub fn commit(&self, txn: &Arc<Transaction>) -> Result<(), TransactionError> {
        self.release_all_locks(txn);
        txn.set_state(TransactionState::Committed);
        self.active_transactions.lock().remove(&txn.id());
        Ok(())
    }

    /// Abort a transaction. The lock manager never releases a wounded
    /// transaction's locks on its behalf; that cleanup happens here.
    pub fn abort(&self, txn: &Arc<Transaction>) -> Result<(), TransactionError> {
        self.release_all_locks(txn);
        txn.set_state(TransactionState::Aborted);
        self.active_transactions.lock().remove(&txn.id());
        Ok(())
    }

    pub fn get_transaction(&self, txn_id: TxnId) -> Option<Arc<Transaction>> {
        self.active_transactions.lock().get(&txn_id).cloned()
    }

    pub fn active_transaction_ids(&self) -> Vec<TxnId> {
        self.active_transactions.lock().keys().copied().collect()
    }

    fn release_all_locks(&self, txn: &Arc<Transaction>) {
        for rid in txn.shared_lock_rids() {
            self.lock_manager.unlock(txn, rid);
        }
        for rid in txn.exclusive_lock_rids() {
            self.lock_manager.unlock(txn, rid);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_begin_assigns_ascending_ids() {
        let tm = TransactionManager::new(Arc::new(LockManager::new()));
        let t1 = tm.begin(IsolationLevel::ReadCommitted);
        let t2 = tm.begin(IsolationLevel::RepeatableRead);
        assert!(t1.id() < t2.id());
        assert_eq!(tm.active_transaction_ids().len(), 2);
    }

    #[test]
    fn test_commit_releases_locks_and_retires() {
        let lock_manager = Arc::new(LockManager::new());
        let tm = TransactionManager::new(lock_manager.clone());
        let txn = tm.begin(IsolationLevel::RepeatableRead);
        let rid = crate::common::types::Rid::new(1, 0);

        assert!(lock_manager.lock_exclusive(&txn, rid).unwrap());
        tm.commit(&txn).unwrap();

        assert_eq!(txn.state(), TransactionState::Committed);
        assert!(txn.exclusive_lock_rids().is_empty());
        assert!(tm.get_transaction(txn.id()).is_none());
    }

    #[test]
    fn test_abort_releases_locks() {
        let lock_manager = Arc::new(LockManager::new());
        let tm = TransactionManager::new(lock_manager.clone());
        let txn = tm.begin(IsolationLevel::ReadCommitted);
        let rid = crate::common::types::Rid::new(2, 5);

        assert!(lock_manager.lock_shared(&txn, rid).unwrap());
        tm.abort(&txn).unwrap();

        assert_eq!(txn.state(), TransactionState::Aborted);
        assert!(txn.shared_lock_rids().is_empty());
    }
}
