use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use siltdb::common::types::Rid;
use siltdb::transaction::{
    AbortReason, IsolationLevel, LockManager, TransactionError, TransactionManager,
    TransactionState,
};

fn setup() -> (Arc<LockManager>, TransactionManager) {
    let lock_manager = Arc::new(LockManager::new());
    let txn_manager = TransactionManager::new(lock_manager.clone());
    (lock_manager, txn_manager)
}

#[test]
fn test_shared_locks_are_compatible() {
    let (lock_manager, txn_manager) = setup();
    let rid = Rid::new(0, 0);

    let t1 = txn_manager.begin(IsolationLevel::RepeatableRead);
    let t2 = txn_manager.begin(IsolationLevel::RepeatableRead);

    assert!(lock_manager.lock_shared(&t1, rid).unwrap());
    assert!(lock_manager.lock_shared(&t2, rid).unwrap());
    assert!(t1.is_shared_locked(&rid));
    assert!(t2.is_shared_locked(&rid));

    txn_manager.commit(&t1).unwrap();
    txn_manager.commit(&t2).unwrap();
}

#[test]
fn test_shared_lock_on_read_uncommitted_aborts() {
    let (lock_manager, txn_manager) = setup();
    let rid = Rid::new(0, 0);

    let txn = txn_manager.begin(IsolationLevel::ReadUncommitted);
    match lock_manager.lock_shared(&txn, rid) {
        Err(TransactionError::Abort { reason, .. }) => {
            assert_eq!(reason, AbortReason::LockSharedOnReadUncommitted);
        }
        other => panic!("expected abort, got {:?}", other),
    }
}

#[test]
fn test_lock_on_shrinking_aborts() {
    let (lock_manager, txn_manager) = setup();
    let r1 = Rid::new(0, 0);
    let r2 = Rid::new(0, 1);

    let txn = txn_manager.begin(IsolationLevel::RepeatableRead);
    assert!(lock_manager.lock_shared(&txn, r1).unwrap());

    // RepeatableRead: releasing the shared lock starts the shrinking phase
    lock_manager.unlock(&txn, r1);
    assert_eq!(txn.state(), TransactionState::Shrinking);

    match lock_manager.lock_shared(&txn, r2) {
        Err(TransactionError::Abort { reason, .. }) => {
            assert_eq!(reason, AbortReason::LockOnShrinking);
        }
        other => panic!("expected abort, got {:?}", other),
    }
    assert_eq!(txn.state(), TransactionState::Aborted);
}

// ReadCommitted may release shared locks without leaving the growing phase
#[test]
fn test_read_committed_shared_release_keeps_growing() {
    let (lock_manager, txn_manager) = setup();
    let r1 = Rid::new(0, 0);
    let r2 = Rid::new(0, 1);

    let txn = txn_manager.begin(IsolationLevel::ReadCommitted);
    assert!(lock_manager.lock_shared(&txn, r1).unwrap());
    lock_manager.unlock(&txn, r1);
    assert_eq!(txn.state(), TransactionState::Growing);

    // A later acquisition still succeeds
    assert!(lock_manager.lock_shared(&txn, r2).unwrap());
    txn_manager.commit(&txn).unwrap();
}

// Releasing an exclusive lock always starts shrinking, even under
// ReadCommitted
#[test]
fn test_exclusive_release_starts_shrinking() {
    let (lock_manager, txn_manager) = setup();
    let rid = Rid::new(0, 0);

    let txn = txn_manager.begin(IsolationLevel::ReadCommitted);
    assert!(lock_manager.lock_exclusive(&txn, rid).unwrap());
    lock_manager.unlock(&txn, rid);
    assert_eq!(txn.state(), TransactionState::Shrinking);
}

#[test]
fn test_exclusive_excludes_shared() {
    let (lock_manager, txn_manager) = setup();
    let rid = Rid::new(1, 0);

    let t1 = txn_manager.begin(IsolationLevel::RepeatableRead);
    let t2 = txn_manager.begin(IsolationLevel::RepeatableRead);
    assert!(lock_manager.lock_exclusive(&t1, rid).unwrap());

    let (tx, rx) = mpsc::channel();
    let lm = lock_manager.clone();
    let t2_handle = t2.clone();
    let waiter = thread::spawn(move || {
        // Blocks until t1 releases
        let granted = lm.lock_shared(&t2_handle, rid).unwrap();
        tx.send(granted).unwrap();
    });

    // The younger shared request must still be waiting
    assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());

    lock_manager.unlock(&t1, rid);
    assert!(rx.recv_timeout(Duration::from_secs(5)).unwrap());
    waiter.join().unwrap();

    assert!(t2.is_shared_locked(&rid));
    txn_manager.abort(&t2).unwrap();
}

// An older transaction wounds a younger holder instead of waiting forever
#[test]
fn test_wound_wait_aborts_younger_holder() {
    let (lock_manager, txn_manager) = setup();
    let rid = Rid::new(2, 0);

    let t_old = txn_manager.begin(IsolationLevel::RepeatableRead);
    let t_young = txn_manager.begin(IsolationLevel::RepeatableRead);

    assert!(lock_manager.lock_exclusive(&t_young, rid).unwrap());

    let (tx, rx) = mpsc::channel();
    let lm = lock_manager.clone();
    let t_old_handle = t_old.clone();
    let waiter = thread::spawn(move || {
        let granted = lm.lock_exclusive(&t_old_handle, rid).unwrap();
        tx.send(granted).unwrap();
    });

    // The older request wounds the younger holder on arrival
    thread::sleep(Duration::from_millis(200));
    assert_eq!(t_young.state(), TransactionState::Aborted);

    // The old transaction keeps waiting until the victim's entry is gone
    assert!(rx.try_recv().is_err());
    txn_manager.abort(&t_young).unwrap();

    assert!(rx.recv_timeout(Duration::from_secs(5)).unwrap());
    waiter.join().unwrap();
    assert!(t_old.is_exclusive_locked(&rid));
}

// The oldest transaction is never a wound-wait victim
#[test]
fn test_oldest_transaction_survives() {
    let (lock_manager, txn_manager) = setup();
    let rid = Rid::new(2, 1);

    let t_old = txn_manager.begin(IsolationLevel::RepeatableRead);
    let t_young = txn_manager.begin(IsolationLevel::RepeatableRead);

    assert!(lock_manager.lock_exclusive(&t_old, rid).unwrap());

    let (tx, rx) = mpsc::channel();
    let lm = lock_manager.clone();
    let t_young_handle = t_young.clone();
    let waiter = thread::spawn(move || {
        let granted = lm.lock_exclusive(&t_young_handle, rid).unwrap();
        tx.send(granted).unwrap();
    });

    thread::sleep(Duration::from_millis(200));
    // The younger request waits; the older holder is untouched
    assert_eq!(t_old.state(), TransactionState::Growing);
    assert_eq!(t_young.state(), TransactionState::Growing);

    lock_manager.unlock(&t_old, rid);
    assert!(rx.recv_timeout(Duration::from_secs(5)).unwrap());
    waiter.join().unwrap();
    txn_manager.abort(&t_young).unwrap();
}

// T1 (oldest) holds X. T2 blocks on S, T3 blocks on X. After T1 commits,
// T2 is granted; a subsequent exclusive request by T2 wounds T3.
#[test]
fn test_wound_wait_queue_interaction() {
    let (lock_manager, txn_manager) = setup();
    let rid = Rid::new(3, 0);

    let t1 = txn_manager.begin(IsolationLevel::RepeatableRead);
    let t2 = txn_manager.begin(IsolationLevel::RepeatableRead);
    let t3 = txn_manager.begin(IsolationLevel::RepeatableRead);

    assert!(lock_manager.lock_exclusive(&t1, rid).unwrap());

    let (s_tx, s_rx) = mpsc::channel();
    let lm = lock_manager.clone();
    let t2_handle = t2.clone();
    let t2_waiter = thread::spawn(move || {
        let granted = lm.lock_shared(&t2_handle, rid).unwrap();
        s_tx.send(granted).unwrap();
    });

    // Let T2 enqueue before T3
    thread::sleep(Duration::from_millis(100));

    let (x_tx, x_rx) = mpsc::channel();
    let lm = lock_manager.clone();
    let t3_handle = t3.clone();
    let t3_waiter = thread::spawn(move || {
        let granted = lm.lock_exclusive(&t3_handle, rid).unwrap();
        x_tx.send(granted).unwrap();
    });

    thread::sleep(Duration::from_millis(100));
    lock_manager.unlock(&t1, rid);

    // T2 receives its shared lock; T3 stays parked behind it
    assert!(s_rx.recv_timeout(Duration::from_secs(5)).unwrap());
    t2_waiter.join().unwrap();
    assert!(x_rx.try_recv().is_err());

    // T2 escalates to exclusive, wounding the younger T3
    assert!(lock_manager.lock_exclusive(&t2, rid).unwrap());
    assert!(!x_rx.recv_timeout(Duration::from_secs(5)).unwrap());
    t3_waiter.join().unwrap();
    assert_eq!(t3.state(), TransactionState::Aborted);

    txn_manager.commit(&t2).unwrap();
}

// Only one upgrade may be pending per row. The younger transaction
// upgrades first so that wound-wait leaves the second upgrader alive to
// observe the conflict.
#[test]
fn test_upgrade_conflict() {
    let (lock_manager, txn_manager) = setup();
    let rid = Rid::new(4, 0);

    let t1 = txn_manager.begin(IsolationLevel::RepeatableRead);
    let t2 = txn_manager.begin(IsolationLevel::RepeatableRead);

    assert!(lock_manager.lock_shared(&t1, rid).unwrap());
    assert!(lock_manager.lock_shared(&t2, rid).unwrap());

    let (tx, rx) = mpsc::channel();
    let lm = lock_manager.clone();
    let t2_handle = t2.clone();
    let upgrader = thread::spawn(move || {
        // Blocks until t1's shared grant drains
        let granted = lm.lock_upgrade(&t2_handle, rid).unwrap();
        tx.send(granted).unwrap();
    });

    thread::sleep(Duration::from_millis(200));
    assert!(rx.try_recv().is_err());

    // A second upgrader on the same row must abort
    match lock_manager.lock_upgrade(&t1, rid) {
        Err(TransactionError::Abort { reason, .. }) => {
            assert_eq!(reason, AbortReason::UpgradeConflict);
        }
        other => panic!("expected upgrade conflict, got {:?}", other),
    }

    // Once t1 releases its share, the upgrade completes
    lock_manager.unlock(&t1, rid);
    assert!(rx.recv_timeout(Duration::from_secs(5)).unwrap());
    upgrader.join().unwrap();

    assert!(t2.is_exclusive_locked(&rid));
    assert!(!t2.is_shared_locked(&rid));
    txn_manager.commit(&t2).unwrap();
}

#[test]
fn test_upgrade_without_contention() {
    let (lock_manager, txn_manager) = setup();
    let rid = Rid::new(4, 1);

    let txn = txn_manager.begin(IsolationLevel::RepeatableRead);
    assert!(lock_manager.lock_shared(&txn, rid).unwrap());
    assert!(lock_manager.lock_upgrade(&txn, rid).unwrap());

    assert!(txn.is_exclusive_locked(&rid));
    assert!(!txn.is_shared_locked(&rid));
    txn_manager.commit(&txn).unwrap();
}

// A wounded transaction parked on one row is woken by a wound delivered
// on another row
#[test]
fn test_wound_wakes_waiter_on_other_row() {
    let (lock_manager, txn_manager) = setup();
    let row_a = Rid::new(5, 0);
    let row_b = Rid::new(5, 1);

    let t1 = txn_manager.begin(IsolationLevel::RepeatableRead);
    let t2 = txn_manager.begin(IsolationLevel::RepeatableRead);
    let t3 = txn_manager.begin(IsolationLevel::RepeatableRead);

    // T3 holds a share on row A and blocks behind T2 on row B
    assert!(lock_manager.lock_shared(&t3, row_a).unwrap());
    assert!(lock_manager.lock_exclusive(&t2, row_b).unwrap());

    let (tx, rx) = mpsc::channel();
    let lm = lock_manager.clone();
    let t3_handle = t3.clone();
    let waiter = thread::spawn(move || {
        let granted = lm.lock_exclusive(&t3_handle, row_b).unwrap();
        tx.send(granted).unwrap();
    });

    thread::sleep(Duration::from_millis(200));

    // T1 wounds T3 on row A; the wound must chase T3's wait on row B
    let (x_tx, x_rx) = mpsc::channel();
    let lm = lock_manager.clone();
    let t1_handle = t1.clone();
    let t1_waiter = thread::spawn(move || {
        let granted = lm.lock_exclusive(&t1_handle, row_a).unwrap();
        x_tx.send(granted).unwrap();
    });

    // The wounded T3 exits its wait with a denial
    assert!(!rx.recv_timeout(Duration::from_secs(5)).unwrap());
    waiter.join().unwrap();
    assert_eq!(t3.state(), TransactionState::Aborted);

    // T1 is granted once T3's rollback releases row A
    txn_manager.abort(&t3).unwrap();
    assert!(x_rx.recv_timeout(Duration::from_secs(5)).unwrap());
    t1_waiter.join().unwrap();

    txn_manager.abort(&t1).unwrap();
    txn_manager.commit(&t2).unwrap();
}

// Lock calls by an already-aborted transaction simply fail
#[test]
fn test_aborted_transaction_cannot_lock() {
    let (lock_manager, txn_manager) = setup();
    let rid = Rid::new(6, 0);

    let txn = txn_manager.begin(IsolationLevel::RepeatableRead);
    txn.set_state(TransactionState::Aborted);

    assert!(!lock_manager.lock_shared(&txn, rid).unwrap());
    assert!(!lock_manager.lock_exclusive(&txn, rid).unwrap());
    assert!(!lock_manager.lock_upgrade(&txn, rid).unwrap());
}
