//! Cross-session lock behaviour.
//!
//! Two `LockManager`s with different identities stand in for two processes.

mod common;

use std::sync::Arc;
use std::thread;

use common::init_tracing;
use oxsafe_core::lock::{
    HandleLockBackend, LockBackend, LockManager, LockOutcome, LockToken, MarkerLockBackend,
    SystemIdentity, lock_path_for,
};
use tempfile::TempDir;

fn handle_backend() -> Box<dyn LockBackend> {
    Box::new(HandleLockBackend)
}

fn marker_backend() -> Box<dyn LockBackend> {
    Box::new(MarkerLockBackend)
}

fn backends() -> [fn() -> Box<dyn LockBackend>; 2] {
    [handle_backend, marker_backend]
}

fn manager(user: &str, pid: u32, backend: Box<dyn LockBackend>) -> LockManager {
    LockManager::new(SystemIdentity::new(user, "workstation", pid), backend)
}

fn acquired(outcome: LockOutcome) -> LockToken {
    match outcome {
        LockOutcome::Acquired(token) => token,
        LockOutcome::Busy { owner } => panic!("expected to acquire, busy with {owner}"),
    }
}

fn busy_owner(outcome: LockOutcome) -> String {
    match outcome {
        LockOutcome::Busy { owner } => owner,
        LockOutcome::Acquired(_) => panic!("expected lock contention"),
    }
}

#[test]
fn test_reentrant_acquire_release() {
    init_tracing();
    for make_backend in backends() {
        let dir = TempDir::new().unwrap();
        let db = dir.path().join("db.psafe3");
        let lock_file = lock_path_for(&db);
        let alice = manager("alice", 100, make_backend());

        let first = acquired(alice.acquire(&db).unwrap());
        let second = acquired(alice.acquire(&db).unwrap());
        assert_eq!(alice.lock_count(&db), 2);
        assert!(lock_file.exists());

        alice.release(&db, &second).unwrap();
        assert_eq!(alice.lock_count(&db), 1);
        assert!(lock_file.exists(), "lock file must survive inner release");

        alice.release(&db, &first).unwrap();
        assert_eq!(alice.lock_count(&db), 0);
        assert!(!lock_file.exists(), "last release deletes the lock file");
    }
}

#[test]
fn test_second_owner_sees_busy_with_owner_string() {
    for make_backend in backends() {
        let dir = TempDir::new().unwrap();
        let db = dir.path().join("db.psafe3");
        let alice = manager("alice", 100, make_backend());
        let bob = manager("bob", 200, make_backend());

        let token = acquired(alice.acquire(&db).unwrap());
        let owner = busy_owner(bob.acquire(&db).unwrap());
        assert_eq!(owner, "alice@workstation:100");
        assert_eq!(bob.lock_count(&db), 0);
        assert!(bob.is_locked(&db));
        assert_eq!(bob.lock_owner(&db).as_deref(), Some("alice@workstation:100"));

        alice.release(&db, &token).unwrap();
        assert!(!bob.is_locked(&db));
        assert_eq!(bob.lock_owner(&db), None);

        let token = acquired(bob.acquire(&db).unwrap());
        assert_eq!(
            busy_owner(alice.acquire(&db).unwrap()),
            "bob@workstation:200"
        );
        bob.release(&db, &token).unwrap();
    }
}

#[test]
fn test_busy_release_does_not_touch_holder() {
    let dir = TempDir::new().unwrap();
    let db = dir.path().join("db.psafe3");
    let alice = manager("alice", 100, Box::new(MarkerLockBackend));
    let bob = manager("bob", 200, Box::new(MarkerLockBackend));

    let token = acquired(alice.acquire(&db).unwrap());
    let _ = busy_owner(bob.acquire(&db).unwrap());

    // Bob never held the lock; releasing with Alice's token is a no-op for him
    bob.release(&db, &token).unwrap();
    assert!(lock_path_for(&db).exists());
    assert_eq!(alice.lock_count(&db), 1);
}

#[test]
fn test_marker_left_by_dead_process_stays_busy() {
    let dir = TempDir::new().unwrap();
    let db = dir.path().join("db.psafe3");
    std::fs::write(lock_path_for(&db), "ghost@gone:1").unwrap();

    let alice = manager("alice", 100, Box::new(MarkerLockBackend));
    assert_eq!(busy_owner(alice.acquire(&db).unwrap()), "ghost@gone:1");
}

#[test]
fn test_stale_handle_lock_is_taken_over() {
    let dir = TempDir::new().unwrap();
    let db = dir.path().join("db.psafe3");
    // A lock file nobody holds an OS lock on: its owner exited
    std::fs::write(lock_path_for(&db), "ghost@gone:1").unwrap();

    let alice = manager("alice", 100, Box::new(HandleLockBackend));
    let token = acquired(alice.acquire(&db).unwrap());
    assert_eq!(
        std::fs::read_to_string(lock_path_for(&db)).unwrap(),
        "alice@workstation:100"
    );
    alice.release(&db, &token).unwrap();
}

#[test]
fn test_lock_file_is_independent_of_database() {
    let dir = TempDir::new().unwrap();
    let db = dir.path().join("never-created.psafe3");
    let alice = manager("alice", 100, Box::new(HandleLockBackend));

    let token = acquired(alice.acquire(&db).unwrap());
    assert!(!db.exists());
    alice.release(&db, &token).unwrap();
}

#[test]
fn test_threads_share_one_manager() {
    let dir = TempDir::new().unwrap();
    let db = Arc::new(dir.path().join("db.psafe3"));
    let alice = Arc::new(manager("alice", 100, Box::new(HandleLockBackend)));

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let alice = Arc::clone(&alice);
            let db = Arc::clone(&db);
            thread::spawn(move || {
                for _ in 0..25 {
                    let token = acquired(alice.acquire(&db).unwrap());
                    alice.release(&db, &token).unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(alice.lock_count(&db), 0);
    assert!(!lock_path_for(&db).exists());
}
