use std::time::{Duration, Instant};

use oxmdb::{DbFlags, EnvFlags, Environment, Error, TxnState, WriteFlags};
use tempfile::TempDir;

// Common test setup
fn setup_test_env() -> (TempDir, Environment) {
    let dir = TempDir::new().unwrap();
    let env = Environment::new().unwrap();
    env.set_map_size(1024 * 1024).unwrap();
    env.set_max_dbs(4).unwrap();
    env.open(dir.path(), EnvFlags::empty(), 0o644).unwrap();
    (dir, env)
}

#[test]
fn test_configuration_only_before_open() {
    let dir = TempDir::new().unwrap();
    let env = Environment::new().unwrap();
    env.set_map_size(1024 * 1024).unwrap();
    env.open(dir.path(), EnvFlags::empty(), 0o644).unwrap();

    assert_eq!(env.set_map_size(2048 * 1024), Err(Error::EnvAlreadyOpen));
    assert_eq!(env.set_max_dbs(2), Err(Error::EnvAlreadyOpen));
    assert_eq!(env.set_max_readers(64), Err(Error::EnvAlreadyOpen));

    env.close();
    assert_eq!(env.set_map_size(2048 * 1024), Err(Error::EnvClosed));
    assert!(env.begin_txn().is_err());
}

#[test]
fn test_environment_close_is_idempotent() {
    let (_dir, env) = setup_test_env();
    env.close();
    env.close();
    assert!(env.is_closed());
    assert_eq!(env.stat().unwrap_err(), Error::EnvClosed);
}

#[test]
fn test_transaction_requires_open_environment() {
    let env = Environment::new().unwrap();
    assert_eq!(env.begin_txn().unwrap_err(), Error::EnvNotOpen);
}

#[test]
fn test_commit_twice_fails() {
    let (_dir, env) = setup_test_env();
    let mut txn = env.begin_txn().unwrap();
    txn.commit().unwrap();
    assert_eq!(txn.state(), TxnState::Committed);
    assert_eq!(txn.commit(), Err(Error::TxnTerminated));
}

#[test]
fn test_abort_after_commit_fails() {
    let (_dir, env) = setup_test_env();
    let mut txn = env.begin_txn().unwrap();
    txn.commit().unwrap();
    assert_eq!(txn.abort(), Err(Error::TxnTerminated));
}

#[test]
fn test_abort_twice_fails() {
    let (_dir, env) = setup_test_env();
    let mut txn = env.begin_txn().unwrap();
    txn.abort().unwrap();
    assert_eq!(txn.state(), TxnState::Aborted);
    assert_eq!(txn.abort(), Err(Error::TxnTerminated));
}

#[test]
fn test_close_is_always_silent() {
    let (_dir, env) = setup_test_env();

    // Close after commit
    let mut txn = env.begin_txn().unwrap();
    txn.commit().unwrap();
    txn.close();
    txn.close();
    assert_eq!(txn.state(), TxnState::Committed);

    // Close of an active transaction aborts it
    let mut txn = env.begin_txn().unwrap();
    txn.close();
    assert_eq!(txn.state(), TxnState::Aborted);
    txn.close();
}

#[test]
fn test_abort_discards_writes() {
    let (_dir, env) = setup_test_env();
    let db = env.open_db(None, DbFlags::empty()).unwrap();

    let mut txn = env.begin_txn().unwrap();
    db.put(&txn, b"discard", b"me", WriteFlags::empty()).unwrap();
    txn.abort().unwrap();

    let txn = env.begin_ro_txn().unwrap();
    assert!(db.get(&txn, b"discard").unwrap().is_none());
}

#[test]
fn test_reset_requires_read_only() {
    let (_dir, env) = setup_test_env();
    let mut txn = env.begin_txn().unwrap();
    assert_eq!(txn.reset(), Err(Error::TxnReadOnlyRequired));
}

#[test]
fn test_reset_twice_fails() {
    let (_dir, env) = setup_test_env();
    let mut txn = env.begin_ro_txn().unwrap();
    txn.reset().unwrap();
    assert_eq!(txn.state(), TxnState::Reset);
    assert_eq!(txn.reset(), Err(Error::TxnAlreadyReset));
}

#[test]
fn test_renew_requires_reset() {
    let (_dir, env) = setup_test_env();
    let mut txn = env.begin_ro_txn().unwrap();
    assert_eq!(txn.renew(), Err(Error::TxnNotReset));
    txn.reset().unwrap();
    txn.renew().unwrap();
    assert_eq!(txn.state(), TxnState::Active);
}

#[test]
fn test_renew_observes_snapshot_at_renew_time() {
    let (_dir, env) = setup_test_env();
    let db = env.open_db(None, DbFlags::empty()).unwrap();

    let mut reader = env.begin_ro_txn().unwrap();
    let id_before = reader.id().unwrap();
    assert!(db.get(&reader, b"late").unwrap().is_none());
    reader.reset().unwrap();

    // Data committed while the reader slot is released
    let mut writer = env.begin_txn().unwrap();
    db.put(&writer, b"late", b"arrival", WriteFlags::empty())
        .unwrap();
    writer.commit().unwrap();

    // Same handle, new snapshot
    reader.renew().unwrap();
    let id_after = reader.id().unwrap();
    let got = db.get(&reader, b"late").unwrap().map(|v| v.to_vec());
    assert_eq!(got.unwrap(), b"arrival");
    assert!(id_after > id_before);
}

#[test]
fn test_buffer_access_fails_after_termination() {
    let (_dir, env) = setup_test_env();
    let db = env.open_db(None, DbFlags::empty()).unwrap();

    let mut txn = env.begin_txn().unwrap();
    db.put(&txn, b"k", b"v", WriteFlags::empty()).unwrap();
    assert!(db.get(&txn, b"k").unwrap().is_some());
    txn.commit().unwrap();

    assert_eq!(txn.key().unwrap_err(), Error::TxnTerminated);
    assert_eq!(txn.val().unwrap_err(), Error::TxnTerminated);
    assert_eq!(txn.id().unwrap_err(), Error::TxnTerminated);
}

#[test]
fn test_nested_transaction_commits_into_parent() {
    let (_dir, env) = setup_test_env();
    let db = env.open_db(None, DbFlags::empty()).unwrap();

    let mut parent = env.begin_txn().unwrap();
    {
        let mut child = parent.begin_nested().unwrap();
        db.put(&child, b"nested", b"value", WriteFlags::empty())
            .unwrap();
        child.commit().unwrap();
    }
    let got = db.get(&parent, b"nested").unwrap().map(|v| v.to_vec());
    assert_eq!(got.unwrap(), b"value");
    parent.commit().unwrap();
}

#[test]
fn test_nested_transaction_abort_is_contained() {
    let (_dir, env) = setup_test_env();
    let db = env.open_db(None, DbFlags::empty()).unwrap();

    let mut parent = env.begin_txn().unwrap();
    db.put(&parent, b"kept", b"yes", WriteFlags::empty()).unwrap();
    {
        let mut child = parent.begin_nested().unwrap();
        db.put(&child, b"dropped", b"no", WriteFlags::empty())
            .unwrap();
        child.abort().unwrap();
    }
    assert!(db.get(&parent, b"dropped").unwrap().is_none());
    assert!(db.get(&parent, b"kept").unwrap().is_some());
    parent.commit().unwrap();
}

#[test]
fn test_only_one_live_child_per_write_transaction() {
    let (_dir, env) = setup_test_env();
    let parent = env.begin_txn().unwrap();

    let child = parent.begin_nested().unwrap();
    assert_eq!(
        parent.begin_nested().unwrap_err(),
        Error::IncompatibleParent
    );
    drop(child);

    // A finished child makes room for the next one
    let mut second = parent.begin_nested().unwrap();
    second.commit().unwrap();
}

#[test]
fn test_read_only_transactions_do_not_nest() {
    let (_dir, env) = setup_test_env();
    let reader = env.begin_ro_txn().unwrap();
    assert_eq!(
        reader.begin_nested().unwrap_err(),
        Error::IncompatibleParent
    );
}

#[test]
fn test_nesting_under_finished_parent_fails() {
    let (_dir, env) = setup_test_env();
    let mut parent = env.begin_txn().unwrap();
    parent.commit().unwrap();
    assert_eq!(
        parent.begin_nested().unwrap_err(),
        Error::IncompatibleParent
    );
}

#[test]
fn test_second_writer_blocks_until_first_ends() {
    let (_dir, env) = setup_test_env();
    let hold = Duration::from_millis(150);

    let mut first = env.begin_txn().unwrap();
    let started = Instant::now();

    std::thread::scope(|scope| {
        let handle = scope.spawn(|| {
            // Blocks on the engine's writer lock
            let mut second = env.begin_txn().unwrap();
            let waited = started.elapsed();
            second.commit().unwrap();
            waited
        });

        std::thread::sleep(hold);
        first.commit().unwrap();

        let waited = handle.join().unwrap();
        assert!(waited >= hold, "second writer interleaved: {:?}", waited);
    });
}
