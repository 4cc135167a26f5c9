use oxmdb::{
    force_checked, BufferProxy, DbFlags, EnvFlags, Environment, GetOp, SeekOp, WriteFlags,
};
use tempfile::TempDir;

fn setup_env_with(proxy: BufferProxy) -> (TempDir, Environment) {
    let dir = TempDir::new().unwrap();
    let env = Environment::with_proxy(proxy).unwrap();
    env.set_map_size(1024 * 1024).unwrap();
    env.set_max_dbs(4).unwrap();
    env.open(dir.path(), EnvFlags::empty(), 0o644).unwrap();
    (dir, env)
}

// Writes a spread of entries and reads them back through every surface
// that goes through the buffer strategy.
fn round_trip(env: &Environment) -> Vec<(Vec<u8>, Vec<u8>)> {
    let db = env.open_db(None, DbFlags::empty()).unwrap();

    let entries: Vec<(Vec<u8>, Vec<u8>)> = vec![
        (b"empty".to_vec(), Vec::new()),
        (b"small".to_vec(), b"v".to_vec()),
        (b"binary".to_vec(), vec![0u8, 1, 2, 254, 255]),
        (b"larger".to_vec(), vec![0xa5u8; 4096]),
    ];

    let mut txn = env.begin_txn().unwrap();
    for (k, v) in &entries {
        db.put(&txn, k, v, WriteFlags::empty()).unwrap();
    }
    txn.commit().unwrap();

    let txn = env.begin_ro_txn().unwrap();
    let mut observed = Vec::new();
    for (k, expected) in &entries {
        let got = db.get(&txn, k).unwrap().expect("key vanished");
        assert_eq!(got.len(), expected.len());
        assert_eq!(got.to_vec(), *expected);
        observed.push((txn.key().unwrap().to_vec(), txn.val().unwrap().to_vec()));
    }

    // Cursor traversal sees the same bytes
    let cursor = db.cursor(&txn).unwrap();
    let mut found = cursor.seek(SeekOp::First).unwrap();
    let mut walked = 0;
    while found {
        walked += 1;
        found = cursor.seek(SeekOp::Next).unwrap();
    }
    assert_eq!(walked, entries.len());

    observed
}

#[test]
fn test_round_trip_raw_strategy() {
    let (_dir, env) = setup_env_with(BufferProxy::Raw);
    assert_eq!(env.proxy(), BufferProxy::Raw);
    round_trip(&env);
}

#[test]
fn test_round_trip_checked_strategy() {
    let (_dir, env) = setup_env_with(BufferProxy::Checked);
    assert_eq!(env.proxy(), BufferProxy::Checked);
    round_trip(&env);
}

#[test]
fn test_strategies_observe_identical_results() {
    let (_dir_a, raw_env) = setup_env_with(BufferProxy::Raw);
    let (_dir_b, checked_env) = setup_env_with(BufferProxy::Checked);

    let raw = round_trip(&raw_env);
    let checked = round_trip(&checked_env);
    assert_eq!(raw, checked);
}

#[test]
fn test_forcing_checked_demotes_optimal() {
    force_checked(true);
    assert_eq!(BufferProxy::optimal(), BufferProxy::Checked);
    let dir = TempDir::new().unwrap();
    let env = Environment::new().unwrap();
    env.open(dir.path(), EnvFlags::empty(), 0o644).unwrap();
    assert_eq!(env.proxy(), BufferProxy::Checked);
    force_checked(false);

    // The demoted strategy still round-trips correctly
    let db = env.open_db(None, DbFlags::empty()).unwrap();
    let mut txn = env.begin_txn().unwrap();
    db.put(&txn, b"forced", b"checked", WriteFlags::empty()).unwrap();
    let got = db.get(&txn, b"forced").unwrap().map(|v| v.to_vec());
    assert_eq!(got.unwrap(), b"checked");
    txn.commit().unwrap();
}

#[test]
fn test_reserve_write_through_view() {
    let (_dir, env) = setup_env_with(BufferProxy::Raw);
    let db = env.open_db(None, DbFlags::empty()).unwrap();

    let payload = b"filled in place";
    let mut txn = env.begin_txn().unwrap();
    {
        let mut view = db.reserve(&txn, b"reserved", payload.len()).unwrap();
        assert_eq!(view.len(), payload.len());
        view.fill(payload).unwrap();
    }
    txn.commit().unwrap();

    let txn = env.begin_ro_txn().unwrap();
    let got = db.get(&txn, b"reserved").unwrap().map(|v| v.to_vec());
    assert_eq!(got.unwrap(), payload);
}

#[test]
fn test_reserve_rejects_mismatched_fill() {
    let (_dir, env) = setup_env_with(BufferProxy::Raw);
    let db = env.open_db(None, DbFlags::empty()).unwrap();

    let mut txn = env.begin_txn().unwrap();
    {
        let mut view = db.reserve(&txn, b"reserved", 8).unwrap();
        assert!(view.fill(b"short").is_err());
        assert!(view.fill(b"far too long").is_err());
        view.fill(b"exactly8").unwrap();
    }
    txn.commit().unwrap();
}

#[test]
fn test_keyed_get_through_both_strategies() {
    for proxy in [BufferProxy::Raw, BufferProxy::Checked] {
        let (_dir, env) = setup_env_with(proxy);
        let db = env.open_db(None, DbFlags::empty()).unwrap();

        let mut txn = env.begin_txn().unwrap();
        db.put(&txn, b"k1", b"v1", WriteFlags::empty()).unwrap();
        db.put(&txn, b"k2", b"v2", WriteFlags::empty()).unwrap();
        txn.commit().unwrap();

        let txn = env.begin_ro_txn().unwrap();
        let cursor = db.cursor(&txn).unwrap();
        assert!(cursor.get(b"k2", GetOp::SetKey).unwrap());
        assert_eq!(txn.key().unwrap().to_vec(), b"k2");
        assert_eq!(txn.val().unwrap().to_vec(), b"v2");
    }
}
