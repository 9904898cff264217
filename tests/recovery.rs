//! Durability and crash-recovery behavior of file-backed stores.

use std::fs;
use std::sync::Arc;
use std::time::Duration;

use terrapin::{Error, Replica, ReplicaConfig, Store, TxnId, Value};

fn manual_config() -> ReplicaConfig {
    ReplicaConfig::builder().interval(Duration::from_secs(3600)).build()
}

fn populate(store: &Store<terrapin::backend::FileBackend>) {
    store
        .update(|txn| {
            let mut bkt = txn.create("bkt")?;
            bkt.put("alpha", "one")?;
            bkt.put("beta", 2i64)?;
            Ok(())
        })
        .unwrap();
    store
        .update(|txn| {
            let mut bkt = txn.bucket("bkt")?;
            bkt.put("gamma", vec![3u8, 3, 3])?;
            bkt.delete("beta")?;
            Ok(())
        })
        .unwrap();
}

#[test]
fn test_reopen_rebuilds_identical_state() {
    let dir = tempfile::tempdir().unwrap();

    {
        let store = Store::open("db", dir.path()).unwrap();
        populate(&store);
        store.close().unwrap();
    }

    let store = Store::open("db", dir.path()).unwrap();
    assert_eq!(store.last_txn_id(), TxnId::new(2));
    store
        .read(|txn| {
            let bkt = txn.bucket("bkt")?;
            assert_eq!(bkt.get("alpha")?.as_text()?, "one");
            assert_eq!(bkt.get("gamma")?.as_bytes()?, [3, 3, 3]);
            assert!(matches!(bkt.get("beta"), Err(Error::KeyDoesNotExist { .. })));
            Ok(())
        })
        .unwrap();

    // Identifiers continue from where the log left off.
    store.update(|txn| txn.bucket("bkt")?.put("delta", 4i64)).unwrap();
    assert_eq!(store.last_txn_id(), TxnId::new(3));
}

#[test]
fn test_torn_tail_is_truncated_on_open() {
    let dir = tempfile::tempdir().unwrap();
    let log_path = dir.path().join("db.tlog");

    {
        let store = Store::open("db", dir.path()).unwrap();
        populate(&store);
        store.close().unwrap();
    }

    // Simulate a crash mid-append: a frame header with no payload behind it.
    let clean_len = fs::metadata(&log_path).unwrap().len();
    let mut bytes = fs::read(&log_path).unwrap();
    bytes.extend_from_slice(b"TLG1");
    bytes.extend_from_slice(&99u64.to_le_bytes());
    fs::write(&log_path, &bytes).unwrap();

    let store = Store::open("db", dir.path()).unwrap();
    assert_eq!(store.last_txn_id(), TxnId::new(2));
    let value = store.read(|txn| txn.bucket("bkt")?.get("alpha")).unwrap();
    assert_eq!(value, Value::Text("one".to_string()));

    // The torn bytes are gone from disk, not just skipped.
    drop(store);
    assert_eq!(fs::metadata(&log_path).unwrap().len(), clean_len);
}

#[test]
fn test_mid_log_corruption_is_fail_stop() {
    let dir = tempfile::tempdir().unwrap();
    let log_path = dir.path().join("db.tlog");

    {
        let store = Store::open("db", dir.path()).unwrap();
        populate(&store);
        store.close().unwrap();
    }

    // Flip the magic of the first frame; nothing after it can be trusted.
    let mut bytes = fs::read(&log_path).unwrap();
    bytes[0] = b'X';
    fs::write(&log_path, &bytes).unwrap();

    assert!(matches!(Store::open("db", dir.path()), Err(Error::Corrupted { .. })));
}

#[test]
fn test_corrupt_frame_payload_does_not_truncate_later_commits() {
    let dir = tempfile::tempdir().unwrap();
    let log_path = dir.path().join("db.tlog");

    {
        let store = Store::open("db", dir.path()).unwrap();
        populate(&store);
        store.close().unwrap();
    }

    // Corrupt a length byte inside the first frame's payload. The frame is
    // fully present, so later committed frames must survive: open fails
    // instead of truncating them away.
    let before = fs::read(&log_path).unwrap();
    let mut bytes = before.clone();
    bytes[16 + 2] = 0x7F;
    fs::write(&log_path, &bytes).unwrap();

    assert!(matches!(Store::open("db", dir.path()), Err(Error::Corrupted { .. })));
    assert_eq!(fs::read(&log_path).unwrap().len(), before.len());
}

#[test]
fn test_exported_history_rebuilds_equal_state() {
    let dir = tempfile::tempdir().unwrap();
    let source = Arc::new(Store::open("db", dir.path()).unwrap());
    populate(&source);

    let rebuilt =
        Replica::open_in_memory("rebuilt", Arc::clone(&source), manual_config()).unwrap();
    assert_eq!(rebuilt.sync_now().unwrap(), 2);
    assert_eq!(rebuilt.checkpoint(), source.last_txn_id());

    let collect = |txn: &terrapin::ReadTransaction| -> terrapin::Result<Vec<(String, Value)>> {
        let bkt = txn.bucket("bkt")?;
        let mut entries = Vec::new();
        bkt.for_each(|k, v| entries.push((k.to_string(), v.clone())));
        Ok(entries)
    };
    let source_entries = source.read(collect).unwrap();
    let rebuilt_entries = rebuilt.read(collect).unwrap();
    assert_eq!(source_entries, rebuilt_entries);
}

#[test]
fn test_export_beyond_highest_is_rejected() {
    let store = Store::open_in_memory("db").unwrap();
    store.update(|txn| txn.create("bkt").map(|_| ())).unwrap();

    let mut sink = Vec::new();
    assert!(matches!(
        store.export(TxnId::new(9), &mut sink),
        Err(Error::InvalidTransactionId { requested: 9, highest: 1 })
    ));
}

#[test]
fn test_replica_restart_resumes_from_durable_checkpoint() {
    let dir = tempfile::tempdir().unwrap();
    let primary = Arc::new(Store::open_in_memory("primary").unwrap());

    primary
        .update(|txn| {
            let mut bkt = txn.create("bkt")?;
            bkt.put("k", "v1")?;
            Ok(())
        })
        .unwrap();

    {
        let replica =
            Replica::open("mirror", dir.path(), Arc::clone(&primary), manual_config()).unwrap();
        assert_eq!(replica.sync_now().unwrap(), 1);
        replica.close().unwrap();
    }

    // More history accumulates while the replica is down.
    primary.update(|txn| txn.bucket("bkt")?.put("k", "v2")).unwrap();

    let replica =
        Replica::open("mirror", dir.path(), Arc::clone(&primary), manual_config()).unwrap();
    assert_eq!(replica.checkpoint(), TxnId::new(1));

    // Only the missed transaction is pulled.
    assert_eq!(replica.sync_now().unwrap(), 1);
    assert_eq!(replica.checkpoint(), TxnId::new(2));
    let value = replica.read(|txn| txn.bucket("bkt")?.get("k")).unwrap();
    assert_eq!(value.as_text().unwrap(), "v2");
}
