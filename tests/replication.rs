//! End-to-end primary/replica replication scenarios.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use terrapin::{
    Error, EventSink, Importer, Replica, ReplicaConfig, ReplicationEvent, Store, TxnId, Verbosity,
};

/// Sink that records every delivered event for later assertions.
#[derive(Default)]
struct CollectingSink {
    events: Mutex<Vec<ReplicationEvent>>,
}

impl CollectingSink {
    fn take(&self) -> Vec<ReplicationEvent> {
        std::mem::take(&mut *self.events.lock())
    }
}

impl EventSink for CollectingSink {
    fn emit(&self, _store: &str, event: ReplicationEvent) {
        self.events.lock().push(event);
    }
}

/// Importer whose transport always fails.
struct FailingImporter;

impl Importer for FailingImporter {
    fn import(&self, _since: TxnId) -> terrapin::Result<Box<dyn std::io::Read + Send>> {
        Err(Error::Import { reason: "connection refused".to_string() })
    }
}

fn manual_config() -> ReplicaConfig {
    // Long interval so only sync_now drives the cycles under test.
    ReplicaConfig::builder().interval(Duration::from_secs(3600)).build()
}

#[test]
fn test_replica_mirrors_primary_writes_and_deletes() {
    let primary = Arc::new(Store::open_in_memory("primary").unwrap());
    let replica =
        Replica::open_in_memory("mirror", Arc::clone(&primary), manual_config()).unwrap();

    primary
        .update(|txn| {
            let mut bkt = txn.create("bkt")?;
            bkt.put("1", "one")?;
            Ok(())
        })
        .unwrap();
    primary.update(|txn| txn.bucket("bkt")?.put("2", "two")).unwrap();
    primary.update(|txn| txn.bucket("bkt")?.put("3", "three")).unwrap();

    assert_eq!(replica.sync_now().unwrap(), 3);
    assert_eq!(replica.checkpoint(), TxnId::new(3));

    replica
        .read(|txn| {
            let bkt = txn.bucket("bkt")?;
            assert_eq!(bkt.get("1")?.as_text()?, "one");
            assert_eq!(bkt.get("2")?.as_text()?, "two");
            assert_eq!(bkt.get("3")?.as_text()?, "three");
            Ok(())
        })
        .unwrap();

    primary.update(|txn| txn.bucket("bkt")?.delete("2")).unwrap();
    assert_eq!(replica.sync_now().unwrap(), 1);

    replica
        .read(|txn| {
            let bkt = txn.bucket("bkt")?;
            assert!(matches!(bkt.get("2"), Err(Error::KeyDoesNotExist { .. })));
            assert!(bkt.contains("1"));
            assert!(bkt.contains("3"));
            Ok(())
        })
        .unwrap();

    replica.close().unwrap();
}

#[test]
fn test_background_loop_catches_up_on_its_own() {
    let primary = Arc::new(Store::open_in_memory("primary").unwrap());
    let config = ReplicaConfig::builder().interval(Duration::from_millis(10)).build();
    let replica = Replica::open_in_memory("mirror", Arc::clone(&primary), config).unwrap();

    primary
        .update(|txn| {
            let mut bkt = txn.create("bkt")?;
            bkt.put("k", 7i64)?;
            Ok(())
        })
        .unwrap();

    let deadline = Instant::now() + Duration::from_secs(5);
    while replica.checkpoint() < TxnId::new(1) {
        assert!(Instant::now() < deadline, "replica never caught up");
        std::thread::sleep(Duration::from_millis(5));
    }

    let value = replica.read(|txn| txn.bucket("bkt")?.get("k")).unwrap();
    assert_eq!(value.as_int().unwrap(), 7);
}

#[test]
fn test_repeated_sync_is_idempotent() {
    let primary = Arc::new(Store::open_in_memory("primary").unwrap());
    let replica =
        Replica::open_in_memory("mirror", Arc::clone(&primary), manual_config()).unwrap();

    primary.update(|txn| txn.create("bkt").map(|_| ())).unwrap();

    assert_eq!(replica.sync_now().unwrap(), 1);
    assert_eq!(replica.sync_now().unwrap(), 0);
    assert_eq!(replica.checkpoint(), TxnId::new(1));
}

#[test]
fn test_failed_cycle_leaves_checkpoint_unchanged() {
    let sink = Arc::new(CollectingSink::default());
    let config = ReplicaConfig::builder()
        .interval(Duration::from_secs(3600))
        .verbosity(Verbosity::ERROR)
        .sink(sink.clone())
        .build();
    let replica = Replica::open_in_memory("mirror", FailingImporter, config).unwrap();

    assert!(replica.sync_now().is_err());
    assert_eq!(replica.checkpoint(), TxnId::ZERO);

    let events = sink.take();
    assert_eq!(events.len(), 1);
    assert!(matches!(
        &events[0],
        ReplicationEvent::Failed { checkpoint, id: None, .. } if *checkpoint == TxnId::ZERO
    ));
}

#[test]
fn test_verbosity_filters_events() {
    let sink = Arc::new(CollectingSink::default());
    let primary = Arc::new(Store::open_in_memory("primary").unwrap());
    let config = ReplicaConfig::builder()
        .interval(Duration::from_secs(3600))
        .verbosity(Verbosity::ERROR)
        .sink(sink.clone())
        .build();
    let replica = Replica::open_in_memory("mirror", Arc::clone(&primary), config).unwrap();

    // Applied and caught-up events are filtered out at ERROR-only.
    primary.update(|txn| txn.create("bkt").map(|_| ())).unwrap();
    replica.sync_now().unwrap();
    replica.sync_now().unwrap();
    assert!(sink.take().is_empty());

    // Widening the mask takes effect on the next cycle.
    replica.set_verbosity(Verbosity::SUCCESS | Verbosity::NOTIFICATION);
    primary.update(|txn| txn.bucket("bkt")?.put("k", true)).unwrap();
    replica.sync_now().unwrap();
    replica.sync_now().unwrap();

    let events = sink.take();
    assert_eq!(events.len(), 2);
    assert!(matches!(events[0], ReplicationEvent::Applied { id } if id == TxnId::new(2)));
    assert!(matches!(
        events[1],
        ReplicationEvent::CaughtUp { checkpoint } if checkpoint == TxnId::new(2)
    ));
}

/// Pulls from another replica's locally applied log.
struct ChainedImporter(Arc<Replica<terrapin::backend::InMemoryBackend>>);

impl Importer for ChainedImporter {
    fn import(&self, since: TxnId) -> terrapin::Result<Box<dyn std::io::Read + Send>> {
        let mut buf = Vec::new();
        self.0.export(since, &mut buf)?;
        Ok(Box::new(std::io::Cursor::new(buf)))
    }
}

#[test]
fn test_chained_replication() {
    // A replica can serve as the import source for a further replica.
    let primary = Arc::new(Store::open_in_memory("primary").unwrap());
    let mid =
        Arc::new(Replica::open_in_memory("mid", Arc::clone(&primary), manual_config()).unwrap());
    let leaf =
        Replica::open_in_memory("leaf", ChainedImporter(Arc::clone(&mid)), manual_config())
            .unwrap();

    primary
        .update(|txn| {
            let mut bkt = txn.create("bkt")?;
            bkt.put("k", "v")?;
            Ok(())
        })
        .unwrap();

    // The leaf sees nothing until the middle tier has caught up.
    assert_eq!(leaf.sync_now().unwrap(), 0);
    assert_eq!(mid.sync_now().unwrap(), 1);
    assert_eq!(leaf.sync_now().unwrap(), 1);

    assert_eq!(leaf.checkpoint(), TxnId::new(1));
    let value = leaf.read(|txn| txn.bucket("bkt")?.get("k")).unwrap();
    assert_eq!(value.as_text().unwrap(), "v");
}
