//! Replica stores: pull-based transaction log replication.
//!
//! A replica owns a store whose history advances only through replay. On a
//! timer (or on demand) it asks its [`Importer`] for every transaction past
//! its checkpoint, buffers the stream fully, decodes it, and applies the
//! entries in order. Each applied entry is durable locally before the next
//! is attempted, so the checkpoint and the local log can never disagree. A
//! failed cycle leaves the checkpoint where it was and is retried from
//! scratch on the next tick.

use std::io::Read;
use std::path::Path;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use bon::Builder;
use crossbeam_channel::{bounded, select, tick, Sender};

use crate::backend::{FileBackend, InMemoryBackend, StorageBackend};
use crate::error::{Error, Result};
use crate::events::{EventSink, ReplicationEvent, TracingSink, Verbosity};
use crate::log::{decode_stream, TxnId};
use crate::store::{Role, Store};
use crate::txn::ReadTransaction;

/// Produces the transaction stream a replica pulls from.
///
/// `import` must return every transaction with identifier strictly greater
/// than `since`, encoded as log frames, in order. An empty stream means the
/// caller is already current. The transport is the implementor's business:
/// an in-process primary, a network client, a file reader.
pub trait Importer: Send + Sync + 'static {
    /// Opens a stream of transactions committed after `since`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Import`] (or a transport-specific error) if the
    /// stream cannot be produced.
    fn import(&self, since: TxnId) -> Result<Box<dyn Read + Send>>;
}

/// An in-process primary serves imports straight from its own log.
impl<B: StorageBackend> Importer for Arc<Store<B>> {
    fn import(&self, since: TxnId) -> Result<Box<dyn Read + Send>> {
        let mut buf = Vec::new();
        self.export(since, &mut buf)?;
        Ok(Box::new(std::io::Cursor::new(buf)))
    }
}

/// Tuning for a replica's replication loop.
#[derive(Builder)]
pub struct ReplicaConfig {
    /// How often the background loop pulls from the importer.
    #[builder(default = Duration::from_secs(1))]
    pub interval: Duration,
    /// Which replication events reach the sink.
    #[builder(default)]
    pub verbosity: Verbosity,
    /// Where replication events are delivered.
    #[builder(default = Arc::new(TracingSink))]
    pub sink: Arc<dyn EventSink>,
}

impl Default for ReplicaConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

/// Runs replication cycles against a replica-role store.
struct Worker<B: StorageBackend> {
    store: Arc<Store<B>>,
    importer: Box<dyn Importer>,
    sink: Arc<dyn EventSink>,
    verbosity: AtomicU8,
}

impl<B: StorageBackend> Worker<B> {
    fn emit(&self, event: ReplicationEvent) {
        let mask = Verbosity::from_bits_truncate(self.verbosity.load(Ordering::Relaxed));
        if mask.contains(event.class()) {
            self.sink.emit(self.store.name(), event);
        }
    }

    /// One full pull-and-replay cycle. Returns the number of transactions
    /// applied. On failure the checkpoint is wherever the last durable apply
    /// left it and the error has already been reported through the sink.
    fn run_cycle(&self) -> Result<usize> {
        let checkpoint = self.store.last_txn_id();

        let entries = self
            .import_entries(checkpoint)
            .inspect_err(|err| {
                self.emit(ReplicationEvent::Failed {
                    checkpoint,
                    id: None,
                    message: err.to_string(),
                });
            })?;

        let mut applied = 0usize;
        for entry in &entries {
            match self.store.apply_log_entry(entry) {
                Ok(true) => {
                    applied += 1;
                    self.emit(ReplicationEvent::Applied { id: entry.id });
                },
                Ok(false) => {},
                Err(err) => {
                    self.emit(ReplicationEvent::Failed {
                        checkpoint: self.store.last_txn_id(),
                        id: Some(entry.id),
                        message: err.to_string(),
                    });
                    return Err(err);
                },
            }
        }

        if applied == 0 {
            self.emit(ReplicationEvent::CaughtUp { checkpoint });
        }
        Ok(applied)
    }

    /// Pulls the import stream and buffers it fully before anything is
    /// applied, so a transport failure mid-stream can never leave a half
    /// replayed batch behind.
    fn import_entries(&self, since: TxnId) -> Result<Vec<crate::log::LogEntry>> {
        let mut stream = self.importer.import(since)?;
        let mut bytes = Vec::new();
        stream
            .read_to_end(&mut bytes)
            .map_err(|err| Error::Import { reason: err.to_string() })?;
        decode_stream(&mut std::io::Cursor::new(bytes))
    }
}

/// A store that mirrors a primary by pulling its transaction log.
///
/// Local reads are served from the replica's own committed state and never
/// touch the importer. The background loop starts on open and stops on
/// [`close`](Replica::close) or drop.
pub struct Replica<B: StorageBackend> {
    store: Arc<Store<B>>,
    worker: Arc<Worker<B>>,
    shutdown: Sender<()>,
    handle: Option<thread::JoinHandle<()>>,
}

impl Replica<FileBackend> {
    /// Opens (or reopens) a replica whose log lives at `dir/<name>.tlog`.
    ///
    /// Existing log contents are replayed first, so the checkpoint resumes
    /// exactly where the last durable apply left it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if the log file cannot be opened, or
    /// [`Error::Corrupted`] if its contents fail replay.
    pub fn open(
        name: &str,
        dir: impl AsRef<Path>,
        importer: impl Importer,
        config: ReplicaConfig,
    ) -> Result<Self> {
        let backend = FileBackend::open(dir.as_ref().join(format!("{name}.tlog")))?;
        Self::with_backend(name, backend, importer, config)
    }
}

impl Replica<InMemoryBackend> {
    /// Opens a replica with no durability beyond process memory.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Corrupted`] if a shared backend holds a log that
    /// fails replay.
    pub fn open_in_memory(
        name: &str,
        importer: impl Importer,
        config: ReplicaConfig,
    ) -> Result<Self> {
        Self::with_backend(name, InMemoryBackend::new(), importer, config)
    }
}

impl<B: StorageBackend> Replica<B> {
    /// Opens a replica over an existing backend.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if the log cannot be read, or
    /// [`Error::Corrupted`] if replay fails.
    pub fn with_backend(
        name: &str,
        backend: B,
        importer: impl Importer,
        config: ReplicaConfig,
    ) -> Result<Self> {
        let store = Arc::new(Store::from_backend(name, backend, Role::Replica)?);
        let worker = Arc::new(Worker {
            store: Arc::clone(&store),
            importer: Box::new(importer),
            sink: config.sink,
            verbosity: AtomicU8::new(config.verbosity.bits()),
        });

        let (shutdown_tx, shutdown_rx) = bounded::<()>(1);
        let loop_worker = Arc::clone(&worker);
        let interval = config.interval;
        let handle = thread::Builder::new()
            .name(format!("terrapin-replica-{name}"))
            .spawn(move || {
                let ticker = tick(interval);
                loop {
                    select! {
                        recv(ticker) -> _ => {
                            // Cycle failures are reported through the sink;
                            // the loop keeps retrying on the next tick.
                            let _ = loop_worker.run_cycle();
                        },
                        recv(shutdown_rx) -> _ => return,
                    }
                }
            })?;

        Ok(Self { store, worker, shutdown: shutdown_tx, handle: Some(handle) })
    }

    /// Name the replica was opened under.
    pub fn name(&self) -> &str {
        self.store.name()
    }

    /// Identifier of the last transaction durably applied locally.
    pub fn checkpoint(&self) -> TxnId {
        self.store.last_txn_id()
    }

    /// Runs a read-only transaction against the replica's current state.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Closed`] if the replica has been closed, otherwise
    /// whatever the closure returns.
    pub fn read<T>(&self, f: impl FnOnce(&ReadTransaction) -> Result<T>) -> Result<T> {
        self.store.read(f)
    }

    /// Writes every locally applied transaction with identifier greater
    /// than `since` into the sink as encoded frames.
    ///
    /// This lets a replica stand in as the import source for further
    /// replicas downstream.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidTransactionId`] if `since` is beyond the
    /// local checkpoint, or [`Error::Closed`] if the replica has been
    /// closed.
    pub fn export(&self, since: TxnId, sink: &mut dyn std::io::Write) -> Result<()> {
        self.store.export(since, sink)
    }

    /// Changes which event classes reach the sink. Takes effect from the
    /// next event.
    pub fn set_verbosity(&self, verbosity: Verbosity) {
        self.worker.verbosity.store(verbosity.bits(), Ordering::Relaxed);
    }

    /// Runs one replication cycle immediately on the calling thread,
    /// independent of the background timer. Returns the number of
    /// transactions applied.
    ///
    /// # Errors
    ///
    /// Returns the cycle's error; the checkpoint stays wherever the last
    /// durable apply left it and the next cycle retries from there.
    pub fn sync_now(&self) -> Result<usize> {
        self.worker.run_cycle()
    }

    /// Stops the background loop and closes the underlying store.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if the final flush fails.
    pub fn close(mut self) -> Result<()> {
        self.stop();
        self.store.close()
    }

    fn stop(&mut self) {
        let _ = self.shutdown.send(());
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl<B: StorageBackend> Drop for Replica<B> {
    fn drop(&mut self) {
        self.stop();
    }
}
