//! The store: snapshot reads, single-writer commits, recovery, and export.
//!
//! Committed state lives behind an [`ArcSwap`] so readers grab a consistent
//! snapshot without taking any lock. Writers serialize on a single mutex,
//! make the log entry durable first, and only then publish the new state;
//! a crash between those two steps is repaired by log replay on the next
//! open, so the log is always the source of truth.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwap;
use parking_lot::Mutex;

use crate::backend::{FileBackend, InMemoryBackend, StorageBackend};
use crate::bucket::Bucket;
use crate::error::{Error, Result};
use crate::log::{decode_log_bytes, LogEntry, Op, TransactionLog, TxnId};
use crate::txn::{ReadTransaction, WriteTransaction};

/// Whether a store accepts local writes or only replayed ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Role {
    /// Accepts `update` transactions and assigns identifiers.
    Primary,
    /// History advances only through log replay; `update` is rejected.
    Replica,
}

/// The buckets and last committed identifier at one commit point.
///
/// Immutable once published; readers hold an `Arc` to it for the duration
/// of their transaction.
#[derive(Debug, Default)]
pub(crate) struct CommittedState {
    pub(crate) buckets: BTreeMap<String, Bucket>,
    pub(crate) last_txn_id: TxnId,
}

/// An embedded transactional key-value store over a pluggable log backend.
pub struct Store<B: StorageBackend> {
    name: String,
    role: Role,
    backend: B,
    committed: ArcSwap<CommittedState>,
    log: Mutex<TransactionLog>,
    write_lock: Mutex<()>,
    closed: AtomicBool,
}

impl Store<FileBackend> {
    /// Opens (or creates) a primary store whose log lives at
    /// `dir/<name>.tlog`, replaying any existing log to rebuild state.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if the log file cannot be opened, or
    /// [`Error::Corrupted`] if its contents fail replay.
    pub fn open(name: &str, dir: impl AsRef<Path>) -> Result<Self> {
        let backend = FileBackend::open(dir.as_ref().join(format!("{name}.tlog")))?;
        Self::from_backend(name, backend, Role::Primary)
    }
}

impl Store<InMemoryBackend> {
    /// Opens a primary store with no durability beyond process memory.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Corrupted`] if a shared backend already holds a log
    /// that fails replay.
    pub fn open_in_memory(name: &str) -> Result<Self> {
        Self::from_backend(name, InMemoryBackend::new(), Role::Primary)
    }
}

impl<B: StorageBackend> Store<B> {
    /// Opens a primary store over an existing backend, replaying its log.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if the log cannot be read, or
    /// [`Error::Corrupted`] if replay fails.
    pub fn open_with_backend(name: &str, backend: B) -> Result<Self> {
        Self::from_backend(name, backend, Role::Primary)
    }

    pub(crate) fn from_backend(name: &str, backend: B, role: Role) -> Result<Self> {
        let bytes = backend.read_log()?;
        let (entries, clean_len) = decode_log_bytes(&bytes)?;

        if clean_len < bytes.len() {
            tracing::warn!(
                store = name,
                dropped = bytes.len() - clean_len,
                "truncating torn frame at log tail"
            );
            backend.truncate(clean_len as u64)?;
        }

        let mut buckets = BTreeMap::new();
        let mut expected = TxnId::ZERO;
        for entry in &entries {
            expected = expected.next();
            if entry.id != expected {
                return Err(Error::Corrupted {
                    reason: format!("expected transaction {expected}, found {}", entry.id),
                });
            }
            apply_ops(&mut buckets, entry, ReplayMode::Strict)?;
        }

        let last_txn_id = entries.last().map_or(TxnId::ZERO, |entry| entry.id);
        Ok(Self {
            name: name.to_string(),
            role,
            backend,
            committed: ArcSwap::from_pointee(CommittedState { buckets, last_txn_id }),
            log: Mutex::new(TransactionLog::from_entries(entries)),
            write_lock: Mutex::new(()),
            closed: AtomicBool::new(false),
        })
    }

    /// Name the store was opened under.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Identifier of the most recently committed transaction, or
    /// [`TxnId::ZERO`] for an empty store.
    pub fn last_txn_id(&self) -> TxnId {
        self.committed.load().last_txn_id
    }

    fn check_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::Closed);
        }
        Ok(())
    }

    /// Runs a read-only transaction against a consistent snapshot.
    ///
    /// The closure never blocks on writers and never observes a partially
    /// committed transaction.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Closed`] if the store has been closed, otherwise
    /// whatever the closure returns.
    pub fn read<T>(&self, f: impl FnOnce(&ReadTransaction) -> Result<T>) -> Result<T> {
        self.check_open()?;
        let txn = ReadTransaction::new(self.committed.load_full());
        f(&txn)
    }

    /// Runs a read-write transaction and commits it atomically.
    ///
    /// If the closure returns an error every mutation is discarded and the
    /// error is passed through. A closure that performs no mutations commits
    /// nothing and consumes no identifier.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Closed`] if the store has been closed,
    /// [`Error::ReadOnlyTransaction`] on a replica-role store, the closure's
    /// own error, or [`Error::Io`] if the commit cannot be made durable.
    pub fn update(&self, f: impl FnOnce(&mut WriteTransaction) -> Result<()>) -> Result<()> {
        self.check_open()?;
        if self.role == Role::Replica {
            return Err(Error::ReadOnlyTransaction);
        }

        let _guard = self.write_lock.lock();
        let snapshot = self.committed.load_full();
        let mut txn = WriteTransaction::new(&snapshot);
        f(&mut txn)?;

        let (buckets, ops) = txn.into_parts();
        if ops.is_empty() {
            return Ok(());
        }

        let id = snapshot.last_txn_id.next();
        self.commit(LogEntry { id, ops }, buckets)
    }

    /// Durably appends the entry, then publishes the new state. Caller must
    /// hold the write lock.
    fn commit(&self, entry: LogEntry, buckets: BTreeMap<String, Bucket>) -> Result<()> {
        let mut frame = Vec::new();
        entry.encode(&mut frame)?;
        self.backend.append(&frame)?;
        self.backend.sync()?;

        let id = entry.id;
        self.log.lock().append(entry);
        self.committed.store(Arc::new(CommittedState { buckets, last_txn_id: id }));
        Ok(())
    }

    /// Writes every committed transaction with identifier greater than
    /// `since` into the sink as encoded frames, in order.
    ///
    /// An empty export (nothing newer than `since`) writes zero bytes and
    /// succeeds.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidTransactionId`] if `since` is beyond the
    /// highest committed identifier, [`Error::Closed`] if the store has been
    /// closed, or [`Error::Io`] if the sink fails.
    pub fn export(&self, since: TxnId, sink: &mut dyn Write) -> Result<()> {
        self.check_open()?;

        // Encode under the log lock, write unlocked: a slow sink must not
        // stall commits.
        let mut frames = Vec::new();
        self.log.lock().export_to(since, &mut frames)?;
        sink.write_all(&frames)?;
        Ok(())
    }

    /// Replays one transaction recorded elsewhere, preserving its
    /// identifier.
    ///
    /// Returns `Ok(false)` without touching anything when the entry is at or
    /// below the local checkpoint (already applied); `Ok(true)` after a
    /// successful apply, which is durable before it returns.
    pub(crate) fn apply_log_entry(&self, entry: &LogEntry) -> Result<bool> {
        self.check_open()?;

        let _guard = self.write_lock.lock();
        let snapshot = self.committed.load_full();
        if entry.id <= snapshot.last_txn_id {
            return Ok(false);
        }
        if entry.id != snapshot.last_txn_id.next() {
            return Err(Error::Corrupted {
                reason: format!(
                    "replay gap: expected transaction {}, found {}",
                    snapshot.last_txn_id.next(),
                    entry.id
                ),
            });
        }

        let mut buckets = snapshot.buckets.clone();
        apply_ops(&mut buckets, entry, ReplayMode::Tolerant)?;
        self.commit(entry.clone(), buckets)?;
        Ok(true)
    }

    /// Closes the store after flushing the backend. Further transactions
    /// fail with [`Error::Closed`]; closing twice is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if the final flush fails.
    pub fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let _guard = self.write_lock.lock();
        self.backend.sync()
    }
}

/// How strictly replay treats operations that collide with existing state.
#[derive(Clone, Copy, PartialEq)]
enum ReplayMode {
    /// Recovery of a store's own log: every collision is corruption.
    Strict,
    /// Replay of a remote log: creating a bucket that already exists and is
    /// still empty is tolerated, anything else is a conflict.
    Tolerant,
}

fn apply_ops(
    buckets: &mut BTreeMap<String, Bucket>,
    entry: &LogEntry,
    mode: ReplayMode,
) -> Result<()> {
    let conflict = |bucket: &str| Error::ReplayConflict {
        bucket: bucket.to_string(),
        id: entry.id.raw(),
    };

    for op in &entry.ops {
        match op {
            Op::CreateBucket { bucket } => match buckets.get(bucket) {
                None => {
                    buckets.insert(bucket.clone(), Bucket::new());
                },
                Some(existing) if mode == ReplayMode::Tolerant && existing.is_empty() => {},
                Some(_) if mode == ReplayMode::Tolerant => return Err(conflict(bucket)),
                Some(_) => {
                    return Err(Error::Corrupted {
                        reason: format!(
                            "transaction {} creates existing bucket \"{bucket}\"",
                            entry.id
                        ),
                    });
                },
            },
            Op::Put { bucket, key, value } => match buckets.get_mut(bucket) {
                Some(target) => {
                    target.insert(key.clone(), value.clone());
                },
                None if mode == ReplayMode::Tolerant => return Err(conflict(bucket)),
                None => {
                    return Err(Error::Corrupted {
                        reason: format!(
                            "transaction {} writes to missing bucket \"{bucket}\"",
                            entry.id
                        ),
                    });
                },
            },
            Op::Delete { bucket, key } => match buckets.get_mut(bucket) {
                Some(target) => {
                    target.remove(key);
                },
                None if mode == ReplayMode::Tolerant => return Err(conflict(bucket)),
                None => {
                    return Err(Error::Corrupted {
                        reason: format!(
                            "transaction {} deletes from missing bucket \"{bucket}\"",
                            entry.id
                        ),
                    });
                },
            },
        }
    }
    Ok(())
}
