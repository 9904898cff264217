//! Replication observability: event classes, verbosity filtering, and sinks.

use bitflags::bitflags;

use crate::log::TxnId;

bitflags! {
    /// Which classes of replication events an observer wants to receive.
    ///
    /// Flags combine with `|`; an event is delivered when its class is set
    /// in the active mask.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Verbosity: u8 {
        /// Failed replication cycles.
        const ERROR = 0b001;
        /// Individual transactions applied during a cycle.
        const NOTIFICATION = 0b010;
        /// Cycles that drained the import stream and left the replica
        /// current.
        const SUCCESS = 0b100;
    }
}

impl Default for Verbosity {
    fn default() -> Self {
        Verbosity::ERROR
    }
}

/// Something that happened during a replication cycle.
#[derive(Debug, Clone, PartialEq)]
pub enum ReplicationEvent {
    /// One transaction was replayed and committed locally.
    Applied {
        /// Identifier of the applied transaction.
        id: TxnId,
    },
    /// A cycle completed with no new transactions to apply.
    CaughtUp {
        /// The checkpoint that was already current.
        checkpoint: TxnId,
    },
    /// A cycle failed; the checkpoint did not move.
    Failed {
        /// The checkpoint at the time of the failure.
        checkpoint: TxnId,
        /// The transaction being applied when the failure occurred, if the
        /// cycle got that far.
        id: Option<TxnId>,
        /// Human-readable description of what went wrong.
        message: String,
    },
}

impl ReplicationEvent {
    /// The verbosity class this event belongs to.
    pub fn class(&self) -> Verbosity {
        match self {
            ReplicationEvent::Applied { .. } => Verbosity::NOTIFICATION,
            ReplicationEvent::CaughtUp { .. } => Verbosity::SUCCESS,
            ReplicationEvent::Failed { .. } => Verbosity::ERROR,
        }
    }
}

/// Receives replication events that pass the verbosity filter.
///
/// Called from the replication thread; implementations should return
/// quickly and must not call back into the replica.
pub trait EventSink: Send + Sync {
    /// Delivers one event for the named store.
    fn emit(&self, store: &str, event: ReplicationEvent);
}

/// Default sink that forwards events to the `tracing` subscriber.
#[derive(Debug, Default)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn emit(&self, store: &str, event: ReplicationEvent) {
        match event {
            ReplicationEvent::Applied { id } => {
                tracing::info!(store, txn_id = id.raw(), "applied replicated transaction");
            },
            ReplicationEvent::CaughtUp { checkpoint } => {
                tracing::debug!(store, checkpoint = checkpoint.raw(), "replica caught up");
            },
            ReplicationEvent::Failed { checkpoint, id, message } => {
                tracing::error!(
                    store,
                    checkpoint = checkpoint.raw(),
                    txn_id = id.map(TxnId::raw),
                    %message,
                    "replication cycle failed"
                );
            },
        }
    }
}
