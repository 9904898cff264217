//! Error types for the terrapin store.

use std::io;

use snafu::Snafu;

/// Result type alias for terrapin operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur during store and replication operations.
#[derive(Debug, Snafu)]
pub enum Error {
    /// I/O error from the underlying storage backend.
    #[snafu(display("I/O error: {source}"))]
    Io {
        /// The underlying I/O error.
        source: io::Error,
    },

    /// The requested key is absent from the bucket in the current
    /// transaction's view.
    #[snafu(display("key \"{key}\" does not exist"))]
    KeyDoesNotExist {
        /// The missing key.
        key: String,
    },

    /// The requested bucket is absent from the store in the current
    /// transaction's view.
    #[snafu(display("bucket \"{name}\" does not exist"))]
    BucketDoesNotExist {
        /// The missing bucket name.
        name: String,
    },

    /// A bucket with this name already exists.
    #[snafu(display("bucket \"{name}\" already exists"))]
    BucketExists {
        /// The conflicting bucket name.
        name: String,
    },

    /// The value cannot be encoded for storage.
    #[snafu(display("invalid value: {reason}"))]
    InvalidValue {
        /// Why the value was rejected.
        reason: String,
    },

    /// A value could not be interpreted as the requested shape.
    #[snafu(display("invalid type: expected {expected}, found {found}"))]
    InvalidType {
        /// The variant the caller asked for.
        expected: &'static str,
        /// The variant actually stored.
        found: &'static str,
    },

    /// Mutation attempted through a read-only path (e.g. `update` on a
    /// replica-role store, whose history may only advance through replay).
    #[snafu(display("transaction is read-only"))]
    ReadOnlyTransaction,

    /// Export was asked to start beyond the highest committed identifier.
    #[snafu(display(
        "invalid transaction ID: {requested} is beyond the highest committed ID {highest}"
    ))]
    InvalidTransactionId {
        /// The identifier the caller asked to export from.
        requested: u64,
        /// The highest committed identifier at the time of the call.
        highest: u64,
    },

    /// The transaction log is malformed beyond recovery.
    #[snafu(display("corrupted transaction log: {reason}"))]
    Corrupted {
        /// Description of what was corrupted.
        reason: String,
    },

    /// A byte stream could not be decoded into log entries or values.
    #[snafu(display("decode error: {reason}"))]
    Decode {
        /// Description of the malformed input.
        reason: String,
    },

    /// Replay found local state that conflicts with a recorded operation.
    #[snafu(display("replay conflict in bucket \"{bucket}\" at transaction {id}"))]
    ReplayConflict {
        /// The bucket whose local content diverged.
        bucket: String,
        /// The transaction being replayed.
        id: u64,
    },

    /// The Importer collaborator failed to produce a stream.
    #[snafu(display("import failed: {reason}"))]
    Import {
        /// Description of the transport failure.
        reason: String,
    },

    /// The store has been closed; no further transactions are accepted.
    #[snafu(display("store is closed"))]
    Closed,
}

// Automatic conversion from io::Error for ergonomic ? usage.
impl From<io::Error> for Error {
    fn from(source: io::Error) -> Self {
        Error::Io { source }
    }
}
