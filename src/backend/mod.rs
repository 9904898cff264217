//! Pluggable durability for the transaction log.
//!
//! A backend stores one append-only byte stream. The store composes frames
//! above it; the backend's only jobs are to return the stream on open,
//! append atomically with respect to other backend calls, cut a torn tail
//! off, and make appended bytes durable on request.

mod file;
mod memory;

pub use file::FileBackend;
pub use memory::InMemoryBackend;

use crate::error::Result;

/// Byte-stream persistence for a transaction log.
///
/// Implementations must be safe to share across threads; the store
/// serializes writes itself, but reads of the stream may come from any
/// thread.
pub trait StorageBackend: Send + Sync + 'static {
    /// Reads the entire current log stream.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Io`] if the stream cannot be read.
    fn read_log(&self) -> Result<Vec<u8>>;

    /// Appends bytes at the end of the stream.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Io`] if the write fails.
    fn append(&self, bytes: &[u8]) -> Result<()>;

    /// Shortens the stream to `len` bytes, discarding everything after.
    ///
    /// Used once at open to drop a torn trailing frame.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Io`] if the truncation fails.
    fn truncate(&self, len: u64) -> Result<()>;

    /// Forces previously appended bytes to durable storage.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Io`] if the flush fails.
    fn sync(&self) -> Result<()>;
}
