//! In-memory log persistence for tests and ephemeral stores.

use std::sync::Arc;

use parking_lot::RwLock;

use super::StorageBackend;
use crate::error::Result;

/// Keeps the log stream in a shared byte buffer.
///
/// Cloning shares the same buffer, which lets a test close a store and open
/// a new one over the "surviving" bytes to simulate a restart without
/// touching the filesystem.
#[derive(Debug, Clone, Default)]
pub struct InMemoryBackend {
    data: Arc<RwLock<Vec<u8>>>,
}

impl InMemoryBackend {
    /// Creates an empty backend.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current length of the stream in bytes.
    pub fn len(&self) -> usize {
        self.data.read().len()
    }

    /// Whether the stream is empty.
    pub fn is_empty(&self) -> bool {
        self.data.read().is_empty()
    }
}

impl StorageBackend for InMemoryBackend {
    fn read_log(&self) -> Result<Vec<u8>> {
        Ok(self.data.read().clone())
    }

    fn append(&self, bytes: &[u8]) -> Result<()> {
        self.data.write().extend_from_slice(bytes);
        Ok(())
    }

    fn truncate(&self, len: u64) -> Result<()> {
        self.data.write().truncate(len as usize);
        Ok(())
    }

    fn sync(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clone_shares_storage() {
        let backend = InMemoryBackend::new();
        let other = backend.clone();

        backend.append(b"shared").unwrap();
        assert_eq!(other.read_log().unwrap(), b"shared");
    }

    #[test]
    fn test_truncate() {
        let backend = InMemoryBackend::new();
        backend.append(b"abcdef").unwrap();
        backend.truncate(3).unwrap();
        assert_eq!(backend.read_log().unwrap(), b"abc");
    }
}
