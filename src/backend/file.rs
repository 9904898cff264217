//! File-based log persistence.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use parking_lot::Mutex;

use super::StorageBackend;
use crate::error::Result;

/// Stores the log as a single append-only file on disk.
///
/// The file handle is kept open for the lifetime of the backend and guarded
/// by a mutex so appends, truncation, and full reads never interleave.
#[derive(Debug)]
pub struct FileBackend {
    path: PathBuf,
    file: Mutex<File>,
}

impl FileBackend {
    /// Opens the log file at `path`, creating it if absent.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Io`] if the file cannot be opened or created.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new().read(true).write(true).create(true).open(&path)?;
        Ok(Self { path, file: Mutex::new(file) })
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl StorageBackend for FileBackend {
    fn read_log(&self) -> Result<Vec<u8>> {
        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(0))?;
        let mut bytes = Vec::new();
        file.read_to_end(&mut bytes)?;
        Ok(bytes)
    }

    fn append(&self, bytes: &[u8]) -> Result<()> {
        let mut file = self.file.lock();
        file.seek(SeekFrom::End(0))?;
        file.write_all(bytes)?;
        Ok(())
    }

    fn truncate(&self, len: u64) -> Result<()> {
        let file = self.file.lock();
        file.set_len(len)?;
        file.sync_data()?;
        Ok(())
    }

    fn sync(&self) -> Result<()> {
        let file = self.file.lock();
        file.sync_data()?;
        Ok(())
    }
}
