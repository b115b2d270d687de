//! Storage backends for the journal.
//!
//! Backends are opaque byte stores: the journal owns all format
//! interpretation. Two implementations are provided: [`FileBackend`]
//! for persistent storage and [`InMemoryBackend`] for tests and
//! ephemeral stores.

use crate::error::StoreResult;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// A low-level byte store backing the journal.
///
/// # Invariants
///
/// - `append` returns the offset the data was written at
/// - `read_at` returns exactly the bytes previously appended there
/// - after `sync` returns, all appended data survives process termination
/// - `replace` atomically substitutes the entire contents; a crash during
///   `replace` leaves either the old or the new contents, never a mix
pub trait StorageBackend: Send {
    /// Reads `len` bytes starting at `offset`.
    ///
    /// Short reads are reported as `Ok` with a shorter buffer; the journal
    /// uses this to detect a torn tail record.
    fn read_at(&mut self, offset: u64, len: usize) -> StoreResult<Vec<u8>>;

    /// Appends data, returning the offset it was written at.
    fn append(&mut self, data: &[u8]) -> StoreResult<u64>;

    /// Makes all appended data durable before returning.
    fn sync(&mut self) -> StoreResult<()>;

    /// Current size in bytes.
    fn len(&self) -> u64;

    /// Returns true if the backend holds no data.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Atomically replaces the entire contents with `data` and syncs.
    ///
    /// Used by journal compaction to swap in a rewritten snapshot.
    fn replace(&mut self, data: &[u8]) -> StoreResult<()>;
}

/// File-backed storage. Data survives process restarts.
///
/// `replace` is implemented as write-to-sibling-then-rename so a crash
/// mid-compaction leaves the previous journal intact.
#[derive(Debug)]
pub struct FileBackend {
    path: PathBuf,
    file: File,
    len: u64,
}

impl FileBackend {
    /// Opens or creates the file at `path`, creating parent directories
    /// as needed.
    pub fn open(path: &Path) -> StoreResult<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;
        let len = file.metadata()?.len();
        Ok(Self {
            path: path.to_path_buf(),
            file,
            len,
        })
    }

    /// The path of the underlying file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl StorageBackend for FileBackend {
    fn read_at(&mut self, offset: u64, len: usize) -> StoreResult<Vec<u8>> {
        if offset >= self.len || len == 0 {
            return Ok(Vec::new());
        }
        let available = (self.len - offset).min(len as u64) as usize;
        self.file.seek(SeekFrom::Start(offset))?;
        let mut buffer = vec![0u8; available];
        self.file.read_exact(&mut buffer)?;
        Ok(buffer)
    }

    fn append(&mut self, data: &[u8]) -> StoreResult<u64> {
        let offset = self.len;
        if !data.is_empty() {
            self.file.seek(SeekFrom::End(0))?;
            self.file.write_all(data)?;
            self.len += data.len() as u64;
        }
        Ok(offset)
    }

    fn sync(&mut self) -> StoreResult<()> {
        self.file.sync_all()?;
        Ok(())
    }

    fn len(&self) -> u64 {
        self.len
    }

    fn replace(&mut self, data: &[u8]) -> StoreResult<()> {
        let tmp_path = self.path.with_extension("compact");
        {
            let mut tmp = File::create(&tmp_path)?;
            tmp.write_all(data)?;
            tmp.sync_all()?;
        }
        std::fs::rename(&tmp_path, &self.path)?;
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&self.path)?;
        self.file = file;
        self.len = data.len() as u64;
        self.sync()
    }
}

/// In-memory storage for tests and ephemeral stores.
#[derive(Debug, Default)]
pub struct InMemoryBackend {
    data: Vec<u8>,
}

impl InMemoryBackend {
    /// Creates an empty backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a backend preloaded with `data`, for recovery tests.
    #[must_use]
    pub fn with_data(data: Vec<u8>) -> Self {
        Self { data }
    }

    /// A copy of all stored bytes.
    #[must_use]
    pub fn data(&self) -> Vec<u8> {
        self.data.clone()
    }
}

impl StorageBackend for InMemoryBackend {
    fn read_at(&mut self, offset: u64, len: usize) -> StoreResult<Vec<u8>> {
        let start = (offset as usize).min(self.data.len());
        let end = start.saturating_add(len).min(self.data.len());
        Ok(self.data[start..end].to_vec())
    }

    fn append(&mut self, data: &[u8]) -> StoreResult<u64> {
        let offset = self.data.len() as u64;
        self.data.extend_from_slice(data);
        Ok(offset)
    }

    fn sync(&mut self) -> StoreResult<()> {
        Ok(())
    }

    fn len(&self) -> u64 {
        self.data.len() as u64
    }

    fn replace(&mut self, data: &[u8]) -> StoreResult<()> {
        self.data = data.to_vec();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn memory_append_and_read() {
        let mut backend = InMemoryBackend::new();
        assert!(backend.is_empty());

        let off = backend.append(b"alpha").unwrap();
        assert_eq!(off, 0);
        assert_eq!(backend.append(b"beta").unwrap(), 5);
        assert_eq!(backend.len(), 9);
        assert_eq!(backend.read_at(5, 4).unwrap(), b"beta");
    }

    #[test]
    fn memory_short_read_at_tail() {
        let mut backend = InMemoryBackend::new();
        backend.append(b"abc").unwrap();

        // Reads past the end are short, not errors.
        assert_eq!(backend.read_at(1, 100).unwrap(), b"bc");
        assert!(backend.read_at(10, 4).unwrap().is_empty());
    }

    #[test]
    fn memory_replace_swaps_contents() {
        let mut backend = InMemoryBackend::with_data(b"old contents".to_vec());
        backend.replace(b"new").unwrap();
        assert_eq!(backend.len(), 3);
        assert_eq!(backend.data(), b"new");
    }

    #[test]
    fn file_persists_across_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("journal.bin");

        {
            let mut backend = FileBackend::open(&path).unwrap();
            backend.append(b"durable bytes").unwrap();
            backend.sync().unwrap();
        }

        let mut backend = FileBackend::open(&path).unwrap();
        assert_eq!(backend.len(), 13);
        assert_eq!(backend.read_at(0, 13).unwrap(), b"durable bytes");
    }

    #[test]
    fn file_creates_parent_dirs() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a").join("b").join("journal.bin");
        let backend = FileBackend::open(&path).unwrap();
        assert_eq!(backend.len(), 0);
        assert!(path.exists());
    }

    #[test]
    fn file_replace_survives_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("journal.bin");

        {
            let mut backend = FileBackend::open(&path).unwrap();
            backend.append(b"a very long stretch of old data").unwrap();
            backend.sync().unwrap();
            backend.replace(b"snapshot").unwrap();
            // The backend stays usable after the swap.
            backend.append(b"+tail").unwrap();
            backend.sync().unwrap();
        }

        let mut backend = FileBackend::open(&path).unwrap();
        assert_eq!(backend.read_at(0, 13).unwrap(), b"snapshot+tail");
        assert!(!path.with_extension("compact").exists());
    }

    #[test]
    fn file_short_read_at_tail() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("journal.bin");
        let mut backend = FileBackend::open(&path).unwrap();
        backend.append(b"hello").unwrap();

        assert_eq!(backend.read_at(3, 50).unwrap(), b"lo");
        assert!(backend.read_at(50, 4).unwrap().is_empty());
    }
}
