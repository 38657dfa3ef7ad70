//! Positioned file access.
//!
//! Every on-disk file the engine touches is wrapped in a [`DataFile`]: a
//! shared file handle tagged with a process-unique id. The id, not the
//! path, keys the page cache, so two opens of the same path are distinct
//! cache namespaces; the engine opens each file exactly once.

use std::fs::{File, OpenOptions};
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use crate::error::Result;

static NEXT_FILE_ID: AtomicU32 = AtomicU32::new(0);

/// Process-unique identity of an open file, used as a cache key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FileId(pub u32);

/// A shared, id-tagged file open for positioned reads and writes.
#[derive(Debug, Clone)]
pub struct DataFile {
    pub id: FileId,
    file: Arc<File>,
    path: PathBuf,
}

impl DataFile {
    /// Open an existing file read-write.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let file = OpenOptions::new().read(true).write(true).open(&path)?;
        Ok(Self::wrap(file, path.as_ref().to_owned()))
    }

    /// Create (or truncate) a file read-write.
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)?;
        Ok(Self::wrap(file, path.as_ref().to_owned()))
    }

    fn wrap(file: File, path: PathBuf) -> Self {
        Self {
            id: FileId(NEXT_FILE_ID.fetch_add(1, Ordering::Relaxed)),
            file: Arc::new(file),
            path,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> Result<u64> {
        Ok(self.file.metadata()?.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Read up to `buf.len()` bytes at `offset`. Returns the byte count;
    /// short reads past end-of-file are the caller's to interpret.
    pub fn read_at(&self, buf: &mut [u8], offset: u64) -> std::io::Result<usize> {
        let mut total = 0;
        while total < buf.len() {
            match self.file.read_at(&mut buf[total..], offset + total as u64) {
                Ok(0) => break,
                Ok(n) => total += n,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(total)
    }

    pub fn write_all_at(&self, buf: &[u8], offset: u64) -> std::io::Result<()> {
        self.file.write_all_at(buf, offset)
    }

    /// Replace the file contents with `buf`.
    pub fn overwrite(&self, buf: &[u8]) -> Result<()> {
        self.file.set_len(0)?;
        self.file.write_all_at(buf, 0)?;
        Ok(())
    }

    /// Read the whole file into memory.
    pub fn read_all(&self) -> Result<Vec<u8>> {
        let len = self.len()? as usize;
        let mut buf = vec![0u8; len];
        self.read_at(&mut buf, 0)?;
        Ok(buf)
    }
}
