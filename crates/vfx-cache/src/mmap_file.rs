//! RAII wrapper over a named, resizable, memory-mapped file.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use memmap2::MmapMut;

use crate::error::{CacheError, CacheResult};

/// How [`MemoryFile::open`] should treat an existing path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    /// Reuse the file at `path` if it exists, otherwise create it.
    KeepOrCreate,
    /// Fail if the file at `path` does not already exist.
    KeepOrFail,
}

/// A memory-mapped file of a known byte size.
///
/// Dropping a `MemoryFile` unmaps and closes the underlying file descriptor
/// but never unlinks the path — unlinking is the owning cache's
/// responsibility at eviction time, so that a freshly evicted path is
/// immediately reusable.
pub struct MemoryFile {
    path: PathBuf,
    file: File,
    mmap: Option<MmapMut>,
}

impl MemoryFile {
    /// Opens (or creates) `path`, ensuring it is exactly `size` bytes and
    /// mapped for read/write.
    pub fn open(path: impl Into<PathBuf>, mode: OpenMode, size: u64) -> CacheResult<Self> {
        let path = path.into();
        let existed = path.exists();
        if mode == OpenMode::KeepOrFail && !existed {
            return Err(CacheError::FileNotFound(path));
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(mode == OpenMode::KeepOrCreate)
            .truncate(false)
            .open(&path)
            .map_err(CacheError::Io)?;

        let mut mem_file = MemoryFile { path, file, mmap: None };
        let current_len = mem_file.file.metadata().map_err(CacheError::Io)?.len();
        if current_len != size {
            mem_file.resize(size)?;
        } else {
            mem_file.remap()?;
        }
        Ok(mem_file)
    }

    fn remap(&mut self) -> CacheResult<()> {
        self.mmap = None;
        let len = self.file.metadata().map_err(CacheError::Io)?.len();
        if len == 0 {
            return Ok(());
        }
        let mmap = unsafe { MmapMut::map_mut(&self.file) }
            .map_err(|_| CacheError::MapFailed(self.path.clone()))?;
        self.mmap = Some(mmap);
        Ok(())
    }

    /// Expands or shrinks the backing file to `new_size` bytes and remaps,
    /// preserving existing content up to the smaller of the old and new
    /// sizes.
    pub fn resize(&mut self, new_size: u64) -> CacheResult<()> {
        self.file.set_len(new_size).map_err(CacheError::Io)?;
        self.remap()
    }

    /// The mapped bytes. Empty if the file is zero-length.
    pub fn data(&self) -> &[u8] {
        self.mmap.as_deref().unwrap_or(&[])
    }

    /// The mapped bytes, mutable.
    pub fn data_mut(&mut self) -> &mut [u8] {
        self.mmap.as_deref_mut().unwrap_or(&mut [])
    }

    /// Current size of the backing file in bytes.
    pub fn size(&self) -> u64 {
        self.mmap.as_ref().map(|m| m.len() as u64).unwrap_or(0)
    }

    /// Alias for [`size`](Self::size); this implementation never
    /// over-allocates beyond the requested size.
    pub fn capacity(&self) -> u64 {
        self.size()
    }

    /// The path this file is backed by.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Requests durability of the mapped pages; best-effort.
    pub fn flush(&self) -> CacheResult<()> {
        if let Some(mmap) = &self.mmap {
            mmap.flush().map_err(CacheError::Io)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn create_then_write_then_reopen_keep_or_fail() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("entry.powc");

        {
            let mut mf = MemoryFile::open(&path, OpenMode::KeepOrCreate, 16).unwrap();
            assert_eq!(mf.size(), 16);
            mf.data_mut()[0] = 0xAB;
            mf.flush().unwrap();
        }

        let mf = MemoryFile::open(&path, OpenMode::KeepOrFail, 16).unwrap();
        assert_eq!(mf.data()[0], 0xAB);
    }

    #[test]
    fn keep_or_fail_errors_on_missing_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("missing.powc");
        let result = MemoryFile::open(&path, OpenMode::KeepOrFail, 16);
        assert!(matches!(result, Err(CacheError::FileNotFound(_))));
    }

    #[test]
    fn resize_preserves_prefix() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("grow.powc");
        let mut mf = MemoryFile::open(&path, OpenMode::KeepOrCreate, 8).unwrap();
        mf.data_mut().copy_from_slice(&[1, 2, 3, 4, 5, 6, 7, 8]);
        mf.resize(16).unwrap();
        assert_eq!(mf.size(), 16);
        assert_eq!(&mf.data()[0..8], &[1, 2, 3, 4, 5, 6, 7, 8]);
    }

    #[test]
    fn drop_unmaps_but_does_not_unlink() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("persist.powc");
        {
            let _mf = MemoryFile::open(&path, OpenMode::KeepOrCreate, 4).unwrap();
        }
        assert!(path.exists());
    }
}
