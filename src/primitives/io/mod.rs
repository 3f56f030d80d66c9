#![forbid(unsafe_code)]

use std::{
    fs::{File, OpenOptions},
    io,
    path::{Path, PathBuf},
    sync::Arc,
};

use tracing::trace;

use crate::types::{PageIdx, Result, PAGE_SIZE};

#[cfg(unix)]
fn read_at(file: &File, dst: &mut [u8], off: u64) -> io::Result<usize> {
    use std::os::unix::fs::FileExt;
    file.read_at(dst, off)
}

#[cfg(windows)]
fn read_at(file: &File, dst: &mut [u8], off: u64) -> io::Result<usize> {
    use std::os::windows::fs::FileExt;
    file.seek_read(dst, off)
}

#[cfg(unix)]
fn write_at(file: &File, src: &[u8], off: u64) -> io::Result<usize> {
    use std::os::unix::fs::FileExt;
    file.write_at(src, off)
}

#[cfg(windows)]
fn write_at(file: &File, src: &[u8], off: u64) -> io::Result<usize> {
    use std::os::windows::fs::FileExt;
    file.seek_write(src, off)
}

/// Positioned, page-granular access to one file.
///
/// Pages past the end of the file read back as zeros, which lets callers
/// allocate page indices ahead of the bytes that eventually back them.
#[derive(Clone, Debug)]
pub struct PageFile {
    inner: Arc<File>,
    path: PathBuf,
}

impl PageFile {
    /// Opens or creates `path` without truncating it.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;
        Ok(Self {
            inner: Arc::new(file),
            path: path.to_path_buf(),
        })
    }

    /// Creates `path`, discarding any previous contents.
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        Ok(Self {
            inner: Arc::new(file),
            path: path.to_path_buf(),
        })
    }

    /// Path the file was opened from.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current length in bytes.
    pub fn len(&self) -> Result<u64> {
        Ok(self.inner.metadata()?.len())
    }

    /// Returns true if the file holds no bytes.
    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Number of pages that have at least one byte on disk.
    pub fn num_pages_on_disk(&self) -> Result<u32> {
        let len = self.len()?;
        Ok(len.div_ceil(PAGE_SIZE as u64) as u32)
    }

    /// Reads page `idx` into `dst`, zero-filling anything past EOF.
    pub fn read_page(&self, idx: PageIdx, dst: &mut [u8]) -> Result<()> {
        debug_assert_eq!(dst.len(), PAGE_SIZE);
        let mut off = page_offset(idx);
        let mut filled = 0usize;
        while filled < dst.len() {
            let read = read_at(&self.inner, &mut dst[filled..], off)?;
            if read == 0 {
                dst[filled..].fill(0);
                break;
            }
            filled += read;
            off += read as u64;
        }
        trace!(page = idx, filled, path = %self.path.display(), "io.read_page");
        Ok(())
    }

    /// Writes `src` as page `idx`.
    pub fn write_page(&self, idx: PageIdx, src: &[u8]) -> Result<()> {
        debug_assert_eq!(src.len(), PAGE_SIZE);
        self.write_all_at(page_offset(idx), src)
    }

    /// Writes all of `src` at byte offset `off`.
    pub fn write_all_at(&self, mut off: u64, mut src: &[u8]) -> Result<()> {
        while !src.is_empty() {
            let written = write_at(&self.inner, src, off)?;
            if written == 0 {
                return Err(io::Error::new(io::ErrorKind::WriteZero, "write_at wrote zero bytes").into());
            }
            src = &src[written..];
            off += written as u64;
        }
        Ok(())
    }

    /// Truncates (or extends) the file to exactly `pages` pages.
    pub fn truncate_pages(&self, pages: u32) -> Result<()> {
        self.inner.set_len(u64::from(pages) * PAGE_SIZE as u64)?;
        Ok(())
    }

    /// Flushes file data and metadata to stable storage.
    pub fn sync(&self) -> Result<()> {
        self.inner.sync_all()?;
        Ok(())
    }
}

fn page_offset(idx: PageIdx) -> u64 {
    u64::from(idx) * PAGE_SIZE as u64
}
