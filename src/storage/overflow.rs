//! Append-only byte store for element payloads that do not fit a slot.
//!
//! Page 0 records the next write position; payload bytes start at page 1
//! and may straddle page boundaries. Writes are not shadowed: bytes written
//! by a transaction that later rolls back stay behind unreferenced.

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use crate::primitives::bytes::le;
use crate::primitives::pager::{BufferManager, FileHandle};
use crate::types::{PageIdx, Result, StorageError, PAGE_SIZE};

/// Byte position of a payload inside an overflow store.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OverflowPtr(pub u64);

/// Storage for out-of-line element bytes.
pub trait OverflowStore: Send + Sync {
    /// Copies `bytes` into the store and returns where they landed.
    fn write_bytes(&self, bytes: &[u8]) -> Result<OverflowPtr>;

    /// Reads `len` bytes starting at `ptr`.
    fn read_bytes(&self, ptr: OverflowPtr, len: usize) -> Result<Vec<u8>>;

    /// Makes written bytes durable.
    fn flush(&self) -> Result<()> {
        Ok(())
    }
}

const DATA_START: u64 = PAGE_SIZE as u64;

/// [`OverflowStore`] backed by a page file in the buffer manager.
pub struct OverflowFile {
    file: Arc<FileHandle>,
    bm: Arc<BufferManager>,
    next: Mutex<u64>,
}

impl OverflowFile {
    /// Opens an overflow file, initialising it when empty.
    pub fn open(bm: Arc<BufferManager>, path: impl AsRef<Path>) -> Result<Self> {
        let file = bm.open_file(path)?;
        Self::attach(bm, file)
    }

    /// Creates an empty overflow file, replacing any existing one.
    pub fn create(bm: Arc<BufferManager>, path: impl AsRef<Path>) -> Result<Self> {
        let file = bm.create_file(path)?;
        Self::attach(bm, file)
    }

    fn attach(bm: Arc<BufferManager>, file: Arc<FileHandle>) -> Result<Self> {
        let next = if file.num_pages() == 0 {
            file.reserve_pages(1);
            le::put_u64(&mut bm.pin(&file, 0)?.write(), 0, DATA_START);
            DATA_START
        } else {
            let page = bm.pin(&file, 0)?;
            let next = le::read_u64_checked(&page.read(), 0)?;
            if next < DATA_START {
                return Err(StorageError::format(format!(
                    "overflow file write position {next} precedes the data region"
                )));
            }
            next
        };
        Ok(Self {
            file,
            bm,
            next: Mutex::new(next),
        })
    }

    /// Bytes of payload stored so far.
    pub fn len(&self) -> u64 {
        *self.next.lock() - DATA_START
    }

    /// True if nothing was written yet.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn page_span(pos: u64) -> (PageIdx, usize) {
        ((pos / PAGE_SIZE as u64) as PageIdx, (pos % PAGE_SIZE as u64) as usize)
    }
}

impl OverflowStore for OverflowFile {
    fn write_bytes(&self, bytes: &[u8]) -> Result<OverflowPtr> {
        let mut next = self.next.lock();
        let start = *next;
        let end = start + bytes.len() as u64;
        self.file
            .reserve_pages(end.div_ceil(PAGE_SIZE as u64) as u32);
        let mut pos = start;
        let mut rest = bytes;
        while !rest.is_empty() {
            let (page, offset) = Self::page_span(pos);
            let take = rest.len().min(PAGE_SIZE - offset);
            self.bm.pin(&self.file, page)?.write()[offset..offset + take]
                .copy_from_slice(&rest[..take]);
            rest = &rest[take..];
            pos += take as u64;
        }
        le::put_u64(&mut self.bm.pin(&self.file, 0)?.write(), 0, end);
        *next = end;
        Ok(OverflowPtr(start))
    }

    fn read_bytes(&self, ptr: OverflowPtr, len: usize) -> Result<Vec<u8>> {
        let end = ptr.0 + len as u64;
        let limit = *self.next.lock();
        if ptr.0 < DATA_START || end > limit {
            return Err(StorageError::out_of_bounds("overflow byte", end, limit));
        }
        let mut out = Vec::with_capacity(len);
        let mut pos = ptr.0;
        while pos < end {
            let (page, offset) = Self::page_span(pos);
            let take = ((end - pos) as usize).min(PAGE_SIZE - offset);
            let pinned = self.bm.pin(&self.file, page)?;
            out.extend_from_slice(&pinned.read()[offset..offset + take]);
            pos += take as u64;
        }
        Ok(out)
    }

    fn flush(&self) -> Result<()> {
        self.bm.flush_file(&self.file)?;
        debug!(bytes = self.len(), "overflow.flush");
        Ok(())
    }
}

impl fmt::Debug for OverflowFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OverflowFile")
            .field("path", &self.file.path())
            .field("len", &self.len())
            .finish()
    }
}
