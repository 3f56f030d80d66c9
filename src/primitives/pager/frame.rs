use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::types::PageIdx;

use super::FileHandle;

/// One cached page image plus its pin and dirty state.
pub(crate) struct Frame {
    pub(crate) file: Arc<FileHandle>,
    pub(crate) page_idx: PageIdx,
    pub(crate) buf: RwLock<Box<[u8]>>,
    pin_count: AtomicU32,
    dirty: AtomicBool,
}

impl Frame {
    pub(crate) fn new(file: Arc<FileHandle>, page_idx: PageIdx, buf: Box<[u8]>) -> Self {
        Self {
            file,
            page_idx,
            buf: RwLock::new(buf),
            pin_count: AtomicU32::new(0),
            dirty: AtomicBool::new(false),
        }
    }

    pub(crate) fn pin(&self) {
        self.pin_count.fetch_add(1, Ordering::AcqRel);
    }

    pub(crate) fn unpin(&self) {
        let prev = self.pin_count.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(prev > 0, "unpin of an unpinned frame");
    }

    pub(crate) fn is_pinned(&self) -> bool {
        self.pin_count.load(Ordering::Acquire) > 0
    }

    pub(crate) fn mark_dirty(&self) {
        self.dirty.store(true, Ordering::Release);
    }

    pub(crate) fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Acquire)
    }

    /// Writes the image back if dirty. Returns whether a write happened.
    pub(crate) fn write_back(&self) -> crate::types::Result<bool> {
        if !self.dirty.swap(false, Ordering::AcqRel) {
            return Ok(false);
        }
        let buf = self.buf.read();
        if let Err(err) = self.file.io().write_page(self.page_idx, &buf) {
            self.dirty.store(true, Ordering::Release);
            return Err(err);
        }
        Ok(true)
    }
}
