//! Page access for one structure file under the shadow-page protocol.

use std::sync::Arc;

use parking_lot::{RwLockReadGuard, RwLockWriteGuard};

use crate::primitives::concurrency::PageLockGuard;
use crate::primitives::pager::{BufferManager, FileHandle, PinnedPage};
use crate::primitives::wal::Wal;
use crate::storage::metrics::ObservabilityContext;
use crate::storage::transaction::{Transaction, TransactionType};
use crate::types::{PageIdx, Result};

/// A file plus the buffer manager and WAL that guard its pages.
#[derive(Clone)]
pub struct StorageStructure {
    file: Arc<FileHandle>,
    bm: Arc<BufferManager>,
    wal: Arc<Wal>,
    obs: ObservabilityContext,
}

/// Pinned shadow of a page, held together with the original page's lock.
///
/// Field order matters: the shadow is unpinned before the lock is released.
pub struct ShadowPage<'a> {
    pinned: PinnedPage,
    original: PageIdx,
    _lock: PageLockGuard<'a>,
}

impl ShadowPage<'_> {
    /// Physical index of the original page being shadowed.
    pub fn original(&self) -> PageIdx {
        self.original
    }

    /// Shadow bytes.
    pub fn read(&self) -> RwLockReadGuard<'_, Box<[u8]>> {
        self.pinned.read()
    }

    /// Mutable shadow bytes.
    pub fn write(&self) -> RwLockWriteGuard<'_, Box<[u8]>> {
        self.pinned.write()
    }
}

impl StorageStructure {
    /// Binds `file` to the page cache and WAL.
    pub fn new(
        file: Arc<FileHandle>,
        bm: Arc<BufferManager>,
        wal: Arc<Wal>,
        obs: ObservabilityContext,
    ) -> Self {
        Self { file, bm, wal, obs }
    }

    /// Underlying file.
    pub fn file(&self) -> &Arc<FileHandle> {
        &self.file
    }

    /// Shared buffer manager.
    pub fn buffer_manager(&self) -> &Arc<BufferManager> {
        &self.bm
    }

    /// Observability handle of the owner.
    pub fn obs(&self) -> &ObservabilityContext {
        &self.obs
    }

    /// Pins the version of `page` that a transaction of `kind` may see:
    /// the shadow for a writer that has one, the original otherwise.
    pub fn pin_for_read(&self, kind: TransactionType, page: PageIdx) -> Result<PinnedPage> {
        if kind == TransactionType::Write {
            if let Some(shadow) = self.wal.shadow_of(self.file.id(), page) {
                return self.wal.pin_shadow(shadow);
            }
        }
        self.bm.pin(&self.file, page)
    }

    /// Returns the shadow of `page` for mutation, creating it on first use.
    ///
    /// Never hold two `ShadowPage`s for the same page at once; the page lock
    /// is not reentrant.
    pub fn update_page(&self, txn: &Transaction, page: PageIdx) -> Result<ShadowPage<'_>> {
        txn.require_write()?;
        let lock = self.wal.lock_page(self.file.id(), page);
        let (shadow, created) = self.wal.get_or_create_shadow(&self.file, page)?;
        if created {
            self.obs.metrics().shadow_page_created();
        }
        let pinned = self.wal.pin_shadow(shadow)?;
        Ok(ShadowPage {
            pinned,
            original: page,
            _lock: lock,
        })
    }

    /// Allocates a page at the end of the file. Its contents start zeroed.
    pub fn add_new_page(&self) -> PageIdx {
        self.file.add_new_page()
    }

    /// Logical page count of the file.
    pub fn num_pages(&self) -> u32 {
        self.file.num_pages()
    }

    /// Accepts pages allocated by the finished transaction.
    pub fn checkpoint_in_memory(&self) {
        self.file.checkpoint_page_count();
    }

    /// Forgets pages allocated by the aborted transaction.
    pub fn rollback_in_memory(&self) {
        self.file.rollback_page_count();
    }
}
