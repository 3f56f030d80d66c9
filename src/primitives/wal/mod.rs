#![forbid(unsafe_code)]

//! Shadow-page write-ahead log.
//!
//! A write transaction never modifies an original page. The first write to a
//! page copies it into the shadow file (`wal.shadow`); later writes hit that
//! copy. Commit makes the shadow images durable and appends one record per
//! shadowed page plus a commit record to `wal.log`. Checkpoint copies the
//! shadows over the originals and truncates both files; rollback just
//! truncates them.

mod log;

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tracing::{debug, info};

use crate::primitives::concurrency::{PageLockGuard, PageLockTable};
use crate::primitives::io::PageFile;
use crate::primitives::pager::{BufferManager, FileHandle, PinnedPage};
use crate::types::{FileId, PageIdx, Result, PAGE_SIZE};

use log::{WalLog, WalRecord};

/// File holding shadow page images.
pub const WAL_SHADOW_FILE: &str = "wal.shadow";
/// File holding the record log.
pub const WAL_LOG_FILE: &str = "wal.log";

struct ShadowRecord {
    file: Arc<FileHandle>,
    original: PageIdx,
    shadow: PageIdx,
}

#[derive(Default)]
struct ShadowTable {
    index: FxHashMap<(FileId, PageIdx), usize>,
    records: Vec<ShadowRecord>,
}

/// The shadow-page WAL shared by every structure of one storage directory.
pub struct Wal {
    bm: Arc<BufferManager>,
    shadow_file: Arc<FileHandle>,
    log: Mutex<WalLog>,
    shadows: Mutex<ShadowTable>,
    page_locks: PageLockTable,
}

impl Wal {
    /// Opens the WAL in `dir`, first replaying any committed transaction that
    /// was not checkpointed.
    pub fn open(dir: &Path, bm: Arc<BufferManager>, sync_enabled: bool) -> Result<Self> {
        let shadow_path = dir.join(WAL_SHADOW_FILE);
        let mut log = WalLog::open(&dir.join(WAL_LOG_FILE), sync_enabled)?;
        {
            let shadow_io = PageFile::open(&shadow_path)?;
            let replayed = replay_committed(&mut log, &shadow_io)?;
            if replayed > 0 {
                info!(pages = replayed, "wal.recovered");
            }
            log.reset()?;
            shadow_io.truncate_pages(0)?;
            shadow_io.sync()?;
        }
        let shadow_file = bm.open_file(&shadow_path)?;
        Ok(Self {
            bm,
            shadow_file,
            log: Mutex::new(log),
            shadows: Mutex::new(ShadowTable::default()),
            page_locks: PageLockTable::new(),
        })
    }

    /// Shadow page for `(file, page)`, if this transaction created one.
    pub fn shadow_of(&self, file: FileId, page: PageIdx) -> Option<PageIdx> {
        let shadows = self.shadows.lock();
        shadows
            .index
            .get(&(file, page))
            .map(|&i| shadows.records[i].shadow)
    }

    /// Number of pages shadowed by the active write transaction.
    pub fn num_shadow_pages(&self) -> usize {
        self.shadows.lock().records.len()
    }

    /// Takes the original page's lock; hold it until the shadow is unpinned.
    pub fn lock_page(&self, file: FileId, page: PageIdx) -> PageLockGuard<'_> {
        self.page_locks.lock(file, page)
    }

    /// Returns the shadow of `original`, copying the page first if needed.
    /// The flag reports whether a new shadow was created.
    pub fn get_or_create_shadow(
        &self,
        file: &Arc<FileHandle>,
        original: PageIdx,
    ) -> Result<(PageIdx, bool)> {
        let mut shadows = self.shadows.lock();
        if let Some(&i) = shadows.index.get(&(file.id(), original)) {
            return Ok((shadows.records[i].shadow, false));
        }
        let shadow = self.shadow_file.add_new_page();
        {
            let src = self.bm.pin(file, original)?;
            let dst = self.bm.pin(&self.shadow_file, shadow)?;
            dst.write().copy_from_slice(&src.read());
        }
        let slot = shadows.records.len();
        shadows.records.push(ShadowRecord {
            file: Arc::clone(file),
            original,
            shadow,
        });
        shadows.index.insert((file.id(), original), slot);
        debug!(file = file.id().0, original, shadow, "wal.shadow_created");
        Ok((shadow, true))
    }

    /// Pins a shadow page.
    pub fn pin_shadow(&self, shadow: PageIdx) -> Result<PinnedPage> {
        self.bm.pin(&self.shadow_file, shadow)
    }

    /// Makes the active transaction durable: shadow images first, then the
    /// page-update records and the commit record.
    pub fn commit(&self, txn_id: u64) -> Result<()> {
        let shadows = self.shadows.lock();
        if shadows.records.is_empty() {
            return Ok(());
        }
        self.bm.flush_file(&self.shadow_file)?;
        let mut log = self.log.lock();
        for record in &shadows.records {
            log.append(
                txn_id,
                &WalRecord::PageUpdate {
                    path: record.file.path().to_path_buf(),
                    original: record.original,
                    shadow: record.shadow,
                },
            )?;
        }
        log.append(txn_id, &WalRecord::Commit)?;
        log.sync()?;
        debug!(txn = txn_id, pages = shadows.records.len(), "wal.commit");
        Ok(())
    }

    /// Copies every shadow onto its original, syncs the touched files and
    /// clears the WAL. Returns the number of pages written.
    pub fn checkpoint(&self) -> Result<usize> {
        let mut shadows = self.shadows.lock();
        let files = self.apply_shadows(&shadows)?;
        let pages = shadows.records.len();
        self.clear(&mut shadows)?;
        debug!(pages, files, "wal.checkpoint");
        Ok(pages)
    }

    fn apply_shadows(&self, shadows: &ShadowTable) -> Result<usize> {
        let mut touched: Vec<Arc<FileHandle>> = Vec::new();
        for record in &shadows.records {
            let src = self.bm.pin(&self.shadow_file, record.shadow)?;
            let dst = self.bm.pin(&record.file, record.original)?;
            dst.write().copy_from_slice(&src.read());
            if !touched.iter().any(|f| f.id() == record.file.id()) {
                touched.push(Arc::clone(&record.file));
            }
        }
        for file in &touched {
            self.bm.flush_file(file)?;
        }
        Ok(touched.len())
    }

    /// Discards every shadow without touching the originals.
    pub fn rollback(&self) -> Result<usize> {
        let mut shadows = self.shadows.lock();
        let pages = shadows.records.len();
        self.clear(&mut shadows)?;
        debug!(pages, "wal.rollback");
        Ok(pages)
    }

    /// The log is reset before the shadow file shrinks: a log that still
    /// names shadow pages must never outlive them.
    fn clear(&self, shadows: &mut ShadowTable) -> Result<()> {
        self.log.lock().reset()?;
        shadows.index.clear();
        shadows.records.clear();
        self.bm.discard_file(&self.shadow_file);
        self.shadow_file.truncate()
    }
}

fn replay_committed(log: &mut WalLog, shadow_io: &PageFile) -> Result<usize> {
    let updates = log.committed_updates()?;
    if updates.is_empty() {
        return Ok(0);
    }
    let mut targets: HashMap<&Path, PageFile> = HashMap::new();
    let mut page = vec![0u8; PAGE_SIZE];
    for update in &updates {
        shadow_io.read_page(update.shadow, &mut page)?;
        if !targets.contains_key(update.path.as_path()) {
            targets.insert(update.path.as_path(), PageFile::open(&update.path)?);
        }
        targets[update.path.as_path()].write_page(update.original, &page)?;
    }
    for target in targets.values() {
        target.sync()?;
    }
    Ok(updates.len())
}
