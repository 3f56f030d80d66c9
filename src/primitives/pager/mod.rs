//! Buffer manager: a bounded LRU table of pinned page frames shared by every
//! file the list engine touches.

mod frame;

use std::fmt;
use std::num::NonZeroUsize;
use std::path::Path;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use lru::LruCache;
use parking_lot::{Mutex, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, warn};

use crate::primitives::io::PageFile;
use crate::types::{FileId, PageIdx, Result, PAGE_SIZE};

use frame::Frame;

/// Default number of frames kept resident.
pub const DEFAULT_CACHE_PAGES: usize = 1024;

type FrameKey = (FileId, PageIdx);

/// A page file registered with the buffer manager.
///
/// `num_pages` is the logical page count. It may run ahead of the bytes on
/// disk: freshly allocated pages read as zeros until first written back.
pub struct FileHandle {
    id: FileId,
    io: PageFile,
    num_pages: AtomicU32,
    committed_pages: AtomicU32,
}

impl FileHandle {
    /// Runtime id of this file.
    pub fn id(&self) -> FileId {
        self.id
    }

    /// Path on disk.
    pub fn path(&self) -> &Path {
        self.io.path()
    }

    pub(crate) fn io(&self) -> &PageFile {
        &self.io
    }

    /// Logical number of pages, including uncommitted allocations.
    pub fn num_pages(&self) -> u32 {
        self.num_pages.load(Ordering::Acquire)
    }

    /// Allocates the next page index at the end of the file.
    pub fn add_new_page(&self) -> PageIdx {
        self.num_pages.fetch_add(1, Ordering::AcqRel)
    }

    /// Makes sure pages `0..pages` exist logically.
    pub fn reserve_pages(&self, pages: u32) {
        self.num_pages.fetch_max(pages, Ordering::AcqRel);
    }

    /// Records the current page count as durable.
    pub(crate) fn checkpoint_page_count(&self) {
        self.committed_pages
            .store(self.num_pages(), Ordering::Release);
    }

    /// Forgets pages allocated since the last checkpoint.
    pub(crate) fn rollback_page_count(&self) {
        self.num_pages
            .store(self.committed_pages.load(Ordering::Acquire), Ordering::Release);
    }

    pub(crate) fn truncate(&self) -> Result<()> {
        self.io.truncate_pages(0)?;
        self.num_pages.store(0, Ordering::Release);
        self.committed_pages.store(0, Ordering::Release);
        Ok(())
    }
}

impl fmt::Debug for FileHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileHandle")
            .field("id", &self.id)
            .field("path", &self.io.path())
            .field("num_pages", &self.num_pages())
            .finish()
    }
}

/// RAII pin on a buffered page. Dropping it unpins the frame.
pub struct PinnedPage {
    frame: Arc<Frame>,
}

impl PinnedPage {
    /// Physical page index.
    pub fn page_idx(&self) -> PageIdx {
        self.frame.page_idx
    }

    /// Shared view of the page bytes.
    pub fn read(&self) -> RwLockReadGuard<'_, Box<[u8]>> {
        self.frame.buf.read()
    }

    /// Exclusive view of the page bytes; marks the frame dirty.
    pub fn write(&self) -> RwLockWriteGuard<'_, Box<[u8]>> {
        self.frame.mark_dirty();
        self.frame.buf.write()
    }
}

impl Drop for PinnedPage {
    fn drop(&mut self) {
        self.frame.unpin();
    }
}

#[derive(Default)]
struct BufferStats {
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    writes: AtomicU64,
}

/// Point-in-time buffer manager counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BufferStatsSnapshot {
    /// Pins served from a resident frame.
    pub hits: u64,
    /// Pins that had to read from disk.
    pub misses: u64,
    /// Frames dropped to make room.
    pub evictions: u64,
    /// Page images written back to disk.
    pub writes: u64,
}

impl fmt::Display for BufferStatsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "hits={} misses={} evictions={} writes={}",
            self.hits, self.misses, self.evictions, self.writes
        )
    }
}

/// Pin/unpin page cache keyed by `(file, page)`.
///
/// Pinned frames are never evicted; when every resident frame is pinned the
/// table temporarily grows past its capacity.
pub struct BufferManager {
    capacity: NonZeroUsize,
    frames: Mutex<LruCache<FrameKey, Arc<Frame>>>,
    next_file_id: AtomicU32,
    stats: BufferStats,
}

impl BufferManager {
    /// Creates a buffer manager holding up to `capacity_pages` unpinned frames.
    pub fn new(capacity_pages: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity_pages)
            .or_else(|| NonZeroUsize::new(DEFAULT_CACHE_PAGES))
            .unwrap_or(NonZeroUsize::MIN);
        Self {
            capacity,
            frames: Mutex::new(LruCache::unbounded()),
            next_file_id: AtomicU32::new(0),
            stats: BufferStats::default(),
        }
    }

    /// Opens (creating if missing) a page file.
    pub fn open_file(&self, path: impl AsRef<Path>) -> Result<Arc<FileHandle>> {
        let io = PageFile::open(path)?;
        self.register(io)
    }

    /// Creates a page file, discarding any previous contents.
    pub fn create_file(&self, path: impl AsRef<Path>) -> Result<Arc<FileHandle>> {
        let io = PageFile::create(path)?;
        self.register(io)
    }

    fn register(&self, io: PageFile) -> Result<Arc<FileHandle>> {
        let pages = io.num_pages_on_disk()?;
        let id = FileId(self.next_file_id.fetch_add(1, Ordering::Relaxed));
        debug!(file = id.0, pages, path = %io.path().display(), "buffer.open_file");
        Ok(Arc::new(FileHandle {
            id,
            io,
            num_pages: AtomicU32::new(pages),
            committed_pages: AtomicU32::new(pages),
        }))
    }

    /// Pins page `page_idx` of `file`, reading it from disk on a miss.
    pub fn pin(&self, file: &Arc<FileHandle>, page_idx: PageIdx) -> Result<PinnedPage> {
        let key = (file.id(), page_idx);
        let mut frames = self.frames.lock();
        if let Some(frame) = frames.get(&key) {
            frame.pin();
            self.stats.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(PinnedPage {
                frame: Arc::clone(frame),
            });
        }
        self.stats.misses.fetch_add(1, Ordering::Relaxed);
        self.evict_unpinned(&mut frames)?;

        let mut buf = vec![0u8; PAGE_SIZE].into_boxed_slice();
        file.io().read_page(page_idx, &mut buf)?;
        let frame = Arc::new(Frame::new(Arc::clone(file), page_idx, buf));
        frame.pin();
        frames.put(key, Arc::clone(&frame));
        Ok(PinnedPage { frame })
    }

    fn evict_unpinned(&self, frames: &mut LruCache<FrameKey, Arc<Frame>>) -> Result<()> {
        while frames.len() >= self.capacity.get() {
            let victim = frames
                .iter()
                .rev()
                .find(|(_, frame)| !frame.is_pinned())
                .map(|(key, _)| *key);
            let Some(key) = victim else {
                warn!(resident = frames.len(), "buffer.all_frames_pinned");
                return Ok(());
            };
            if let Some(frame) = frames.pop(&key) {
                if frame.write_back()? {
                    self.stats.writes.fetch_add(1, Ordering::Relaxed);
                }
                self.stats.evictions.fetch_add(1, Ordering::Relaxed);
            }
        }
        Ok(())
    }

    /// Writes every dirty frame of `file` back and syncs the file.
    pub fn flush_file(&self, file: &FileHandle) -> Result<()> {
        let dirty: Vec<Arc<Frame>> = {
            let frames = self.frames.lock();
            frames
                .iter()
                .filter(|(key, frame)| key.0 == file.id() && frame.is_dirty())
                .map(|(_, frame)| Arc::clone(frame))
                .collect()
        };
        let mut written = 0u64;
        for frame in &dirty {
            if frame.write_back()? {
                written += 1;
            }
        }
        self.stats.writes.fetch_add(written, Ordering::Relaxed);
        file.io().sync()?;
        debug!(file = file.id().0, pages = written, "buffer.flush_file");
        Ok(())
    }

    /// Drops every frame of `file` without writing anything back.
    pub fn discard_file(&self, file: &FileHandle) {
        let mut frames = self.frames.lock();
        let keys: Vec<FrameKey> = frames
            .iter()
            .filter(|(key, _)| key.0 == file.id())
            .map(|(key, _)| *key)
            .collect();
        for key in keys {
            frames.pop(&key);
        }
    }

    /// Number of resident frames.
    pub fn resident_pages(&self) -> usize {
        self.frames.lock().len()
    }

    /// Current counters.
    pub fn stats(&self) -> BufferStatsSnapshot {
        BufferStatsSnapshot {
            hits: self.stats.hits.load(Ordering::Relaxed),
            misses: self.stats.misses.load(Ordering::Relaxed),
            evictions: self.stats.evictions.load(Ordering::Relaxed),
            writes: self.stats.writes.load(Ordering::Relaxed),
        }
    }
}
