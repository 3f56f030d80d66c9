//! Growable on-disk array of fixed-size records.
//!
//! An array is anchored at a header page. The header names the first
//! page-index page (PIP); each PIP lists up to [`PIP_SLOTS`] array pages and
//! links to the next PIP. Growth only appends, so a physical page index once
//! handed out never moves.
//!
//! Two front ends share the format: [`DiskArrayBuilder`] keeps everything in
//! memory for bulk loads and writes it out once, [`DiskArray`] works in place
//! under transactions through the shadow-page protocol.

use std::marker::PhantomData;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, trace};

use crate::primitives::bytes::le;
use crate::primitives::pager::{BufferManager, FileHandle};
use crate::storage::lists::Checkpointable;
use crate::storage::structure::{ShadowPage, StorageStructure};
use crate::storage::transaction::{Transaction, TransactionType};
use crate::types::{PageIdx, Result, StorageError, PAGE_IDX_MAX, PAGE_SIZE};

/// Byte length of the encoded header.
pub const DISK_ARRAY_HEADER_SIZE: usize = 48;

/// Page indices one PIP holds after its `next` pointer.
pub const PIP_SLOTS: usize = (PAGE_SIZE - 4) / 4;

/// A record type a [`DiskArray`] can store.
pub trait ArrayElement: Copy + Send + Sync + 'static {
    /// Encoded width in bytes.
    const SIZE: usize;

    /// Decodes from exactly `SIZE` bytes.
    fn decode(src: &[u8]) -> Self;

    /// Encodes into exactly `SIZE` bytes.
    fn encode(&self, dst: &mut [u8]);
}

impl ArrayElement for u32 {
    const SIZE: usize = 4;

    fn decode(src: &[u8]) -> Self {
        le::get_u32(src, 0)
    }

    fn encode(&self, dst: &mut [u8]) {
        le::put_u32(dst, 0, *self);
    }
}

impl ArrayElement for u64 {
    const SIZE: usize = 8;

    fn decode(src: &[u8]) -> Self {
        le::get_u64(src, 0)
    }

    fn encode(&self, dst: &mut [u8]) {
        le::put_u64(dst, 0, *self);
    }
}

/// The six-word array header stored at the start of the header page.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DiskArrayHeader {
    /// Record width.
    pub element_size: u64,
    /// log2 of records per array page.
    pub num_elements_per_page_log2: u64,
    /// `records_per_page - 1`.
    pub element_page_offset_mask: u64,
    /// First PIP, or [`PAGE_IDX_MAX`] while the array has no pages.
    pub first_pip_page_idx: PageIdx,
    /// Records stored.
    pub num_elements: u64,
    /// Array pages allocated.
    pub num_array_pages: u64,
}

impl DiskArrayHeader {
    /// Empty header for `element_size`-byte records. Records per page is the
    /// largest power of two that fits.
    pub fn new(element_size: usize) -> Self {
        let log2 = (PAGE_SIZE / element_size).ilog2();
        Self {
            element_size: element_size as u64,
            num_elements_per_page_log2: u64::from(log2),
            element_page_offset_mask: (1u64 << log2) - 1,
            first_pip_page_idx: PAGE_IDX_MAX,
            num_elements: 0,
            num_array_pages: 0,
        }
    }

    /// Records per array page.
    pub fn elements_per_page(&self) -> u64 {
        1 << self.num_elements_per_page_log2
    }

    /// Writes the header into the first [`DISK_ARRAY_HEADER_SIZE`] bytes of `page`.
    pub fn encode(&self, page: &mut [u8]) {
        le::put_u64(page, 0, self.element_size);
        le::put_u64(page, 8, self.num_elements_per_page_log2);
        le::put_u64(page, 16, self.element_page_offset_mask);
        le::put_u64(page, 24, u64::from(self.first_pip_page_idx));
        le::put_u64(page, 32, self.num_elements);
        le::put_u64(page, 40, self.num_array_pages);
    }

    /// Reads and validates a header written for `element_size`-byte records.
    pub fn decode(page: &[u8], element_size: usize) -> Result<Self> {
        let expected = Self::new(element_size);
        let first_pip = le::read_u64_checked(page, 24)?;
        let header = Self {
            element_size: le::read_u64_checked(page, 0)?,
            num_elements_per_page_log2: le::read_u64_checked(page, 8)?,
            element_page_offset_mask: le::read_u64_checked(page, 16)?,
            first_pip_page_idx: PageIdx::try_from(first_pip).map_err(|_| {
                StorageError::format(format!("first PIP index {first_pip} out of range"))
            })?,
            num_elements: le::read_u64_checked(page, 32)?,
            num_array_pages: le::read_u64_checked(page, 40)?,
        };
        if header.element_size != expected.element_size
            || header.num_elements_per_page_log2 != expected.num_elements_per_page_log2
            || header.element_page_offset_mask != expected.element_page_offset_mask
        {
            return Err(StorageError::format(format!(
                "disk array header describes {}-byte records (log2 {}), expected {element_size}",
                header.element_size, header.num_elements_per_page_log2
            )));
        }
        if header.num_array_pages != header.num_elements.div_ceil(header.elements_per_page()) {
            return Err(StorageError::format(format!(
                "disk array holds {} records in {} pages",
                header.num_elements, header.num_array_pages
            )));
        }
        if (header.num_array_pages == 0) != (header.first_pip_page_idx == PAGE_IDX_MAX) {
            return Err(StorageError::format("disk array PIP chain disagrees with page count"));
        }
        Ok(header)
    }

    fn locate_page(&self, idx: u64) -> (u64, usize) {
        let array_page = idx >> self.num_elements_per_page_log2;
        let offset = (idx & self.element_page_offset_mask) * self.element_size;
        (array_page, offset as usize)
    }
}

/// Decoded page-index page.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Pip {
    /// Next PIP, or [`PAGE_IDX_MAX`].
    pub next: PageIdx,
    /// Array pages, unused slots hold [`PAGE_IDX_MAX`].
    pub slots: Box<[PageIdx]>,
}

impl Pip {
    fn empty() -> Self {
        Self {
            next: PAGE_IDX_MAX,
            slots: vec![PAGE_IDX_MAX; PIP_SLOTS].into_boxed_slice(),
        }
    }

    fn decode(page: &[u8]) -> Self {
        Self {
            next: le::get_u32(page, 0),
            slots: (0..PIP_SLOTS)
                .map(|slot| le::get_u32(page, 4 + slot * 4))
                .collect(),
        }
    }

    fn encode(&self, page: &mut [u8]) {
        le::put_u32(page, 0, self.next);
        for (slot, &page_idx) in self.slots.iter().enumerate() {
            le::put_u32(page, 4 + slot * 4, page_idx);
        }
    }
}

/// A PIP together with its own physical location.
#[derive(Clone, Debug)]
pub struct PipWrapper {
    /// Where the PIP lives.
    pub page_idx: PageIdx,
    /// Its contents.
    pub pip: Pip,
}

/// Header plus the walked PIP chain, enough to locate any record.
#[derive(Clone, Debug)]
struct DiskArrayState {
    header: DiskArrayHeader,
    pips: Vec<PipWrapper>,
}

impl DiskArrayState {
    fn locate(&self, what: &'static str, idx: u64) -> Result<(PageIdx, usize)> {
        if idx >= self.header.num_elements {
            return Err(StorageError::out_of_bounds(what, idx, self.header.num_elements));
        }
        let (array_page, offset) = self.header.locate_page(idx);
        let page = self.array_page(array_page)?;
        Ok((page, offset))
    }

    fn array_page(&self, array_page: u64) -> Result<PageIdx> {
        let pip_idx = (array_page / PIP_SLOTS as u64) as usize;
        let slot = (array_page % PIP_SLOTS as u64) as usize;
        let pip = self.pips.get(pip_idx).ok_or_else(|| {
            StorageError::format(format!("array page {array_page} lies past the PIP chain"))
        })?;
        Ok(pip.pip.slots[slot])
    }

    /// True when the next array page needs a fresh PIP.
    fn needs_new_pip(&self) -> bool {
        self.header.num_array_pages as usize % PIP_SLOTS == 0
    }

    /// Registers `page` as the next array page. `new_pip` must be given
    /// exactly when [`Self::needs_new_pip`] holds. Returns the positions of
    /// the PIPs whose contents changed.
    fn append_array_page(&mut self, page: PageIdx, new_pip: Option<PageIdx>) -> Vec<usize> {
        let slot = self.header.num_array_pages as usize % PIP_SLOTS;
        let mut touched = Vec::with_capacity(2);
        if let Some(pip_page) = new_pip {
            debug_assert_eq!(slot, 0, "PIP allocated before the tail PIP filled");
            match self.pips.last_mut() {
                Some(tail) => {
                    tail.pip.next = pip_page;
                    touched.push(self.pips.len() - 1);
                }
                None => self.header.first_pip_page_idx = pip_page,
            }
            self.pips.push(PipWrapper {
                page_idx: pip_page,
                pip: Pip::empty(),
            });
        }
        let tail = self.pips.len() - 1;
        self.pips[tail].pip.slots[slot] = page;
        touched.push(tail);
        self.header.num_array_pages += 1;
        touched
    }
}

struct ArrayStates {
    committed: DiskArrayState,
    pending: Option<DiskArrayState>,
}

impl ArrayStates {
    fn for_kind(&self, kind: TransactionType) -> &DiskArrayState {
        match (kind, &self.pending) {
            (TransactionType::Write, Some(pending)) => pending,
            _ => &self.committed,
        }
    }
}

/// Transactional view of a saved disk array.
pub struct DiskArray<T: ArrayElement> {
    structure: StorageStructure,
    header_page_idx: PageIdx,
    states: RwLock<ArrayStates>,
    _marker: PhantomData<T>,
}

/// A record reached through its page's shadow.
pub struct ShadowedRef<'a, T: ArrayElement> {
    page: ShadowPage<'a>,
    offset: usize,
    _marker: PhantomData<T>,
}

impl<T: ArrayElement> ShadowedRef<'_, T> {
    /// Current value as seen by the write transaction.
    pub fn get(&self) -> T {
        T::decode(&self.page.read()[self.offset..self.offset + T::SIZE])
    }

    /// Overwrites the value in the shadow.
    pub fn set(&mut self, value: T) {
        value.encode(&mut self.page.write()[self.offset..self.offset + T::SIZE]);
    }
}

impl<T: ArrayElement> DiskArray<T> {
    /// Opens the array anchored at `header_page_idx`, walking its PIP chain.
    pub fn open(structure: StorageStructure, header_page_idx: PageIdx) -> Result<Self> {
        let header = {
            let page = structure.pin_for_read(TransactionType::ReadOnly, header_page_idx)?;
            let bytes = page.read();
            DiskArrayHeader::decode(&bytes, T::SIZE)?
        };
        let num_pips = (header.num_array_pages as usize).div_ceil(PIP_SLOTS);
        let mut pips = Vec::with_capacity(num_pips);
        let mut next = header.first_pip_page_idx;
        for _ in 0..num_pips {
            if next == PAGE_IDX_MAX || next >= structure.num_pages() {
                return Err(StorageError::format(format!(
                    "PIP chain of array at page {header_page_idx} ends after {} of {num_pips} PIPs",
                    pips.len()
                )));
            }
            let pip = {
                let page = structure.pin_for_read(TransactionType::ReadOnly, next)?;
                let bytes = page.read();
                Pip::decode(&bytes)
            };
            let page_idx = next;
            next = pip.next;
            pips.push(PipWrapper { page_idx, pip });
        }
        trace!(
            header_page = header_page_idx,
            elements = header.num_elements,
            pips = pips.len(),
            "disk_array.open"
        );
        let committed = DiskArrayState { header, pips };
        Ok(Self {
            structure,
            header_page_idx,
            states: RwLock::new(ArrayStates {
                committed,
                pending: None,
            }),
            _marker: PhantomData,
        })
    }

    /// Header page of this array.
    pub fn header_page_idx(&self) -> PageIdx {
        self.header_page_idx
    }

    /// Records visible to a transaction of `kind`.
    pub fn num_elements(&self, kind: TransactionType) -> u64 {
        self.states.read().for_kind(kind).header.num_elements
    }

    /// PIPs in the chain visible to a transaction of `kind`.
    pub fn num_pips(&self, kind: TransactionType) -> usize {
        self.states.read().for_kind(kind).pips.len()
    }

    /// Array pages visible to a transaction of `kind`.
    pub fn num_array_pages(&self, kind: TransactionType) -> u64 {
        self.states.read().for_kind(kind).header.num_array_pages
    }

    /// Reads record `idx`.
    pub fn get(&self, txn: &Transaction, idx: u64) -> Result<T> {
        let (page, offset) = self.states.read().for_kind(txn.kind()).locate("disk array", idx)?;
        let pinned = self.structure.pin_for_read(txn.kind(), page)?;
        let bytes = pinned.read();
        Ok(T::decode(&bytes[offset..offset + T::SIZE]))
    }

    /// Shadowed handle on record `idx`.
    pub fn get_mut(&self, txn: &Transaction, idx: u64) -> Result<ShadowedRef<'_, T>> {
        txn.require_write()?;
        let (page, offset) = self.states.read().for_kind(txn.kind()).locate("disk array", idx)?;
        Ok(ShadowedRef {
            page: self.structure.update_page(txn, page)?,
            offset,
            _marker: PhantomData,
        })
    }

    /// Overwrites record `idx`.
    pub fn update(&self, txn: &Transaction, idx: u64, value: T) -> Result<()> {
        self.get_mut(txn, idx)?.set(value);
        Ok(())
    }

    /// Appends a record and returns its index. New array pages and PIPs are
    /// allocated at the end of the file; header and PIP updates go through
    /// shadows like any other write.
    pub fn push_back(&self, txn: &Transaction, value: T) -> Result<u64> {
        txn.require_write()?;
        let mut states = self.states.write();
        let ArrayStates { committed, pending } = &mut *states;
        let state = pending.get_or_insert_with(|| committed.clone());

        let idx = state.header.num_elements;
        let (array_page, offset) = state.header.locate_page(idx);
        if array_page == state.header.num_array_pages {
            let new_pip = state
                .needs_new_pip()
                .then(|| self.structure.add_new_page());
            let page = self.structure.add_new_page();
            let touched = state.append_array_page(page, new_pip);
            for pip_idx in touched {
                let pip = &state.pips[pip_idx];
                let shadow = self.structure.update_page(txn, pip.page_idx)?;
                pip.pip.encode(&mut shadow.write());
            }
            debug!(
                header_page = self.header_page_idx,
                array_pages = state.header.num_array_pages,
                pips = state.pips.len(),
                "disk_array.grow"
            );
        }
        let page = state.array_page(array_page)?;
        {
            let shadow = self.structure.update_page(txn, page)?;
            value.encode(&mut shadow.write()[offset..offset + T::SIZE]);
        }
        state.header.num_elements += 1;
        let shadow = self.structure.update_page(txn, self.header_page_idx)?;
        state.header.encode(&mut shadow.write());
        Ok(idx)
    }

    /// Makes the write transaction's header and PIP changes the committed
    /// view. Call after the WAL checkpoint.
    pub fn checkpoint_in_memory(&self) {
        let mut states = self.states.write();
        if let Some(pending) = states.pending.take() {
            states.committed = pending;
        }
        self.structure.checkpoint_in_memory();
    }

    /// Drops the write transaction's header and PIP changes.
    pub fn rollback_in_memory(&self) {
        self.states.write().pending = None;
        self.structure.rollback_in_memory();
    }
}

impl<T: ArrayElement> Checkpointable for DiskArray<T> {
    fn checkpoint_in_memory(&self) {
        DiskArray::checkpoint_in_memory(self);
    }

    fn rollback_in_memory(&self) {
        DiskArray::rollback_in_memory(self);
    }
}

/// In-memory array for bulk loads, written out once by [`Self::save_to_disk`].
pub struct DiskArrayBuilder<T: ArrayElement> {
    file: Arc<FileHandle>,
    header_page_idx: PageIdx,
    state: DiskArrayState,
    pages: Vec<Box<[u8]>>,
    _marker: PhantomData<T>,
}

impl<T: ArrayElement> DiskArrayBuilder<T> {
    /// Starts an array anchored at `header_page_idx` of `file`, sized for
    /// `num_elements` zeroed records.
    pub fn new(file: Arc<FileHandle>, header_page_idx: PageIdx, num_elements: u64) -> Result<Self> {
        file.reserve_pages(header_page_idx + 1);
        let mut builder = Self {
            file,
            header_page_idx,
            state: DiskArrayState {
                header: DiskArrayHeader::new(T::SIZE),
                pips: Vec::new(),
            },
            pages: Vec::new(),
            _marker: PhantomData,
        };
        builder.set_num_elements(num_elements)?;
        Ok(builder)
    }

    /// Records in the array.
    pub fn num_elements(&self) -> u64 {
        self.state.header.num_elements
    }

    /// PIPs allocated so far.
    pub fn num_pips(&self) -> usize {
        self.state.pips.len()
    }

    /// Header as it will be saved.
    pub fn header(&self) -> DiskArrayHeader {
        self.state.header
    }

    /// Grows the array to `num_elements`, allocating pages as needed.
    /// Shrinking is not supported.
    pub fn set_num_elements(&mut self, num_elements: u64) -> Result<()> {
        if num_elements < self.state.header.num_elements {
            return Err(StorageError::Invalid("disk arrays never shrink"));
        }
        let needed = num_elements.div_ceil(self.state.header.elements_per_page());
        while self.state.header.num_array_pages < needed {
            self.push_page();
        }
        self.state.header.num_elements = num_elements;
        Ok(())
    }

    /// Adds one zeroed array page and returns its physical index. A new PIP
    /// is allocated first when the tail PIP is full.
    pub fn push_page(&mut self) -> PageIdx {
        let new_pip = self
            .state
            .needs_new_pip()
            .then(|| self.file.add_new_page());
        let page = self.file.add_new_page();
        self.state.append_array_page(page, new_pip);
        self.pages.push(vec![0u8; PAGE_SIZE].into_boxed_slice());
        page
    }

    /// Reads record `idx`.
    pub fn get(&self, idx: u64) -> Result<T> {
        let (array_page, offset) = self.locate_local(idx)?;
        Ok(T::decode(&self.pages[array_page][offset..offset + T::SIZE]))
    }

    /// Overwrites record `idx`.
    pub fn set(&mut self, idx: u64, value: T) -> Result<()> {
        let (array_page, offset) = self.locate_local(idx)?;
        value.encode(&mut self.pages[array_page][offset..offset + T::SIZE]);
        Ok(())
    }

    /// Appends a record and returns its index.
    pub fn push_back(&mut self, value: T) -> Result<u64> {
        let idx = self.state.header.num_elements;
        self.set_num_elements(idx + 1)?;
        self.set(idx, value)?;
        Ok(idx)
    }

    /// Physical page holding logical array page `array_page`.
    pub fn array_page(&self, array_page: u64) -> Result<PageIdx> {
        self.state.array_page(array_page)
    }

    fn locate_local(&self, idx: u64) -> Result<(usize, usize)> {
        if idx >= self.state.header.num_elements {
            return Err(StorageError::out_of_bounds(
                "disk array builder",
                idx,
                self.state.header.num_elements,
            ));
        }
        let (array_page, offset) = self.state.header.locate_page(idx);
        Ok((array_page as usize, offset))
    }

    /// Writes header, PIPs and array pages through `bm`. The caller flushes
    /// the file once every array sharing it is saved.
    pub fn save_to_disk(&self, bm: &BufferManager) -> Result<()> {
        {
            let page = bm.pin(&self.file, self.header_page_idx)?;
            let mut bytes = page.write();
            bytes.fill(0);
            self.state.header.encode(&mut bytes);
        }
        for pip in &self.state.pips {
            let page = bm.pin(&self.file, pip.page_idx)?;
            pip.pip.encode(&mut page.write());
        }
        for (array_page, data) in self.pages.iter().enumerate() {
            let physical = self.state.array_page(array_page as u64)?;
            bm.pin(&self.file, physical)?.write().copy_from_slice(data);
        }
        debug!(
            file = self.file.id().0,
            header_page = self.header_page_idx,
            elements = self.state.header.num_elements,
            pages = self.pages.len(),
            pips = self.state.pips.len(),
            "disk_array.save"
        );
        self.file.checkpoint_page_count();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::primitives::wal::Wal;
    use crate::storage::metrics::ObservabilityContext;
    use rustc_hash::FxHashSet;
    use std::path::Path;
    use tempfile::tempdir;

    const READER: Transaction = Transaction::new(1, TransactionType::ReadOnly, 1);
    const WRITER: Transaction = Transaction::new(2, TransactionType::Write, 2);

    fn setup(dir: &Path) -> Result<(Arc<BufferManager>, Arc<Wal>, Arc<FileHandle>)> {
        let bm = Arc::new(BufferManager::new(64));
        let wal = Arc::new(Wal::open(dir, Arc::clone(&bm), false)?);
        let file = bm.open_file(dir.join("array"))?;
        Ok((bm, wal, file))
    }

    #[test]
    fn header_rejects_foreign_element_size() {
        let mut page = vec![0u8; PAGE_SIZE];
        DiskArrayHeader::new(4).encode(&mut page);
        assert!(DiskArrayHeader::decode(&page, 4).is_ok());
        assert!(matches!(
            DiskArrayHeader::decode(&page, 8),
            Err(StorageError::Format(_))
        ));
        let zeroed = vec![0u8; PAGE_SIZE];
        assert!(DiskArrayHeader::decode(&zeroed, 4).is_err());
    }

    #[test]
    fn pip_chain_length_and_unique_pages() -> Result<()> {
        let dir = tempdir()?;
        let (_bm, _wal, file) = setup(dir.path())?;
        let mut header_page = 0;
        for pages in [1u64, 1022, 1023, 1024, 2047, 3000] {
            let mut builder = DiskArrayBuilder::<u32>::new(Arc::clone(&file), header_page, 0)?;
            for _ in 0..pages {
                builder.push_page();
            }
            assert_eq!(builder.num_pips() as u64, pages.div_ceil(PIP_SLOTS as u64));

            let mut seen: FxHashSet<PageIdx> = FxHashSet::default();
            seen.insert(header_page);
            for pip in &builder.state.pips {
                assert!(seen.insert(pip.page_idx), "PIP page reused");
            }
            for array_page in 0..pages {
                let physical = builder.array_page(array_page)?;
                assert_ne!(physical, PAGE_IDX_MAX);
                assert!(seen.insert(physical), "array page {array_page} collides");
            }
            header_page = file.add_new_page();
        }
        Ok(())
    }

    #[test]
    fn builder_save_and_open() -> Result<()> {
        let dir = tempdir()?;
        let (bm, wal, file) = setup(dir.path())?;
        let mut builder = DiskArrayBuilder::<u64>::new(Arc::clone(&file), 0, 2000)?;
        for i in 0..2000 {
            builder.set(i, i * 3)?;
        }
        assert!(builder.set(2000, 1).is_err());
        builder.save_to_disk(&bm)?;
        bm.flush_file(&file)?;

        let structure = StorageStructure::new(file, bm, wal, ObservabilityContext::default());
        let array = DiskArray::<u64>::open(structure, 0)?;
        assert_eq!(array.num_elements(READER.kind()), 2000);
        assert_eq!(array.get(&READER, 1999)?, 5997);
        assert!(matches!(
            array.get(&READER, 2000),
            Err(StorageError::OutOfBounds { index: 2000, len: 2000, .. })
        ));
        Ok(())
    }

    #[test]
    fn push_back_crosses_into_a_new_pip() -> Result<()> {
        let dir = tempdir()?;
        let (bm, wal, file) = setup(dir.path())?;
        let full = (PIP_SLOTS as u64) * 1024;
        let builder = DiskArrayBuilder::<u32>::new(Arc::clone(&file), 0, full)?;
        assert_eq!(builder.num_pips(), 1);
        builder.save_to_disk(&bm)?;
        bm.flush_file(&file)?;

        let structure = StorageStructure::new(
            Arc::clone(&file),
            Arc::clone(&bm),
            Arc::clone(&wal),
            ObservabilityContext::default(),
        );
        let array = DiskArray::<u32>::open(structure, 0)?;

        assert_eq!(array.push_back(&WRITER, 77)?, full);
        assert_eq!(array.num_pips(WRITER.kind()), 2);
        assert_eq!(array.get(&WRITER, full)?, 77);
        assert_eq!(array.num_elements(READER.kind()), full);
        assert!(array.get(&READER, full).is_err());

        wal.rollback()?;
        array.rollback_in_memory();
        assert_eq!(array.num_elements(WRITER.kind()), full);
        assert_eq!(array.num_pips(WRITER.kind()), 1);

        array.push_back(&WRITER, 78)?;
        array.update(&WRITER, 5, 9)?;
        wal.commit(WRITER.id())?;
        wal.checkpoint()?;
        array.checkpoint_in_memory();
        assert_eq!(array.get(&READER, full)?, 78);
        assert_eq!(array.get(&READER, 5)?, 9);

        let reopened = DiskArray::<u32>::open(
            StorageStructure::new(file, bm, wal, ObservabilityContext::default()),
            0,
        )?;
        assert_eq!(reopened.num_elements(READER.kind()), full + 1);
        assert_eq!(reopened.num_pips(READER.kind()), 2);
        assert_eq!(reopened.get(&READER, full)?, 78);
        Ok(())
    }

    #[test]
    fn read_only_transactions_cannot_push() -> Result<()> {
        let dir = tempdir()?;
        let (bm, wal, file) = setup(dir.path())?;
        DiskArrayBuilder::<u32>::new(Arc::clone(&file), 0, 0)?.save_to_disk(&bm)?;
        let array = DiskArray::<u32>::open(
            StorageStructure::new(file, bm, wal, ObservabilityContext::default()),
            0,
        )?;
        assert!(matches!(
            array.push_back(&READER, 1),
            Err(StorageError::Invalid(_))
        ));
        Ok(())
    }
}
