//! Logical-to-physical page mapping for chunks and large lists.
//!
//! Three disk arrays share the metadata file:
//!
//! * header page 0: chunk id -> page-list head
//! * header page 1: large-list idx -> `(head, num_elements)` at `2i`, `2i + 1`
//! * header page 2: page-list groups, each `PAGE_LIST_GROUP_CAPACITY` page
//!   indices followed by the position of the next group
//!
//! A page-list head is the array position of its first group, or
//! [`NULL_PAGE_LIST`] for a list with no pages.

use std::sync::Arc;

use smallvec::SmallVec;
use tracing::trace;

use crate::primitives::pager::{BufferManager, FileHandle};
use crate::storage::disk_array::{DiskArray, DiskArrayBuilder};
use crate::storage::structure::StorageStructure;
use crate::storage::transaction::{Transaction, TransactionType};
use crate::types::{PageIdx, Result, StorageError};

/// Page indices per group.
pub const PAGE_LIST_GROUP_CAPACITY: u32 = 3;
/// Entries a group occupies in the page-list array (slots plus next link).
pub const PAGE_LIST_GROUP_SIZE: u32 = PAGE_LIST_GROUP_CAPACITY + 1;
/// Terminator for heads, unused slots and next links.
pub const NULL_PAGE_LIST: u32 = u32::MAX;

const CHUNK_HEADS_HEADER_PAGE: PageIdx = 0;
const LARGE_LIST_HEADS_HEADER_PAGE: PageIdx = 1;
const PAGE_LISTS_HEADER_PAGE: PageIdx = 2;
const METADATA_HEADER_PAGES: u32 = 3;

/// Anything the page-list array can be read from.
pub trait PageListSource {
    /// Entry `idx` of the page-list array.
    fn page_list_entry(&self, idx: u64) -> Result<u32>;
}

impl<S: PageListSource + ?Sized> PageListSource for &S {
    fn page_list_entry(&self, idx: u64) -> Result<u32> {
        (**self).page_list_entry(idx)
    }
}

impl PageListSource for DiskArrayBuilder<u32> {
    fn page_list_entry(&self, idx: u64) -> Result<u32> {
        self.get(idx)
    }
}

/// The runtime page-list array as seen by one transaction.
#[derive(Clone, Copy)]
pub struct PageListsView<'a> {
    array: &'a DiskArray<u32>,
    txn: Transaction,
}

impl PageListSource for PageListsView<'_> {
    fn page_list_entry(&self, idx: u64) -> Result<u32> {
        self.array.get(&self.txn, idx)
    }
}

/// Resolves logical page numbers of one page list to physical pages.
///
/// Walked groups are remembered, so a front-to-back scan touches each group
/// once.
pub struct PageMapper<S> {
    source: S,
    head: u32,
    resolved: SmallVec<[PageIdx; 12]>,
    next_group: u32,
}

impl<S: PageListSource> PageMapper<S> {
    /// Mapper for the page list starting at `head`.
    pub fn new(source: S, head: u32) -> Self {
        Self {
            source,
            head,
            resolved: SmallVec::new(),
            next_group: head,
        }
    }

    /// Mapper for a list without pages; every lookup fails.
    pub fn empty(source: S) -> Self {
        Self::new(source, NULL_PAGE_LIST)
    }

    /// Head this mapper started from.
    pub fn head(&self) -> u32 {
        self.head
    }

    /// Physical page of logical page `logical`.
    pub fn resolve(&mut self, logical: u32) -> Result<PageIdx> {
        self.try_resolve(logical)?.ok_or_else(|| {
            StorageError::format(format!(
                "page list at {} has {} pages, page {logical} requested",
                self.head,
                self.resolved.len()
            ))
        })
    }

    /// Like [`Self::resolve`], but `None` once the chain ends before
    /// `logical`.
    pub fn try_resolve(&mut self, logical: u32) -> Result<Option<PageIdx>> {
        while self.resolved.len() <= logical as usize {
            if self.next_group == NULL_PAGE_LIST {
                return Ok(None);
            }
            let group = u64::from(self.next_group);
            for slot in 0..u64::from(PAGE_LIST_GROUP_CAPACITY) {
                let page = self.source.page_list_entry(group + slot)?;
                if page == NULL_PAGE_LIST {
                    break;
                }
                self.resolved.push(page);
            }
            let next = self
                .source
                .page_list_entry(group + u64::from(PAGE_LIST_GROUP_CAPACITY))?;
            if next == self.next_group {
                return Err(StorageError::format(format!(
                    "page list group {next} links to itself"
                )));
            }
            self.next_group = next;
        }
        Ok(Some(self.resolved[logical as usize]))
    }
}

fn to_head(pos: u64) -> Result<u32> {
    u32::try_from(pos)
        .ok()
        .filter(|&head| head != NULL_PAGE_LIST)
        .ok_or(StorageError::CapacityExceeded("page-list array position"))
}

/// Runtime metadata of an opened list structure.
pub struct ListsMetadata {
    chunk_heads: DiskArray<u32>,
    large_list_heads: DiskArray<u32>,
    page_lists: DiskArray<u32>,
}

impl ListsMetadata {
    /// Opens the three arrays of the metadata file behind `structure`.
    pub fn open(structure: StorageStructure) -> Result<Self> {
        Ok(Self {
            chunk_heads: DiskArray::open(structure.clone(), CHUNK_HEADS_HEADER_PAGE)?,
            large_list_heads: DiskArray::open(structure.clone(), LARGE_LIST_HEADS_HEADER_PAGE)?,
            page_lists: DiskArray::open(structure, PAGE_LISTS_HEADER_PAGE)?,
        })
    }

    /// Chunks with a page-list head.
    pub fn num_chunks(&self, kind: TransactionType) -> u64 {
        self.chunk_heads.num_elements(kind)
    }

    /// Large lists created so far.
    pub fn num_large_lists(&self, kind: TransactionType) -> u64 {
        self.large_list_heads.num_elements(kind) / 2
    }

    /// Entries in the page-list array.
    pub fn num_page_list_entries(&self, kind: TransactionType) -> u64 {
        self.page_lists.num_elements(kind)
    }

    fn view(&self, txn: &Transaction) -> PageListsView<'_> {
        PageListsView {
            array: &self.page_lists,
            txn: *txn,
        }
    }

    fn check_large_list(&self, txn: &Transaction, idx: u32) -> Result<()> {
        let num = self.num_large_lists(txn.kind());
        if u64::from(idx) >= num {
            return Err(StorageError::out_of_bounds("large list", u64::from(idx), num));
        }
        Ok(())
    }

    /// Mapper for chunk `chunk`'s small-list pages.
    pub fn page_mapper_for_chunk(
        &self,
        txn: &Transaction,
        chunk: u64,
    ) -> Result<PageMapper<PageListsView<'_>>> {
        let head = self.chunk_heads.get(txn, chunk)?;
        Ok(PageMapper::new(self.view(txn), head))
    }

    /// Mapper for large list `idx`.
    pub fn page_mapper_for_large_list(
        &self,
        txn: &Transaction,
        idx: u32,
    ) -> Result<PageMapper<PageListsView<'_>>> {
        self.check_large_list(txn, idx)?;
        let head = self.large_list_heads.get(txn, 2 * u64::from(idx))?;
        Ok(PageMapper::new(self.view(txn), head))
    }

    /// A mapper for an empty list; it never touches a page.
    pub fn empty_page_mapper(&self, txn: &Transaction) -> PageMapper<PageListsView<'_>> {
        PageMapper::empty(self.view(txn))
    }

    /// Element count of large list `idx`.
    pub fn num_elements_in_large_list(&self, txn: &Transaction, idx: u32) -> Result<u32> {
        self.check_large_list(txn, idx)?;
        self.large_list_heads.get(txn, 2 * u64::from(idx) + 1)
    }

    /// Appends a chunk with no pages and returns its id.
    pub fn add_chunk(&self, txn: &Transaction) -> Result<u64> {
        self.chunk_heads.push_back(txn, NULL_PAGE_LIST)
    }

    /// Creates large list number `num_large_lists()` over `pages`.
    pub fn add_large_list(
        &self,
        txn: &Transaction,
        pages: &[PageIdx],
        num_elements: u32,
    ) -> Result<u32> {
        let head = self.append_page_list(txn, pages)?;
        let slot = self.large_list_heads.push_back(txn, head)?;
        self.large_list_heads.push_back(txn, num_elements)?;
        let idx = u32::try_from(slot / 2)
            .map_err(|_| StorageError::CapacityExceeded("large list index"))?;
        trace!(idx, pages = pages.len(), num_elements, "lists_metadata.add_large_list");
        Ok(idx)
    }

    /// Updates the stored element count of large list `idx`.
    pub fn set_num_elements_in_large_list(
        &self,
        txn: &Transaction,
        idx: u32,
        num_elements: u32,
    ) -> Result<()> {
        self.check_large_list(txn, idx)?;
        self.large_list_heads
            .update(txn, 2 * u64::from(idx) + 1, num_elements)
    }

    /// Adds `page` after the `existing_pages` pages of large list `idx`,
    /// filling the tail group or linking a new one.
    pub fn append_page_to_large_list(
        &self,
        txn: &Transaction,
        idx: u32,
        existing_pages: u32,
        page: PageIdx,
    ) -> Result<()> {
        self.check_large_list(txn, idx)?;
        let head_slot = 2 * u64::from(idx);
        let head = self.large_list_heads.get(txn, head_slot)?;
        if existing_pages == 0 || head == NULL_PAGE_LIST {
            let group = self.append_page_list(txn, &[page])?;
            return self.large_list_heads.update(txn, head_slot, group);
        }
        let mut tail = head;
        for _ in 0..(existing_pages - 1) / PAGE_LIST_GROUP_CAPACITY {
            tail = self
                .page_lists
                .get(txn, u64::from(tail) + u64::from(PAGE_LIST_GROUP_CAPACITY))?;
            if tail == NULL_PAGE_LIST {
                return Err(StorageError::format(format!(
                    "large list {idx} page list shorter than {existing_pages} pages"
                )));
            }
        }
        let slot = existing_pages % PAGE_LIST_GROUP_CAPACITY;
        if slot != 0 {
            return self
                .page_lists
                .update(txn, u64::from(tail) + u64::from(slot), page);
        }
        let group = self.append_page_list(txn, &[page])?;
        self.page_lists.update(
            txn,
            u64::from(tail) + u64::from(PAGE_LIST_GROUP_CAPACITY),
            group,
        )
    }

    fn append_page_list(&self, txn: &Transaction, pages: &[PageIdx]) -> Result<u32> {
        if pages.is_empty() {
            return Ok(NULL_PAGE_LIST);
        }
        let head = to_head(self.page_lists.num_elements(txn.kind()))?;
        let mut groups = pages.chunks(PAGE_LIST_GROUP_CAPACITY as usize).peekable();
        let mut group_start = u64::from(head);
        while let Some(group) = groups.next() {
            for slot in 0..PAGE_LIST_GROUP_CAPACITY as usize {
                let entry = group.get(slot).copied().unwrap_or(NULL_PAGE_LIST);
                self.page_lists.push_back(txn, entry)?;
            }
            group_start += u64::from(PAGE_LIST_GROUP_SIZE);
            let next = if groups.peek().is_some() {
                to_head(group_start)?
            } else {
                NULL_PAGE_LIST
            };
            self.page_lists.push_back(txn, next)?;
        }
        Ok(head)
    }

    /// See [`DiskArray::checkpoint_in_memory`].
    pub fn checkpoint_in_memory(&self) {
        self.chunk_heads.checkpoint_in_memory();
        self.large_list_heads.checkpoint_in_memory();
        self.page_lists.checkpoint_in_memory();
    }

    /// See [`DiskArray::rollback_in_memory`].
    pub fn rollback_in_memory(&self) {
        self.chunk_heads.rollback_in_memory();
        self.large_list_heads.rollback_in_memory();
        self.page_lists.rollback_in_memory();
    }
}

/// Metadata under construction by the bulk builder.
///
/// `populate_*` calls must arrive in strictly increasing id order; the page
/// runs they describe are physically contiguous.
pub struct ListsMetadataBuilder {
    chunk_heads: DiskArrayBuilder<u32>,
    large_list_heads: DiskArrayBuilder<u32>,
    page_lists: DiskArrayBuilder<u32>,
    last_chunk: Option<u64>,
    last_large_list: Option<u64>,
}

impl ListsMetadataBuilder {
    /// Reserves the three header pages at the start of `file`.
    pub fn new(file: Arc<FileHandle>) -> Result<Self> {
        file.reserve_pages(METADATA_HEADER_PAGES);
        Ok(Self {
            chunk_heads: DiskArrayBuilder::new(Arc::clone(&file), CHUNK_HEADS_HEADER_PAGE, 0)?,
            large_list_heads: DiskArrayBuilder::new(
                Arc::clone(&file),
                LARGE_LIST_HEADS_HEADER_PAGE,
                0,
            )?,
            page_lists: DiskArrayBuilder::new(file, PAGE_LISTS_HEADER_PAGE, 0)?,
            last_chunk: None,
            last_large_list: None,
        })
    }

    /// Sizes the chunk head array; every head starts empty.
    pub fn init_chunk_page_lists(&mut self, num_chunks: u64) -> Result<()> {
        fill_null(&mut self.chunk_heads, num_chunks)
    }

    /// Sizes the large-list table; every list starts empty.
    pub fn init_large_list_page_lists(&mut self, num_large_lists: u64) -> Result<()> {
        let start = self.large_list_heads.num_elements();
        self.large_list_heads.set_num_elements(2 * num_large_lists)?;
        for idx in start / 2..num_large_lists {
            self.large_list_heads.set(2 * idx, NULL_PAGE_LIST)?;
            self.large_list_heads.set(2 * idx + 1, 0)?;
        }
        Ok(())
    }

    /// Chunks in the head array.
    pub fn num_chunks(&self) -> u64 {
        self.chunk_heads.num_elements()
    }

    /// Large lists in the table.
    pub fn num_large_lists(&self) -> u64 {
        self.large_list_heads.num_elements() / 2
    }

    /// Records that chunk `chunk` owns pages `start_page..start_page + num_pages`.
    pub fn populate_chunk_page_list(
        &mut self,
        chunk: u64,
        num_pages: u32,
        start_page: PageIdx,
    ) -> Result<()> {
        check_order("chunk page list", &mut self.last_chunk, chunk)?;
        let num_chunks = self.num_chunks();
        if chunk >= num_chunks {
            return Err(StorageError::out_of_bounds("chunk", chunk, num_chunks));
        }
        if num_pages == 0 {
            return Ok(());
        }
        let head = self.push_page_run(num_pages, start_page)?;
        self.chunk_heads.set(chunk, head)
    }

    /// Records that large list `idx` holds `num_elements` elements on pages
    /// `start_page..start_page + num_pages`.
    pub fn populate_large_list_page_list(
        &mut self,
        idx: u64,
        num_pages: u32,
        num_elements: u64,
        start_page: PageIdx,
    ) -> Result<()> {
        check_order("large list page list", &mut self.last_large_list, idx)?;
        let num_large_lists = self.num_large_lists();
        if idx >= num_large_lists {
            return Err(StorageError::out_of_bounds("large list", idx, num_large_lists));
        }
        let count = u32::try_from(num_elements)
            .map_err(|_| StorageError::CapacityExceeded("large list length"))?;
        let head = if num_pages == 0 {
            NULL_PAGE_LIST
        } else {
            self.push_page_run(num_pages, start_page)?
        };
        self.large_list_heads.set(2 * idx, head)?;
        self.large_list_heads.set(2 * idx + 1, count)
    }

    fn push_page_run(&mut self, num_pages: u32, start_page: PageIdx) -> Result<u32> {
        let head = to_head(self.page_lists.num_elements())?;
        let num_groups = num_pages.div_ceil(PAGE_LIST_GROUP_CAPACITY);
        for group in 0..num_groups {
            for slot in 0..PAGE_LIST_GROUP_CAPACITY {
                let logical = group * PAGE_LIST_GROUP_CAPACITY + slot;
                let entry = if logical < num_pages {
                    start_page + logical
                } else {
                    NULL_PAGE_LIST
                };
                self.page_lists.push_back(entry)?;
            }
            let next = if group + 1 < num_groups {
                to_head(self.page_lists.num_elements() + 1)?
            } else {
                NULL_PAGE_LIST
            };
            self.page_lists.push_back(next)?;
        }
        Ok(head)
    }

    /// Mapper over the pages populated for chunk `chunk`.
    pub fn page_mapper_for_chunk(
        &self,
        chunk: u64,
    ) -> Result<PageMapper<&DiskArrayBuilder<u32>>> {
        let head = self.chunk_heads.get(chunk)?;
        Ok(PageMapper::new(&self.page_lists, head))
    }

    /// Mapper over the pages populated for large list `idx`.
    pub fn page_mapper_for_large_list(
        &self,
        idx: u64,
    ) -> Result<PageMapper<&DiskArrayBuilder<u32>>> {
        let head = self.large_list_heads.get(2 * idx)?;
        Ok(PageMapper::new(&self.page_lists, head))
    }

    /// Element count recorded for large list `idx`.
    pub fn num_elements_in_large_list(&self, idx: u64) -> Result<u32> {
        self.large_list_heads.get(2 * idx + 1)
    }

    /// Writes all three arrays through `bm`.
    pub fn save_to_disk(&self, bm: &BufferManager) -> Result<()> {
        self.chunk_heads.save_to_disk(bm)?;
        self.large_list_heads.save_to_disk(bm)?;
        self.page_lists.save_to_disk(bm)
    }
}

fn fill_null(array: &mut DiskArrayBuilder<u32>, len: u64) -> Result<()> {
    let start = array.num_elements();
    array.set_num_elements(len)?;
    for idx in start..len {
        array.set(idx, NULL_PAGE_LIST)?;
    }
    Ok(())
}

fn check_order(what: &'static str, last: &mut Option<u64>, got: u64) -> Result<()> {
    if let Some(prev) = *last {
        if got <= prev {
            return Err(StorageError::OrderingViolation {
                what,
                last: Some(prev),
                got,
            });
        }
    }
    *last = Some(got);
    Ok(())
}
