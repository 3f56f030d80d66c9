//! The per-entity list façade.
//!
//! An entity's header says whether its list is small (packed with its chunk
//! neighbours) or large (its own page run). Either way the elements form a
//! contiguous run of slots over a page list, so reads and writes only differ
//! in where the run starts and which mapper resolves its pages.

use std::path::{Path, PathBuf};

use tracing::{debug, trace};

use crate::primitives::pager::PinnedPage;
use crate::storage::codec::{
    ElementCodec, FixedWidth, NestedListCodec, NodeIdCodec, StringCodec,
};
use crate::storage::layout::{PageElementCursor, PageElementLayout};
use crate::storage::list_headers::{
    make_large, make_small, ListHeader, ListHeaders, LARGE_LIST_IDX_MASK,
};
use crate::storage::lists_metadata::{ListsMetadata, PageListsView, PageMapper};
use crate::storage::metrics::ObservabilityContext;
use crate::storage::structure::StorageStructure;
use crate::storage::transaction::{Transaction, TransactionType};
use crate::types::{chunk_idx, EntityOffset, NodeId, PageIdx, Result, StorageError};

/// Adjacency lists.
pub type AdjLists = Lists<NodeIdCodec>;
/// String-valued list properties.
pub type StringPropertyLists = Lists<StringCodec>;
/// List-of-list properties.
pub type ListPropertyLists = Lists<NestedListCodec>;
/// Fixed-width list properties.
pub type PropertyLists<T> = Lists<FixedWidth<T>>;

/// On-disk files of one list structure.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ListsPaths {
    /// Element pages.
    pub data: PathBuf,
    /// Header array.
    pub headers: PathBuf,
    /// Chunk heads, large-list table and page lists.
    pub metadata: PathBuf,
    /// Overflow bytes, for codecs that spill.
    pub overflow: PathBuf,
}

impl ListsPaths {
    /// Paths of the structure `name` inside `dir`.
    pub fn new(dir: &Path, name: &str) -> Self {
        Self {
            data: dir.join(format!("{name}.lists")),
            headers: dir.join(format!("{name}.lists.headers")),
            metadata: dir.join(format!("{name}.lists.metadata")),
            overflow: dir.join(format!("{name}.lists.ovf")),
        }
    }
}

/// Where one entity's list lives, as seen by one transaction.
pub struct ListInfo<'a> {
    /// Large-list layout.
    pub is_large: bool,
    /// Element count.
    pub len: u64,
    /// Raw header word.
    pub header: u32,
    first: u64,
    layout: PageElementLayout,
    mapper: PageMapper<PageListsView<'a>>,
}

impl ListInfo<'_> {
    /// Cursor of the list's first element within its page run.
    pub fn first_cursor(&self) -> PageElementCursor {
        self.layout.cursor_for(self.first)
    }

    /// Cursor of element `k`.
    pub fn element_cursor(&self, k: u64) -> PageElementCursor {
        self.layout.cursor_for(self.first + k)
    }

    /// Physical page of logical page `logical` of the run.
    pub fn resolve(&mut self, logical: u32) -> Result<PageIdx> {
        self.mapper.resolve(logical)
    }
}

/// Structure-wide counters reported by [`Lists::stats`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ListsStats {
    /// Entities with a header.
    pub num_entities: u64,
    /// Chunks in the metadata.
    pub num_chunks: u64,
    /// Lists stored in their own page run.
    pub num_large_lists: u64,
    /// Pages in the data file.
    pub data_pages: u32,
    /// Elements over all lists.
    pub total_elements: u64,
}

/// Something the storage manager must tell about commit and rollback.
pub trait Checkpointable {
    /// Last chance to make side data durable before the WAL commit.
    fn prepare_commit(&self) -> Result<()> {
        Ok(())
    }

    /// The write transaction was checkpointed.
    fn checkpoint_in_memory(&self);

    /// The write transaction was rolled back.
    fn rollback_in_memory(&self);
}

/// Variable-length lists of `C::Value`, one per entity.
pub struct Lists<C: ElementCodec> {
    name: String,
    codec: C,
    layout: PageElementLayout,
    data: StorageStructure,
    headers: ListHeaders,
    metadata: ListsMetadata,
    obs: ObservabilityContext,
}

impl<C: ElementCodec> Lists<C> {
    /// Opens a structure from its three files.
    pub fn open(
        name: impl Into<String>,
        codec: C,
        data: StorageStructure,
        headers: StorageStructure,
        metadata: StorageStructure,
    ) -> Result<Self> {
        let name = name.into();
        let layout = PageElementLayout::new(codec.element_size(), codec.has_null_bits());
        let lists = Self {
            obs: data.obs().clone(),
            headers: ListHeaders::open(headers)?,
            metadata: ListsMetadata::open(metadata)?,
            name,
            codec,
            layout,
            data,
        };
        debug!(
            lists = %lists.name,
            entities = lists.headers.num_entities(TransactionType::ReadOnly),
            large = lists.metadata.num_large_lists(TransactionType::ReadOnly),
            "lists.open"
        );
        Ok(lists)
    }

    /// Structure name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Element codec.
    pub fn codec(&self) -> &C {
        &self.codec
    }

    /// Page layout of the element type.
    pub fn layout(&self) -> PageElementLayout {
        self.layout
    }

    /// Entities visible to a transaction of `kind`.
    pub fn num_entities(&self, kind: TransactionType) -> u64 {
        self.headers.num_entities(kind)
    }

    /// Resolves where `offset`'s list lives.
    pub fn list_info(&self, txn: &Transaction, offset: EntityOffset) -> Result<ListInfo<'_>> {
        let num_entities = self.headers.num_entities(txn.kind());
        if offset >= num_entities {
            return Err(StorageError::out_of_bounds("entity", offset, num_entities));
        }
        let header = self.headers.get_header(txn, offset)?;
        match ListHeader::decode(header) {
            ListHeader::Small { csr_offset, len } => {
                let mapper = if len == 0 {
                    self.metadata.empty_page_mapper(txn)
                } else {
                    self.metadata.page_mapper_for_chunk(txn, chunk_idx(offset))?
                };
                Ok(ListInfo {
                    is_large: false,
                    len: u64::from(len),
                    header,
                    first: u64::from(csr_offset),
                    layout: self.layout,
                    mapper,
                })
            }
            ListHeader::Large { idx } => {
                let num_large = self.metadata.num_large_lists(txn.kind());
                if u64::from(idx) >= num_large {
                    return Err(StorageError::format(format!(
                        "entity {offset} names large list {idx} of {num_large}"
                    )));
                }
                let len = self.metadata.num_elements_in_large_list(txn, idx)?;
                let mapper = if len == 0 {
                    self.metadata.empty_page_mapper(txn)
                } else {
                    self.metadata.page_mapper_for_large_list(txn, idx)?
                };
                Ok(ListInfo {
                    is_large: true,
                    len: u64::from(len),
                    header,
                    first: 0,
                    layout: self.layout,
                    mapper,
                })
            }
        }
    }

    /// Element count of `offset`'s list.
    pub fn num_elements(&self, txn: &Transaction, offset: EntityOffset) -> Result<u64> {
        Ok(self.list_info(txn, offset)?.len)
    }

    /// Lazily yields `offset`'s elements; `None` marks a null element.
    pub fn scan_list(&self, txn: &Transaction, offset: EntityOffset) -> Result<ListScan<'_, C>> {
        let info = self.list_info(txn, offset)?;
        self.obs.metrics().list_scanned(info.is_large);
        trace!(lists = %self.name, offset, len = info.len, large = info.is_large, "lists.scan");
        Ok(ListScan {
            lists: self,
            kind: txn.kind(),
            info,
            next: 0,
            page: None,
            failed: false,
        })
    }

    /// Collects `offset`'s list.
    pub fn read_list(
        &self,
        txn: &Transaction,
        offset: EntityOffset,
    ) -> Result<Vec<Option<C::Value>>> {
        self.scan_list(txn, offset)?.collect()
    }

    /// Overwrites element `index` of `offset`'s list. `None` stores a null.
    pub fn set_element(
        &self,
        txn: &Transaction,
        offset: EntityOffset,
        index: u64,
        value: Option<&C::Value>,
    ) -> Result<()> {
        txn.require_write()?;
        let encoded = self.encode(value)?;
        let mut info = self.list_info(txn, offset)?;
        if index >= info.len {
            return Err(StorageError::out_of_bounds("list element", index, info.len));
        }
        let cursor = info.element_cursor(index);
        let page = info.resolve(cursor.page_idx)?;
        self.write_slot(txn, page, cursor.pos_in_page, encoded.as_deref())?;
        self.obs.metrics().element_written();
        Ok(())
    }

    /// Appends to `offset`'s list, promoting a small list to a large one.
    /// Returns the new element's index.
    pub fn append_to_list(
        &self,
        txn: &Transaction,
        offset: EntityOffset,
        value: Option<&C::Value>,
    ) -> Result<u64> {
        txn.require_write()?;
        let encoded = self.encode(value)?;
        let num_entities = self.headers.num_entities(txn.kind());
        if offset >= num_entities {
            return Err(StorageError::out_of_bounds("entity", offset, num_entities));
        }
        let idx = match ListHeader::decode(self.headers.get_header(txn, offset)?) {
            ListHeader::Large { idx } => idx,
            ListHeader::Small { .. } => self.promote(txn, offset)?,
        };
        let index = self.append_to_large_list(txn, idx, encoded.as_deref())?;
        self.obs.metrics().element_written();
        Ok(index)
    }

    /// Removes element `index` of `offset`'s list and returns it. Later
    /// elements shift down by one, so list order is kept.
    ///
    /// Both layouts compact in place: a small list keeps its CSR offset and
    /// leaves its last slot unused, a large list keeps its pages.
    pub fn remove_from_list(
        &self,
        txn: &Transaction,
        offset: EntityOffset,
        index: u64,
    ) -> Result<Option<C::Value>> {
        txn.require_write()?;
        let mut info = self.list_info(txn, offset)?;
        if index >= info.len {
            return Err(StorageError::out_of_bounds("list element", index, info.len));
        }
        let removed = self
            .read_slot(txn.kind(), &mut info, index)?
            .map(|slot| self.codec.decode(&slot))
            .transpose()?;
        for k in index + 1..info.len {
            let slot = self.read_slot(txn.kind(), &mut info, k)?;
            let dst = info.element_cursor(k - 1);
            let page = info.resolve(dst.page_idx)?;
            self.write_slot(txn, page, dst.pos_in_page, slot.as_deref())?;
        }
        let last = info.element_cursor(info.len - 1);
        let page = info.resolve(last.page_idx)?;
        let blank = vec![0u8; self.layout.element_size()];
        self.write_slot(txn, page, last.pos_in_page, Some(&blank))?;

        let (header, new_len) = (info.header, info.len - 1);
        drop(info);
        match ListHeader::decode(header) {
            ListHeader::Small { csr_offset, .. } => {
                self.headers
                    .set_header(txn, offset, make_small(csr_offset, new_len as u32))?;
            }
            ListHeader::Large { idx } => {
                self.metadata
                    .set_num_elements_in_large_list(txn, idx, new_len as u32)?;
            }
        }
        self.obs.metrics().element_removed();
        trace!(lists = %self.name, offset, index, len = new_len, "lists.remove");
        Ok(removed)
    }

    /// Adds an entity with an empty list and returns its offset.
    pub fn add_entity(&self, txn: &Transaction) -> Result<EntityOffset> {
        txn.require_write()?;
        let offset = self.headers.num_entities(txn.kind());
        if chunk_idx(offset) >= self.metadata.num_chunks(txn.kind()) {
            self.metadata.add_chunk(txn)?;
        }
        self.headers.push_header(txn, make_small(0, 0))
    }

    /// Counters over the whole structure. Reads every header.
    pub fn stats(&self, txn: &Transaction) -> Result<ListsStats> {
        let kind = txn.kind();
        let num_entities = self.headers.num_entities(kind);
        let mut total_elements = 0u64;
        for offset in 0..num_entities {
            total_elements += match ListHeader::decode(self.headers.get_header(txn, offset)?) {
                ListHeader::Small { len, .. } => u64::from(len),
                ListHeader::Large { idx } => {
                    u64::from(self.metadata.num_elements_in_large_list(txn, idx)?)
                }
            };
        }
        Ok(ListsStats {
            num_entities,
            num_chunks: self.metadata.num_chunks(kind),
            num_large_lists: self.metadata.num_large_lists(kind),
            data_pages: self.data.num_pages(),
            total_elements,
        })
    }

    fn encode(&self, value: Option<&C::Value>) -> Result<Option<Vec<u8>>> {
        match value {
            Some(value) => {
                let mut slot = vec![0u8; self.layout.element_size()];
                self.codec.encode(value, &mut slot)?;
                Ok(Some(slot))
            }
            None if self.layout.has_null_bits() => Ok(None),
            None => Err(StorageError::Invalid("element type does not support nulls")),
        }
    }

    /// Raw bytes of element `k`, or `None` for a null.
    fn read_slot(
        &self,
        kind: TransactionType,
        info: &mut ListInfo<'_>,
        k: u64,
    ) -> Result<Option<Vec<u8>>> {
        let cursor = info.element_cursor(k);
        let page = info.resolve(cursor.page_idx)?;
        let pinned = self.data.pin_for_read(kind, page)?;
        let bytes = pinned.read();
        if self.layout.is_null(&bytes, cursor.pos_in_page) {
            return Ok(None);
        }
        Ok(Some(bytes[self.layout.element_range(cursor.pos_in_page)].to_vec()))
    }

    fn write_slot(
        &self,
        txn: &Transaction,
        page: PageIdx,
        pos_in_page: u32,
        encoded: Option<&[u8]>,
    ) -> Result<()> {
        let shadow = self.data.update_page(txn, page)?;
        let mut bytes = shadow.write();
        let range = self.layout.element_range(pos_in_page);
        match encoded {
            Some(slot) => bytes[range].copy_from_slice(slot),
            None => bytes[range].fill(0),
        }
        self.layout.set_null(&mut bytes, pos_in_page, encoded.is_none());
        Ok(())
    }

    fn append_to_large_list(
        &self,
        txn: &Transaction,
        idx: u32,
        encoded: Option<&[u8]>,
    ) -> Result<u64> {
        let len = self.metadata.num_elements_in_large_list(txn, idx)?;
        let new_len = len
            .checked_add(1)
            .ok_or(StorageError::CapacityExceeded("large list length"))?;
        let cursor = self.layout.cursor_for(u64::from(len));
        // Removals shrink the count but keep the page run, so the target
        // page may already exist past `pages_for(len)`.
        let existing = self
            .metadata
            .page_mapper_for_large_list(txn, idx)?
            .try_resolve(cursor.page_idx)?;
        let page = match existing {
            Some(page) => page,
            None => {
                let page = self.data.add_new_page();
                self.metadata
                    .append_page_to_large_list(txn, idx, cursor.page_idx, page)?;
                page
            }
        };
        self.write_slot(txn, page, cursor.pos_in_page, encoded)?;
        self.metadata
            .set_num_elements_in_large_list(txn, idx, new_len)?;
        Ok(u64::from(len))
    }

    /// Moves a small list onto fresh pages and registers it as a large
    /// list. The vacated CSR slots are left unused.
    fn promote(&self, txn: &Transaction, offset: EntityOffset) -> Result<u32> {
        let mut info = self.list_info(txn, offset)?;
        let len = info.len;
        let per_page = u64::from(self.layout.elements_per_page());
        let pages: Vec<PageIdx> = (0..self.layout.pages_for(len))
            .map(|_| self.data.add_new_page())
            .collect();
        for (logical, &dst_page) in pages.iter().enumerate() {
            let shadow = self.data.update_page(txn, dst_page)?;
            let mut dst = shadow.write();
            let first = logical as u64 * per_page;
            for k in first..len.min(first + per_page) {
                let src = info.element_cursor(k);
                let src_page = info.resolve(src.page_idx)?;
                let pinned = self.data.pin_for_read(txn.kind(), src_page)?;
                let bytes = pinned.read();
                let pos = (k - first) as u32;
                dst[self.layout.element_range(pos)]
                    .copy_from_slice(&bytes[self.layout.element_range(src.pos_in_page)]);
                let null = self.layout.is_null(&bytes, src.pos_in_page);
                self.layout.set_null(&mut dst, pos, null);
            }
        }
        drop(info);

        let count = u32::try_from(len)
            .map_err(|_| StorageError::CapacityExceeded("large list length"))?;
        let idx = self.metadata.add_large_list(txn, &pages, count)?;
        if idx > LARGE_LIST_IDX_MASK {
            return Err(StorageError::CapacityExceeded("large list index"));
        }
        self.headers.set_header(txn, offset, make_large(idx))?;
        self.obs.metrics().list_promoted();
        debug!(lists = %self.name, offset, idx, len, "lists.promote");
        Ok(idx)
    }
}

impl Lists<NodeIdCodec> {
    /// Neighbours of `offset`. Adjacency slots are never null.
    pub fn neighbors(&self, txn: &Transaction, offset: EntityOffset) -> Result<Vec<NodeId>> {
        self.scan_list(txn, offset)?
            .filter_map(|item| item.transpose())
            .collect()
    }
}

impl<C: ElementCodec> Checkpointable for Lists<C> {
    fn prepare_commit(&self) -> Result<()> {
        self.codec.flush()
    }

    fn checkpoint_in_memory(&self) {
        self.headers.checkpoint_in_memory();
        self.metadata.checkpoint_in_memory();
        self.data.checkpoint_in_memory();
    }

    fn rollback_in_memory(&self) {
        self.headers.rollback_in_memory();
        self.metadata.rollback_in_memory();
        self.data.rollback_in_memory();
    }
}

/// Iterator returned by [`Lists::scan_list`].
///
/// Keeps the current page pinned between items. After an error it yields
/// nothing more.
pub struct ListScan<'a, C: ElementCodec> {
    lists: &'a Lists<C>,
    kind: TransactionType,
    info: ListInfo<'a>,
    next: u64,
    page: Option<(u32, PinnedPage)>,
    failed: bool,
}

impl<C: ElementCodec> ListScan<'_, C> {
    /// Elements in the list.
    pub fn len(&self) -> u64 {
        self.info.len
    }

    /// True for an empty list.
    pub fn is_empty(&self) -> bool {
        self.info.len == 0
    }

    /// Whether the list uses the large layout.
    pub fn is_large(&self) -> bool {
        self.info.is_large
    }

    fn read_next(&mut self) -> Result<Option<C::Value>> {
        let cursor = self.info.element_cursor(self.next);
        let current = self.page.as_ref().map(|(logical, _)| *logical);
        if current != Some(cursor.page_idx) {
            self.page = None;
            let physical = self.info.resolve(cursor.page_idx)?;
            let pinned = self.lists.data.pin_for_read(self.kind, physical)?;
            self.page = Some((cursor.page_idx, pinned));
        }
        let Some((_, pinned)) = self.page.as_ref() else {
            return Err(StorageError::Invalid("scan lost its page"));
        };
        let bytes = pinned.read();
        let layout = &self.lists.layout;
        if layout.is_null(&bytes, cursor.pos_in_page) {
            return Ok(None);
        }
        self.lists
            .codec
            .decode(&bytes[layout.element_range(cursor.pos_in_page)])
            .map(Some)
    }
}

impl<C: ElementCodec> Iterator for ListScan<'_, C> {
    type Item = Result<Option<C::Value>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.next >= self.info.len {
            return None;
        }
        let item = self.read_next();
        match &item {
            Ok(_) => self.next += 1,
            Err(_) => self.failed = true,
        }
        Some(item)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let left = if self.failed {
            0
        } else {
            (self.info.len - self.next) as usize
        };
        (left, Some(left))
    }
}
