//! One 32-bit header word per entity, saying where its list lives.
//!
//! ```text
//! small: 0 | csr offset (20 bits) | length (11 bits)
//! large: 1 | large-list index (31 bits)
//! ```

use std::sync::Arc;

use crate::primitives::pager::{BufferManager, FileHandle};
use crate::storage::disk_array::{DiskArray, DiskArrayBuilder};
use crate::storage::structure::StorageStructure;
use crate::storage::transaction::{Transaction, TransactionType};
use crate::types::{EntityOffset, PageIdx, Result};

/// Header page of the header array inside its file.
pub const LIST_HEADERS_HEADER_PAGE: PageIdx = 0;

/// Flag bit marking a large list.
pub const LARGE_LIST_FLAG: u32 = 0x8000_0000;
/// Mask of the large-list index.
pub const LARGE_LIST_IDX_MASK: u32 = 0x7fff_ffff;
/// Width of the small-list length field.
pub const SMALL_LEN_BITS: u32 = 11;
/// Largest length a small header can carry.
pub const SMALL_LEN_MAX: u32 = (1 << SMALL_LEN_BITS) - 1;
/// Width of the small-list CSR offset field.
pub const SMALL_OFFSET_BITS: u32 = 20;
/// Largest CSR offset a small header can carry.
pub const SMALL_OFFSET_MAX: u32 = (1 << SMALL_OFFSET_BITS) - 1;

/// True if `header` refers to a large list.
#[inline]
pub fn is_large(header: u32) -> bool {
    header & LARGE_LIST_FLAG != 0
}

/// Length of a small list.
#[inline]
pub fn small_len(header: u32) -> u32 {
    header & SMALL_LEN_MAX
}

/// CSR offset of a small list within its chunk.
#[inline]
pub fn small_offset(header: u32) -> u32 {
    (header >> SMALL_LEN_BITS) & SMALL_OFFSET_MAX
}

/// Index of a large list.
#[inline]
pub fn large_idx(header: u32) -> u32 {
    header & LARGE_LIST_IDX_MASK
}

/// Encodes a small header.
#[inline]
pub fn make_small(csr_offset: u32, len: u32) -> u32 {
    debug_assert!(csr_offset <= SMALL_OFFSET_MAX, "csr offset {csr_offset} too wide");
    debug_assert!(len <= SMALL_LEN_MAX, "small list length {len} too wide");
    ((csr_offset & SMALL_OFFSET_MAX) << SMALL_LEN_BITS) | (len & SMALL_LEN_MAX)
}

/// Encodes a large header.
#[inline]
pub fn make_large(idx: u32) -> u32 {
    debug_assert!(idx <= LARGE_LIST_IDX_MASK, "large list index {idx} too wide");
    LARGE_LIST_FLAG | (idx & LARGE_LIST_IDX_MASK)
}

/// Decoded header word.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ListHeader {
    /// Packed into its chunk's CSR pages.
    Small {
        /// Element offset within the chunk.
        csr_offset: u32,
        /// Element count.
        len: u32,
    },
    /// Stored in its own page run.
    Large {
        /// Index into the large-list table.
        idx: u32,
    },
}

impl ListHeader {
    /// Decodes a header word.
    pub fn decode(header: u32) -> Self {
        if is_large(header) {
            ListHeader::Large {
                idx: large_idx(header),
            }
        } else {
            ListHeader::Small {
                csr_offset: small_offset(header),
                len: small_len(header),
            }
        }
    }

    /// Encodes back into a header word.
    pub fn encode(self) -> u32 {
        match self {
            ListHeader::Small { csr_offset, len } => make_small(csr_offset, len),
            ListHeader::Large { idx } => make_large(idx),
        }
    }
}

/// Transactional header array of an opened list structure.
pub struct ListHeaders {
    headers: DiskArray<u32>,
}

impl ListHeaders {
    /// Opens the header array stored in `structure`'s file.
    pub fn open(structure: StorageStructure) -> Result<Self> {
        Ok(Self {
            headers: DiskArray::open(structure, LIST_HEADERS_HEADER_PAGE)?,
        })
    }

    /// Header word of `offset`.
    pub fn get_header(&self, txn: &Transaction, offset: EntityOffset) -> Result<u32> {
        self.headers.get(txn, offset)
    }

    /// Replaces the header word of `offset`.
    pub fn set_header(&self, txn: &Transaction, offset: EntityOffset, header: u32) -> Result<()> {
        self.headers.update(txn, offset, header)
    }

    /// Appends a header for a new entity and returns its offset.
    pub fn push_header(&self, txn: &Transaction, header: u32) -> Result<EntityOffset> {
        self.headers.push_back(txn, header)
    }

    /// Entities visible to a transaction of `kind`.
    pub fn num_entities(&self, kind: TransactionType) -> u64 {
        self.headers.num_elements(kind)
    }

    /// See [`DiskArray::checkpoint_in_memory`].
    pub fn checkpoint_in_memory(&self) {
        self.headers.checkpoint_in_memory();
    }

    /// See [`DiskArray::rollback_in_memory`].
    pub fn rollback_in_memory(&self) {
        self.headers.rollback_in_memory();
    }
}

/// Header array under construction by the bulk builder.
pub struct ListHeadersBuilder {
    headers: DiskArrayBuilder<u32>,
}

impl ListHeadersBuilder {
    /// Allocates `num_entities` headers, all empty small lists.
    pub fn new(file: Arc<FileHandle>, num_entities: u64) -> Result<Self> {
        Ok(Self {
            headers: DiskArrayBuilder::new(file, LIST_HEADERS_HEADER_PAGE, num_entities)?,
        })
    }

    /// Entities covered.
    pub fn num_entities(&self) -> u64 {
        self.headers.num_elements()
    }

    /// Header word of `offset`.
    pub fn get_header(&self, offset: EntityOffset) -> Result<u32> {
        self.headers.get(offset)
    }

    /// Sets the header word of `offset`.
    pub fn set_header(&mut self, offset: EntityOffset, header: u32) -> Result<()> {
        self.headers.set(offset, header)
    }

    /// Writes the array out through `bm`.
    pub fn save_to_disk(&self, bm: &BufferManager) -> Result<()> {
        self.headers.save_to_disk(bm)
    }
}
