//! Identifiers, format constants and the crate error type.

/// Checksums used by the write-ahead log.
pub mod checksum;
mod error;

pub use error::{Result, StorageError};

/// Physical page index within one file.
pub type PageIdx = u32;

/// Sentinel meaning "no page".
pub const PAGE_IDX_MAX: PageIdx = u32::MAX;

/// Size of every page in every file managed by this crate.
pub const PAGE_SIZE: usize = 4096;

/// Dense zero-based entity (node) offset.
pub type EntityOffset = u64;

/// Identifier of a node table.
pub type TableId = u32;

/// log2 of [`CHUNK_SIZE`].
pub const CHUNK_SIZE_LOG2: u32 = 9;

/// Number of entities sharing one chunk page list.
pub const CHUNK_SIZE: u64 = 1 << CHUNK_SIZE_LOG2;

/// Runtime identifier the buffer manager assigns to an open file.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FileId(pub u32);

/// A node reference: owning table plus offset within it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId {
    /// Table the node belongs to.
    pub table: TableId,
    /// Offset of the node inside its table.
    pub offset: EntityOffset,
}

impl NodeId {
    /// Creates a node id.
    pub const fn new(table: TableId, offset: EntityOffset) -> Self {
        Self { table, offset }
    }
}

/// Number of chunks needed to cover `num_entities`.
pub fn num_chunks(num_entities: u64) -> u64 {
    (num_entities + CHUNK_SIZE - 1) >> CHUNK_SIZE_LOG2
}

/// Chunk holding `offset`.
pub fn chunk_idx(offset: EntityOffset) -> u64 {
    offset >> CHUNK_SIZE_LOG2
}
