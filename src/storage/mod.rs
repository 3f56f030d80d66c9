//! Variable-length list storage.
//!
//! Per-entity lists live in fixed-size pages. A header array says whether a
//! list is packed with its chunk (small) or owns a page run (large), and the
//! metadata arrays map each chunk or large list to its physical pages.

/// Parallel bulk construction.
pub mod builder;

/// Element codecs for the supported list types.
pub mod codec;

/// Node id encodings for adjacency lists.
pub mod compression;

/// Growable on-disk arrays anchored by PIP chains.
pub mod disk_array;

/// Element placement within a page.
pub mod layout;

/// Per-entity header words.
pub mod list_headers;

/// The list façade and its scan iterator.
pub mod lists;

/// Page lists for chunks and large lists.
pub mod lists_metadata;

/// Out-of-line element bytes.
pub mod overflow;

mod manager;
mod metrics;
mod options;
mod structure;
mod transaction;

pub use builder::{BuildSummary, ListsBuilder};
pub use codec::{ElementCodec, FixedWidth, NestedListCodec, NodeIdCodec, StringCodec};
pub use compression::NodeIdCompression;
pub use lists::{
    AdjLists, Checkpointable, ListInfo, ListPropertyLists, ListScan, Lists, ListsPaths,
    ListsStats, PropertyLists, StringPropertyLists,
};
pub use manager::StorageManager;
pub use metrics::{default_metrics, CounterMetrics, ListsMetrics, NoopMetrics, ObservabilityContext};
pub use options::StorageOptions;
pub use overflow::{OverflowFile, OverflowPtr, OverflowStore};
pub use structure::{ShadowPage, StorageStructure};
pub use transaction::{Transaction, TransactionManager, TransactionType};
