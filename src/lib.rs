//! On-disk variable-length list storage for a property graph.
//!
//! Every entity (node offset) owns a list of fixed-size elements: neighbour
//! ids, list-typed property values, or overflow-backed strings and nested
//! lists. Lists are bulk loaded in parallel, read through lazy scans, and
//! mutated under single-writer transactions that stage page changes in a
//! shadow-page WAL.

#![warn(missing_docs)]

pub mod primitives;
pub mod storage;
pub mod types;

pub use storage::{
    Lists, ListsBuilder, StorageManager, StorageOptions, Transaction, TransactionType,
};
pub use types::{NodeId, Result, StorageError};
