//! Low-level primitives beneath the list engine.
//!
//! Includes byte helpers, page-granular file I/O, the buffer manager,
//! page locks and the builder's task pool, and the shadow-page WAL.

/// Little-endian field helpers.
pub mod bytes;

/// Page locks, worker pool and ordering token.
pub mod concurrency;

/// Positioned page I/O over standard files.
pub mod io;

/// Buffer manager: pinned, LRU-evicted page frames.
pub mod pager;

/// Shadow-page write-ahead log with crash recovery.
pub mod wal;
