//! Transaction handles and the single-writer admission rule.

use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tracing::debug;

use crate::types::{Result, StorageError};

/// Whether a transaction may mutate pages.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TransactionType {
    /// Sees original pages only.
    ReadOnly,
    /// Sees (and creates) shadow pages.
    Write,
}

/// Handle the transaction manager gives out; carries no locks itself.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Transaction {
    id: u64,
    kind: TransactionType,
    timestamp: u64,
}

impl Transaction {
    /// Builds a transaction handle directly. Mostly useful in tests; real
    /// handles come from [`TransactionManager`].
    pub const fn new(id: u64, kind: TransactionType, timestamp: u64) -> Self {
        Self {
            id,
            kind,
            timestamp,
        }
    }

    /// Transaction id.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Read-only or write.
    pub fn kind(&self) -> TransactionType {
        self.kind
    }

    /// Start timestamp.
    pub fn timestamp(&self) -> u64 {
        self.timestamp
    }

    /// True for write transactions.
    pub fn is_write(&self) -> bool {
        self.kind == TransactionType::Write
    }

    pub(crate) fn require_write(&self) -> Result<()> {
        if self.is_write() {
            Ok(())
        } else {
            Err(StorageError::Invalid("mutation through a read-only transaction"))
        }
    }
}

/// Minimal transaction source: monotonic ids/timestamps and a single writer.
#[derive(Default)]
pub struct TransactionManager {
    next_id: AtomicU64,
    clock: AtomicU64,
    active_writer: Mutex<Option<u64>>,
}

impl TransactionManager {
    /// Creates a manager with ids and timestamps starting at 1.
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts a read-only transaction.
    pub fn begin_read_only(&self) -> Transaction {
        self.begin(TransactionType::ReadOnly)
    }

    /// Starts the write transaction; fails while another one is active.
    pub fn begin_write(&self) -> Result<Transaction> {
        let mut writer = self.active_writer.lock();
        if writer.is_some() {
            return Err(StorageError::Invalid("a write transaction is already active"));
        }
        let txn = self.begin(TransactionType::Write);
        *writer = Some(txn.id());
        debug!(txn = txn.id(), "txn.begin_write");
        Ok(txn)
    }

    /// Ends `txn`, releasing the writer slot if it held it.
    pub fn finish(&self, txn: &Transaction) {
        let mut writer = self.active_writer.lock();
        if *writer == Some(txn.id()) {
            *writer = None;
        }
    }

    /// Id of the active writer, if any.
    pub fn active_writer(&self) -> Option<u64> {
        *self.active_writer.lock()
    }

    fn begin(&self, kind: TransactionType) -> Transaction {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let timestamp = self.clock.fetch_add(1, Ordering::AcqRel) + 1;
        Transaction::new(id, kind, timestamp)
    }
}
