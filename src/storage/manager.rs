//! The entry point: opens a database directory, replays the WAL and
//! drives commit and rollback across the structures a transaction touched.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::primitives::pager::{BufferManager, BufferStatsSnapshot};
use crate::primitives::wal::Wal;
use crate::storage::builder::ListsBuilder;
use crate::storage::codec::ElementCodec;
use crate::storage::lists::{Checkpointable, Lists, ListsPaths};
use crate::storage::metrics::{default_metrics, ListsMetrics, ObservabilityContext};
use crate::storage::options::StorageOptions;
use crate::storage::overflow::OverflowFile;
use crate::storage::structure::StorageStructure;
use crate::storage::transaction::{Transaction, TransactionManager};
use crate::types::{EntityOffset, Result, StorageError};

/// Owns the page cache, WAL and transaction source of one storage directory
/// and opens list structures inside it.
pub struct StorageManager {
    dir: PathBuf,
    options: StorageOptions,
    bm: Arc<BufferManager>,
    wal: Arc<Wal>,
    txns: TransactionManager,
    obs: ObservabilityContext,
}

impl StorageManager {
    /// Opens `dir`, creating it if needed and recovering committed WAL
    /// records before anything else reads a page.
    pub fn open(dir: impl AsRef<Path>, options: StorageOptions) -> Result<Self> {
        Self::open_with_metrics(dir, options, default_metrics())
    }

    /// Like [`Self::open`] with a custom metrics sink.
    pub fn open_with_metrics(
        dir: impl AsRef<Path>,
        options: StorageOptions,
        metrics: Arc<dyn ListsMetrics>,
    ) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        let bm = Arc::new(BufferManager::new(options.page_cache_pages));
        let wal = Arc::new(Wal::open(&dir, Arc::clone(&bm), options.wal_sync)?);
        info!(
            dir = %dir.display(),
            cache_pages = options.page_cache_pages,
            wal_sync = options.wal_sync,
            "storage.open"
        );
        Ok(Self {
            dir,
            options,
            bm,
            wal,
            txns: TransactionManager::new(),
            obs: ObservabilityContext::new("storage", metrics),
        })
    }

    /// Storage directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Options in effect.
    pub fn options(&self) -> &StorageOptions {
        &self.options
    }

    /// Shared page cache.
    pub fn buffer_manager(&self) -> &Arc<BufferManager> {
        &self.bm
    }

    /// Buffer manager counters.
    pub fn buffer_stats(&self) -> BufferStatsSnapshot {
        self.bm.stats()
    }

    /// The directory's WAL.
    pub fn wal(&self) -> &Arc<Wal> {
        &self.wal
    }

    /// Root observability context.
    pub fn obs(&self) -> &ObservabilityContext {
        &self.obs
    }

    /// Transaction source.
    pub fn transactions(&self) -> &TransactionManager {
        &self.txns
    }

    /// Starts a read-only transaction.
    pub fn begin_read_only(&self) -> Transaction {
        self.txns.begin_read_only()
    }

    /// Starts the write transaction.
    pub fn begin_write(&self) -> Result<Transaction> {
        self.txns.begin_write()
    }

    /// Commits and checkpoints `txn`, then lets every participant adopt its
    /// new in-memory state.
    ///
    /// If the commit fails before the WAL commit record is durable, `txn` is
    /// rolled back and the original error returned. A failed checkpoint after
    /// that point still finishes `txn`; the next open replays the commit.
    pub fn commit(&self, txn: &Transaction, participants: &[&dyn Checkpointable]) -> Result<()> {
        if !txn.is_write() {
            self.txns.finish(txn);
            return Ok(());
        }
        if let Err(err) = self.make_durable(txn, participants) {
            warn!(txn = txn.id(), error = %err, "storage.commit_failed");
            if let Err(rollback_err) = self.rollback(txn, participants) {
                warn!(txn = txn.id(), error = %rollback_err, "storage.rollback_failed");
            }
            return Err(err);
        }
        let checkpointed = self.wal.checkpoint();
        for participant in participants {
            participant.checkpoint_in_memory();
        }
        self.obs.metrics().transaction_finished(true);
        self.txns.finish(txn);
        let pages = checkpointed.inspect_err(|err| {
            warn!(txn = txn.id(), error = %err, "storage.checkpoint_failed");
        })?;
        debug!(txn = txn.id(), pages, "storage.commit");
        Ok(())
    }

    fn make_durable(&self, txn: &Transaction, participants: &[&dyn Checkpointable]) -> Result<()> {
        for participant in participants {
            participant.prepare_commit()?;
        }
        self.wal.commit(txn.id())
    }

    /// Discards every change of `txn`.
    pub fn rollback(&self, txn: &Transaction, participants: &[&dyn Checkpointable]) -> Result<()> {
        if txn.is_write() {
            let pages = self.wal.rollback()?;
            for participant in participants {
                participant.rollback_in_memory();
            }
            self.obs.metrics().transaction_finished(false);
            debug!(txn = txn.id(), pages, "storage.rollback");
        }
        self.txns.finish(txn);
        Ok(())
    }

    /// File paths of structure `name`.
    pub fn lists_paths(&self, name: &str) -> ListsPaths {
        ListsPaths::new(&self.dir, name)
    }

    /// Opens the existing structure `name`.
    ///
    /// Open each structure once per manager; two handles on the same files
    /// would cache pages independently.
    pub fn open_lists<C: ElementCodec>(&self, name: &str, codec: C) -> Result<Lists<C>> {
        let paths = self.lists_paths(name);
        for path in [&paths.data, &paths.headers, &paths.metadata] {
            if !path.exists() {
                return Err(StorageError::Io(io::Error::new(
                    io::ErrorKind::NotFound,
                    format!("missing list file {}", path.display()),
                )));
            }
        }
        let obs = self.obs.child(name);
        let structure = |path: &Path| -> Result<StorageStructure> {
            Ok(StorageStructure::new(
                self.bm.open_file(path)?,
                Arc::clone(&self.bm),
                Arc::clone(&self.wal),
                obs.clone(),
            ))
        };
        Lists::open(
            name,
            codec,
            structure(&paths.data)?,
            structure(&paths.headers)?,
            structure(&paths.metadata)?,
        )
    }

    /// Bulk builder for structure `name` over `num_entities` entities.
    pub fn lists_builder<C: ElementCodec>(
        &self,
        name: &str,
        codec: C,
        num_entities: EntityOffset,
    ) -> ListsBuilder<'_, C> {
        ListsBuilder::new(self, name, codec, num_entities)
    }

    /// Opens (or starts) the overflow file of structure `name`.
    pub fn open_overflow(&self, name: &str) -> Result<Arc<OverflowFile>> {
        let path = self.lists_paths(name).overflow;
        Ok(Arc::new(OverflowFile::open(Arc::clone(&self.bm), path)?))
    }

    /// Replaces the overflow file of structure `name` with an empty one.
    pub fn create_overflow(&self, name: &str) -> Result<Arc<OverflowFile>> {
        let path = self.lists_paths(name).overflow;
        Ok(Arc::new(OverflowFile::create(Arc::clone(&self.bm), path)?))
    }
}
