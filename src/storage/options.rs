//! Engine tunables, loadable from a TOML file.

use std::path::Path;
use std::thread;

use serde::{Deserialize, Serialize};

use crate::primitives::pager::DEFAULT_CACHE_PAGES;
use crate::types::{Result, StorageError};

/// Tunables for a [`super::StorageManager`].
///
/// Page size, chunk size and page-list group capacity are part of the file
/// format and therefore crate constants, not options.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageOptions {
    /// Buffer pool capacity in pages.
    pub page_cache_pages: usize,
    /// Worker threads for the bulk builder.
    pub builder_threads: usize,
    /// Whether commit fsyncs the WAL.
    pub wal_sync: bool,
    /// Optional lower small/large threshold for the bulk builder. Values
    /// above the natural small-list capacity are clamped down to it.
    pub large_list_threshold: Option<u32>,
}

impl Default for StorageOptions {
    fn default() -> Self {
        Self {
            page_cache_pages: DEFAULT_CACHE_PAGES,
            builder_threads: default_threads(),
            wal_sync: true,
            large_list_threshold: None,
        }
    }
}

impl StorageOptions {
    /// Large cache, every core building, no WAL fsync.
    pub fn bulk_load() -> Self {
        Self {
            page_cache_pages: 16 * 1024,
            builder_threads: default_threads(),
            wal_sync: false,
            large_list_threshold: None,
        }
    }

    /// Small footprint, suitable for tests and tools.
    pub fn small() -> Self {
        Self {
            page_cache_pages: 64,
            builder_threads: 1,
            wal_sync: true,
            large_list_threshold: None,
        }
    }

    /// Parses options from TOML. Missing keys keep their defaults.
    pub fn from_toml_str(input: &str) -> Result<Self> {
        let options: Self = toml::from_str(input)
            .map_err(|err| StorageError::Format(format!("invalid storage options: {err}")))?;
        options.validate()?;
        Ok(options)
    }

    /// Reads and parses a TOML options file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    /// Sets the buffer pool capacity.
    pub fn page_cache_pages(mut self, pages: usize) -> Self {
        self.page_cache_pages = pages;
        self
    }

    /// Sets the builder thread count.
    pub fn builder_threads(mut self, threads: usize) -> Self {
        self.builder_threads = threads;
        self
    }

    /// Enables or disables WAL fsync on commit.
    pub fn wal_sync(mut self, enabled: bool) -> Self {
        self.wal_sync = enabled;
        self
    }

    /// Overrides the bulk builder's small/large threshold.
    pub fn large_list_threshold(mut self, threshold: u32) -> Self {
        self.large_list_threshold = Some(threshold);
        self
    }

    fn validate(&self) -> Result<()> {
        if self.page_cache_pages == 0 {
            return Err(StorageError::Invalid("page_cache_pages must be positive"));
        }
        if self.builder_threads == 0 {
            return Err(StorageError::Invalid("builder_threads must be positive"));
        }
        if self.large_list_threshold == Some(0) {
            return Err(StorageError::Invalid("large_list_threshold must be positive"));
        }
        Ok(())
    }
}

fn default_threads() -> usize {
    thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn toml_overrides_only_given_keys() -> Result<()> {
        let options = StorageOptions::from_toml_str(
            r#"
            page_cache_pages = 32
            large_list_threshold = 40
            "#,
        )?;
        assert_eq!(options.page_cache_pages, 32);
        assert_eq!(options.large_list_threshold, Some(40));
        assert!(options.wal_sync);
        assert_eq!(options.builder_threads, StorageOptions::default().builder_threads);
        Ok(())
    }

    #[test]
    fn invalid_values_are_rejected() {
        assert!(StorageOptions::from_toml_str("builder_threads = 0").is_err());
        assert!(StorageOptions::from_toml_str("page_cache_pages = \"many\"").is_err());
    }

    #[test]
    fn serialises_back_to_toml() -> Result<()> {
        let options = StorageOptions::small().large_list_threshold(7);
        let text = toml::to_string(&options)
            .map_err(|err| StorageError::Format(err.to_string()))?;
        assert_eq!(StorageOptions::from_toml_str(&text)?, options);
        Ok(())
    }
}
