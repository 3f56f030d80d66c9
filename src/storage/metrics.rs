//! Counter sinks and the observability handle threaded through the engine.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tracing::{info_span, Span};

/// Counters the list engine reports into.
///
/// Implementations must be cheap; calls happen on the scan and write paths.
pub trait ListsMetrics: Send + Sync {
    /// A list scan started. `large` tells which layout served it.
    fn list_scanned(&self, large: bool);

    /// One element was written at runtime.
    fn element_written(&self);

    /// One element was removed at runtime.
    fn element_removed(&self);

    /// A page received its first shadow copy in the current transaction.
    fn shadow_page_created(&self);

    /// A small list was moved to a dedicated large-list page run.
    fn list_promoted(&self);

    /// A bulk-builder task finished.
    fn builder_task_completed(&self);

    /// A transaction was checkpointed (`true`) or rolled back (`false`).
    fn transaction_finished(&self, committed: bool);
}

/// Discards everything.
#[derive(Default)]
pub struct NoopMetrics;

impl ListsMetrics for NoopMetrics {
    fn list_scanned(&self, _large: bool) {}
    fn element_written(&self) {}
    fn element_removed(&self) {}
    fn shadow_page_created(&self) {}
    fn list_promoted(&self) {}
    fn builder_task_completed(&self) {}
    fn transaction_finished(&self, _committed: bool) {}
}

/// Atomic counters, safe to share across threads.
#[derive(Default)]
pub struct CounterMetrics {
    /// Scans of small (CSR) lists.
    pub small_scans: AtomicU64,
    /// Scans of large lists.
    pub large_scans: AtomicU64,
    /// Elements written through `set_element`/`append_to_list`.
    pub elements_written: AtomicU64,
    /// Elements removed through `remove_from_list`.
    pub elements_removed: AtomicU64,
    /// Shadow pages created.
    pub shadow_pages: AtomicU64,
    /// Small lists promoted to large.
    pub promotions: AtomicU64,
    /// Builder tasks completed.
    pub builder_tasks: AtomicU64,
    /// Checkpointed transactions.
    pub checkpoints: AtomicU64,
    /// Rolled back transactions.
    pub rollbacks: AtomicU64,
}

impl ListsMetrics for CounterMetrics {
    fn list_scanned(&self, large: bool) {
        if large {
            self.large_scans.fetch_add(1, Ordering::Relaxed);
        } else {
            self.small_scans.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn element_written(&self) {
        self.elements_written.fetch_add(1, Ordering::Relaxed);
    }

    fn element_removed(&self) {
        self.elements_removed.fetch_add(1, Ordering::Relaxed);
    }

    fn shadow_page_created(&self) {
        self.shadow_pages.fetch_add(1, Ordering::Relaxed);
    }

    fn list_promoted(&self) {
        self.promotions.fetch_add(1, Ordering::Relaxed);
    }

    fn builder_task_completed(&self) {
        self.builder_tasks.fetch_add(1, Ordering::Relaxed);
    }

    fn transaction_finished(&self, committed: bool) {
        if committed {
            self.checkpoints.fetch_add(1, Ordering::Relaxed);
        } else {
            self.rollbacks.fetch_add(1, Ordering::Relaxed);
        }
    }
}

/// Returns the default metrics sink ([`NoopMetrics`]).
pub fn default_metrics() -> Arc<dyn ListsMetrics> {
    Arc::new(NoopMetrics)
}

/// Logging and metrics handle passed explicitly to builder and runtime
/// entry points. Its lifetime follows the owning [`super::StorageManager`].
#[derive(Clone)]
pub struct ObservabilityContext {
    component: Arc<str>,
    metrics: Arc<dyn ListsMetrics>,
}

impl ObservabilityContext {
    /// Creates a context for `component` reporting into `metrics`.
    pub fn new(component: impl Into<Arc<str>>, metrics: Arc<dyn ListsMetrics>) -> Self {
        Self {
            component: component.into(),
            metrics,
        }
    }

    /// Same sink, narrower component name (e.g. `storage/friends`).
    pub fn child(&self, name: &str) -> Self {
        Self {
            component: format!("{}/{name}", self.component).into(),
            metrics: Arc::clone(&self.metrics),
        }
    }

    /// Component name.
    pub fn component(&self) -> &str {
        &self.component
    }

    /// Metrics sink.
    pub fn metrics(&self) -> &dyn ListsMetrics {
        self.metrics.as_ref()
    }

    /// Span for one operation, tagged with the component.
    pub fn span(&self, op: &'static str) -> Span {
        info_span!("lists", component = %self.component, op)
    }
}

impl Default for ObservabilityContext {
    fn default() -> Self {
        Self::new("storage", default_metrics())
    }
}

impl fmt::Debug for ObservabilityContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObservabilityContext")
            .field("component", &self.component)
            .finish_non_exhaustive()
    }
}
