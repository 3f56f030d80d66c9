#![forbid(unsafe_code)]
//! Page locks for shadow creation and the bulk builder's task pool.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

use parking_lot::{Condvar, Mutex};
use rustc_hash::FxHashSet;
use tracing::{debug, trace};

use crate::types::{FileId, PageIdx, Result, StorageError};

/// Exclusive per-page locks, keyed by `(file, page)`.
///
/// Held while a shadow page is created or reused and released only after the
/// shadow is unpinned, so one transaction never shadows a page twice.
#[derive(Default)]
pub struct PageLockTable {
    locked: Mutex<FxHashSet<(FileId, PageIdx)>>,
    released: Condvar,
}

/// Guard for a held page lock.
pub struct PageLockGuard<'a> {
    table: &'a PageLockTable,
    key: (FileId, PageIdx),
}

impl PageLockTable {
    /// Creates an empty lock table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Blocks until the page lock is free, then takes it.
    pub fn lock(&self, file: FileId, page: PageIdx) -> PageLockGuard<'_> {
        let key = (file, page);
        let mut locked = self.locked.lock();
        while locked.contains(&key) {
            trace!(file = file.0, page, "page_lock.wait");
            self.released.wait(&mut locked);
        }
        locked.insert(key);
        PageLockGuard { table: self, key }
    }

    /// Returns true if the page is currently locked.
    pub fn is_locked(&self, file: FileId, page: PageIdx) -> bool {
        self.locked.lock().contains(&(file, page))
    }
}

impl Drop for PageLockGuard<'_> {
    fn drop(&mut self) {
        self.table.locked.lock().remove(&self.key);
        self.table.released.notify_all();
    }
}

/// Fixed-size worker pool draining a FIFO task queue.
///
/// `run` returns once every task finished, or after the first failure with
/// the remaining queued tasks skipped.
#[derive(Clone, Copy, Debug)]
pub struct TaskScheduler {
    num_threads: usize,
}

impl TaskScheduler {
    /// Creates a scheduler with `num_threads` workers (at least one).
    pub fn new(num_threads: usize) -> Self {
        Self {
            num_threads: num_threads.max(1),
        }
    }

    /// Worker count.
    pub fn num_threads(&self) -> usize {
        self.num_threads
    }

    /// Runs `tasks` and returns their results in submission order.
    pub fn run<T, F>(&self, tasks: Vec<F>) -> Result<Vec<T>>
    where
        F: FnOnce() -> Result<T> + Send,
        T: Send,
    {
        let total = tasks.len();
        if total == 0 {
            return Ok(Vec::new());
        }
        let queue: Mutex<VecDeque<(usize, F)>> = Mutex::new(tasks.into_iter().enumerate().collect());
        let results: Mutex<Vec<Option<T>>> = Mutex::new((0..total).map(|_| None).collect());
        let failure: Mutex<Option<StorageError>> = Mutex::new(None);
        let aborted = AtomicBool::new(false);
        let workers = self.num_threads.min(total);

        thread::scope(|scope| {
            for _ in 0..workers {
                scope.spawn(|| loop {
                    if aborted.load(Ordering::Acquire) {
                        break;
                    }
                    let Some((idx, task)) = queue.lock().pop_front() else {
                        break;
                    };
                    match task() {
                        Ok(value) => results.lock()[idx] = Some(value),
                        Err(err) => {
                            aborted.store(true, Ordering::Release);
                            failure.lock().get_or_insert(err);
                            break;
                        }
                    }
                });
            }
        });

        if let Some(err) = failure.into_inner() {
            debug!(error = %err, "scheduler.task_failed");
            return Err(err);
        }
        results
            .into_inner()
            .into_iter()
            .collect::<Option<Vec<T>>>()
            .ok_or(StorageError::Invalid("scheduled task did not run"))
    }
}

/// Hands out turns in strictly increasing id order.
///
/// Tasks that may finish out of order call [`OrderingToken::wait_for_turn`]
/// before touching order-sensitive state and [`OrderingToken::advance`]
/// afterwards. A failed task poisons the token so waiters do not hang.
#[derive(Default)]
pub struct OrderingToken {
    state: Mutex<TokenState>,
    turn: Condvar,
}

#[derive(Default)]
struct TokenState {
    next: u64,
    poisoned: bool,
}

impl OrderingToken {
    /// Creates a token whose first turn is id 0.
    pub fn new() -> Self {
        Self::default()
    }

    /// Blocks until it is `id`'s turn.
    pub fn wait_for_turn(&self, id: u64) -> Result<()> {
        let mut state = self.state.lock();
        loop {
            if state.poisoned {
                return Err(StorageError::Invalid("ordering token poisoned by failed task"));
            }
            if state.next == id {
                return Ok(());
            }
            if state.next > id {
                return Err(StorageError::OrderingViolation {
                    what: "ordering token",
                    last: state.next.checked_sub(1),
                    got: id,
                });
            }
            self.turn.wait(&mut state);
        }
    }

    /// Passes the turn from `id` to `id + 1`.
    pub fn advance(&self, id: u64) {
        let mut state = self.state.lock();
        debug_assert_eq!(state.next, id, "advance out of turn");
        state.next = id + 1;
        self.turn.notify_all();
    }

    /// Releases every waiter with an error.
    pub fn poison(&self) {
        self.state.lock().poisoned = true;
        self.turn.notify_all();
    }
}
