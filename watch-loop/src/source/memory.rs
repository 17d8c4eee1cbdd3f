//! In-process notification source driven by explicit calls.
//!
//! Useful for feeding a watch loop from something other than the file system
//! (an upload endpoint, a queue consumer) and for exercising loop behavior
//! deterministically.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::error::{Result, WatcherError};
use crate::event::FileEvent;
use crate::source::table::KeyTable;
use crate::source::{NotificationSource, WatchKey};

/// A source whose events are supplied by the caller.
#[derive(Debug, Default)]
pub struct MemorySource {
    table: KeyTable,
    rejected: Mutex<HashSet<PathBuf>>,
    cancellations: Mutex<HashMap<PathBuf, usize>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make later registrations of `directory` fail.
    pub fn reject(&self, directory: impl Into<PathBuf>) {
        lock(&self.rejected).insert(directory.into());
    }

    /// Deliver a batch of events for a registered directory. Events emitted by
    /// one call always land in the same batch. Returns `false` when the
    /// directory has no valid registration.
    pub fn emit<I>(&self, directory: &Path, events: I) -> bool
    where
        I: IntoIterator<Item = FileEvent>,
    {
        self.table.signal(directory, events)
    }

    /// Invalidate a directory's registration, as if it had been deleted.
    pub fn invalidate(&self, directory: &Path) -> bool {
        self.table.invalidate(directory)
    }

    /// Interrupt a blocked (or the next) `take` once no signalled key remains.
    pub fn interrupt(&self) {
        self.table.interrupt();
    }

    /// Number of times the registration of `directory` was cancelled.
    pub fn cancellations(&self, directory: &Path) -> usize {
        lock(&self.cancellations)
            .get(directory)
            .copied()
            .unwrap_or(0)
    }

    pub fn is_closed(&self) -> bool {
        self.table.is_closed()
    }

    /// Directories with a valid registration.
    pub fn directories(&self) -> Vec<PathBuf> {
        self.table.directories()
    }
}

impl NotificationSource for MemorySource {
    fn register(&self, directory: &Path) -> Result<WatchKey> {
        if lock(&self.rejected).contains(directory) {
            return Err(WatcherError::Rejected(directory.display().to_string()));
        }
        self.table.register(directory)
    }

    fn take(&self) -> Result<WatchKey> {
        self.table.take()
    }

    fn poll_events(&self, key: &WatchKey) -> Vec<FileEvent> {
        self.table.poll_events(key)
    }

    fn reset(&self, key: &WatchKey) -> bool {
        self.table.reset(key)
    }

    fn cancel(&self, key: &WatchKey) {
        self.table.cancel(key);
        *lock(&self.cancellations)
            .entry(key.directory().to_path_buf())
            .or_insert(0) += 1;
    }

    fn close(&self) {
        self.table.close();
    }
}
