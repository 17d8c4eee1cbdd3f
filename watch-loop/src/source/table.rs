//! Registration and readiness bookkeeping shared by the source implementations.

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};

use tracing::debug;

use crate::error::{Result, WatcherError};
use crate::event::FileEvent;
use crate::source::WatchKey;

#[derive(Debug, Default)]
pub(crate) struct KeyTable {
    state: Mutex<TableState>,
    signalled: Condvar,
}

#[derive(Debug, Default)]
struct TableState {
    next_id: u64,
    keys: HashMap<u64, KeyEntry>,
    by_directory: HashMap<PathBuf, u64>,
    queue: VecDeque<u64>,
    closed: bool,
    interrupt_pending: bool,
}

#[derive(Debug)]
struct KeyEntry {
    key: WatchKey,
    pending: Vec<FileEvent>,
    signalled: bool,
    valid: bool,
}

impl TableState {
    /// Mark a key signalled and queue it, unless it already is.
    fn signal(&mut self, id: u64) -> bool {
        let Some(entry) = self.keys.get_mut(&id) else {
            return false;
        };
        if !entry.signalled {
            entry.signalled = true;
            self.queue.push_back(id);
        }
        true
    }

    fn valid_key(&self, directory: &Path) -> Option<WatchKey> {
        let id = self.by_directory.get(directory)?;
        self.keys
            .get(id)
            .filter(|entry| entry.valid)
            .map(|entry| entry.key.clone())
    }
}

impl KeyTable {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, TableState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn register(&self, directory: &Path) -> Result<WatchKey> {
        let mut state = self.lock();
        if state.closed {
            return Err(WatcherError::SourceClosed);
        }

        if let Some(key) = state.valid_key(directory) {
            return Ok(key);
        }

        state.next_id += 1;
        let id = state.next_id;
        let key = WatchKey::new(id, directory);
        state.keys.insert(
            id,
            KeyEntry {
                key: key.clone(),
                pending: Vec::new(),
                signalled: false,
                valid: true,
            },
        );
        state.by_directory.insert(directory.to_path_buf(), id);
        Ok(key)
    }

    /// The valid key registered for a directory, if any.
    pub(crate) fn lookup(&self, directory: &Path) -> Option<WatchKey> {
        self.lock().valid_key(directory)
    }

    /// Append a batch of events to a directory's key. Returns `false` when the
    /// directory has no valid registration.
    pub(crate) fn signal<I>(&self, directory: &Path, events: I) -> bool
    where
        I: IntoIterator<Item = FileEvent>,
    {
        let mut state = self.lock();
        let Some(id) = state.by_directory.get(directory).copied() else {
            return false;
        };
        match state.keys.get_mut(&id) {
            Some(entry) if entry.valid => entry.pending.extend(events),
            _ => return false,
        }
        state.signal(id);
        self.signalled.notify_all();
        true
    }

    /// Append an event to every valid key.
    pub(crate) fn signal_all(&self, event: &FileEvent) {
        let mut state = self.lock();
        let ids: Vec<u64> = state
            .keys
            .iter_mut()
            .filter(|(_, entry)| entry.valid)
            .map(|(id, entry)| {
                entry.pending.push(event.clone());
                *id
            })
            .collect();
        for id in ids {
            state.signal(id);
        }
        self.signalled.notify_all();
    }

    /// Invalidate a directory's key and signal it so the consumer observes the
    /// invalidation on its next reset.
    pub(crate) fn invalidate(&self, directory: &Path) -> bool {
        let mut state = self.lock();
        let Some(id) = state.by_directory.remove(directory) else {
            return false;
        };
        match state.keys.get_mut(&id) {
            Some(entry) => entry.valid = false,
            None => return false,
        }
        state.signal(id);
        self.signalled.notify_all();
        true
    }

    pub(crate) fn take(&self) -> Result<WatchKey> {
        let mut state = self.lock();
        loop {
            if state.closed {
                return Err(WatcherError::SourceClosed);
            }
            while let Some(id) = state.queue.pop_front() {
                if let Some(entry) = state.keys.get(&id) {
                    return Ok(entry.key.clone());
                }
            }
            // Delivered only once no signalled key remains.
            if state.interrupt_pending {
                state.interrupt_pending = false;
                return Err(WatcherError::Interrupted);
            }
            state = self
                .signalled
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    pub(crate) fn poll_events(&self, key: &WatchKey) -> Vec<FileEvent> {
        let mut state = self.lock();
        state
            .keys
            .get_mut(&key.id())
            .map(|entry| std::mem::take(&mut entry.pending))
            .unwrap_or_default()
    }

    pub(crate) fn reset(&self, key: &WatchKey) -> bool {
        let mut state = self.lock();
        let id = key.id();
        let requeue = match state.keys.get_mut(&id) {
            Some(entry) if entry.valid => {
                if entry.signalled && entry.pending.is_empty() {
                    entry.signalled = false;
                    false
                } else {
                    entry.signalled
                }
            }
            _ => return false,
        };
        if requeue && !state.queue.contains(&id) {
            state.queue.push_back(id);
            self.signalled.notify_all();
        }
        true
    }

    /// Drop a key. Returns whether it was still valid.
    pub(crate) fn cancel(&self, key: &WatchKey) -> bool {
        let mut state = self.lock();
        let id = key.id();
        let Some(entry) = state.keys.remove(&id) else {
            return false;
        };
        if state.by_directory.get(key.directory()) == Some(&id) {
            state.by_directory.remove(key.directory());
        }
        state.queue.retain(|queued| *queued != id);
        debug!("Cancelled registration for {}", key.directory().display());
        entry.valid
    }

    pub(crate) fn interrupt(&self) {
        self.lock().interrupt_pending = true;
        self.signalled.notify_all();
    }

    pub(crate) fn close(&self) {
        let mut state = self.lock();
        state.closed = true;
        state.keys.clear();
        state.by_directory.clear();
        state.queue.clear();
        self.signalled.notify_all();
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.lock().closed
    }

    pub(crate) fn directories(&self) -> Vec<PathBuf> {
        let state = self.lock();
        let mut directories: Vec<PathBuf> = state.by_directory.keys().cloned().collect();
        directories.sort();
        directories
    }
}
