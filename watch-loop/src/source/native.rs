//! Notification source backed by the platform watcher from `notify`.

use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};

use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use tracing::{debug, error, warn};

use crate::error::{Result, WatcherError};
use crate::event::{FileEvent, FileEventKind};
use crate::source::table::KeyTable;
use crate::source::{NotificationSource, WatchKey};

/// Watches registered directories (non-recursively) with the platform's
/// recommended watcher and delivers their creation events.
///
/// Directories are canonicalized on registration; keys and detected files
/// carry the canonical path.
pub struct NotifySource {
    table: Arc<KeyTable>,
    watcher: Mutex<Option<RecommendedWatcher>>,
}

impl NotifySource {
    /// Create a source with the platform's recommended watcher.
    pub fn new() -> Result<Self> {
        let table = Arc::new(KeyTable::new());
        let callback_table = Arc::clone(&table);

        let watcher = notify::recommended_watcher(
            move |res: std::result::Result<notify::Event, notify::Error>| match res {
                Ok(event) => dispatch(&callback_table, event),
                Err(e) => error!("Watch error: {e}"),
            },
        )?;

        Ok(Self {
            table,
            watcher: Mutex::new(Some(watcher)),
        })
    }

    /// Directories currently registered.
    pub fn directories(&self) -> Vec<std::path::PathBuf> {
        self.table.directories()
    }
}

/// Route one notify event to the key of the directory it happened in.
fn dispatch(table: &KeyTable, event: notify::Event) {
    match FileEventKind::from_notify(&event) {
        Some(FileEventKind::Overflow) => {
            warn!("Watcher requested a rescan, delivering overflow");
            table.signal_all(&FileEvent::overflow());
        }
        // Registrations are for creation events only.
        Some(FileEventKind::Created) => {
            for path in event.paths {
                let (Some(directory), Some(name)) = (path.parent(), path.file_name()) else {
                    continue;
                };
                if !table.signal(directory, [FileEvent::created(name)]) {
                    debug!("Dropping event for unwatched path: {}", path.display());
                }
            }
        }
        // A removal naming a watched directory itself ends that registration.
        Some(FileEventKind::Deleted) => {
            for path in &event.paths {
                if table.invalidate(path) {
                    warn!("Watched directory removed: {}", path.display());
                }
            }
        }
        _ => {}
    }
}

impl NotificationSource for NotifySource {
    fn register(&self, directory: &Path) -> Result<WatchKey> {
        if !directory.exists() {
            return Err(WatcherError::DirectoryNotFound(
                directory.display().to_string(),
            ));
        }
        if !directory.is_dir() {
            return Err(WatcherError::NotADirectory(directory.display().to_string()));
        }
        let directory = std::fs::canonicalize(directory)?;

        let mut guard = self.watcher.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(watcher) = guard.as_mut() else {
            return Err(WatcherError::SourceClosed);
        };

        // Already watched: hand back the live key without touching the watch.
        if let Some(key) = self.table.lookup(&directory) {
            return Ok(key);
        }

        // Register the key first so no event between `watch` and insertion is lost.
        let key = self.table.register(&directory)?;
        if let Err(e) = watcher.watch(&directory, RecursiveMode::NonRecursive) {
            self.table.cancel(&key);
            return Err(e.into());
        }

        debug!("Started watching: {}", directory.display());
        Ok(key)
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
        if !self.table.cancel(key) {
            return;
        }
        let mut guard = self.watcher.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(watcher) = guard.as_mut() {
            if let Err(e) = watcher.unwatch(key.directory()) {
                debug!("Failed to unwatch {}: {e}", key.directory().display());
            }
        }
    }

    fn close(&self) {
        // Dropping the watcher stops the platform backend and its callback.
        drop(
            self.watcher
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .take(),
        );
        self.table.close();
        debug!("Notify source closed");
    }
}
