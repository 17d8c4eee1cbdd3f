//! Notification sources: where directory-change events come from.
//!
//! A source hands out a [`WatchKey`] per registered directory. A key is
//! *ready* until an event arrives for it, at which point it becomes
//! *signalled* and is queued for [`NotificationSource::take`]. The consumer
//! drains the key's batch with [`NotificationSource::poll_events`] and hands
//! it back with [`NotificationSource::reset`]. Events arriving while a key is
//! signalled accumulate into its next batch.

mod memory;
mod native;
mod table;

use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};

pub use memory::MemorySource;
pub use native::NotifySource;

use crate::error::Result;
use crate::event::FileEvent;

/// Handle to one directory registration.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WatchKey {
    id: u64,
    directory: Arc<Path>,
}

impl WatchKey {
    pub(crate) fn new(id: u64, directory: &Path) -> Self {
        Self {
            id,
            directory: Arc::from(directory),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// The registered directory that event paths are relative to.
    pub fn directory(&self) -> &Path {
        &self.directory
    }
}

/// An OS-level (or scripted) source of directory-change events.
///
/// All methods take `&self`; implementations synchronize internally so a
/// source can be shared between the loop thread and any closer.
pub trait NotificationSource: Send + Sync {
    /// Register a directory for creation events. Registering a directory that
    /// is already registered returns the existing key.
    fn register(&self, directory: &Path) -> Result<WatchKey>;

    /// Block until a key is signalled.
    ///
    /// Fails with [`WatcherError::SourceClosed`] once the source is closed and
    /// with [`WatcherError::Interrupted`] when the wait is interrupted.
    ///
    /// [`WatcherError::SourceClosed`]: crate::WatcherError::SourceClosed
    /// [`WatcherError::Interrupted`]: crate::WatcherError::Interrupted
    fn take(&self) -> Result<WatchKey>;

    /// Drain the pending batch of a key, in delivery order.
    fn poll_events(&self, key: &WatchKey) -> Vec<FileEvent>;

    /// Return a signalled key to the ready state. Returns `false` when the key
    /// is no longer valid and will never be signalled again.
    fn reset(&self, key: &WatchKey) -> bool;

    /// Cancel a registration.
    fn cancel(&self, key: &WatchKey);

    /// Close the source, invalidating every key and waking all waiters.
    fn close(&self);
}

/// A source shared between a watch loop and whoever may close it.
///
/// `cancel` (performed by the loop on exit) and `close` run under one
/// lifecycle lock so the two never interleave. Close through
/// [`SharedSource::close`] rather than the inner source.
#[derive(Debug)]
pub struct SharedSource<S> {
    source: S,
    lifecycle: Mutex<()>,
}

impl<S: NotificationSource> SharedSource<S> {
    pub fn new(source: S) -> Arc<Self> {
        Arc::new(Self {
            source,
            lifecycle: Mutex::new(()),
        })
    }

    /// The wrapped source.
    pub fn source(&self) -> &S {
        &self.source
    }

    /// Close the source under the lifecycle lock.
    pub fn close(&self) {
        let _guard = self
            .lifecycle
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        self.source.close();
    }

    pub(crate) fn cancel(&self, key: &WatchKey) {
        let _guard = self
            .lifecycle
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        self.source.cancel(key);
    }
}
