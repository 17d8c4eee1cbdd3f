//! Append-only record of the files a loop has detected.
//!
//! The loop thread is the only writer. Readers take snapshots: each snapshot
//! is an immutable `Arc` of the record as it was when taken, so later appends
//! never disturb an iteration in progress. An append clones the backing
//! vector only while an older snapshot is still alive.

use std::ops::Deref;
use std::path::Path;
use std::sync::{Arc, PoisonError, RwLock};

use crate::event::DetectedFile;

#[derive(Debug, Clone, Default)]
pub(crate) struct ObservedFiles {
    files: Arc<RwLock<Arc<Vec<DetectedFile>>>>,
}

impl ObservedFiles {
    pub(crate) fn push(&self, file: DetectedFile) {
        let mut files = self.files.write().unwrap_or_else(PoisonError::into_inner);
        Arc::make_mut(&mut files).push(file);
    }

    pub(crate) fn snapshot(&self) -> ObservedSnapshot {
        let files = self.files.read().unwrap_or_else(PoisonError::into_inner);
        ObservedSnapshot {
            files: Arc::clone(&files),
        }
    }
}

/// Read-only, point-in-time view of the detected files.
#[derive(Debug, Clone)]
pub struct ObservedSnapshot {
    files: Arc<Vec<DetectedFile>>,
}

impl ObservedSnapshot {
    /// Paths of the detected files, in detection order.
    pub fn paths(&self) -> Vec<&Path> {
        self.files.iter().map(|f| f.path.as_path()).collect()
    }

    /// Whether a file with this resolved path was detected.
    pub fn contains(&self, path: &Path) -> bool {
        self.files.iter().any(|f| f.path == path)
    }
}

impl Deref for ObservedSnapshot {
    type Target = [DetectedFile];

    fn deref(&self) -> &Self::Target {
        &self.files
    }
}

impl<'a> IntoIterator for &'a ObservedSnapshot {
    type Item = &'a DetectedFile;
    type IntoIter = std::slice::Iter<'a, DetectedFile>;

    fn into_iter(self) -> Self::IntoIter {
        self.files.iter()
    }
}
