//! Change events delivered by a notification source, and the files the loop
//! detects from them.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single change reported for a watched directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEvent {
    /// The kind of event.
    pub kind: FileEventKind,

    /// Path relative to the watched directory. `None` for overflow events.
    pub path: Option<PathBuf>,

    /// When the source recorded the event.
    pub timestamp: DateTime<Utc>,
}

impl FileEvent {
    /// Create a new event for a directory-relative path.
    pub fn new(kind: FileEventKind, path: impl Into<PathBuf>) -> Self {
        Self {
            kind,
            path: Some(path.into()),
            timestamp: Utc::now(),
        }
    }

    pub fn created(path: impl Into<PathBuf>) -> Self {
        Self::new(FileEventKind::Created, path)
    }

    pub fn modified(path: impl Into<PathBuf>) -> Self {
        Self::new(FileEventKind::Modified, path)
    }

    pub fn deleted(path: impl Into<PathBuf>) -> Self {
        Self::new(FileEventKind::Deleted, path)
    }

    /// Events were lost or too many happened to enumerate individually.
    pub fn overflow() -> Self {
        Self {
            kind: FileEventKind::Overflow,
            path: None,
            timestamp: Utc::now(),
        }
    }
}

/// Kind of change event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileEventKind {
    /// File was created.
    Created,

    /// File was modified.
    Modified,

    /// File was deleted.
    Deleted,

    /// The source dropped events for the directory.
    Overflow,
}

impl FileEventKind {
    /// Translate a notify event. Returns `None` for kinds that carry no
    /// meaning for a directory watch (access, unknown).
    ///
    /// A rename's destination side counts as a creation: the file is new to
    /// the directory it was moved into. The paired `RenameMode::Both` event
    /// maps to `Modified` so one move is not reported twice.
    pub fn from_notify(event: &notify::Event) -> Option<Self> {
        use notify::event::{ModifyKind, RenameMode};

        if event.need_rescan() {
            return Some(Self::Overflow);
        }

        match event.kind {
            notify::EventKind::Create(_) => Some(Self::Created),
            notify::EventKind::Modify(ModifyKind::Name(RenameMode::To)) => Some(Self::Created),
            notify::EventKind::Modify(_) => Some(Self::Modified),
            notify::EventKind::Remove(_) => Some(Self::Deleted),
            _ => None,
        }
    }
}

/// A file the loop detected and handed to the handler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetectedFile {
    /// Path of the file, resolved against its watched directory.
    pub path: PathBuf,

    /// The watched directory the event was reported for.
    pub directory: PathBuf,

    /// When the loop processed the event.
    pub detected_at: DateTime<Utc>,
}

impl DetectedFile {
    /// Resolve a directory-relative event path against its watched directory.
    pub fn resolve(directory: &Path, relative: &Path) -> Self {
        Self {
            path: directory.join(relative),
            directory: directory.to_path_buf(),
            detected_at: Utc::now(),
        }
    }

    /// File name component of the detected path.
    pub fn file_name(&self) -> Option<&str> {
        self.path.file_name().and_then(|n| n.to_str())
    }
}
