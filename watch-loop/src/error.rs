//! Error types for the watch loop.

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias for watch loop operations.
pub type Result<T> = std::result::Result<T, WatcherError>;

/// Errors that can occur while registering directories or running the loop.
#[derive(Error, Debug)]
pub enum WatcherError {
    /// Directory not found.
    #[error("directory not found: {0}")]
    DirectoryNotFound(String),

    /// Path exists but is not a directory.
    #[error("not a directory: {0}")]
    NotADirectory(String),

    /// The notification source refused to register the directory.
    #[error("registration rejected: {0}")]
    Rejected(String),

    /// The notification source was closed.
    #[error("notification source is closed")]
    SourceClosed,

    /// A blocked wait on the notification source was interrupted.
    #[error("wait for directory events was interrupted")]
    Interrupted,

    /// The file handler failed; the loop terminates.
    #[error("handler failed for {path:?}: {source}")]
    Handler {
        path: PathBuf,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync + 'static>,
    },

    /// Notify error.
    #[error("notify error: {0}")]
    Notify(#[from] notify::Error),

    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),
}
