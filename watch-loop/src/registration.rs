//! Outcome of registering a loop's directories.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Which directories were registered at construction and which were not.
///
/// Failures never abort construction; a failed directory is simply not
/// watched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistrationReport {
    /// Directories registered successfully, in the order supplied. A
    /// directory supplied more than once is listed at its first occurrence.
    pub registered: Vec<PathBuf>,

    /// Directories that could not be registered.
    pub failed: Vec<RegistrationFailure>,
}

/// A directory that could not be registered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistrationFailure {
    pub directory: PathBuf,

    /// Rendered error from the notification source.
    pub reason: String,
}

impl RegistrationReport {
    /// Whether every supplied directory was registered.
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }

    pub fn failed_directories(&self) -> impl Iterator<Item = &PathBuf> {
        self.failed.iter().map(|f| &f.directory)
    }
}
