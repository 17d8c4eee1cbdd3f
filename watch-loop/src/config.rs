//! Configuration for a watch loop.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Result, WatcherError};

/// Name given to the loop thread when none is configured.
pub const DEFAULT_THREAD_NAME: &str = "watch-loop";

/// Which directories a loop watches and how its thread is named.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchConfig {
    /// Directories to watch. Each is registered individually; nothing is
    /// watched recursively.
    pub directories: Vec<PathBuf>,

    /// Name of the dedicated loop thread.
    pub thread_name: String,
}

impl WatchConfig {
    /// Create an empty configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a directory to watch.
    pub fn watch(mut self, directory: impl Into<PathBuf>) -> Self {
        self.directories.push(directory.into());
        self
    }

    /// Set the loop thread name.
    pub fn with_thread_name(mut self, name: impl Into<String>) -> Self {
        self.thread_name = name.into();
        self
    }

    /// Parse and validate a JSON configuration.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a JSON configuration file.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_json(&contents)
    }

    pub fn validate(&self) -> Result<()> {
        validate_thread_name(&self.thread_name)
    }
}

/// Check that `name` can be given to a spawned thread.
pub(crate) fn validate_thread_name(name: &str) -> Result<()> {
    if name.trim().is_empty() {
        return Err(WatcherError::Config(
            "thread name must not be empty".to_string(),
        ));
    }
    // std::thread::Builder panics on interior NULs.
    if name.contains('\0') {
        return Err(WatcherError::Config(
            "thread name must not contain NUL bytes".to_string(),
        ));
    }
    Ok(())
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            directories: Vec::new(),
            thread_name: DEFAULT_THREAD_NAME.to_string(),
        }
    }
}
