//! Handlers invoked for each detected file.

use crate::event::DetectedFile;

/// Caller-supplied logic run for every file the loop detects.
///
/// Handlers run synchronously and serially on the loop's thread, in the order
/// events arrive within a batch. Returning an error terminates the loop: the
/// file is not recorded and the run finishes with [`WatcherError::Handler`].
/// A panicking handler unwinds the loop thread. Handlers that need to keep
/// the loop alive across failures must recover inside `handle`.
///
/// [`WatcherError::Handler`]: crate::WatcherError::Handler
pub trait FileHandler: Send {
    fn handle(&mut self, file: &DetectedFile) -> anyhow::Result<()>;
}

/// Handler that ignores every file. Used when none is supplied.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopHandler;

impl FileHandler for NoopHandler {
    fn handle(&mut self, _file: &DetectedFile) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Handler backed by a closure. Build one with [`from_fn`].
pub struct FnHandler<F> {
    f: F,
}

impl<F> FileHandler for FnHandler<F>
where
    F: FnMut(&DetectedFile) -> anyhow::Result<()> + Send,
{
    fn handle(&mut self, file: &DetectedFile) -> anyhow::Result<()> {
        (self.f)(file)
    }
}

/// Wrap a closure as a [`FileHandler`].
pub fn from_fn<F>(f: F) -> FnHandler<F>
where
    F: FnMut(&DetectedFile) -> anyhow::Result<()> + Send,
{
    FnHandler { f }
}
