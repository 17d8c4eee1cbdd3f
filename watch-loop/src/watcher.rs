//! Watch loop implementation.

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::config::{DEFAULT_THREAD_NAME, WatchConfig, validate_thread_name};
use crate::error::{Result, WatcherError};
use crate::event::{DetectedFile, FileEventKind};
use crate::handler::{FileHandler, NoopHandler};
use crate::latch::CountdownLatch;
use crate::observed::{ObservedFiles, ObservedSnapshot};
use crate::registration::{RegistrationFailure, RegistrationReport};
use crate::source::{NotificationSource, SharedSource, WatchKey};

/// Lifecycle of a watch loop. `Stopped` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopState {
    /// Constructed, not yet running.
    Created,

    /// Consuming events.
    Running,

    /// Exited after a stop request or an invalidated registration.
    Stopped,

    /// Exited because the source closed, the wait was interrupted or the
    /// handler failed.
    Failed,
}

impl LoopState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Stopped | Self::Failed)
    }
}

/// Why a loop exited normally.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The stop flag was observed at the top of an iteration.
    Requested,

    /// Resetting a registration reported it as no longer valid.
    RegistrationInvalidated,
}

#[derive(Debug)]
struct Shared {
    stopped: AtomicBool,
    observed: ObservedFiles,
    registration: RegistrationReport,
    state: watch::Sender<LoopState>,
}

impl Shared {
    /// Publish a state change. Terminal states are never left.
    fn publish(&self, next: LoopState) {
        self.state.send_if_modified(|current| {
            if current.is_terminal() || *current == next {
                return false;
            }
            *current = next;
            true
        });
    }
}

/// Publishes `Failed` if the loop thread unwinds out of a panicking handler.
struct FailOnPanic<'a>(&'a Shared);

impl Drop for FailOnPanic<'_> {
    fn drop(&mut self) {
        if std::thread::panicking() {
            error!("Watch loop panicked");
            self.0.publish(LoopState::Failed);
        }
    }
}

/// Consumes creation events for a set of directories and hands each created
/// file to a [`FileHandler`].
///
/// Construction registers the directories and never blocks. [`run`] blocks
/// until the loop exits, so it belongs on a dedicated thread; [`spawn`] does
/// that. Each instance runs at most once.
///
/// [`run`]: WatchLoop::run
/// [`spawn`]: WatchLoop::spawn
pub struct WatchLoop<S> {
    source: Arc<SharedSource<S>>,
    handler: Box<dyn FileHandler>,
    latch: Option<CountdownLatch>,
    thread_name: String,
    shared: Arc<Shared>,
}

impl<S: NotificationSource> WatchLoop<S> {
    /// Create a loop and register `directories` for creation events.
    ///
    /// A directory that fails to register is logged, recorded in the
    /// [`RegistrationReport`] and left unwatched; construction still succeeds.
    pub fn new<I, P>(source: Arc<SharedSource<S>>, directories: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Path>,
    {
        let mut registration = RegistrationReport::default();
        let mut seen_keys = HashSet::new();

        for directory in directories {
            let directory = directory.as_ref();
            match source.source().register(directory) {
                Ok(key) if !seen_keys.insert(key.id()) => {
                    debug!("Directory already registered: {}", directory.display());
                }
                Ok(key) => {
                    debug!("Registered directory: {}", key.directory().display());
                    registration.registered.push(directory.to_path_buf());
                }
                Err(e) => {
                    warn!("Failed to watch {}: {e}", directory.display());
                    registration.failed.push(RegistrationFailure {
                        directory: directory.to_path_buf(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        info!(
            "Registered {} directories ({} failed)",
            registration.registered.len(),
            registration.failed.len()
        );

        let (state, _) = watch::channel(LoopState::Created);

        Self {
            source,
            handler: Box::new(NoopHandler),
            latch: None,
            thread_name: DEFAULT_THREAD_NAME.to_string(),
            shared: Arc::new(Shared {
                stopped: AtomicBool::new(false),
                observed: ObservedFiles::default(),
                registration,
                state,
            }),
        }
    }

    /// Create a loop for the directories and thread name in `config`.
    pub fn from_config(source: Arc<SharedSource<S>>, config: &WatchConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::new(source, &config.directories).with_thread_name(config.thread_name.clone()))
    }

    /// Set the handler invoked for every created file.
    pub fn with_handler<H: FileHandler + 'static>(mut self, handler: H) -> Self {
        self.handler = Box::new(handler);
        self
    }

    /// Count `latch` down once after every processed batch.
    pub fn with_latch(mut self, latch: CountdownLatch) -> Self {
        self.latch = Some(latch);
        self
    }

    /// Name of the thread created by [`WatchLoop::spawn`].
    pub fn with_thread_name(mut self, name: impl Into<String>) -> Self {
        self.thread_name = name.into();
        self
    }

    /// A handle for stopping and observing the loop from other threads.
    pub fn controller(&self) -> LoopController {
        LoopController {
            shared: Arc::clone(&self.shared),
        }
    }

    pub fn registration(&self) -> &RegistrationReport {
        &self.shared.registration
    }

    /// Run the loop on the current thread until it exits.
    ///
    /// Returns `Ok` when the loop stopped (stop requested, or a registration
    /// became invalid) and `Err` when it failed (source closed, wait
    /// interrupted, handler error). Either way the last registration the loop
    /// took is cancelled before returning.
    pub fn run(self) -> Result<StopReason> {
        let Self {
            source,
            mut handler,
            latch,
            shared,
            ..
        } = self;

        shared.publish(LoopState::Running);
        info!(
            "Watch loop started for {} directories",
            shared.registration.registered.len()
        );

        let _panic_guard = FailOnPanic(&shared);
        let mut held = None;
        let outcome = consume(
            &source,
            handler.as_mut(),
            latch.as_ref(),
            &shared,
            &mut held,
        );

        if let Some(key) = held {
            source.cancel(&key);
        }

        match &outcome {
            Ok(reason) => {
                shared.publish(LoopState::Stopped);
                info!("Watch loop stopped: {reason:?}");
            }
            Err(e @ (WatcherError::SourceClosed | WatcherError::Interrupted)) => {
                shared.publish(LoopState::Failed);
                info!("Watch loop exited: {e}");
            }
            Err(e) => {
                shared.publish(LoopState::Failed);
                error!("Watch loop failed: {e}");
            }
        }

        outcome
    }

    /// Run the loop on a new named thread.
    pub fn spawn(self) -> Result<LoopHandle>
    where
        S: 'static,
    {
        validate_thread_name(&self.thread_name)?;
        let controller = self.controller();
        let thread = std::thread::Builder::new()
            .name(self.thread_name.clone())
            .spawn(move || self.run())?;

        Ok(LoopHandle { controller, thread })
    }
}

/// The consume/dispatch cycle. `held` tracks the last key taken so the caller
/// can cancel it on every exit path.
fn consume<S: NotificationSource>(
    source: &SharedSource<S>,
    handler: &mut dyn FileHandler,
    latch: Option<&CountdownLatch>,
    shared: &Shared,
    held: &mut Option<WatchKey>,
) -> Result<StopReason> {
    while !shared.stopped.load(Ordering::Acquire) {
        let key = source.source().take()?;
        *held = Some(key.clone());

        for event in source.source().poll_events(&key) {
            let relative = match (event.kind, event.path.as_deref()) {
                (FileEventKind::Created, Some(relative)) => relative,
                (FileEventKind::Overflow, _) => {
                    debug!("Skipping overflow in {}", key.directory().display());
                    continue;
                }
                (kind, _) => {
                    debug!(
                        "Skipping {kind:?} event in {}",
                        key.directory().display()
                    );
                    continue;
                }
            };

            let file = DetectedFile::resolve(key.directory(), relative);
            if let Err(e) = handler.handle(&file) {
                return Err(WatcherError::Handler {
                    path: file.path,
                    source: e.into(),
                });
            }
            debug!("Detected file: {}", file.path.display());
            shared.observed.push(file);
        }

        if let Some(latch) = latch {
            latch.count_down();
        }

        if !source.source().reset(&key) {
            warn!(
                "Registration for {} is no longer valid",
                key.directory().display()
            );
            return Ok(StopReason::RegistrationInvalidated);
        }
    }

    Ok(StopReason::Requested)
}

/// Cloneable handle to a loop's control flag and observable state.
#[derive(Debug, Clone)]
pub struct LoopController {
    shared: Arc<Shared>,
}

impl LoopController {
    /// Ask the loop to stop.
    ///
    /// The flag is checked at the top of each iteration only; a loop blocked
    /// waiting for events keeps waiting until an event arrives or the source
    /// is closed, and may process that one batch before exiting. Close the
    /// source to force an immediate wake-up. Calling `stop` again has no
    /// further effect.
    pub fn stop(&self) {
        if !self.shared.stopped.swap(true, Ordering::AcqRel) {
            info!("Stop requested for watch loop");
        }
    }

    pub fn is_stop_requested(&self) -> bool {
        self.shared.stopped.load(Ordering::Acquire)
    }

    pub fn state(&self) -> LoopState {
        *self.shared.state.borrow()
    }

    /// Point-in-time snapshot of the files detected so far.
    pub fn observed_files(&self) -> ObservedSnapshot {
        self.shared.observed.snapshot()
    }

    pub fn registration(&self) -> &RegistrationReport {
        &self.shared.registration
    }

    /// Subscribe to state changes.
    pub fn subscribe(&self) -> watch::Receiver<LoopState> {
        self.shared.state.subscribe()
    }

    /// Wait until the loop reaches a terminal state.
    pub async fn wait_until_finished(&self) -> LoopState {
        let mut rx = self.subscribe();
        match rx.wait_for(|state| state.is_terminal()).await {
            Ok(state) => *state,
            Err(_) => self.state(),
        }
    }
}

/// A loop running on its own thread.
#[derive(Debug)]
pub struct LoopHandle {
    controller: LoopController,
    thread: JoinHandle<Result<StopReason>>,
}

impl LoopHandle {
    pub fn controller(&self) -> &LoopController {
        &self.controller
    }

    /// See [`LoopController::stop`].
    pub fn stop(&self) {
        self.controller.stop();
    }

    pub fn is_finished(&self) -> bool {
        self.thread.is_finished()
    }

    /// Wait for the loop thread to exit. A handler panic is resumed on the
    /// calling thread.
    pub fn join(self) -> Result<StopReason> {
        match self.thread.join() {
            Ok(outcome) => outcome,
            Err(panic) => std::panic::resume_unwind(panic),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::FileEvent;
    use crate::handler::from_fn;
    use crate::source::MemorySource;
    use pretty_assertions::assert_eq;
    use std::path::PathBuf;
    use std::sync::Mutex;
    use std::time::Duration;
    use tracing_test::traced_test;

    const WAIT: Duration = Duration::from_secs(5);

    fn memory_source() -> Arc<SharedSource<MemorySource>> {
        SharedSource::new(MemorySource::new())
    }

    fn recording_handler() -> (Arc<Mutex<Vec<PathBuf>>>, impl FileHandler + 'static) {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&calls);
        let handler = from_fn(move |file: &DetectedFile| {
            sink.lock().unwrap().push(file.path.clone());
            Ok(())
        });
        (calls, handler)
    }

    #[test]
    fn test_stop_before_run_exits_without_waiting() {
        let source = memory_source();
        let watch_loop = WatchLoop::new(Arc::clone(&source), [Path::new("/hot")]);
        let controller = watch_loop.controller();
        assert_eq!(controller.state(), LoopState::Created);

        controller.stop();
        controller.stop();

        assert_eq!(watch_loop.run().unwrap(), StopReason::Requested);
        assert_eq!(controller.state(), LoopState::Stopped);
        assert_eq!(source.source().cancellations(Path::new("/hot")), 0);
    }

    #[test]
    fn test_only_created_events_are_dispatched() {
        let source = memory_source();
        let dir = Path::new("/hot");
        let (calls, handler) = recording_handler();
        let latch = CountdownLatch::new(1);

        let watch_loop = WatchLoop::new(Arc::clone(&source), [dir])
            .with_handler(handler)
            .with_latch(latch.clone());
        let controller = watch_loop.controller();

        source.source().emit(
            dir,
            [
                FileEvent::created("a.jar"),
                FileEvent::modified("b.jar"),
                FileEvent::deleted("c.jar"),
                FileEvent::overflow(),
                FileEvent::created("d.jar"),
            ],
        );
        source.source().invalidate(dir);

        assert_eq!(
            watch_loop.run().unwrap(),
            StopReason::RegistrationInvalidated
        );

        let expected = vec![PathBuf::from("/hot/a.jar"), PathBuf::from("/hot/d.jar")];
        assert_eq!(*calls.lock().unwrap(), expected);
        assert_eq!(controller.observed_files().paths(), vec![
            Path::new("/hot/a.jar"),
            Path::new("/hot/d.jar")
        ]);
        assert_eq!(latch.count(), 0);
        assert_eq!(controller.state(), LoopState::Stopped);
        assert_eq!(source.source().cancellations(dir), 1);
    }

    #[test]
    fn test_record_grows_by_created_count_per_batch() {
        let source = memory_source();
        let a = Path::new("/hot/a");
        let b = Path::new("/hot/b");
        let latch = CountdownLatch::new(2);

        let watch_loop = WatchLoop::new(Arc::clone(&source), [a, b]).with_latch(latch.clone());
        let controller = watch_loop.controller();

        let lengths = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::clone(&lengths);
        let observer = controller.clone();
        let watch_loop = watch_loop.with_handler(from_fn(move |_file: &DetectedFile| {
            seen.lock().unwrap().push(observer.observed_files().len());
            Ok(())
        }));

        source.source().emit(a, [FileEvent::created("one")]);
        source
            .source()
            .emit(b, [FileEvent::created("two"), FileEvent::modified("one")]);
        source.source().interrupt();

        assert!(matches!(watch_loop.run(), Err(WatcherError::Interrupted)));

        // Each file is recorded after its handler call returns.
        assert_eq!(*lengths.lock().unwrap(), vec![0, 1]);
        assert_eq!(controller.observed_files().paths(), vec![
            Path::new("/hot/a/one"),
            Path::new("/hot/b/two")
        ]);
        assert_eq!(latch.count(), 0);
        assert_eq!(controller.state(), LoopState::Failed);
        // Only the last key taken is held at exit.
        assert_eq!(source.source().cancellations(a), 0);
        assert_eq!(source.source().cancellations(b), 1);
    }

    #[test]
    fn test_handler_error_terminates_loop() {
        let source = memory_source();
        let dir = Path::new("/hot");
        let calls = Arc::new(Mutex::new(0));
        let counter = Arc::clone(&calls);

        let watch_loop = WatchLoop::new(Arc::clone(&source), [dir]).with_handler(from_fn(
            move |file: &DetectedFile| {
                *counter.lock().unwrap() += 1;
                if file.file_name() == Some("bad.so") {
                    anyhow::bail!("cannot load {}", file.path.display());
                }
                Ok(())
            },
        ));
        let controller = watch_loop.controller();

        source.source().emit(
            dir,
            [
                FileEvent::created("ok.so"),
                FileEvent::created("bad.so"),
                FileEvent::created("never.so"),
            ],
        );
        source.source().interrupt();

        match watch_loop.run() {
            Err(WatcherError::Handler { path, source: err }) => {
                assert_eq!(path, Path::new("/hot/bad.so"));
                assert_eq!(err.to_string(), "cannot load /hot/bad.so");
            }
            other => panic!("expected handler error, got {other:?}"),
        }
        assert_eq!(*calls.lock().unwrap(), 2);
        assert_eq!(controller.observed_files().paths(), vec![Path::new("/hot/ok.so")]);
        assert_eq!(controller.state(), LoopState::Failed);
        assert_eq!(source.source().cancellations(dir), 1);
    }

    #[test]
    fn test_close_while_blocked_exits_and_cancels_once() {
        let source = memory_source();
        let dir = Path::new("/hot");
        let latch = CountdownLatch::new(1);

        let handle = WatchLoop::new(Arc::clone(&source), [dir])
            .with_latch(latch.clone())
            .spawn()
            .unwrap();

        source.source().emit(dir, [FileEvent::created("x.txt")]);
        assert!(latch.wait_timeout(WAIT));
        let before = handle.controller().observed_files();

        source.close();
        let controller = handle.controller().clone();
        assert!(matches!(handle.join(), Err(WatcherError::SourceClosed)));

        assert_eq!(controller.observed_files().paths(), before.paths());
        assert_eq!(before.paths(), vec![Path::new("/hot/x.txt")]);
        assert_eq!(controller.state(), LoopState::Failed);
        assert_eq!(source.source().cancellations(dir), 1);
    }

    #[test]
    fn test_stop_takes_effect_after_current_wait() {
        let source = memory_source();
        let dir = Path::new("/hot");
        let latch = CountdownLatch::new(1);

        let handle = WatchLoop::new(Arc::clone(&source), [dir])
            .with_latch(latch.clone())
            .spawn()
            .unwrap();

        source.source().emit(dir, [FileEvent::created("first")]);
        assert!(latch.wait_timeout(WAIT));

        handle.stop();
        handle.stop();
        assert!(handle.controller().is_stop_requested());

        // The loop is blocked (or about to block) in its wait; an event wakes it.
        source.source().emit(dir, [FileEvent::created("second")]);

        let controller = handle.controller().clone();
        assert_eq!(handle.join().unwrap(), StopReason::Requested);
        assert_eq!(controller.state(), LoopState::Stopped);

        let observed = controller.observed_files();
        assert!((1..=2).contains(&observed.len()));
        assert_eq!(observed[0].path, Path::new("/hot/first"));

        // The registration was cancelled on exit; nothing is processed anymore.
        assert!(!source.source().emit(dir, [FileEvent::created("third")]));
        assert_eq!(controller.observed_files().len(), observed.len());
    }

    #[test]
    fn test_handler_panic_marks_loop_failed() {
        let source = memory_source();
        let dir = Path::new("/hot");

        let handle = WatchLoop::new(Arc::clone(&source), [dir])
            .with_handler(from_fn(|_file: &DetectedFile| panic!("handler exploded")))
            .spawn()
            .unwrap();
        let controller = handle.controller().clone();

        source.source().emit(dir, [FileEvent::created("boom")]);

        let joined = std::panic::catch_unwind(std::panic::AssertUnwindSafe(move || handle.join()));
        assert!(joined.is_err());
        assert_eq!(controller.state(), LoopState::Failed);
        assert!(controller.observed_files().is_empty());
    }

    #[test]
    #[traced_test]
    fn test_registration_failure_is_reported_not_fatal() {
        let source = memory_source();
        let good = Path::new("/hot/good");
        let denied = Path::new("/hot/denied");
        source.source().reject(denied);

        let watch_loop = WatchLoop::new(Arc::clone(&source), [denied, good]);
        let report = watch_loop.registration().clone();

        assert_eq!(report.registered, vec![good.to_path_buf()]);
        assert_eq!(
            report.failed_directories().collect::<Vec<_>>(),
            vec![&denied.to_path_buf()]
        );
        assert!(!report.is_complete());
        assert!(logs_contain("Failed to watch /hot/denied"));

        let controller = watch_loop.controller();
        source.source().emit(good, [FileEvent::created("plugin.so")]);
        source.source().invalidate(good);

        assert_eq!(
            watch_loop.run().unwrap(),
            StopReason::RegistrationInvalidated
        );
        assert_eq!(controller.observed_files().paths(), vec![Path::new(
            "/hot/good/plugin.so"
        )]);
    }

    #[test]
    fn test_duplicate_directory_is_reported_once() {
        let source = memory_source();
        let a = Path::new("/hot/a");
        let b = Path::new("/hot/b");

        let watch_loop = WatchLoop::new(Arc::clone(&source), [a, a, b]);
        let report = watch_loop.registration();

        assert_eq!(report.registered, vec![a.to_path_buf(), b.to_path_buf()]);
        assert!(report.is_complete());
        assert_eq!(
            source.source().directories(),
            vec![a.to_path_buf(), b.to_path_buf()]
        );
    }

    #[test]
    fn test_from_config_names_the_thread() {
        let source = memory_source();
        let config = WatchConfig::new().watch("/hot").with_thread_name("plugin-watch");
        let names = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&names);
        let latch = CountdownLatch::new(1);

        let handle = WatchLoop::from_config(Arc::clone(&source), &config)
            .unwrap()
            .with_latch(latch.clone())
            .with_handler(from_fn(move |_file: &DetectedFile| {
                let name = std::thread::current().name().map(String::from);
                sink.lock().unwrap().push(name);
                Ok(())
            }))
            .spawn()
            .unwrap();

        source.source().emit(Path::new("/hot"), [FileEvent::created("a")]);
        assert!(latch.wait_timeout(WAIT));
        source.close();
        assert!(handle.join().is_err());

        assert_eq!(
            *names.lock().unwrap(),
            vec![Some("plugin-watch".to_string())]
        );
    }

    #[test]
    fn test_spawn_rejects_invalid_thread_name() {
        let source = memory_source();
        let result = WatchLoop::new(source, [Path::new("/hot")])
            .with_thread_name("bad\0name")
            .spawn();
        assert!(matches!(result, Err(WatcherError::Config(_))));
    }

    #[tokio::test]
    async fn test_wait_until_finished_reports_terminal_state() {
        let source = memory_source();
        let handle = WatchLoop::new(Arc::clone(&source), [Path::new("/hot")])
            .spawn()
            .unwrap();
        let controller = handle.controller().clone();
        let mut states = controller.subscribe();

        source.close();

        assert_eq!(controller.wait_until_finished().await, LoopState::Failed);
        assert!(states.wait_for(|s| s.is_terminal()).await.is_ok());
        assert!(matches!(handle.join(), Err(WatcherError::SourceClosed)));
    }
}
