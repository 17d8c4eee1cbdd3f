//! # Watch Loop
//!
//! This crate watches "hot" directories for newly created files, hands every
//! detected file to a caller-supplied handler and keeps a running record of
//! the files seen. Typical uses are dynamic plugin loading and drop-folder
//! ingestion.
//!
//! ## Features
//!
//! - **Creation Events Only**: Modifications, deletions and overflow markers
//!   are skipped
//! - **Dedicated Thread**: The blocking loop runs apart from its controller
//! - **Cooperative Stop**: Stop requests take effect at the next iteration
//! - **Pluggable Sources**: The platform watcher or an in-process source
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                         Watch Loop                              │
//! ├─────────────────────────────────────────────────────────────────┤
//! │  NotificationSource ──► WatchLoop ──► FileHandler               │
//! │       │                    │              │                     │
//! │       ▼                    ▼              ▼                     │
//! │  WatchKey batches    CountdownLatch   ObservedSnapshot          │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```no_run
//! use codex_watch_loop::{NotifySource, SharedSource, WatchLoop, handler};
//!
//! # fn main() -> codex_watch_loop::Result<()> {
//! let source = SharedSource::new(NotifySource::new()?);
//! let handle = WatchLoop::new(source.clone(), ["/srv/plugins"])
//!     .with_handler(handler::from_fn(|file| {
//!         println!("new plugin: {}", file.path.display());
//!         Ok(())
//!     }))
//!     .spawn()?;
//!
//! // Later: stop, then close the source to wake a blocked wait.
//! handle.stop();
//! source.close();
//! let _ = handle.join();
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod event;
pub mod handler;
pub mod latch;
pub mod observed;
pub mod registration;
pub mod source;
pub mod watcher;

pub use config::WatchConfig;
pub use error::{Result, WatcherError};
pub use event::{DetectedFile, FileEvent, FileEventKind};
pub use handler::{FileHandler, NoopHandler};
pub use latch::CountdownLatch;
pub use observed::ObservedSnapshot;
pub use registration::{RegistrationFailure, RegistrationReport};
pub use source::{MemorySource, NotificationSource, NotifySource, SharedSource, WatchKey};
pub use watcher::{LoopController, LoopHandle, LoopState, StopReason, WatchLoop};
