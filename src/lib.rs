//! File Intake
//!
//! Watches a directory for newly created files, waits until each one has
//! finished being written, moves a rotating `-latest` marker onto it, and
//! hands it to an external analysis tool.
//!
//! ## Guarantees
//!
//! 1. **Notification delivery never blocks**: the notify callback only filters
//!    and enqueues
//! 2. **Single-flight processing**: one worker handles files strictly in
//!    arrival order, which is what keeps rotations from racing
//! 3. **One marker**: after every completed rotation exactly one file in the
//!    directory carries `-latest`, and it is the newest arrival
//! 4. **No silent drops**: failures and files abandoned at shutdown are
//!    reported through the diagnostics stream
//!
//! ## Pipeline
//!
//! ```text
//! notify create event [BACKEND THREAD]
//!        ↓
//! CreateRouter (directory / extension filter)
//!        ↓
//! IntakeQueue (unbounded FIFO, closeable)
//!        ↓
//! IntakeWorker [SINGLE TASK]
//!        ↓
//! StabilityDetector.check()  → vanished? report and move on
//!        ↓
//! LatestRotator.rotate()     → demote old -latest, stamp new one
//!        ↓
//! ActionTrigger.trigger()    → external CLI (or dry run)
//! ```
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use file_intake::{config::ServiceConfig, service::IntakeService, ui::ConsoleReporter};
//! use std::path::Path;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = ServiceConfig::load(Path::new("config.yaml"))?;
//!     let mut service = IntakeService::new(config);
//!
//!     let mut console = ConsoleReporter::new();
//!     console.listen(service.subscribe());
//!
//!     service.start()?;
//!     let (_reason, report) = service
//!         .run_until(async {
//!             let _ = tokio::signal::ctrl_c().await;
//!         })
//!         .await;
//!     println!("{} file(s) left unprocessed", report.abandoned.len());
//!     Ok(())
//! }
//! ```
//!
//! ## Module Structure
//!
//! - [`intake`]: watch controller, intake queue, worker, stability detection
//! - [`rotation`]: marker convention, timestamp layouts, the rotator
//! - [`trigger`]: the external tool boundary
//! - [`diagnostics`]: structured notices shared by all components
//! - [`ui`]: console rendering of diagnostics
//! - [`config`], [`logging`], [`service`]: startup and wiring

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod config;
pub mod diagnostics;
pub mod intake;
pub mod logging;
pub mod rotation;
pub mod service;
pub mod trigger;
pub mod ui;

/// Re-exports for convenience.
pub mod prelude {
    pub use crate::config::{ConfigError, LogLevel, ServiceConfig};
    pub use crate::diagnostics::{Diagnostics, IntakeNotice, SkipReason};
    pub use crate::intake::{
        IntakeError, IntakeEvent, IntakeQueue, IntakeWorker, ShutdownReport, StabilityDetector,
        StabilityResult, WatchController, WatchTarget, WatcherError,
    };
    pub use crate::rotation::{LatestMarker, LatestRotator, Rotation, RotationError, TimestampLayout};
    pub use crate::service::{IntakeService, StopReason};
    pub use crate::trigger::{ActionTrigger, CommandTrigger, TriggerError, TriggerOutcome};
    pub use crate::ui::ConsoleReporter;
}
