//! # pdfbrew
//!
//! Watch folders for PostScript (and other printable documents) and turn every
//! arrival into a PDF in a paired output folder.
//!
//! ## Pipeline Overview
//!
//! ```text
//! input dir
//!  │
//!  ├─ 1. Poll     list every watched directory, enqueue one item per file
//!  ├─ 2. Check    skip sources that vanished, are in flight, or hit the ceiling
//!  ├─ 3. Sniff    magic-byte content type, matched against the allow-list
//!  ├─ 4. Convert  external tool writes ~<stem>.tmp (RANDOMPASS substituted)
//!  ├─ 5. Dispose  optional copy of the source, then delete it
//!  └─ 6. Publish  rename ~<stem>.tmp → <stem>.pdf, clear the error record
//! ```
//!
//! Failures are counted per output path. Once a file fails more than
//! `fail_tries` times it is either deleted (`delete_on_fail`) or left alone
//! for good. Two purge jobs run alongside: one schedules aged output files for
//! deletion, the other forgets error records whose output appeared anyway.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use pdfbrew::{Service, Settings};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let settings = Settings::builder()
//!         .watch("/srv/spool/in", "/srv/spool/out")
//!         .workers(4)
//!         .build()?;
//!     let shutdown = CancellationToken::new();
//!     Service::new(settings)?.run(shutdown).await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `pdfbrew` binary (clap + anyhow + tracing-subscriber) |

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod error;
pub mod periodic;
pub mod pipeline;
pub mod poller;
pub mod purge;
pub mod queue;
pub mod service;
pub mod tracker;
pub mod worker;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{Settings, SettingsBuilder, WatchMapping};
pub use error::{ConvertError, PdfBrewError};
pub use pipeline::convert::{CommandConverter, ConvertFuture, Converter};
pub use pipeline::publish::OutputPaths;
pub use pipeline::sniff::{ContentSniffer, MagicSniffer};
pub use queue::{Action, DispatchQueue, WorkItem};
pub use service::{remove_leftover_temps, validate_directories, Service};
pub use tracker::{ErrorRecord, ErrorTracker};
pub use worker::{spawn_pool, Outcome, SkipReason, WorkerContext};
