//! Service assembly: startup checks, task spawning, graceful shutdown.
//!
//! ```text
//! poller ──────┐
//! file purge ──┼──▶ DispatchQueue ──▶ worker × N ──▶ convert / publish
//! error purge ─┘ (tracker only)            │
//!                                          └──▶ ErrorTracker
//! ```

use crate::config::Settings;
use crate::error::PdfBrewError;
use crate::pipeline::convert::Converter;
use crate::pipeline::publish;
use crate::pipeline::sniff::ContentSniffer;
use crate::queue::DispatchQueue;
use crate::tracker::ErrorTracker;
use crate::worker::{spawn_pool, WorkerContext};
use crate::{poller, purge};
use std::collections::HashSet;
use std::ffi::{OsStr, OsString};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Check that every input directory exists and every output directory is
/// writable. Any failure is fatal: running anyway would silently drop work.
pub fn validate_directories(settings: &Settings) -> Result<(), PdfBrewError> {
    for mapping in &settings.watch {
        if !mapping.input_dir.is_dir() {
            return Err(PdfBrewError::WatchDirMissing {
                path: mapping.input_dir.clone(),
            });
        }
        // Creating (and dropping) a scratch file is the only reliable
        // writability test; permission bits ignore ACLs and read-only mounts.
        tempfile::NamedTempFile::new_in(&mapping.output_dir).map_err(|e| {
            PdfBrewError::OutputNotWritable {
                path: mapping.output_dir.clone(),
                source: e,
            }
        })?;
        info!(
            "started watching {} with output at {}",
            mapping.input_dir.display(),
            mapping.output_dir.display()
        );
    }
    Ok(())
}

/// Remove `~<stem>.tmp` files left in the output directories by conversions
/// that were interrupted when the service last stopped.
///
/// Must only run while no worker is active. A leftover is removed only while
/// a source with the same stem still waits in the input directory; it would
/// otherwise block that source forever as "in progress". Any other leftover
/// may be the only copy of a document whose rename failed, and is kept.
pub async fn remove_leftover_temps(settings: &Settings) -> usize {
    let mut removed = 0;
    for mapping in &settings.watch {
        let files = match poller::list_files(&mapping.output_dir).await {
            Ok(files) => files,
            Err(e) => {
                warn!("Cannot list {}: {}", mapping.output_dir.display(), e);
                continue;
            }
        };
        let pending: HashSet<OsString> = poller::list_files(&mapping.input_dir)
            .await
            .unwrap_or_default()
            .iter()
            .filter_map(|p| p.file_stem().map(OsStr::to_os_string))
            .collect();

        for path in &files {
            let Some(stem) = publish::temp_stem(path) else {
                continue;
            };
            if !pending.contains(OsStr::new(stem)) {
                warn!("keeping {}: no matching source left to convert", path.display());
                continue;
            }
            match publish::dispose(path).await {
                Ok(()) => removed += 1,
                Err(e) => warn!("Cannot remove leftover {}: {}", path.display(), e),
            }
        }
    }
    removed
}

/// The assembled watch-and-convert service.
#[derive(Debug)]
pub struct Service {
    settings: Arc<Settings>,
    queue: DispatchQueue,
    context: WorkerContext,
}

impl Service {
    /// Validate `settings` and the configured directories.
    pub fn new(settings: Settings) -> Result<Self, PdfBrewError> {
        settings.validate()?;
        validate_directories(&settings)?;
        let settings = Arc::new(settings);
        let tracker = Arc::new(ErrorTracker::new());
        let context = WorkerContext::new(Arc::clone(&settings), tracker);
        Ok(Self {
            settings,
            queue: DispatchQueue::new(),
            context,
        })
    }

    /// Replace the command converter (e.g. with an in-process one).
    pub fn with_converter(mut self, converter: Arc<dyn Converter>) -> Self {
        self.context = self.context.with_converter(converter);
        self
    }

    /// Replace the magic-byte sniffer.
    pub fn with_sniffer(mut self, sniffer: Arc<dyn ContentSniffer>) -> Self {
        self.context = self.context.with_sniffer(sniffer);
        self
    }

    pub fn settings(&self) -> &Arc<Settings> {
        &self.settings
    }

    pub fn queue(&self) -> &DispatchQueue {
        &self.queue
    }

    pub fn tracker(&self) -> &Arc<ErrorTracker> {
        self.context.tracker()
    }

    /// Run until `shutdown` is cancelled, then wait for every task to stop.
    ///
    /// Workers busy with an item finish it before exiting; items still
    /// queued are dropped and rediscovered by the next run's first poll.
    pub async fn run(self, shutdown: CancellationToken) -> Result<(), PdfBrewError> {
        let settings = &self.settings;
        info!(
            "pdfbrew running: {} watch dir(s), {} worker(s), poll every {}s",
            settings.watch.len(),
            settings.workers,
            settings.poll_interval_secs
        );

        let leftovers = remove_leftover_temps(settings).await;
        if leftovers > 0 {
            info!("removed {} leftover temporary output(s)", leftovers);
        }

        let mut handles: Vec<JoinHandle<()>> = Vec::new();
        handles.push(tokio::spawn(poller::run_poller(
            Arc::clone(settings),
            self.queue.clone(),
            shutdown.clone(),
        )));
        handles.push(tokio::spawn(purge::run_file_purge(
            Arc::clone(settings),
            self.queue.clone(),
            shutdown.clone(),
        )));
        handles.push(tokio::spawn(purge::run_error_purge(
            Arc::clone(settings),
            Arc::clone(self.context.tracker()),
            shutdown.clone(),
        )));
        handles.extend(spawn_pool(
            self.context.clone(),
            self.queue.clone(),
            settings.workers,
            shutdown.clone(),
        ));

        shutdown.cancelled().await;
        info!("shutting down");

        let mut panicked = 0;
        for handle in handles {
            if let Err(e) = handle.await {
                error!("task ended abnormally: {}", e);
                panicked += 1;
            }
        }
        let mut dropped = 0;
        while let Some(item) = self.queue.try_dequeue() {
            debug!("dropping queued {:?} of {}", item.action, item.path.display());
            dropped += 1;
        }
        if dropped > 0 {
            info!("dropped {} queued item(s); the next run rediscovers them", dropped);
        }

        if panicked > 0 {
            return Err(PdfBrewError::Internal(format!(
                "{panicked} task(s) panicked"
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_input_dir_is_fatal() {
        let out = tempfile::tempdir().unwrap();
        let settings = Settings::builder()
            .watch("/definitely/not/a/dir", out.path())
            .build()
            .unwrap();
        let err = Service::new(settings).unwrap_err();
        assert!(matches!(err, PdfBrewError::WatchDirMissing { .. }), "got: {err}");
    }

    #[test]
    fn missing_output_dir_is_fatal() {
        let input = tempfile::tempdir().unwrap();
        let settings = Settings::builder()
            .watch(input.path(), "/definitely/not/an/out/dir")
            .build()
            .unwrap();
        let err = Service::new(settings).unwrap_err();
        assert!(matches!(err, PdfBrewError::OutputNotWritable { .. }), "got: {err}");
    }

    #[tokio::test]
    async fn leftover_temps_are_removed_only_while_their_source_waits() {
        let input = tempfile::tempdir().unwrap();
        let output = tempfile::tempdir().unwrap();
        std::fs::write(input.path().join("doc.ps"), b"%!PS").unwrap();
        std::fs::write(output.path().join("~doc.tmp"), b"%PDF trunc").unwrap();
        std::fs::write(output.path().join("~orphan.tmp"), b"%PDF-1.4").unwrap();
        std::fs::write(output.path().join("doc.pdf"), b"%PDF").unwrap();
        std::fs::write(output.path().join("~notes.txt"), b"x").unwrap();
        let settings = Settings::builder()
            .watch(input.path(), output.path())
            .build()
            .unwrap();

        assert_eq!(remove_leftover_temps(&settings).await, 1);
        assert!(!output.path().join("~doc.tmp").exists());
        // No source left: possibly the only copy of a finished conversion.
        assert!(output.path().join("~orphan.tmp").exists());
        assert!(output.path().join("doc.pdf").exists());
        assert!(output.path().join("~notes.txt").exists());
    }

    #[tokio::test]
    async fn run_returns_after_shutdown() {
        let input = tempfile::tempdir().unwrap();
        let output = tempfile::tempdir().unwrap();
        let settings = Settings::builder()
            .watch(input.path(), output.path())
            .workers(3)
            .build()
            .unwrap();
        let service = Service::new(settings).unwrap();
        let token = CancellationToken::new();
        token.cancel();
        service.run(token).await.unwrap();
    }

    #[tokio::test]
    async fn queued_items_are_dropped_on_shutdown() {
        let input = tempfile::tempdir().unwrap();
        let output = tempfile::tempdir().unwrap();
        let settings = Settings::builder()
            .watch(input.path(), output.path())
            .build()
            .unwrap();
        let service = Service::new(settings).unwrap();
        let queue = service.queue().clone();
        queue.enqueue(crate::queue::WorkItem::delete(output.path().join("old.pdf")));

        let token = CancellationToken::new();
        token.cancel();
        service.run(token).await.unwrap();
        assert!(queue.is_empty());
    }
}
