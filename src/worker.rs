//! Conversion workers: pull work items and run the convert-and-publish
//! protocol.
//!
//! Every worker is an independent tokio task looping on
//! [`DispatchQueue::dequeue_or_shutdown`]. Workers share nothing but the
//! queue, the [`ErrorTracker`] and the read-only [`Settings`]. A failure
//! while handling one item is logged and turned into an [`Outcome`]; it never
//! stops the loop or affects another item.
//!
//! ## Convert-and-publish
//!
//! ```text
//! source gone? ─▶ skip          ~stem.tmp exists? ─▶ skip (someone is on it)
//! ceiling exceeded? ─▶ quarantine / skip
//! type not allowed? ─▶ skip
//! convert → ~stem.tmp
//!   ok:   copy original? → dispose source → rename ~stem.tmp → stem.pdf
//!         (rename fails after dispose: keep ~stem.tmp, nothing counted)
//!   fail: drop ~stem.tmp, count the failure
//! ```
//!
//! The source is disposed of *before* the rename: if the source is still
//! locked by its writer we would rather throw away a finished conversion and
//! redo it on the next poll than publish a PDF and then lose track of the
//! source.

use crate::config::Settings;
use crate::error::ConvertError;
use crate::pipeline::convert::{discard_partial, CommandConverter, Converter};
use crate::pipeline::publish::{self, OutputPaths};
use crate::pipeline::sniff::{ContentSniffer, MagicSniffer};
use crate::queue::{Action, DispatchQueue, WorkItem};
use crate::tracker::ErrorTracker;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Why a convert item was left alone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// The source disappeared before we got to it.
    SourceGone,
    /// The path has no file name to derive outputs from.
    NoFileName,
    /// A temporary output already exists for this source.
    InProgress,
    /// The source is kept after conversion and its PDF is newer.
    UpToDate,
    /// Too many failures and `delete_on_fail` is off.
    CeilingReached,
    /// Sniffed type (or `None` if unreadable) is not on the allow-list.
    TypeNotAllowed(Option<String>),
}

/// What happened to one work item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Converted and renamed to its final name.
    Published(PathBuf),
    /// Nothing was done.
    Skipped(SkipReason),
    /// Conversion failed; `tries` is the failure count after this attempt.
    Failed { tries: u32, error: String },
    /// Conversion succeeded but the source could not be disposed of; the
    /// output was discarded and the source will be retried.
    Deferred,
    /// The source was disposed of but the rename failed. The finished output
    /// stays under its temporary name (the path held here) for an operator
    /// to recover; no failure is counted.
    Stranded(PathBuf),
    /// The failure ceiling was exceeded and the source was handed to the
    /// disposal primitive (`deleted` tells whether that worked).
    Quarantined { deleted: bool },
    /// A delete item removed its file.
    Deleted,
    /// A delete item could not remove its file.
    DeleteFailed(String),
}

/// Everything a worker needs to process items. Cheap to clone.
#[derive(Clone)]
pub struct WorkerContext {
    settings: Arc<Settings>,
    tracker: Arc<ErrorTracker>,
    converter: Arc<dyn Converter>,
    sniffer: Arc<dyn ContentSniffer>,
}

impl std::fmt::Debug for WorkerContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerContext")
            .field("settings", &self.settings)
            .field("tracker", &self.tracker)
            .field("converter", &"<dyn Converter>")
            .field("sniffer", &"<dyn ContentSniffer>")
            .finish()
    }
}

impl WorkerContext {
    /// Context with the command converter and magic-byte sniffer from `settings`.
    pub fn new(settings: Arc<Settings>, tracker: Arc<ErrorTracker>) -> Self {
        let converter = Arc::new(CommandConverter::from_settings(&settings));
        Self {
            settings,
            tracker,
            converter,
            sniffer: Arc::new(MagicSniffer),
        }
    }

    pub fn with_converter(mut self, converter: Arc<dyn Converter>) -> Self {
        self.converter = converter;
        self
    }

    pub fn with_sniffer(mut self, sniffer: Arc<dyn ContentSniffer>) -> Self {
        self.sniffer = sniffer;
        self
    }

    pub fn tracker(&self) -> &Arc<ErrorTracker> {
        &self.tracker
    }

    pub fn settings(&self) -> &Arc<Settings> {
        &self.settings
    }

    /// Handle one work item to completion.
    pub async fn process(&self, item: WorkItem) -> Outcome {
        match item.action {
            Action::Delete => self.delete(&item.path).await,
            Action::Convert { ref output_dir } => self.convert(&item.path, output_dir).await,
        }
    }

    async fn delete(&self, path: &Path) -> Outcome {
        match publish::dispose(path).await {
            Ok(()) => Outcome::Deleted,
            Err(e) => {
                warn!("Cannot delete {}: {}", path.display(), e);
                Outcome::DeleteFailed(e.to_string())
            }
        }
    }

    async fn convert(&self, source: &Path, output_dir: &Path) -> Outcome {
        if !path_exists(source).await {
            debug!("{} already gone", source.display());
            return Outcome::Skipped(SkipReason::SourceGone);
        }

        let Some(paths) = OutputPaths::for_source(source, output_dir) else {
            return Outcome::Skipped(SkipReason::NoFileName);
        };

        if path_exists(&paths.temp_path).await {
            debug!(
                "{} is being converted elsewhere ({} exists)",
                source.display(),
                paths.temp_path.display()
            );
            return Outcome::Skipped(SkipReason::InProgress);
        }

        if !self.settings.delete_original && is_up_to_date(source, &paths.final_path).await {
            return Outcome::Skipped(SkipReason::UpToDate);
        }

        if let Some(outcome) = self.enforce_ceiling(source, &paths.final_path).await {
            return outcome;
        }

        let mime = self.sniff(source).await;
        match mime.as_deref() {
            Some(m) if self.settings.accepts(m) => {
                debug!("filename: {} is type {}", source.display(), m)
            }
            _ => {
                debug!(
                    "{} is {:?}, not an accepted type",
                    source.display(),
                    mime
                );
                return Outcome::Skipped(SkipReason::TypeNotAllowed(mime));
            }
        }

        match self.converter.convert(source, &paths.temp_path).await {
            Ok(()) => self.finish(source, output_dir, &paths).await,
            Err(e) => self.record_failure(source, &paths, e).await,
        }
    }

    /// Apply the failure-ceiling policy for `final_path`, if it is due.
    async fn enforce_ceiling(&self, source: &Path, final_path: &Path) -> Option<Outcome> {
        let ceiling = self.settings.fail_tries;

        if !self.settings.delete_on_fail {
            if self.tracker.exceeded(final_path, ceiling) {
                debug!(
                    "{} failed more than {} times, leaving it for manual intervention",
                    source.display(),
                    ceiling
                );
                return Some(Outcome::Skipped(SkipReason::CeilingReached));
            }
            return None;
        }

        let record = self.tracker.take_if_exceeded(final_path, ceiling)?;
        warn!(
            "{} failed {} times (last error: {}), deleting it",
            source.display(),
            record.tries,
            record.last_error.as_deref().unwrap_or("unknown")
        );
        let deleted = match publish::dispose(source).await {
            Ok(()) => true,
            Err(e) => {
                warn!("Cannot delete {}: {}", source.display(), e);
                false
            }
        };
        Some(Outcome::Quarantined { deleted })
    }

    async fn sniff(&self, source: &Path) -> Option<String> {
        let sniffer = Arc::clone(&self.sniffer);
        let path = source.to_path_buf();
        tokio::task::spawn_blocking(move || sniffer.sniff(&path))
            .await
            .unwrap_or_else(|e| {
                warn!("Sniffer task for {} panicked: {}", source.display(), e);
                None
            })
    }

    async fn finish(&self, source: &Path, output_dir: &Path, paths: &OutputPaths) -> Outcome {
        if self.settings.copy_original {
            if let Err(e) = publish::copy_original(source, output_dir).await {
                warn!(
                    "Cannot copy {} to {}: {}",
                    source.display(),
                    output_dir.display(),
                    e
                );
            }
        }

        if self.settings.delete_original {
            if let Err(e) = publish::dispose(source).await {
                warn!(
                    "Cannot delete {} after conversion ({}), retrying next poll",
                    source.display(),
                    e
                );
                discard_partial(&paths.temp_path).await;
                self.tracker.clear(&paths.final_path);
                return Outcome::Deferred;
            }
        }

        match publish::publish(paths).await {
            Ok(()) => {
                self.tracker.clear(&paths.final_path);
                info!("Published {}", paths.final_path.display());
                Outcome::Published(paths.final_path.clone())
            }
            // The temporary output is now the only copy of the document.
            Err(e) if self.settings.delete_original => {
                error!(
                    "cannot rename {} to {} after deleting {}: {}; keeping the temporary file",
                    paths.temp_path.display(),
                    paths.final_path.display(),
                    source.display(),
                    e
                );
                self.tracker.clear(&paths.final_path);
                Outcome::Stranded(paths.temp_path.clone())
            }
            Err(e) => {
                let err = ConvertError::io(
                    format!("rename to {}", paths.final_path.display()),
                    &e,
                );
                self.record_failure(source, paths, err).await
            }
        }
    }

    async fn record_failure(&self, source: &Path, paths: &OutputPaths, err: ConvertError) -> Outcome {
        error!("cannot convert file: {}: {}", source.display(), err);
        discard_partial(&paths.temp_path).await;

        let detail = err.to_string();
        let tries = self.tracker.increment(&paths.final_path, Some(detail.clone()));
        if tries > self.settings.fail_tries && self.settings.delete_on_fail {
            if let Some(outcome) = self.enforce_ceiling(source, &paths.final_path).await {
                return outcome;
            }
        }
        Outcome::Failed {
            tries,
            error: detail,
        }
    }
}

async fn path_exists(path: &Path) -> bool {
    tokio::fs::try_exists(path).await.unwrap_or(false)
}

/// Whether `final_path` exists and is not older than `source`.
async fn is_up_to_date(source: &Path, final_path: &Path) -> bool {
    let (Ok(src), Ok(out)) = (
        tokio::fs::metadata(source).await,
        tokio::fs::metadata(final_path).await,
    ) else {
        return false;
    };
    match (src.modified(), out.modified()) {
        (Ok(s), Ok(o)) => o >= s,
        _ => false,
    }
}

/// Spawn `count` workers pulling from `queue` until `shutdown` is cancelled.
///
/// A worker that is mid-item when shutdown arrives finishes that item first.
pub fn spawn_pool(
    context: WorkerContext,
    queue: DispatchQueue,
    count: usize,
    shutdown: CancellationToken,
) -> Vec<JoinHandle<()>> {
    (0..count)
        .map(|id| {
            let context = context.clone();
            let queue = queue.clone();
            let shutdown = shutdown.clone();
            tokio::spawn(async move {
                debug!("worker {} started", id);
                while let Some(item) = queue.dequeue_or_shutdown(&shutdown).await {
                    let path = item.path.clone();
                    let outcome = context.process(item).await;
                    debug!("worker {}: {} → {:?}", id, path.display(), outcome);
                }
                debug!("worker {} stopped", id);
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::convert::ConvertFuture;

    const PS: &[u8] = b"%!PS-Adobe-3.0\nshowpage\n";

    /// Writes a fixed payload, or fails, without spawning a process.
    struct Scripted {
        fail: bool,
    }

    impl Converter for Scripted {
        fn convert<'a>(&'a self, _source: &'a Path, destination: &'a Path) -> ConvertFuture<'a> {
            Box::pin(async move {
                if self.fail {
                    return Err(ConvertError::ToolFailed {
                        tool: "scripted".into(),
                        status: "exit status: 1".into(),
                        stderr: "Error: /undefined in foo".into(),
                    });
                }
                tokio::fs::write(destination, b"%PDF-1.4\n")
                    .await
                    .map_err(|e| ConvertError::io("write", &e))
            })
        }
    }

    fn context(settings: Settings, fail: bool) -> WorkerContext {
        WorkerContext::new(Arc::new(settings), Arc::new(ErrorTracker::new()))
            .with_converter(Arc::new(Scripted { fail }))
    }

    fn settings(input: &Path, output: &Path) -> crate::config::SettingsBuilder {
        Settings::builder().watch(input, output)
    }

    #[tokio::test]
    async fn publishes_and_removes_source() {
        let input = tempfile::tempdir().unwrap();
        let output = tempfile::tempdir().unwrap();
        let src = input.path().join("doc.ps");
        std::fs::write(&src, PS).unwrap();

        let ctx = context(settings(input.path(), output.path()).build().unwrap(), false);
        let outcome = ctx.process(WorkItem::convert(&src, output.path())).await;

        assert_eq!(outcome, Outcome::Published(output.path().join("doc.pdf")));
        assert!(!src.exists());
        assert!(output.path().join("doc.pdf").exists());
        assert!(!output.path().join("~doc.tmp").exists());
    }

    #[tokio::test]
    async fn existing_temp_means_in_progress() {
        let input = tempfile::tempdir().unwrap();
        let output = tempfile::tempdir().unwrap();
        let src = input.path().join("doc.ps");
        std::fs::write(&src, PS).unwrap();
        std::fs::write(output.path().join("~doc.tmp"), b"").unwrap();

        let ctx = context(settings(input.path(), output.path()).build().unwrap(), false);
        let outcome = ctx.process(WorkItem::convert(&src, output.path())).await;

        assert_eq!(outcome, Outcome::Skipped(SkipReason::InProgress));
        assert!(src.exists());
    }

    #[tokio::test]
    async fn failures_count_up_then_stop_without_delete_on_fail() {
        let input = tempfile::tempdir().unwrap();
        let output = tempfile::tempdir().unwrap();
        let src = input.path().join("doc.ps");
        std::fs::write(&src, PS).unwrap();

        let ctx = context(
            settings(input.path(), output.path()).fail_tries(2).build().unwrap(),
            true,
        );
        let key = output.path().join("doc.pdf");
        for n in 1..=3 {
            let outcome = ctx.process(WorkItem::convert(&src, output.path())).await;
            assert!(matches!(outcome, Outcome::Failed { tries, .. } if tries == n));
        }
        let outcome = ctx.process(WorkItem::convert(&src, output.path())).await;
        assert_eq!(outcome, Outcome::Skipped(SkipReason::CeilingReached));
        assert_eq!(ctx.tracker().get(&key), Some(3));
        assert!(src.exists());
        assert!(!output.path().join("~doc.tmp").exists());
    }

    #[tokio::test]
    async fn keep_original_skips_up_to_date_sources() {
        let input = tempfile::tempdir().unwrap();
        let output = tempfile::tempdir().unwrap();
        let src = input.path().join("doc.ps");
        std::fs::write(&src, PS).unwrap();

        let ctx = context(
            settings(input.path(), output.path())
                .delete_original(false)
                .build()
                .unwrap(),
            false,
        );
        let first = ctx.process(WorkItem::convert(&src, output.path())).await;
        assert!(matches!(first, Outcome::Published(_)));
        assert!(src.exists());

        let second = ctx.process(WorkItem::convert(&src, output.path())).await;
        assert_eq!(second, Outcome::Skipped(SkipReason::UpToDate));
    }

    #[tokio::test]
    async fn failed_rename_with_kept_source_counts_as_failure() {
        let input = tempfile::tempdir().unwrap();
        let output = tempfile::tempdir().unwrap();
        let src = input.path().join("doc.ps");
        let blocker = output.path().join("doc.pdf");
        std::fs::create_dir(&blocker).unwrap();
        std::fs::write(blocker.join("inside"), b"x").unwrap();
        std::fs::write(&src, PS).unwrap();
        // Newer than the blocking directory, so it is not up to date.
        let later = std::time::SystemTime::now() + std::time::Duration::from_secs(3600);
        std::fs::File::options()
            .write(true)
            .open(&src)
            .unwrap()
            .set_modified(later)
            .unwrap();

        let ctx = context(
            settings(input.path(), output.path())
                .delete_original(false)
                .build()
                .unwrap(),
            false,
        );
        let outcome = ctx.process(WorkItem::convert(&src, output.path())).await;

        assert!(
            matches!(&outcome, Outcome::Failed { tries: 1, error } if error.contains("rename")),
            "{outcome:?}"
        );
        assert!(src.exists());
        assert!(!output.path().join("~doc.tmp").exists());
    }

    #[tokio::test]
    async fn delete_item_of_missing_file_is_reported() {
        let ctx = context(Settings::builder().watch("/in", "/out").build().unwrap(), false);
        let outcome = ctx.process(WorkItem::delete("/definitely/not/here.pdf")).await;
        assert!(matches!(outcome, Outcome::DeleteFailed(_)));
    }
}
