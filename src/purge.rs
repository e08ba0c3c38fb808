//! Purge scheduler: reclaim aged output files and stale error records.
//!
//! Neither job touches files itself. The stale-file purge only enqueues
//! delete items, so every filesystem mutation still goes through a worker;
//! the stale-error purge only clears tracker entries.

use crate::config::Settings;
use crate::periodic::run_every;
use crate::pipeline::publish;
use crate::poller::list_files;
use crate::queue::{DispatchQueue, WorkItem};
use crate::tracker::ErrorTracker;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Files in `dir` created at least `age` before `now`.
///
/// In-progress outputs (`~<stem>.tmp`) are never stale: a worker may be
/// writing one, or it may be the only copy of a document.
///
/// Creation time falls back to modification time on filesystems that do not
/// record it.
pub async fn stale_files(dir: &Path, age: Duration, now: SystemTime) -> std::io::Result<Vec<PathBuf>> {
    let mut stale = Vec::new();
    for path in list_files(dir).await? {
        if publish::is_temp_name(&path) {
            continue;
        }
        let meta = match tokio::fs::metadata(&path).await {
            Ok(m) => m,
            Err(e) => {
                debug!("skipping {}: {}", path.display(), e);
                continue;
            }
        };
        let Ok(born) = meta.created().or_else(|_| meta.modified()) else {
            continue;
        };
        if born
            .checked_add(age)
            .is_some_and(|expiry| expiry <= now)
        {
            stale.push(path);
        }
    }
    Ok(stale)
}

/// Enqueue a delete item for every aged file in every output directory.
/// Returns the number of items queued.
pub async fn purge_stale_files(
    settings: &Settings,
    queue: &DispatchQueue,
    now: SystemTime,
) -> usize {
    let Some(age) = settings.purge_age() else {
        return 0;
    };

    let mut total = 0;
    for mapping in &settings.watch {
        let dir = &mapping.output_dir;
        match stale_files(dir, age, now).await {
            Ok(files) => {
                let count = files.len();
                for path in files {
                    queue.enqueue(WorkItem::delete(path));
                }
                info!("Scheduled {} file(s) in {} for deletion", count, dir.display());
                total += count;
            }
            Err(e) => warn!("Cannot list {} for purge: {}", dir.display(), e),
        }
    }
    total
}

/// Clear the error record of every output file that exists.
///
/// A record whose output is present belongs to a file that was converted or
/// placed there by other means since the failure was counted.
pub async fn purge_stale_errors(settings: &Settings, tracker: &ErrorTracker) -> usize {
    if tracker.is_empty() {
        return 0;
    }

    let mut cleared = 0;
    for mapping in &settings.watch {
        let files = match list_files(&mapping.output_dir).await {
            Ok(files) => files,
            Err(e) => {
                warn!("Cannot list {} for error purge: {}", mapping.output_dir.display(), e);
                continue;
            }
        };
        for path in files {
            if tracker.clear(&path).is_some() {
                cleared += 1;
            }
        }
    }
    if cleared > 0 {
        info!("Cleared {} stale error record(s)", cleared);
    }
    cleared
}

/// Stale-file purge loop. Does nothing when `purge_age` is unset.
pub async fn run_file_purge(settings: Arc<Settings>, queue: DispatchQueue, shutdown: CancellationToken) {
    if settings.purge_age().is_none() {
        debug!("purge_age not set, stale-file purge disabled");
        return;
    }
    let period = settings.purge_interval();
    run_every("file purge", period, true, shutdown, || {
        let settings = Arc::clone(&settings);
        let queue = queue.clone();
        async move {
            purge_stale_files(&settings, &queue, SystemTime::now()).await;
        }
    })
    .await
}

/// Stale-error purge loop.
pub async fn run_error_purge(
    settings: Arc<Settings>,
    tracker: Arc<ErrorTracker>,
    shutdown: CancellationToken,
) {
    let period = settings.error_purge_interval();
    run_every("error purge", period, false, shutdown, || {
        let settings = Arc::clone(&settings);
        let tracker = Arc::clone(&tracker);
        async move {
            purge_stale_errors(&settings, &tracker).await;
        }
    })
    .await
}
