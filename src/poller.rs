//! Folder poller: turn the contents of every watched directory into convert
//! work items.
//!
//! Polling (rather than filesystem notifications) makes files that arrived
//! while the service was down, or whose conversion was deferred, come back
//! by themselves on the next tick. The price is re-enqueueing files that are
//! already in flight; the worker's existence checks make that harmless.

use crate::config::{Settings, WatchMapping};
use crate::periodic::run_every;
use crate::queue::{DispatchQueue, WorkItem};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Regular files directly inside `dir` (non-recursive).
pub async fn list_files(dir: &std::path::Path) -> std::io::Result<Vec<PathBuf>> {
    let mut entries = tokio::fs::read_dir(dir).await?;
    let mut files = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        match entry.file_type().await {
            Ok(ft) if ft.is_file() => files.push(entry.path()),
            Ok(_) => {}
            Err(e) => debug!("skipping {}: {}", entry.path().display(), e),
        }
    }
    files.sort();
    Ok(files)
}

/// List one mapping's input directory and enqueue a convert item per file.
pub async fn poll_mapping(mapping: &WatchMapping, queue: &DispatchQueue) -> usize {
    match list_files(&mapping.input_dir).await {
        Ok(files) => {
            let count = files.len();
            for path in files {
                queue.enqueue(WorkItem::convert(path, mapping.output_dir.clone()));
            }
            if count > 0 {
                debug!(
                    "queued {} file(s) from {}",
                    count,
                    mapping.input_dir.display()
                );
            }
            count
        }
        Err(e) => {
            warn!("Cannot list {}: {}", mapping.input_dir.display(), e);
            0
        }
    }
}

/// One poll over every watched directory. Returns the number of items queued.
pub async fn poll_once(settings: &Settings, queue: &DispatchQueue) -> usize {
    let mut total = 0;
    for mapping in &settings.watch {
        total += poll_mapping(mapping, queue).await;
    }
    total
}

/// Poll on `settings.poll_interval` until `shutdown` is cancelled.
pub async fn run_poller(settings: Arc<Settings>, queue: DispatchQueue, shutdown: CancellationToken) {
    let period = settings.poll_interval();
    let immediate = settings.convert_on_start;
    run_every("poller", period, immediate, shutdown, || {
        let settings = Arc::clone(&settings);
        let queue = queue.clone();
        async move {
            poll_once(&settings, &queue).await;
        }
    })
    .await
}
