//! The dispatch queue shared by producers (poller, purge jobs) and workers.
//!
//! An unbounded tokio mpsc channel provides the FIFO; the receiving half sits
//! behind an async mutex so any number of workers can pull from it. Holding
//! both halves inside [`DispatchQueue`] means the channel can never close
//! while the queue is alive, which is what makes `enqueue` infallible.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;

/// What a worker should do with a path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Convert the file and publish the result into `output_dir`.
    Convert { output_dir: PathBuf },
    /// Dispose of the file.
    Delete,
}

/// A queued instruction targeting one filesystem path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkItem {
    pub path: PathBuf,
    pub action: Action,
}

impl WorkItem {
    pub fn convert(path: impl Into<PathBuf>, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            action: Action::Convert {
                output_dir: output_dir.into(),
            },
        }
    }

    pub fn delete(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            action: Action::Delete,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Multi-producer, multi-consumer FIFO of [`WorkItem`]s.
///
/// Cloning is cheap and every clone refers to the same queue.
#[derive(Debug, Clone)]
pub struct DispatchQueue {
    tx: mpsc::UnboundedSender<WorkItem>,
    rx: Arc<Mutex<mpsc::UnboundedReceiver<WorkItem>>>,
    pending: Arc<AtomicUsize>,
}

impl Default for DispatchQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl DispatchQueue {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            rx: Arc::new(Mutex::new(rx)),
            pending: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Push an item. Never blocks, never fails.
    pub fn enqueue(&self, item: WorkItem) {
        self.pending.fetch_add(1, Ordering::SeqCst);
        // The receiver lives in `self`, so the channel is open.
        let _ = self.tx.send(item);
    }

    /// Wait for the next item.
    pub async fn dequeue(&self) -> WorkItem {
        let mut rx = self.rx.lock().await;
        match rx.recv().await {
            Some(item) => {
                self.pending.fetch_sub(1, Ordering::SeqCst);
                item
            }
            // Unreachable while `self.tx` is alive; park instead of spinning.
            None => std::future::pending().await,
        }
    }

    /// Wait for the next item, or `None` once `shutdown` is cancelled.
    pub async fn dequeue_or_shutdown(&self, shutdown: &CancellationToken) -> Option<WorkItem> {
        tokio::select! {
            biased;

            _ = shutdown.cancelled() => None,
            item = self.dequeue() => Some(item),
        }
    }

    /// Take the next item if one is ready, without waiting.
    ///
    /// Meant for draining a queue nobody else is consuming, e.g. after the
    /// workers stopped. Returns `None` while a consumer is parked in
    /// [`dequeue`](Self::dequeue), even if items are queued.
    pub fn try_dequeue(&self) -> Option<WorkItem> {
        let mut rx = self.rx.try_lock().ok()?;
        let item = rx.try_recv().ok()?;
        self.pending.fetch_sub(1, Ordering::SeqCst);
        Some(item)
    }

    /// Number of items enqueued but not yet pulled.
    pub fn len(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
