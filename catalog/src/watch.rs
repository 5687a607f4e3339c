//! Filesystem watcher feeding the indexer.
//!
//! A recursive `notify` watcher pushes changed paths into an unbounded
//! channel; a debounce loop holds each path until it has been quiet for
//! 500 ms, then hands it to a bounded work queue drained by a single
//! worker, which serialises the catalogue writes. Watcher callback errors
//! are logged; a dead watcher takes this component down without touching
//! the rest of the process.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use notify::{RecursiveMode, Watcher as _};
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;

use crate::{Catalog, CatalogError, IndexOutcome};

/// Quiet period before a changed file is re-indexed.
const DEBOUNCE: Duration = Duration::from_millis(500);
const QUEUE_CAPACITY: usize = 256;

fn is_jsonl(path: &Path) -> bool {
    path.extension().and_then(|ext| ext.to_str()) == Some("jsonl")
}

/// Running watcher; dropping it (or calling [`stop`](WatcherHandle::stop))
/// tears the pipeline down.
pub struct WatcherHandle {
    shutdown: Option<oneshot::Sender<()>>,
    debouncer: tokio::task::JoinHandle<()>,
    worker: tokio::task::JoinHandle<()>,
}

impl WatcherHandle {
    /// Stops watching and waits for the worker to drain.
    pub async fn stop(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        let _ = self.debouncer.await;
        let _ = self.worker.await;
    }
}

/// Starts watching the catalog's root recursively.
pub fn spawn(catalog: Arc<Catalog>) -> Result<WatcherHandle, CatalogError> {
    let root = catalog.root().to_path_buf();
    let (event_tx, event_rx) = mpsc::unbounded_channel::<PathBuf>();

    let mut watcher = notify::recommended_watcher(move |result: notify::Result<notify::Event>| {
        match result {
            Ok(event) => {
                for path in event.paths {
                    if is_jsonl(&path) {
                        let _ = event_tx.send(path);
                    }
                }
            }
            Err(error) => tracing::warn!(%error, "watcher event error"),
        }
    })
    .map_err(|e| CatalogError::Watch(e.to_string()))?;
    watcher
        .watch(&root, RecursiveMode::Recursive)
        .map_err(|e| CatalogError::Watch(e.to_string()))?;
    tracing::info!(root = %root.display(), "watching conversation logs");

    let (work_tx, work_rx) = mpsc::channel::<PathBuf>(QUEUE_CAPACITY);
    let (shutdown_tx, shutdown_rx) = oneshot::channel();

    let debouncer = tokio::spawn(debounce_loop(watcher, event_rx, work_tx, shutdown_rx));
    let worker = tokio::spawn(work_loop(catalog, work_rx));

    Ok(WatcherHandle {
        shutdown: Some(shutdown_tx),
        debouncer,
        worker,
    })
}

/// Holds each path until it has been quiet for [`DEBOUNCE`], then queues it.
/// The watcher moves in here so it lives exactly as long as the loop.
async fn debounce_loop(
    _watcher: notify::RecommendedWatcher,
    mut events: mpsc::UnboundedReceiver<PathBuf>,
    queue: mpsc::Sender<PathBuf>,
    mut shutdown: oneshot::Receiver<()>,
) {
    let mut pending: HashMap<PathBuf, Instant> = HashMap::new();
    loop {
        let next_deadline = pending.values().min().copied();
        tokio::select! {
            _ = &mut shutdown => break,
            received = events.recv() => {
                match received {
                    Some(path) => {
                        pending.insert(path, Instant::now() + DEBOUNCE);
                    }
                    None => break,
                }
            }
            _ = async {
                match next_deadline {
                    Some(deadline) => tokio::time::sleep_until(deadline).await,
                    None => std::future::pending::<()>().await,
                }
            } => {
                let now = Instant::now();
                let due: Vec<PathBuf> = pending
                    .iter()
                    .filter(|(_, deadline)| **deadline <= now)
                    .map(|(path, _)| path.clone())
                    .collect();
                for path in due {
                    pending.remove(&path);
                    if queue.send(path).await.is_err() {
                        return;
                    }
                }
            }
        }
    }
}

/// Single worker: drains the queue sequentially so catalogue writes never
/// overlap.
async fn work_loop(catalog: Arc<Catalog>, mut queue: mpsc::Receiver<PathBuf>) {
    while let Some(path) = queue.recv().await {
        match catalog.index_file(&path).await {
            Ok(IndexOutcome::Indexed { messages }) => {
                tracing::info!(path = %path.display(), messages, "re-indexed after change");
            }
            Ok(IndexOutcome::Skipped) => {
                tracing::debug!(path = %path.display(), "change event but mtime unchanged");
            }
            Err(error) => {
                tracing::warn!(path = %path.display(), %error, "re-index after change failed");
            }
        }
    }
}
