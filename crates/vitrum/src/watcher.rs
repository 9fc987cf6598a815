//! The file watcher.
//!
//! Observes the workspace root recursively and keeps the index live. Only
//! `*.md` files below non-hidden, non-excluded paths generate events. Each
//! path carries its own debounce timer so editor save bursts coalesce into
//! one dispatch.
//!
//! On dispatch: if the file exists on disk the index absorbs it (`add` when
//! the path was unknown, `change` otherwise); if it does not, the index
//! drops it. Every dispatch notifies the live-reload bus and hands the path
//! to the sync service, which may classify a local edit as a sync-state
//! transition. The watcher is authoritative for invalidation; no other
//! component writes the index.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use notify::{Event, RecommendedWatcher, RecursiveMode, Watcher};
use parking_lot::RwLock;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::bus::{BusEvent, LiveReloadBus};
use crate::document::FileTimes;
use crate::error::{Error, Result};
use crate::index::{self, DocumentIndex};
use crate::sync::SyncService;
use crate::DEBOUNCE_MS;

/// Handle to a running workspace watcher.
///
/// Dropping the handle stops observation; [`WatcherHandle::shutdown`] stops
/// it gracefully.
pub struct WatcherHandle {
    // The notify watcher must stay alive for events to flow.
    _watcher: RecommendedWatcher,
    task: JoinHandle<()>,
    shutdown_tx: watch::Sender<bool>,
}

impl WatcherHandle {
    /// Stop the watcher and wait for its task to finish
    pub async fn shutdown(self) {
        if self.shutdown_tx.send(true).is_err() {
            debug!("Watcher task already stopped");
        }
        if let Err(e) = self.task.await {
            warn!(error = %e, "Watcher task panicked");
        }
    }
}

/// Start watching a workspace root.
///
/// Filesystem events are debounced per path for [`DEBOUNCE_MS`] and then
/// dispatched into the index, the bus, and the sync service.
pub fn spawn(
    workspace_root: PathBuf,
    index: Arc<RwLock<DocumentIndex>>,
    bus: LiveReloadBus,
    sync: Arc<SyncService>,
) -> Result<WatcherHandle> {
    let (event_tx, event_rx) = mpsc::channel::<Event>(256);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
        match res {
            // The callback runs on notify's own thread; blocking_send is the
            // supported way to hop onto the runtime channel from there.
            Ok(event) => {
                let _ = event_tx.blocking_send(event);
            }
            Err(e) => warn!(error = %e, "Watch error"),
        }
    })
    .map_err(|e| Error::internal(format!("failed to create watcher: {e}")))?;

    watcher
        .watch(&workspace_root, RecursiveMode::Recursive)
        .map_err(|e| Error::storage(format!("failed to watch workspace root: {e}")))?;

    info!(root = %workspace_root.display(), "File watcher started");

    let task = tokio::spawn(run_event_loop(
        workspace_root,
        index,
        bus,
        sync,
        event_rx,
        shutdown_rx,
    ));

    Ok(WatcherHandle {
        _watcher: watcher,
        task,
        shutdown_tx,
    })
}

/// Drain raw notify events, debouncing each path independently.
async fn run_event_loop(
    workspace_root: PathBuf,
    index: Arc<RwLock<DocumentIndex>>,
    bus: LiveReloadBus,
    sync: Arc<SyncService>,
    mut event_rx: mpsc::Receiver<Event>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut pending: HashMap<String, JoinHandle<()>> = HashMap::new();

    loop {
        tokio::select! {
            _ = shutdown_rx.changed() => {
                if *shutdown_rx.borrow() {
                    info!("Watcher received shutdown signal");
                    break;
                }
            }
            event = event_rx.recv() => {
                let Some(event) = event else {
                    debug!("Watch event channel closed");
                    break;
                };
                for path in &event.paths {
                    let relative = index::relative_path(path, &workspace_root);
                    if !index::is_indexable_path(&relative) {
                        continue;
                    }

                    // A fresh event restarts this path's debounce window.
                    if let Some(timer) = pending.remove(&relative) {
                        timer.abort();
                    }

                    let timer = tokio::spawn(debounce_then_dispatch(
                        workspace_root.clone(),
                        relative.clone(),
                        Arc::clone(&index),
                        bus.clone(),
                        Arc::clone(&sync),
                    ));
                    pending.insert(relative, timer);
                }
            }
        }
    }

    for timer in pending.into_values() {
        timer.abort();
    }
    info!("File watcher stopped");
}

async fn debounce_then_dispatch(
    workspace_root: PathBuf,
    relative: String,
    index: Arc<RwLock<DocumentIndex>>,
    bus: LiveReloadBus,
    sync: Arc<SyncService>,
) {
    tokio::time::sleep(Duration::from_millis(DEBOUNCE_MS)).await;
    dispatch(&workspace_root, &relative, &index, &bus, &sync).await;
}

/// Apply one coalesced filesystem event to the engine.
async fn dispatch(
    workspace_root: &Path,
    relative: &str,
    index: &Arc<RwLock<DocumentIndex>>,
    bus: &LiveReloadBus,
    sync: &Arc<SyncService>,
) {
    let full = workspace_root.join(relative);

    if full.is_file() {
        let raw = match tokio::fs::read_to_string(&full).await {
            Ok(raw) => raw,
            Err(e) => {
                warn!(path = %relative, error = %e, "Failed to read changed file");
                return;
            }
        };
        let times = FileTimes::for_path(&full);

        let known = {
            let mut idx = index.write();
            let known = idx.contains(relative);
            if let Err(e) = idx.update_document(relative, &raw, times) {
                warn!(path = %relative, error = %e, "Failed to reindex changed file");
                return;
            }
            known
        };

        debug!(path = %relative, kind = if known { "change" } else { "add" }, "File event");
        bus.emit(BusEvent::Update {
            path: relative.to_string(),
        });
        sync.handle_local_change(relative).await;
    } else {
        let removed = index.write().remove_document(relative);
        if removed {
            debug!(path = %relative, "File removed");
            bus.emit(BusEvent::Remove {
                path: relative.to_string(),
            });
        }
    }
}
