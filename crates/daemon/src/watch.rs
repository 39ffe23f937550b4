//! Per-library filesystem watchers.
//!
//! Each watched library gets a recursive notify subscription running on a
//! blocking task, bridged to the async side over an mpsc channel. Additions
//! are debounced by size quiescence before they reach the classifier, so a
//! file still being copied in is never probed half-written. Entries that
//! existed before the watcher started produce no events and are left to the
//! scanner.

use crate::classify;
use crate::error::Result;
use crate::probe::MediaProber;
use crate::scan::{is_hidden, is_video_file};
use crate::stability::wait_for_quiescence;
use crate::store::{Library, Store};
use notify::event::{EventKind, ModifyKind, RenameMode};
use notify::{RecursiveMode, Watcher};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

const EVENT_CHANNEL_CAPACITY: usize = 100;

/// Debounce tuning.
#[derive(Debug, Clone)]
pub struct WatchConfig {
    /// A file must keep its size for this long before classification.
    pub quiescence_window: Duration,
    /// Give up on a file that keeps growing for this many windows.
    pub max_windows: u32,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            quiescence_window: Duration::from_secs(5),
            max_windows: 120,
        }
    }
}

struct WatcherHandle {
    shutdown_tx: oneshot::Sender<()>,
    watcher_task: JoinHandle<()>,
    consumer_task: JoinHandle<()>,
}

/// Owns one watcher per watched library.
pub struct WatcherRegistry {
    store: Store,
    prober: Arc<dyn MediaProber>,
    config: WatchConfig,
    watchers: Mutex<HashMap<i64, WatcherHandle>>,
}

impl WatcherRegistry {
    pub fn new(store: Store, prober: Arc<dyn MediaProber>) -> Self {
        Self::with_config(store, prober, WatchConfig::default())
    }

    pub fn with_config(store: Store, prober: Arc<dyn MediaProber>, config: WatchConfig) -> Self {
        Self {
            store,
            prober,
            config,
            watchers: Mutex::new(HashMap::new()),
        }
    }

    /// Start watching a library. Idempotent: a second start for the same
    /// library is a no-op, as is starting a library that is disabled or not
    /// flagged for watching.
    pub async fn start(&self, library: &Library) -> Result<()> {
        if !library.enabled || !library.watch_enabled {
            return Ok(());
        }

        let mut watchers = self.watchers.lock().await;
        if watchers.contains_key(&library.id) {
            return Ok(());
        }

        let (event_tx, event_rx) = mpsc::channel::<PathBuf>(EVENT_CHANNEL_CAPACITY);
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        let root = PathBuf::from(&library.path);
        let library_name = library.name.clone();
        let watcher_task = tokio::task::spawn_blocking(move || {
            if let Err(e) = run_watcher_loop(&root, event_tx, shutdown_rx) {
                warn!(library = %library_name, error = %e, "Filesystem watcher terminated");
            }
        });

        let consumer_task = tokio::spawn(consume_events(
            self.store.clone(),
            self.prober.clone(),
            self.config.clone(),
            library.id,
            event_rx,
        ));

        watchers.insert(
            library.id,
            WatcherHandle {
                shutdown_tx,
                watcher_task,
                consumer_task,
            },
        );
        info!(library = %library.name, path = %library.path, "Watcher started");
        Ok(())
    }

    /// Stop a library's watcher and wait for the subscription to close.
    /// A stop for a library without a watcher is a no-op.
    pub async fn stop(&self, library_id: i64) {
        let handle = self.watchers.lock().await.remove(&library_id);
        if let Some(handle) = handle {
            let _ = handle.shutdown_tx.send(());
            let _ = handle.watcher_task.await;
            let _ = handle.consumer_task.await;
            info!(library_id, "Watcher stopped");
        }
    }

    /// Stop, then start again if the library is still watch-enabled.
    pub async fn restart(&self, library: &Library) -> Result<()> {
        self.stop(library.id).await;
        self.start(library).await
    }

    /// Start a watcher for every enabled library with `watch_enabled`.
    pub async fn start_all(&self) -> Result<()> {
        for library in self.store.list_watched_libraries().await? {
            self.start(&library).await?;
        }
        Ok(())
    }

    pub async fn stop_all(&self) {
        let ids: Vec<i64> = self.watchers.lock().await.keys().copied().collect();
        for id in ids {
            self.stop(id).await;
        }
    }

    pub async fn watched_ids(&self) -> Vec<i64> {
        let mut ids: Vec<i64> = self.watchers.lock().await.keys().copied().collect();
        ids.sort_unstable();
        ids
    }
}

/// Event kinds that can introduce a new file under the root.
fn is_addition(kind: &EventKind) -> bool {
    matches!(kind, EventKind::Create(_))
        || matches!(kind, EventKind::Modify(ModifyKind::Name(RenameMode::To)))
}

/// Path filter shared with discovery: no dotfiles, recognized extensions only.
fn should_process(path: &Path) -> bool {
    !is_hidden(path) && is_video_file(path)
}

/// Blocking side: owns the notify watcher, forwards filtered additions into
/// the channel, and blocks until shutdown. Watcher errors are logged and do
/// not terminate the subscription.
fn run_watcher_loop(
    root: &Path,
    event_tx: mpsc::Sender<PathBuf>,
    shutdown_rx: oneshot::Receiver<()>,
) -> notify::Result<()> {
    let tx = event_tx;
    let mut watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
        match res {
            Ok(event) => {
                if !is_addition(&event.kind) {
                    return;
                }
                for path in event.paths {
                    if !should_process(&path) {
                        continue;
                    }
                    if tx.blocking_send(path).is_err() {
                        // Consumer gone; the subscription is shutting down.
                        return;
                    }
                }
            }
            Err(error) => {
                warn!(error = %error, "Filesystem notification error");
            }
        }
    })?;

    watcher.watch(root, RecursiveMode::Recursive)?;
    debug!(root = %root.display(), "Filesystem subscription active");

    // Park until the registry asks us to stop. Dropping the watcher ends the
    // subscription and drops the sender, which ends the consumer.
    let _ = shutdown_rx.blocking_recv();
    Ok(())
}

/// Async side: debounce each addition by size quiescence, then classify.
async fn consume_events(
    store: Store,
    prober: Arc<dyn MediaProber>,
    config: WatchConfig,
    library_id: i64,
    mut event_rx: mpsc::Receiver<PathBuf>,
) {
    while let Some(path) = event_rx.recv().await {
        match wait_for_quiescence(&path, config.quiescence_window, config.max_windows).await {
            Ok(size) => {
                debug!(path = %path.display(), size, "File quiescent, classifying");
                if let Err(e) = classify::classify_file(&store, prober.as_ref(), &path, library_id).await
                {
                    warn!(path = %path.display(), error = %e, "Classification failed for watched file");
                }
            }
            Err(e) => {
                // Vanished mid-copy or never settled; the next scan will
                // pick it up if it still exists.
                warn!(path = %path.display(), error = %e, "Skipping unsettled file");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::testing::StubProber;
    use crate::store::{FileStatus, NewLibrary};
    use notify::event::CreateKind;
    use tempfile::TempDir;

    #[test]
    fn test_is_addition_kinds() {
        assert!(is_addition(&EventKind::Create(CreateKind::File)));
        assert!(is_addition(&EventKind::Modify(ModifyKind::Name(
            RenameMode::To
        ))));
        assert!(!is_addition(&EventKind::Remove(
            notify::event::RemoveKind::File
        )));
        assert!(!is_addition(&EventKind::Modify(ModifyKind::Data(
            notify::event::DataChange::Content
        ))));
    }

    #[test]
    fn test_should_process_filters() {
        assert!(should_process(Path::new("/m/movie.mkv")));
        assert!(!should_process(Path::new("/m/.partial.mkv")));
        assert!(!should_process(Path::new("/m/movie.srt")));
        assert!(!should_process(Path::new("/m/subdir")));
    }

    async fn watched_library(store: &Store, path: &Path) -> Library {
        store
            .create_library(&NewLibrary {
                name: "Watched".to_string(),
                path: path.to_string_lossy().into_owned(),
                enabled: true,
                watch_enabled: true,
            })
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_start_is_idempotent_and_stop_waits() {
        let dir = TempDir::new().unwrap();
        let store = Store::open_in_memory().await.unwrap();
        let library = watched_library(&store, dir.path()).await;

        let registry = WatcherRegistry::new(store, Arc::new(StubProber::new()));
        registry.start(&library).await.unwrap();
        registry.start(&library).await.unwrap();
        assert_eq!(registry.watched_ids().await, vec![library.id]);

        registry.stop(library.id).await;
        assert!(registry.watched_ids().await.is_empty());

        // Stopping again is a no-op.
        registry.stop(library.id).await;
    }

    #[tokio::test]
    async fn test_start_skips_unwatched_libraries() {
        let dir = TempDir::new().unwrap();
        let store = Store::open_in_memory().await.unwrap();
        let library = store
            .create_library(&NewLibrary {
                name: "Plain".to_string(),
                path: dir.path().to_string_lossy().into_owned(),
                enabled: true,
                watch_enabled: false,
            })
            .await
            .unwrap();

        let registry = WatcherRegistry::new(store, Arc::new(StubProber::new()));
        registry.start(&library).await.unwrap();
        assert!(registry.watched_ids().await.is_empty());
    }

    #[tokio::test]
    async fn test_new_file_is_debounced_and_classified() {
        let dir = TempDir::new().unwrap();
        let store = Store::open_in_memory().await.unwrap();
        let library = watched_library(&store, dir.path()).await;

        let registry = WatcherRegistry::with_config(
            store.clone(),
            Arc::new(StubProber::new()),
            WatchConfig {
                quiescence_window: Duration::from_millis(50),
                max_windows: 20,
            },
        );
        registry.start(&library).await.unwrap();

        // Give the subscription a moment to arm, then drop a small file in.
        tokio::time::sleep(Duration::from_millis(200)).await;
        let path = dir.path().join("fresh.mkv");
        std::fs::write(&path, b"tiny").unwrap();

        // Under the 500MB floor, so the classifier should record a skip.
        // Inotify delivery is asynchronous; poll for a few seconds.
        let mut row = None;
        for _ in 0..50 {
            tokio::time::sleep(Duration::from_millis(100)).await;
            row = store
                .get_file_by_path(&path.to_string_lossy())
                .await
                .unwrap();
            if row.is_some() {
                break;
            }
        }
        registry.stop(library.id).await;

        let row = row.expect("watched file should have been classified");
        assert_eq!(row.status, FileStatus::Skipped);
        assert_eq!(row.skip_reason.as_deref(), Some("File under 500MB minimum"));
    }

    #[tokio::test]
    async fn test_restart_keeps_watching_enabled_library() {
        let dir = TempDir::new().unwrap();
        let store = Store::open_in_memory().await.unwrap();
        let library = watched_library(&store, dir.path()).await;

        let registry = WatcherRegistry::new(store, Arc::new(StubProber::new()));
        registry.start(&library).await.unwrap();
        registry.restart(&library).await.unwrap();
        assert_eq!(registry.watched_ids().await, vec![library.id]);
        registry.stop_all().await;
    }
}
