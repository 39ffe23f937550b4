//! Library scanner.
//!
//! Recursively walks library roots for video files and funnels every
//! discovered path into the classifier. One scan runs systemwide at a time;
//! reentry is refused. Progress is published per file and a stop request
//! finishes the current file before returning.

use crate::classify::{self, Classification};
use crate::error::{Error, Result};
use crate::events::{Event, EventBus, ScanCompleteEvent, ScanProgressEvent};
use crate::probe::MediaProber;
use crate::store::{Library, Store};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{info, warn};

/// Video file extensions recognized by discovery (case-insensitive).
pub const VIDEO_EXTENSIONS: &[&str] = &[
    "mkv", "mp4", "avi", "mov", "m4v", "ts", "m2ts", "wmv", "flv", "webm",
];

/// Checks if a file has a recognized video extension (case-insensitive).
pub fn is_video_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            let ext = ext.to_lowercase();
            VIDEO_EXTENSIONS.contains(&ext.as_str())
        })
        .unwrap_or(false)
}

/// Checks if a basename is hidden (starts with `.`).
pub fn is_hidden(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(|n| n.starts_with('.'))
        .unwrap_or(false)
}

/// Counters for one completed (or stopped) library scan.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ScanSummary {
    pub library_id: i64,
    pub library_name: String,
    pub total: usize,
    pub processed: usize,
    pub added: usize,
    pub skipped: usize,
    pub errored: usize,
    pub stopped: bool,
}

struct ScannerInner {
    store: Store,
    prober: Arc<dyn MediaProber>,
    bus: EventBus,
    running: AtomicBool,
    stop_requested: AtomicBool,
    status: Mutex<Option<ScanProgressEvent>>,
}

/// The single-slot scanner.
#[derive(Clone)]
pub struct Scanner {
    inner: Arc<ScannerInner>,
}

/// Releases the scan slot when a run ends, however it ends.
struct ScanSlot<'a> {
    inner: &'a ScannerInner,
}

impl Drop for ScanSlot<'_> {
    fn drop(&mut self) {
        self.inner.stop_requested.store(false, Ordering::SeqCst);
        self.inner.running.store(false, Ordering::SeqCst);
    }
}

impl Scanner {
    pub fn new(store: Store, prober: Arc<dyn MediaProber>, bus: EventBus) -> Self {
        Self {
            inner: Arc::new(ScannerInner {
                store,
                prober,
                bus,
                running: AtomicBool::new(false),
                stop_requested: AtomicBool::new(false),
                status: Mutex::new(None),
            }),
        }
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    /// Ask the in-flight scan to finish the current file and return.
    pub fn stop(&self) {
        if self.is_running() {
            self.inner.stop_requested.store(true, Ordering::SeqCst);
        }
    }

    /// Progress of the current (or most recent) scan.
    pub fn status(&self) -> Option<ScanProgressEvent> {
        self.inner.status.lock().unwrap().clone()
    }

    fn acquire_slot(&self) -> Result<ScanSlot<'_>> {
        if self
            .inner
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(Error::Conflict("scan already in progress".to_string()));
        }
        Ok(ScanSlot { inner: &self.inner })
    }

    /// Scan a single library. Refuses to start while any scan is running.
    pub async fn scan_library(&self, library: &Library) -> Result<ScanSummary> {
        let slot = self.acquire_slot()?;
        let summary = self.run_one(library).await?;
        drop(slot);
        Ok(summary)
    }

    /// Scan every enabled library sequentially under one slot.
    pub async fn scan_all(&self) -> Result<Vec<ScanSummary>> {
        let slot = self.acquire_slot()?;

        let libraries = self.inner.store.list_enabled_libraries().await?;
        let mut summaries = Vec::with_capacity(libraries.len());
        for library in &libraries {
            let summary = self.run_one(library).await?;
            let stopped = summary.stopped;
            summaries.push(summary);
            if stopped {
                break;
            }
        }

        drop(slot);
        Ok(summaries)
    }

    /// One library pass. The caller holds the slot.
    async fn run_one(&self, library: &Library) -> Result<ScanSummary> {
        let inner = &self.inner;
        info!(library = %library.name, path = %library.path, "Scan started");

        let mut progress = ScanProgressEvent {
            library_id: library.id,
            library_name: library.name.clone(),
            state: "finding_files".to_string(),
            total: 0,
            processed: 0,
            added: 0,
            skipped: 0,
            errored: 0,
            current_file: None,
            last_error: None,
        };
        self.publish_progress(&progress);

        // The walk itself is blocking filesystem work.
        let root = PathBuf::from(&library.path);
        let candidates = tokio::task::spawn_blocking(move || collect_candidates(&root))
            .await
            .map_err(|e| Error::Io(std::io::Error::other(e)))?;

        progress.state = "scanning".to_string();
        progress.total = candidates.len();
        self.publish_progress(&progress);

        let mut stopped = false;
        for path in candidates {
            if inner.stop_requested.load(Ordering::SeqCst) {
                stopped = true;
                break;
            }

            progress.current_file = Some(path.to_string_lossy().into_owned());
            match classify::classify_file(&inner.store, inner.prober.as_ref(), &path, library.id)
                .await
            {
                Ok(Classification::Queued) => progress.added += 1,
                Ok(Classification::Errored(message)) => {
                    progress.errored += 1;
                    progress.last_error = Some(message);
                }
                Ok(_) => progress.skipped += 1,
                Err(e) => {
                    progress.errored += 1;
                    progress.last_error = Some(e.to_string());
                    warn!(path = %path.display(), error = %e, "Classification failed during scan");
                }
            }

            progress.processed += 1;
            self.publish_progress(&progress);
        }

        let summary = ScanSummary {
            library_id: library.id,
            library_name: library.name.clone(),
            total: progress.total,
            processed: progress.processed,
            added: progress.added,
            skipped: progress.skipped,
            errored: progress.errored,
            stopped,
        };

        inner.bus.publish(Event::ScanComplete(ScanCompleteEvent {
            library_id: summary.library_id,
            library_name: summary.library_name.clone(),
            total: summary.total,
            processed: summary.processed,
            added: summary.added,
            skipped: summary.skipped,
            errored: summary.errored,
            stopped: summary.stopped,
        }));
        info!(
            library = %library.name,
            processed = summary.processed,
            added = summary.added,
            skipped = summary.skipped,
            errored = summary.errored,
            stopped = summary.stopped,
            "Scan finished"
        );

        Ok(summary)
    }

    fn publish_progress(&self, progress: &ScanProgressEvent) {
        *self.inner.status.lock().unwrap() = Some(progress.clone());
        self.inner.bus.publish(Event::ScanProgress(progress.clone()));
    }
}

/// Recursive walk: skip hidden entries, keep recognized video files.
fn collect_candidates(root: &Path) -> Vec<PathBuf> {
    use walkdir::WalkDir;

    if !root.exists() {
        return Vec::new();
    }

    let walker = WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| {
            // Allow the root even if its own name starts with '.'.
            entry.depth() == 0 || !is_hidden(entry.path())
        });

    walker
        .filter_map(|e| e.ok())
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path())
        .filter(|path| is_video_file(path))
        .collect()
}
