//! In-process event bus.
//!
//! A single broadcast publisher fans scan and encode notifications out to
//! subscribers (the HTTP push channel among them). Delivery is best-effort:
//! a slow subscriber misses intermediate updates, it never blocks a producer.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Progress of a running library scan.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScanProgressEvent {
    pub library_id: i64,
    pub library_name: String,
    /// "finding_files" while the walk runs, then "scanning".
    pub state: String,
    pub total: usize,
    pub processed: usize,
    pub added: usize,
    pub skipped: usize,
    pub errored: usize,
    pub current_file: Option<String>,
    pub last_error: Option<String>,
}

/// Terminal summary of a library scan (also emitted for a stopped scan).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScanCompleteEvent {
    pub library_id: i64,
    pub library_name: String,
    pub total: usize,
    pub processed: usize,
    pub added: usize,
    pub skipped: usize,
    pub errored: usize,
    pub stopped: bool,
}

/// Progress of the current transcode.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EncodingProgressEvent {
    pub file_id: i64,
    pub file_name: String,
    /// Percentage in [0, 100].
    pub progress: f64,
}

/// Terminal outcome of the current transcode.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EncodingCompleteEvent {
    pub file_id: i64,
    pub file_name: String,
    /// Final file status: finished, rejected, errored, or cancelled.
    pub status: String,
}

/// Messages carried by the bus.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum Event {
    ScanProgress(ScanProgressEvent),
    ScanComplete(ScanCompleteEvent),
    EncodingStart(EncodingProgressEvent),
    EncodingProgress(EncodingProgressEvent),
    EncodingComplete(EncodingCompleteEvent),
}

/// Broadcast bus with non-blocking publish.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<Event>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event. A send with no live subscribers is not an error.
    pub fn publish(&self, event: Event) {
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
