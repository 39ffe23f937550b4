//! The encoding worker: a single-slot consumer of the queue.
//!
//! Dequeue under the ordering policy, copy to scratch, re-probe, plan, run
//! the transcoder (hardware decode first, CPU decode retry), compare sizes,
//! safe-replace or reject, account the outcome. Any unexpected failure is
//! converted into `errored` on the current file and the loop continues.

mod ffmpeg;
mod plan;

pub use ffmpeg::{compute_progress, extract_time_secs, parse_time_to_seconds, FfmpegRun};
pub use plan::{build_plan, TranscodePlan};

use crate::error::{Error, Result};
use crate::events::{Event, EventBus, EncodingCompleteEvent, EncodingProgressEvent};
use crate::probe::{MediaInfo, MediaProber};
use crate::replace::safe_replace;
use crate::settings::{EncodeSettings, LibraryPriority};
use crate::store::{FileRecord, FileStatus, StatsDelta, Store};
use hevc_shrink_daemon_config::{Config, OwnershipConfig};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{error, info, warn};

/// Worker tuning and external paths.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub ffmpeg: PathBuf,
    pub scratch_dir: PathBuf,
    pub ownership: OwnershipConfig,
    /// Wait while paused.
    pub pause_poll: Duration,
    /// Wait when the queue is empty.
    pub idle_poll: Duration,
    /// Wait after a terminal outcome before the next pick.
    pub between_files: Duration,
}

impl WorkerConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            ffmpeg: config.paths.ffmpeg.clone(),
            scratch_dir: config.paths.scratch_dir.clone(),
            ownership: config.ownership.clone(),
            pause_poll: Duration::from_secs(1),
            idle_poll: Duration::from_secs(10),
            between_files: Duration::from_secs(1),
        }
    }
}

/// Terminal outcome of one pipeline run.
#[derive(Debug, Clone, PartialEq)]
pub enum EncodeOutcome {
    Finished { new_size: i64, space_saved: i64 },
    Rejected { new_size: i64 },
    Errored(String),
    Cancelled,
}

impl EncodeOutcome {
    fn status(&self) -> FileStatus {
        match self {
            EncodeOutcome::Finished { .. } => FileStatus::Finished,
            EncodeOutcome::Rejected { .. } => FileStatus::Rejected,
            EncodeOutcome::Errored(_) => FileStatus::Errored,
            EncodeOutcome::Cancelled => FileStatus::Cancelled,
        }
    }
}

/// Read-only view of the file currently being encoded.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct CurrentEncode {
    pub file_id: i64,
    pub file_name: String,
    pub progress: f64,
}

struct WorkerInner {
    store: Store,
    prober: Arc<dyn MediaProber>,
    bus: EventBus,
    config: WorkerConfig,
    running: AtomicBool,
    paused: AtomicBool,
    current: Mutex<Option<CurrentEncode>>,
    pid: Mutex<Option<u32>>,
    cancel_requested: AtomicBool,
}

/// The process-wide encoder worker.
#[derive(Clone)]
pub struct EncoderWorker {
    inner: Arc<WorkerInner>,
}

impl EncoderWorker {
    pub fn new(
        store: Store,
        prober: Arc<dyn MediaProber>,
        bus: EventBus,
        config: WorkerConfig,
    ) -> Self {
        Self {
            inner: Arc::new(WorkerInner {
                store,
                prober,
                bus,
                config,
                running: AtomicBool::new(false),
                paused: AtomicBool::new(false),
                current: Mutex::new(None),
                pid: Mutex::new(None),
                cancel_requested: AtomicBool::new(false),
            }),
        }
    }

    /// Spawn the worker loop. A second start while running is a no-op task.
    pub fn start(&self) -> JoinHandle<()> {
        if self
            .inner
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            warn!("Encoder worker already running");
            return tokio::spawn(async {});
        }

        let worker = self.clone();
        tokio::spawn(async move {
            info!("Encoder worker started");
            worker.run_loop().await;
            info!("Encoder worker stopped");
        })
    }

    /// Ask the loop to terminate after the current file.
    pub fn stop(&self) {
        self.inner.running.store(false, Ordering::SeqCst);
    }

    pub fn pause(&self) {
        self.inner.paused.store(true, Ordering::SeqCst);
    }

    pub fn resume(&self) {
        self.inner.paused.store(false, Ordering::SeqCst);
    }

    pub fn is_paused(&self) -> bool {
        self.inner.paused.load(Ordering::SeqCst)
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    pub fn current(&self) -> Option<CurrentEncode> {
        self.inner.current.lock().unwrap().clone()
    }

    /// Cancel the in-flight transcode. Returns true iff a transcoder process
    /// was actually running.
    pub fn cancel_current(&self) -> bool {
        let pid = *self.inner.pid.lock().unwrap();
        match pid {
            Some(pid) => {
                self.inner.cancel_requested.store(true, Ordering::SeqCst);
                terminate(pid);
                info!(pid, "Sent SIGTERM to transcoder");
                true
            }
            None => false,
        }
    }

    async fn run_loop(&self) {
        let config = &self.inner.config;
        while self.is_running() {
            if self.is_paused() {
                sleep(config.pause_poll).await;
                continue;
            }

            match self.process_one().await {
                Ok(Some(_)) => sleep(config.between_files).await,
                Ok(None) => sleep(config.idle_poll).await,
                Err(e) => {
                    error!(error = %e, "Worker iteration failed");
                    sleep(config.idle_poll).await;
                }
            }
        }
    }

    /// Pick and fully process at most one queued file.
    ///
    /// Returns `None` when the queue is empty, otherwise the terminal
    /// outcome that was persisted.
    pub async fn process_one(&self) -> Result<Option<EncodeOutcome>> {
        let inner = &self.inner;
        let settings = inner.store.load_settings().await?;
        let queue = settings.queue();

        let last_library_id = if queue.library_priority == LibraryPriority::RoundRobin {
            inner.store.last_library_id().await?
        } else {
            None
        };

        let Some(file) = inner.store.next_queued(queue, last_library_id).await? else {
            return Ok(None);
        };

        let file = inner.store.mark_encoding(file.id).await?;
        inner.cancel_requested.store(false, Ordering::SeqCst);
        *inner.current.lock().unwrap() = Some(CurrentEncode {
            file_id: file.id,
            file_name: file.file_name.clone(),
            progress: 0.0,
        });
        inner
            .store
            .log_encoding_event(file.id, "encoding_start", None)
            .await?;
        inner.bus.publish(Event::EncodingStart(EncodingProgressEvent {
            file_id: file.id,
            file_name: file.file_name.clone(),
            progress: 0.0,
        }));
        info!(file = %file.file_path, "Encoding started");

        let outcome = match self.run_pipeline(&file, &settings.encode).await {
            Ok(outcome) => outcome,
            Err(e) => {
                // Nothing unexpected may unwind through the worker loop.
                warn!(file = %file.file_path, error = %e, "Pipeline failed");
                EncodeOutcome::Errored(e.to_string())
            }
        };

        self.persist_outcome(&file, &outcome).await?;

        if queue.library_priority == LibraryPriority::RoundRobin {
            inner.store.set_last_library_id(file.library_id).await?;
        }

        *inner.current.lock().unwrap() = None;
        inner
            .bus
            .publish(Event::EncodingComplete(EncodingCompleteEvent {
                file_id: file.id,
                file_name: file.file_name.clone(),
                status: outcome.status().as_str().to_string(),
            }));

        Ok(Some(outcome))
    }

    /// The transcode pipeline for one file. IO errors bubble out and are
    /// converted to an errored outcome by the caller.
    async fn run_pipeline(
        &self,
        file: &FileRecord,
        encode: &EncodeSettings,
    ) -> Result<EncodeOutcome> {
        let inner = &self.inner;
        let original = PathBuf::from(&file.file_path);
        let original_size = match file.original_size {
            Some(size) => size,
            None => tokio::fs::metadata(&original).await?.len() as i64,
        };

        tokio::fs::create_dir_all(&inner.config.scratch_dir).await?;
        let scratch_input = inner
            .config
            .scratch_dir
            .join(format!("{}-{}", file.id, file.file_name));
        let scratch_output = inner
            .config
            .scratch_dir
            .join(format!("{}-output.mkv", file.id));

        // Spare the source disk: all transcoder reads hit the local copy.
        tokio::fs::copy(&original, &scratch_input).await?;

        let result = self
            .transcode_and_swap(
                file,
                encode,
                &original,
                original_size,
                &scratch_input,
                &scratch_output,
            )
            .await;

        let _ = tokio::fs::remove_file(&scratch_input).await;
        let _ = tokio::fs::remove_file(&scratch_output).await;
        result
    }

    async fn transcode_and_swap(
        &self,
        file: &FileRecord,
        encode: &EncodeSettings,
        original: &Path,
        original_size: i64,
        scratch_input: &Path,
        scratch_output: &Path,
    ) -> Result<EncodeOutcome> {
        let inner = &self.inner;

        let info = match inner.prober.probe(scratch_input).await {
            Ok(info) => info,
            Err(e) => return Ok(EncodeOutcome::Errored(e.to_string())),
        };

        // Hardware decode attempt, then an otherwise identical CPU-decode
        // retry.
        let first = self
            .run_attempt(file, encode, &info, scratch_input, scratch_output, true)
            .await?;
        if !first.success {
            if inner.cancel_requested.load(Ordering::SeqCst) {
                return Ok(EncodeOutcome::Cancelled);
            }
            inner
                .store
                .log_encoding_event(
                    file.id,
                    "fallback_cpu_decode",
                    Some("hardware decode attempt failed, retrying with CPU decode"),
                )
                .await?;
            warn!(file = %file.file_path, "Hardware decode failed, retrying with CPU decode");

            let second = self
                .run_attempt(file, encode, &info, scratch_input, scratch_output, false)
                .await?;
            if !second.success {
                if inner.cancel_requested.load(Ordering::SeqCst) {
                    return Ok(EncodeOutcome::Cancelled);
                }
                inner
                    .store
                    .log_encoding_event(file.id, "encode_failed", Some(&second.stderr_tail))
                    .await?;
                return Ok(EncodeOutcome::Errored("FFmpeg encoding failed".to_string()));
            }
        }

        let output_size = tokio::fs::metadata(scratch_output).await?.len() as i64;
        if output_size >= original_size {
            info!(
                file = %file.file_path,
                output_size,
                original_size,
                "Output not smaller, rejecting"
            );
            return Ok(EncodeOutcome::Rejected {
                new_size: output_size,
            });
        }

        let ownership = inner.config.ownership.clone();
        let original_owned = original.to_path_buf();
        let scratch_owned = scratch_output.to_path_buf();
        let replaced = tokio::task::spawn_blocking(move || {
            safe_replace(&original_owned, &scratch_owned, &ownership)
        })
        .await
        .map_err(|e| Error::Io(std::io::Error::other(e)))?;

        match replaced {
            Ok(destination) => {
                info!(
                    file = %file.file_path,
                    destination = %destination.display(),
                    saved = original_size - output_size,
                    "Replaced original with transcode output"
                );
                Ok(EncodeOutcome::Finished {
                    new_size: output_size,
                    space_saved: original_size - output_size,
                })
            }
            Err(e) => Ok(EncodeOutcome::Errored(e.to_string())),
        }
    }

    async fn run_attempt(
        &self,
        file: &FileRecord,
        encode: &EncodeSettings,
        info: &MediaInfo,
        scratch_input: &Path,
        scratch_output: &Path,
        hw_decode: bool,
    ) -> Result<FfmpegRun> {
        let inner = &self.inner;
        let plan = build_plan(scratch_input, scratch_output, info, encode, hw_decode);

        inner
            .store
            .log_encoding_event(
                file.id,
                "ffmpeg_command",
                Some(&format!(
                    "{} {}",
                    inner.config.ffmpeg.display(),
                    plan.args.join(" ")
                )),
            )
            .await?;

        let bus = inner.bus.clone();
        let current = &inner.current;
        let file_id = file.id;
        let file_name = file.file_name.clone();
        let run = ffmpeg::run_transcode(
            &inner.config.ffmpeg,
            &plan,
            info.duration_secs,
            &inner.pid,
            move |progress| {
                if let Some(state) = current.lock().unwrap().as_mut() {
                    state.progress = progress;
                }
                bus.publish(Event::EncodingProgress(EncodingProgressEvent {
                    file_id,
                    file_name: file_name.clone(),
                    progress,
                }));
            },
        )
        .await?;
        Ok(run)
    }

    async fn persist_outcome(&self, file: &FileRecord, outcome: &EncodeOutcome) -> Result<()> {
        let store = &self.inner.store;
        match outcome {
            EncodeOutcome::Finished {
                new_size,
                space_saved,
            } => {
                store
                    .complete_encoding(file.id, FileStatus::Finished, Some(*new_size), None)
                    .await?;
                store.record_stats(StatsDelta::finished(*space_saved)).await?;
                store
                    .log_encoding_event(
                        file.id,
                        "finished",
                        Some(&format!("saved {} bytes", space_saved)),
                    )
                    .await?;
            }
            EncodeOutcome::Rejected { new_size } => {
                store
                    .complete_encoding(file.id, FileStatus::Rejected, Some(*new_size), None)
                    .await?;
                store.record_stats(StatsDelta::rejected()).await?;
                store
                    .log_encoding_event(file.id, "rejected", Some("output not smaller than original"))
                    .await?;
            }
            EncodeOutcome::Errored(message) => {
                store
                    .complete_encoding(file.id, FileStatus::Errored, None, Some(message))
                    .await?;
                store.record_stats(StatsDelta::errored()).await?;
                store.log_encoding_event(file.id, "errored", Some(message)).await?;
            }
            EncodeOutcome::Cancelled => {
                store
                    .complete_encoding(file.id, FileStatus::Cancelled, None, None)
                    .await?;
                store.log_encoding_event(file.id, "cancelled", None).await?;
            }
        }
        Ok(())
    }
}

/// Non-destructive test encode: same planner, output into a caller-supplied
/// directory with the `.test.mkv` suffix. Never touches the source, the
/// store, or the stats.
#[derive(Debug, Clone, Serialize)]
pub struct TestEncodeResult {
    pub success: bool,
    pub original_size: i64,
    pub output_size: i64,
    pub savings_percent: f64,
    pub output_path: String,
    pub metadata: MediaInfo,
}

pub async fn test_encode(
    prober: &dyn MediaProber,
    ffmpeg: &Path,
    source: &Path,
    output_dir: &Path,
    encode: &EncodeSettings,
) -> Result<TestEncodeResult> {
    let original_size = tokio::fs::metadata(source).await?.len() as i64;
    let info = prober.probe(source).await?;

    tokio::fs::create_dir_all(output_dir).await?;
    let stem = source
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "output".to_string());
    let output = output_dir.join(format!("{stem}.test.mkv"));

    let pid_cell = Mutex::new(None);
    let hw_plan = build_plan(source, &output, &info, encode, true);
    let mut run = ffmpeg::run_transcode(ffmpeg, &hw_plan, info.duration_secs, &pid_cell, |_| {}).await?;
    if !run.success {
        let cpu_plan = build_plan(source, &output, &info, encode, false);
        run = ffmpeg::run_transcode(ffmpeg, &cpu_plan, info.duration_secs, &pid_cell, |_| {}).await?;
    }
    if !run.success {
        let _ = tokio::fs::remove_file(&output).await;
        return Err(Error::EncodeFailed(run.stderr_tail));
    }

    let output_size = tokio::fs::metadata(&output).await?.len() as i64;
    let savings_percent = if original_size > 0 {
        (original_size - output_size) as f64 / original_size as f64 * 100.0
    } else {
        0.0
    };

    Ok(TestEncodeResult {
        success: true,
        original_size,
        output_size,
        savings_percent,
        output_path: output.to_string_lossy().into_owned(),
        metadata: info,
    })
}

fn terminate(pid: u32) {
    #[cfg(unix)]
    {
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;
        let _ = kill(Pid::from_raw(pid as i32), Signal::SIGTERM);
    }
    #[cfg(not(unix))]
    {
        let _ = pid;
    }
}
