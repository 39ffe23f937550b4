//! Daemon startup and wiring.
//!
//! Opens the store (fatal on failure), runs the startup checks, performs
//! crash recovery, then spawns the long-lived tasks: the encoder worker, one
//! watcher per watched library, the optional rescan timer, and the HTTP
//! server.

use crate::api::{self, AppState};
use crate::encoder::{EncoderWorker, WorkerConfig};
use crate::error::Error as CoreError;
use crate::events::EventBus;
use crate::probe::{FfprobeProber, MediaProber};
use crate::scan::Scanner;
use crate::startup::{run_startup_checks, StartupError};
use crate::store::Store;
use crate::watch::WatcherRegistry;
use hevc_shrink_daemon_config::Config;
use std::io;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Error type for daemon operations
#[derive(Debug, Error)]
pub enum DaemonError {
    /// Startup check failed
    #[error("Startup check failed: {0}")]
    Startup(#[from] StartupError),

    /// Store or other core failure
    #[error(transparent)]
    Core(#[from] CoreError),

    /// IO error (e.g., directory creation)
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Daemon state containing all runtime components
pub struct Daemon {
    pub config: Config,
    pub store: Store,
    pub bus: EventBus,
    pub prober: Arc<dyn MediaProber>,
    pub worker: EncoderWorker,
    pub scanner: Scanner,
    pub watchers: Arc<WatcherRegistry>,
}

impl Daemon {
    /// Full startup sequence: checks, store open, migrations, scratch
    /// directory, crash recovery, component wiring.
    pub async fn new(config: Config) -> Result<Self, DaemonError> {
        run_startup_checks(&config.paths.ffprobe, &config.paths.ffmpeg).await?;
        Self::new_without_checks(config).await
    }

    /// Startup without the external-tool checks. Useful for tests where
    /// ffprobe/ffmpeg are unavailable or faked.
    pub async fn new_without_checks(config: Config) -> Result<Self, DaemonError> {
        let store = Store::open(&config.paths.database).await?;
        tokio::fs::create_dir_all(&config.paths.scratch_dir).await?;

        // Crash recovery: nothing may stay in `encoding` across restarts.
        let recovered = store.reset_encoding().await?;
        if recovered > 0 {
            info!(recovered, "Recovered files stuck in encoding after restart");
        }

        let bus = EventBus::default();
        let prober: Arc<dyn MediaProber> =
            Arc::new(FfprobeProber::new(config.paths.ffprobe.clone()));
        let worker = EncoderWorker::new(
            store.clone(),
            prober.clone(),
            bus.clone(),
            WorkerConfig::from_config(&config),
        );
        let scanner = Scanner::new(store.clone(), prober.clone(), bus.clone());
        let watchers = Arc::new(WatcherRegistry::new(store.clone(), prober.clone()));

        Ok(Self {
            config,
            store,
            bus,
            prober,
            worker,
            scanner,
            watchers,
        })
    }

    /// Spawn the worker, the watchers, and the rescan timer.
    pub async fn start_background_tasks(&self) -> Result<Vec<JoinHandle<()>>, DaemonError> {
        let mut handles = vec![self.worker.start()];

        self.watchers.start_all().await?;

        let interval_secs = self.config.scan.scan_interval_secs;
        if interval_secs > 0 {
            let scanner = self.scanner.clone();
            handles.push(tokio::spawn(async move {
                let mut ticker = tokio::time::interval(Duration::from_secs(interval_secs));
                ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
                ticker.tick().await; // first tick fires immediately
                loop {
                    ticker.tick().await;
                    match scanner.scan_all().await {
                        Ok(_) => {}
                        Err(CoreError::Conflict(_)) => {
                            // A manual scan holds the slot; try again next tick.
                        }
                        Err(e) => warn!(error = %e, "Scheduled rescan failed"),
                    }
                }
            }));
        }

        Ok(handles)
    }

    fn app_state(&self) -> AppState {
        AppState {
            store: self.store.clone(),
            bus: self.bus.clone(),
            prober: self.prober.clone(),
            worker: self.worker.clone(),
            scanner: self.scanner.clone(),
            watchers: self.watchers.clone(),
            ffmpeg: self.config.paths.ffmpeg.clone(),
        }
    }

    /// Run everything until the process is terminated.
    pub async fn run(&self) -> Result<(), DaemonError> {
        let _handles = self.start_background_tasks().await?;
        api::serve(self.app_state(), self.config.server.port).await?;
        Ok(())
    }
}
