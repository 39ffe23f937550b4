//! HEVC Shrink Daemon
//!
//! Long-running supervisor that discovers video files in configured
//! libraries, classifies them against policy, and drives a single
//! hardware-assisted transcode worker that rewrites qualifying files in
//! place with smaller HEVC versions.

pub mod api;
pub mod classify;
pub mod daemon;
pub mod encoder;
pub mod error;
pub mod events;
pub mod exclusions;
pub mod probe;
pub mod replace;
pub mod scan;
pub mod settings;
pub mod stability;
pub mod startup;
pub mod store;
pub mod watch;

pub use hevc_shrink_daemon_config as config;
pub use hevc_shrink_daemon_config::Config;

pub use classify::{classify_file, Classification};
pub use daemon::{Daemon, DaemonError};
pub use encoder::{build_plan, test_encode, EncodeOutcome, EncoderWorker, TranscodePlan, WorkerConfig};
pub use error::{Error, Result};
pub use events::{Event, EventBus};
pub use exclusions::{Exclusion, ExclusionKind};
pub use probe::{FfprobeProber, MediaInfo, MediaProber, ProbeError};
pub use scan::{Scanner, ScanSummary, VIDEO_EXTENSIONS};
pub use settings::{EncodeSettings, LibraryPriority, QueueSettings, Settings, SortOrder};
pub use startup::{run_startup_checks, StartupError};
pub use store::{FileRecord, FileStatus, Library, Store};
pub use watch::{WatchConfig, WatcherRegistry};
