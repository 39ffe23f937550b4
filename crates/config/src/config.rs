//! Configuration structures and loading logic.
//!
//! Only process-level values live here (ports, binary paths, directories,
//! intervals). Behavior-affecting knobs such as encoding parameters and queue
//! ordering are stored in the settings table and are mutable at runtime.

use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

/// Error type for configuration operations
#[derive(Debug)]
pub enum ConfigError {
    /// IO error reading config file
    Io(std::io::Error),
    /// TOML parsing error
    Parse(toml::de::Error),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "Failed to read config file: {}", e),
            ConfigError::Parse(e) => write!(f, "Failed to parse config: {}", e),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(e: std::io::Error) -> Self {
        ConfigError::Io(e)
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(e: toml::de::Error) -> Self {
        ConfigError::Parse(e)
    }
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerConfig {
    /// Port the JSON API listens on
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_port() -> u16 {
    3333
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
        }
    }
}

/// Filesystem path configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PathsConfig {
    /// Path of the SQLite database file
    #[serde(default = "default_database_path")]
    pub database: PathBuf,
    /// ffmpeg binary
    #[serde(default = "default_ffmpeg_path")]
    pub ffmpeg: PathBuf,
    /// ffprobe binary
    #[serde(default = "default_ffprobe_path")]
    pub ffprobe: PathBuf,
    /// Scratch directory for transcode inputs/outputs.
    /// Defaults to a subdirectory of the OS temp directory when unset.
    #[serde(default = "default_scratch_dir")]
    pub scratch_dir: PathBuf,
}

fn default_database_path() -> PathBuf {
    PathBuf::from("hevc-shrinkd.db")
}

fn default_ffmpeg_path() -> PathBuf {
    PathBuf::from("ffmpeg")
}

fn default_ffprobe_path() -> PathBuf {
    PathBuf::from("ffprobe")
}

fn default_scratch_dir() -> PathBuf {
    env::temp_dir().join("hevc-shrinkd")
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            database: default_database_path(),
            ffmpeg: default_ffmpeg_path(),
            ffprobe: default_ffprobe_path(),
            scratch_dir: default_scratch_dir(),
        }
    }
}

/// Scan scheduling configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ScanConfig {
    /// Interval between automatic full-library rescans, in seconds.
    /// 0 disables scheduled rescans.
    #[serde(default)]
    pub scan_interval_secs: u64,
}

/// Ownership applied to replaced files.
///
/// When set, the temp file written next to the original is chowned to this
/// identity before the rename. Both must be set for the chown to happen.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct OwnershipConfig {
    #[serde(default)]
    pub uid: Option<u32>,
    #[serde(default)]
    pub gid: Option<u32>,
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub scan: ScanConfig,
    #[serde(default)]
    pub ownership: OwnershipConfig,
    /// Log filter directive, e.g. "info" or "hevc_shrink_daemon=debug"
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    /// Load configuration from a TOML file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        Self::parse_toml(&content)
    }

    /// Parse configuration from a TOML string
    pub fn parse_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        Ok(config)
    }

    /// Apply environment variable overrides to the configuration
    ///
    /// Overrides the following values if environment variables are set:
    /// - SHRINKD_PORT -> server.port
    /// - SHRINKD_DATABASE -> paths.database
    /// - SHRINKD_FFMPEG -> paths.ffmpeg
    /// - SHRINKD_FFPROBE -> paths.ffprobe
    /// - SHRINKD_SCRATCH_DIR -> paths.scratch_dir
    /// - SHRINKD_SCAN_INTERVAL_SECS -> scan.scan_interval_secs
    /// - SHRINKD_LOG_LEVEL -> log_level
    pub fn apply_env_overrides(&mut self) {
        if let Ok(val) = env::var("SHRINKD_PORT") {
            if let Ok(port) = val.parse::<u16>() {
                self.server.port = port;
            }
        }

        if let Ok(val) = env::var("SHRINKD_DATABASE") {
            self.paths.database = PathBuf::from(val);
        }

        if let Ok(val) = env::var("SHRINKD_FFMPEG") {
            self.paths.ffmpeg = PathBuf::from(val);
        }

        if let Ok(val) = env::var("SHRINKD_FFPROBE") {
            self.paths.ffprobe = PathBuf::from(val);
        }

        if let Ok(val) = env::var("SHRINKD_SCRATCH_DIR") {
            self.paths.scratch_dir = PathBuf::from(val);
        }

        if let Ok(val) = env::var("SHRINKD_SCAN_INTERVAL_SECS") {
            if let Ok(secs) = val.parse::<u64>() {
                self.scan.scan_interval_secs = secs;
            }
        }

        if let Ok(val) = env::var("SHRINKD_LOG_LEVEL") {
            self.log_level = val;
        }
    }

    /// Load configuration from file and apply environment overrides
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let mut config = Self::load_from_file(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Default configuration with environment overrides applied.
    ///
    /// Used when no config file is present; the daemon is fully operable
    /// from environment variables alone.
    pub fn from_env() -> Self {
        let mut config = Config::default();
        config.apply_env_overrides();
        config
    }
}
