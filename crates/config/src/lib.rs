//! Process configuration for the HEVC shrink daemon.

mod config;

pub use config::{
    Config, ConfigError, OwnershipConfig, PathsConfig, ScanConfig, ServerConfig,
};
