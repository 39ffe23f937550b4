//! CLI entry point for the HEVC shrink daemon.
//!
//! Parses command line arguments, initializes logging, and starts the
//! daemon.

use clap::Parser;
use hevc_shrink_daemon::{Config, Daemon};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// HEVC Shrink Daemon - rewrites media libraries in place as smaller HEVC
#[derive(Parser, Debug)]
#[command(name = "hevc-shrinkd")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file (config.toml). Falls back to
    /// environment variables when absent.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Skip startup checks (ffprobe, hardware encoder). For testing only.
    #[arg(long, default_value = "false")]
    skip_checks: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => match Config::load(path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("Failed to load config {}: {}", path.display(), e);
                return ExitCode::FAILURE;
            }
        },
        None => Config::from_env(),
    };

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!(
        database = %config.paths.database.display(),
        scratch = %config.paths.scratch_dir.display(),
        port = config.server.port,
        "HEVC shrink daemon starting"
    );

    let daemon_result = if args.skip_checks {
        info!("Skipping startup checks (--skip-checks enabled)");
        Daemon::new_without_checks(config).await
    } else {
        Daemon::new(config).await
    };

    match daemon_result {
        Ok(daemon) => {
            if let Err(e) = daemon.run().await {
                error!(error = %e, "Daemon terminated with error");
                return ExitCode::FAILURE;
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(error = %e, "Failed to initialize daemon");
            ExitCode::FAILURE
        }
    }
}
