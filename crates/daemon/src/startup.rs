//! Startup checks.
//!
//! Preflight before the daemon runs: the probe tool must be present (fatal),
//! and the transcoder's encoder list is searched for the hardware HEVC
//! encoder. A missing hardware encoder is only a warning; transcodes will
//! then fail per file and be recorded as such.

use std::path::Path;
use thiserror::Error;
use tokio::process::Command;
use tracing::{info, warn};

/// The hardware encoder every produced output uses.
pub const HW_HEVC_ENCODER: &str = "hevc_nvenc";

/// Error types for startup checks
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("ffprobe not available: {0}")]
    FfprobeUnavailable(String),

    #[error("ffmpeg not available: {0}")]
    FfmpegUnavailable(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Verify that `ffprobe -version` executes successfully. Fatal on failure.
pub async fn check_ffprobe(ffprobe: &Path) -> Result<(), StartupError> {
    let output = Command::new(ffprobe)
        .arg("-version")
        .output()
        .await
        .map_err(|e| {
            StartupError::FfprobeUnavailable(format!(
                "{} -version failed; is ffprobe installed and in PATH? Error: {}",
                ffprobe.display(),
                e
            ))
        })?;

    if !output.status.success() {
        return Err(StartupError::FfprobeUnavailable(format!(
            "{} -version exited with {}",
            ffprobe.display(),
            output.status
        )));
    }

    Ok(())
}

/// Search `ffmpeg -encoders` output for the hardware HEVC encoder.
pub fn encoder_list_has_hw_hevc(encoders_output: &str) -> bool {
    encoders_output
        .lines()
        .any(|line| line.contains(HW_HEVC_ENCODER))
}

/// Probe the transcoder's encoder list. Returns whether the hardware HEVC
/// encoder is present; an unreachable ffmpeg binary is an error.
pub async fn check_hw_hevc_encoder(ffmpeg: &Path) -> Result<bool, StartupError> {
    let output = Command::new(ffmpeg)
        .args(["-hide_banner", "-encoders"])
        .output()
        .await
        .map_err(|e| {
            StartupError::FfmpegUnavailable(format!(
                "{} -encoders failed; is ffmpeg installed and in PATH? Error: {}",
                ffmpeg.display(),
                e
            ))
        })?;

    if !output.status.success() {
        return Err(StartupError::FfmpegUnavailable(format!(
            "{} -encoders exited with {}",
            ffmpeg.display(),
            output.status
        )));
    }

    Ok(encoder_list_has_hw_hevc(&String::from_utf8_lossy(
        &output.stdout,
    )))
}

/// Run all startup checks. The probe tool is required; the hardware encoder
/// only warns.
pub async fn run_startup_checks(ffprobe: &Path, ffmpeg: &Path) -> Result<(), StartupError> {
    check_ffprobe(ffprobe).await?;
    info!(ffprobe = %ffprobe.display(), "ffprobe available");

    match check_hw_hevc_encoder(ffmpeg).await {
        Ok(true) => info!(encoder = HW_HEVC_ENCODER, "Hardware HEVC encoder present"),
        Ok(false) => warn!(
            encoder = HW_HEVC_ENCODER,
            "Hardware HEVC encoder not found; transcodes will fail until one is available"
        ),
        Err(e) => return Err(e),
    }

    Ok(())
}
