//! Media probing via ffprobe.
//!
//! Runs `ffprobe -v quiet -print_format json -show_format -show_streams` and
//! condenses the output into a [`MediaInfo`] record: codec, bitrate,
//! dimensions, duration, and HDR detection.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::process::Command;

/// Error type for probe operations.
#[derive(Debug, Error)]
pub enum ProbeError {
    /// The file has no video stream at all.
    #[error("no video stream")]
    NoVideoStream,

    /// ffprobe exited non-zero.
    #[error("ffprobe failed: {0}")]
    Failed(String),

    /// Failed to parse ffprobe JSON output.
    #[error("Failed to parse ffprobe output: {0}")]
    Parse(String),

    /// IO error during probe.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Condensed metadata for one media file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct MediaInfo {
    /// Video codec name, e.g. "h264", "hevc".
    pub codec: Option<String>,
    /// Bits per second. Stream bitrate when present, container bitrate
    /// otherwise.
    pub bitrate: Option<i64>,
    /// Container-reported size in bytes.
    pub file_size: Option<i64>,
    pub width: Option<i64>,
    pub height: Option<i64>,
    pub is_hdr: bool,
    pub duration_secs: Option<f64>,
}

impl MediaInfo {
    /// The codec is HEVC (or its h265 alias), case-insensitive.
    pub fn is_hevc(&self) -> bool {
        self.codec
            .as_deref()
            .map(|c| {
                let c = c.to_lowercase();
                c == "hevc" || c == "h265"
            })
            .unwrap_or(false)
    }

    /// 4K or larger: width >= 3840 or height >= 2160.
    pub fn is_4k(&self) -> bool {
        self.width.unwrap_or(0) >= 3840 || self.height.unwrap_or(0) >= 2160
    }
}

/// Raw ffprobe JSON structures for parsing.
mod ffprobe_json {
    use serde::Deserialize;

    #[derive(Debug, Deserialize)]
    pub struct FfprobeOutput {
        pub streams: Option<Vec<Stream>>,
        pub format: Option<Format>,
    }

    #[derive(Debug, Deserialize)]
    pub struct Stream {
        pub codec_type: Option<String>,
        pub codec_name: Option<String>,
        pub width: Option<i64>,
        pub height: Option<i64>,
        pub bit_rate: Option<String>,
        pub color_transfer: Option<String>,
        pub color_primaries: Option<String>,
        pub side_data_list: Option<Vec<SideData>>,
    }

    #[derive(Debug, Deserialize)]
    pub struct SideData {
        pub side_data_type: Option<String>,
    }

    #[derive(Debug, Deserialize)]
    pub struct Format {
        pub duration: Option<String>,
        pub size: Option<String>,
        pub bit_rate: Option<String>,
    }
}

/// HDR transfer functions (PQ, HLG, DCI).
const HDR_TRANSFERS: &[&str] = &["smpte2084", "arib-std-b67", "smpte428"];

fn is_hdr_stream(stream: &ffprobe_json::Stream) -> bool {
    if let Some(transfer) = stream.color_transfer.as_deref() {
        if HDR_TRANSFERS.contains(&transfer.to_lowercase().as_str()) {
            return true;
        }
    }

    if let Some(primaries) = stream.color_primaries.as_deref() {
        if primaries.to_lowercase() == "bt2020" {
            return true;
        }
    }

    if let Some(side_data) = &stream.side_data_list {
        for sd in side_data {
            if let Some(kind) = sd.side_data_type.as_deref() {
                let kind = kind.to_lowercase();
                if kind.contains("hdr") || kind.contains("dolby vision") {
                    return true;
                }
            }
        }
    }

    false
}

/// Parses ffprobe JSON output into a [`MediaInfo`].
///
/// Fails with [`ProbeError::NoVideoStream`] when no stream of type "video"
/// is present.
pub fn parse_ffprobe_output(json_str: &str) -> Result<MediaInfo, ProbeError> {
    let ffprobe: ffprobe_json::FfprobeOutput =
        serde_json::from_str(json_str).map_err(|e| ProbeError::Parse(e.to_string()))?;

    let streams = ffprobe.streams.unwrap_or_default();
    let video = streams
        .iter()
        .find(|s| s.codec_type.as_deref() == Some("video"))
        .ok_or(ProbeError::NoVideoStream)?;

    let format = ffprobe.format;

    let stream_bitrate = video
        .bit_rate
        .as_deref()
        .and_then(|br| br.parse::<i64>().ok());
    let container_bitrate = format
        .as_ref()
        .and_then(|f| f.bit_rate.as_deref())
        .and_then(|br| br.parse::<i64>().ok());

    let file_size = format
        .as_ref()
        .and_then(|f| f.size.as_deref())
        .and_then(|s| s.parse::<i64>().ok());

    let duration_secs = format
        .as_ref()
        .and_then(|f| f.duration.as_deref())
        .and_then(|d| d.parse::<f64>().ok());

    Ok(MediaInfo {
        codec: video.codec_name.clone(),
        bitrate: stream_bitrate.or(container_bitrate),
        file_size,
        width: video.width,
        height: video.height,
        is_hdr: is_hdr_stream(video),
        duration_secs,
    })
}

/// Probe abstraction so the classifier, scanner, and encoder can be exercised
/// without a real ffprobe binary.
#[async_trait]
pub trait MediaProber: Send + Sync {
    async fn probe(&self, path: &Path) -> Result<MediaInfo, ProbeError>;
}

/// The production prober: shells out to ffprobe.
#[derive(Debug, Clone)]
pub struct FfprobeProber {
    ffprobe: PathBuf,
}

impl FfprobeProber {
    pub fn new(ffprobe: PathBuf) -> Self {
        Self { ffprobe }
    }
}

#[async_trait]
impl MediaProber for FfprobeProber {
    async fn probe(&self, path: &Path) -> Result<MediaInfo, ProbeError> {
        let output = Command::new(&self.ffprobe)
            .args(["-v", "quiet", "-print_format", "json", "-show_format", "-show_streams"])
            .arg(path)
            .output()
            .await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ProbeError::Failed(format!(
                "ffprobe exited with status {}: {}",
                output.status,
                stderr.trim()
            )));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        parse_ffprobe_output(&stdout)
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// Canned prober so classifier/scanner/encoder tests run without ffprobe.
    #[derive(Default)]
    pub struct StubProber {
        results: Mutex<HashMap<PathBuf, Result<MediaInfo, String>>>,
        pub calls: Mutex<Vec<PathBuf>>,
    }

    impl StubProber {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn set(&self, path: impl Into<PathBuf>, info: MediaInfo) {
            self.results.lock().unwrap().insert(path.into(), Ok(info));
        }

        pub fn fail(&self, path: impl Into<PathBuf>, message: &str) {
            self.results
                .lock()
                .unwrap()
                .insert(path.into(), Err(message.to_string()));
        }

        pub fn call_count(&self) -> usize {
            self.calls.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl MediaProber for StubProber {
        async fn probe(&self, path: &Path) -> Result<MediaInfo, ProbeError> {
            self.calls.lock().unwrap().push(path.to_path_buf());
            match self.results.lock().unwrap().get(path) {
                Some(Ok(info)) => Ok(info.clone()),
                Some(Err(message)) => Err(ProbeError::Failed(message.clone())),
                None => Err(ProbeError::Failed(format!("no stub entry for {:?}", path))),
            }
        }
    }

    /// 1080p h264 SDR info used across tests.
    pub fn h264_1080p(bitrate: Option<i64>) -> MediaInfo {
        MediaInfo {
            codec: Some("h264".to_string()),
            bitrate,
            file_size: None,
            width: Some(1920),
            height: Some(1080),
            is_hdr: false,
            duration_secs: Some(3600.0),
        }
    }
}
