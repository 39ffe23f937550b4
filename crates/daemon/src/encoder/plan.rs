//! The transcode planner.
//!
//! A pure function from probed metadata and settings to an ffmpeg argument
//! vector. The same `(MediaInfo, EncodeSettings)` always produces the same
//! invocation; everything the worker executes is decided here.

use crate::probe::MediaInfo;
use crate::settings::EncodeSettings;
use std::path::Path;

/// Scaler target: 4K sources come down to this width, aspect preserved.
const DOWNSCALE_WIDTH: u32 = 1920;

/// HDR -> SDR tonemap chain: linearize, full-precision RGB, move to bt709
/// primaries, Hable tonemap without desaturation, back to bt709
/// transfer/matrix at TV range, 8-bit 4:2:0.
const TONEMAP_CHAIN: &[&str] = &[
    "zscale=t=linear:npl=100",
    "format=gbrpf32le",
    "zscale=p=bt709",
    "tonemap=tonemap=hable:desat=0",
    "zscale=t=bt709:m=bt709:r=tv",
    "format=yuv420p",
];

/// A fully decided transcoder invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct TranscodePlan {
    /// Argument vector for the transcoder binary, output path last.
    pub args: Vec<String>,
    /// Whether this plan decodes on the GPU.
    pub hw_decode: bool,
    /// Target video bitrate in bps, when the source bitrate was known.
    pub target_bitrate: Option<i64>,
}

/// Resolution class used for bitrate caps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ResolutionClass {
    Hd1080OrHigher,
    Sd720OrBelow,
    Other,
}

fn resolution_class(info: &MediaInfo, downscaled: bool) -> ResolutionClass {
    // A downscaled 4K source is capped as 1080p content.
    if downscaled {
        return ResolutionClass::Hd1080OrHigher;
    }
    let height = info.height.unwrap_or(0);
    if height >= 1080 || info.width.unwrap_or(0) >= 1920 {
        ResolutionClass::Hd1080OrHigher
    } else if height > 0 && height <= 720 {
        ResolutionClass::Sd720OrBelow
    } else {
        ResolutionClass::Other
    }
}

fn mbps_to_bps(mbps: f64) -> i64 {
    (mbps * 1_000_000.0) as i64
}

/// Target bitrate: `floor(source × factor)`, capped per resolution class.
fn target_bitrate(info: &MediaInfo, settings: &EncodeSettings, downscaled: bool) -> Option<i64> {
    let source = info.bitrate?;
    let target = (source as f64 * settings.bitrate_factor).floor() as i64;
    let cap = match resolution_class(info, downscaled) {
        ResolutionClass::Hd1080OrHigher => settings.bitrate_cap_1080p,
        ResolutionClass::Sd720OrBelow => settings.bitrate_cap_720p,
        ResolutionClass::Other => settings.bitrate_cap_other,
    };
    Some(target.min(mbps_to_bps(cap)))
}

/// Build the filter chain: optional downscale, then the tonemap chain for
/// HDR sources. When frames are on the GPU and a downscale is active, they
/// are downloaded and converted to nv12 before the CPU tonemap filters.
fn video_filters(info: &MediaInfo, settings: &EncodeSettings, hw_decode: bool) -> Vec<String> {
    let mut chain = Vec::new();
    let downscale = info.is_4k() && settings.scale_4k_to_1080p;

    if downscale {
        if hw_decode {
            chain.push(format!("scale_cuda={}:-2", DOWNSCALE_WIDTH));
        } else {
            chain.push(format!("scale={}:-2", DOWNSCALE_WIDTH));
        }
    }

    if info.is_hdr {
        if hw_decode && downscale {
            chain.push("hwdownload".to_string());
            chain.push("format=nv12".to_string());
        }
        chain.extend(TONEMAP_CHAIN.iter().map(|s| s.to_string()));
    }

    chain
}

/// Build the invocation for one transcode attempt.
pub fn build_plan(
    input: &Path,
    output: &Path,
    info: &MediaInfo,
    settings: &EncodeSettings,
    hw_decode: bool,
) -> TranscodePlan {
    let downscale = info.is_4k() && settings.scale_4k_to_1080p;
    let mut args: Vec<String> = vec!["-hide_banner".into(), "-y".into()];

    if hw_decode {
        args.push("-hwaccel".into());
        args.push("cuda".into());
        args.push("-hwaccel_output_format".into());
        args.push("cuda".into());
    }

    args.push("-i".into());
    args.push(input.to_string_lossy().into_owned());

    // Map every stream from the input.
    args.push("-map".into());
    args.push("0".into());

    args.push("-c:v".into());
    args.push("hevc_nvenc".into());
    args.push("-preset".into());
    args.push(settings.nvenc_preset.clone());

    let filters = video_filters(info, settings, hw_decode);
    if !filters.is_empty() {
        args.push("-vf".into());
        args.push(filters.join(","));
    }

    let target = target_bitrate(info, settings, downscale);
    match target {
        Some(bps) => {
            args.push("-b:v".into());
            args.push(bps.to_string());
        }
        None => {
            args.push("-cq".into());
            args.push(settings.crf_fallback.to_string());
            args.push("-maxrate".into());
            args.push(mbps_to_bps(settings.max_bitrate_fallback).to_string());
            args.push("-bufsize".into());
            args.push(mbps_to_bps(settings.buf_size_fallback).to_string());
        }
    }

    args.push("-c:a".into());
    args.push("copy".into());
    args.push("-c:s".into());
    args.push("copy".into());

    args.push("-f".into());
    args.push("matroska".into());
    args.push(output.to_string_lossy().into_owned());

    TranscodePlan {
        args,
        hw_decode,
        target_bitrate: target,
    }
}
