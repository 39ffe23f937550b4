//! Runtime settings: encoding parameters and queue ordering.
//!
//! Settings live in the store as key/value rows and are mutated only through
//! [`validate`] so every write path shares the same bounds checking. The typed
//! views ([`EncodeSettings`], [`QueueSettings`]) are what the classifier and
//! the encoder consume.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::str::FromStr;

pub const SCALE_4K_TO_1080P: &str = "scale_4k_to_1080p";
pub const BITRATE_FACTOR: &str = "bitrate_factor";
pub const BITRATE_CAP_1080P: &str = "bitrate_cap_1080p";
pub const BITRATE_CAP_720P: &str = "bitrate_cap_720p";
pub const BITRATE_CAP_OTHER: &str = "bitrate_cap_other";
pub const MIN_FILE_SIZE_MB: &str = "min_file_size_mb";
pub const CRF_FALLBACK: &str = "crf_fallback";
pub const MAX_BITRATE_FALLBACK: &str = "max_bitrate_fallback";
pub const BUF_SIZE_FALLBACK: &str = "buf_size_fallback";
pub const NVENC_PRESET: &str = "nvenc_preset";
pub const SORT_ORDER: &str = "sort_order";
pub const LIBRARY_PRIORITY: &str = "library_priority";

/// Internal key recording the library served last by the round-robin picker.
/// Not part of the public settings surface and never validated against bounds.
pub const LAST_LIBRARY_ID: &str = "queue_last_library_id";

const NVENC_PRESETS: &[&str] = &["p1", "p2", "p3", "p4", "p5", "p6", "p7"];

/// Queue file ordering within a library.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortOrder {
    BitrateDesc,
    BitrateAsc,
    Alphabetical,
    Random,
}

impl SortOrder {
    pub fn as_str(&self) -> &'static str {
        match self {
            SortOrder::BitrateDesc => "bitrate_desc",
            SortOrder::BitrateAsc => "bitrate_asc",
            SortOrder::Alphabetical => "alphabetical",
            SortOrder::Random => "random",
        }
    }
}

impl FromStr for SortOrder {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "bitrate_desc" => Ok(SortOrder::BitrateDesc),
            "bitrate_asc" => Ok(SortOrder::BitrateAsc),
            "alphabetical" => Ok(SortOrder::Alphabetical),
            "random" => Ok(SortOrder::Random),
            other => Err(Error::validation(
                SORT_ORDER,
                format!(
                    "unknown sort order '{}' (expected bitrate_desc, bitrate_asc, alphabetical or random)",
                    other
                ),
            )),
        }
    }
}

/// Ordering of libraries relative to each other when picking work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LibraryPriority {
    AlphabeticalAsc,
    AlphabeticalDesc,
    RoundRobin,
}

impl LibraryPriority {
    pub fn as_str(&self) -> &'static str {
        match self {
            LibraryPriority::AlphabeticalAsc => "alphabetical_asc",
            LibraryPriority::AlphabeticalDesc => "alphabetical_desc",
            LibraryPriority::RoundRobin => "round_robin",
        }
    }
}

impl FromStr for LibraryPriority {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "alphabetical_asc" => Ok(LibraryPriority::AlphabeticalAsc),
            "alphabetical_desc" => Ok(LibraryPriority::AlphabeticalDesc),
            "round_robin" => Ok(LibraryPriority::RoundRobin),
            other => Err(Error::validation(
                LIBRARY_PRIORITY,
                format!(
                    "unknown library priority '{}' (expected alphabetical_asc, alphabetical_desc or round_robin)",
                    other
                ),
            )),
        }
    }
}

/// Parameters the transcode planner consumes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EncodeSettings {
    pub scale_4k_to_1080p: bool,
    /// Target fraction of the source bitrate, (0, 1].
    pub bitrate_factor: f64,
    /// Mbps caps per resolution class, (0, 100].
    pub bitrate_cap_1080p: f64,
    pub bitrate_cap_720p: f64,
    pub bitrate_cap_other: f64,
    /// Quality factor used when the source bitrate is unknown, [0, 51].
    pub crf_fallback: u32,
    /// Mbps, (0, 100].
    pub max_bitrate_fallback: f64,
    /// Mbps, (0, 200].
    pub buf_size_fallback: f64,
    /// One of p1..p7.
    pub nvenc_preset: String,
}

impl Default for EncodeSettings {
    fn default() -> Self {
        Self {
            scale_4k_to_1080p: true,
            bitrate_factor: 0.5,
            bitrate_cap_1080p: 6.0,
            bitrate_cap_720p: 3.0,
            bitrate_cap_other: 3.0,
            crf_fallback: 23,
            max_bitrate_fallback: 6.0,
            buf_size_fallback: 12.0,
            nvenc_preset: "p5".to_string(),
        }
    }
}

/// Queue ordering controls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueSettings {
    pub sort_order: SortOrder,
    pub library_priority: LibraryPriority,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            sort_order: SortOrder::BitrateDesc,
            library_priority: LibraryPriority::AlphabeticalAsc,
        }
    }
}

/// The full settings view assembled from stored rows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    /// Discovery size floor in megabytes, [0, 100000].
    pub min_file_size_mb: u64,
    #[serde(flatten)]
    pub encode: EncodeSettings,
    pub sort_order: SortOrder,
    pub library_priority: LibraryPriority,
}

impl Default for Settings {
    fn default() -> Self {
        let queue = QueueSettings::default();
        Self {
            min_file_size_mb: 500,
            encode: EncodeSettings::default(),
            sort_order: queue.sort_order,
            library_priority: queue.library_priority,
        }
    }
}

impl Settings {
    pub fn queue(&self) -> QueueSettings {
        QueueSettings {
            sort_order: self.sort_order,
            library_priority: self.library_priority,
        }
    }

    /// Build the typed view from stored key/value rows. Unknown keys are
    /// ignored, missing keys fall back to defaults, unparseable stored values
    /// fall back to defaults as well (they can only have been written by an
    /// older version).
    pub fn from_rows(rows: &HashMap<String, String>) -> Self {
        let mut s = Settings::default();

        if let Some(v) = rows.get(MIN_FILE_SIZE_MB).and_then(|v| v.parse().ok()) {
            s.min_file_size_mb = v;
        }
        if let Some(v) = rows.get(SCALE_4K_TO_1080P).and_then(|v| parse_bool(v)) {
            s.encode.scale_4k_to_1080p = v;
        }
        if let Some(v) = rows.get(BITRATE_FACTOR).and_then(|v| v.parse().ok()) {
            s.encode.bitrate_factor = v;
        }
        if let Some(v) = rows.get(BITRATE_CAP_1080P).and_then(|v| v.parse().ok()) {
            s.encode.bitrate_cap_1080p = v;
        }
        if let Some(v) = rows.get(BITRATE_CAP_720P).and_then(|v| v.parse().ok()) {
            s.encode.bitrate_cap_720p = v;
        }
        if let Some(v) = rows.get(BITRATE_CAP_OTHER).and_then(|v| v.parse().ok()) {
            s.encode.bitrate_cap_other = v;
        }
        if let Some(v) = rows.get(CRF_FALLBACK).and_then(|v| v.parse().ok()) {
            s.encode.crf_fallback = v;
        }
        if let Some(v) = rows.get(MAX_BITRATE_FALLBACK).and_then(|v| v.parse().ok()) {
            s.encode.max_bitrate_fallback = v;
        }
        if let Some(v) = rows.get(BUF_SIZE_FALLBACK).and_then(|v| v.parse().ok()) {
            s.encode.buf_size_fallback = v;
        }
        if let Some(v) = rows.get(NVENC_PRESET) {
            if NVENC_PRESETS.contains(&v.as_str()) {
                s.encode.nvenc_preset = v.clone();
            }
        }
        if let Some(v) = rows.get(SORT_ORDER).and_then(|v| v.parse().ok()) {
            s.sort_order = v;
        }
        if let Some(v) = rows.get(LIBRARY_PRIORITY).and_then(|v| v.parse().ok()) {
            s.library_priority = v;
        }

        s
    }

    /// Serialize the typed view back into key/value rows.
    pub fn to_rows(&self) -> Vec<(String, String)> {
        vec![
            (MIN_FILE_SIZE_MB.into(), self.min_file_size_mb.to_string()),
            (
                SCALE_4K_TO_1080P.into(),
                self.encode.scale_4k_to_1080p.to_string(),
            ),
            (BITRATE_FACTOR.into(), self.encode.bitrate_factor.to_string()),
            (
                BITRATE_CAP_1080P.into(),
                self.encode.bitrate_cap_1080p.to_string(),
            ),
            (
                BITRATE_CAP_720P.into(),
                self.encode.bitrate_cap_720p.to_string(),
            ),
            (
                BITRATE_CAP_OTHER.into(),
                self.encode.bitrate_cap_other.to_string(),
            ),
            (CRF_FALLBACK.into(), self.encode.crf_fallback.to_string()),
            (
                MAX_BITRATE_FALLBACK.into(),
                self.encode.max_bitrate_fallback.to_string(),
            ),
            (
                BUF_SIZE_FALLBACK.into(),
                self.encode.buf_size_fallback.to_string(),
            ),
            (NVENC_PRESET.into(), self.encode.nvenc_preset.clone()),
            (SORT_ORDER.into(), self.sort_order.as_str().to_string()),
            (
                LIBRARY_PRIORITY.into(),
                self.library_priority.as_str().to_string(),
            ),
        ]
    }
}

fn parse_bool(v: &str) -> Option<bool> {
    match v {
        "true" | "1" => Some(true),
        "false" | "0" => Some(false),
        _ => None,
    }
}

/// Validate a single key/value pair against the documented bounds.
///
/// Every settings write goes through here; a violation names the field and
/// the bound.
pub fn validate(key: &str, value: &str) -> Result<()> {
    match key {
        SCALE_4K_TO_1080P => {
            parse_bool(value)
                .ok_or_else(|| Error::validation(key, "must be a boolean"))
                .map(|_| ())
        }
        BITRATE_FACTOR => {
            let v: f64 = parse_number(key, value)?;
            bound(key, v > 0.0 && v <= 1.0, "must be in (0, 1]")
        }
        BITRATE_CAP_1080P | BITRATE_CAP_720P | BITRATE_CAP_OTHER | MAX_BITRATE_FALLBACK => {
            let v: f64 = parse_number(key, value)?;
            bound(key, v > 0.0 && v <= 100.0, "must be in (0, 100] Mbps")
        }
        BUF_SIZE_FALLBACK => {
            let v: f64 = parse_number(key, value)?;
            bound(key, v > 0.0 && v <= 200.0, "must be in (0, 200] Mbps")
        }
        MIN_FILE_SIZE_MB => {
            let v: u64 = parse_number(key, value)?;
            bound(key, v <= 100_000, "must be in [0, 100000] MB")
        }
        CRF_FALLBACK => {
            let v: u32 = parse_number(key, value)?;
            bound(key, v <= 51, "must be in [0, 51]")
        }
        NVENC_PRESET => bound(
            key,
            NVENC_PRESETS.contains(&value),
            "must be one of p1..p7",
        ),
        SORT_ORDER => value.parse::<SortOrder>().map(|_| ()),
        LIBRARY_PRIORITY => value.parse::<LibraryPriority>().map(|_| ()),
        other => Err(Error::validation(other, "unknown setting")),
    }
}

fn parse_number<T: FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .parse::<T>()
        .map_err(|_| Error::validation(key, format!("'{}' is not a valid number", value)))
}

fn bound(key: &str, ok: bool, message: &str) -> Result<()> {
    if ok {
        Ok(())
    } else {
        Err(Error::validation(key, message))
    }
}
