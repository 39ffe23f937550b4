//! Driving the external transcoder process.
//!
//! Spawns ffmpeg with a planned argument vector, parses `time=` progress off
//! its diagnostic stream, and keeps the last portion of that stream for
//! error reporting. Cancellation is delivered as SIGTERM by the worker; this
//! module only records the pid.

use super::plan::TranscodePlan;
use std::collections::VecDeque;
use std::path::Path;
use std::process::Stdio;
use std::sync::Mutex;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::time::Instant;
use tracing::debug;

/// Lines of diagnostic output retained for the encoding log.
const STDERR_TAIL_LINES: usize = 30;

/// Progress callbacks are throttled to roughly this interval.
const PROGRESS_INTERVAL: Duration = Duration::from_millis(500);

/// Result of one transcoder run.
#[derive(Debug, Clone)]
pub struct FfmpegRun {
    pub success: bool,
    pub exit_code: Option<i32>,
    /// Last lines of the diagnostic stream.
    pub stderr_tail: String,
}

/// Run one planned attempt to completion.
///
/// `pid_cell` carries the child's pid while it runs so the worker can signal
/// it; it is cleared before returning. `on_progress` receives percentages in
/// [0, 100].
pub async fn run_transcode<F>(
    ffmpeg: &Path,
    plan: &TranscodePlan,
    duration_secs: Option<f64>,
    pid_cell: &Mutex<Option<u32>>,
    mut on_progress: F,
) -> std::io::Result<FfmpegRun>
where
    F: FnMut(f64),
{
    let mut child = Command::new(ffmpeg)
        .args(&plan.args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()?;

    *pid_cell.lock().unwrap() = child.id();

    let mut tail: VecDeque<String> = VecDeque::with_capacity(STDERR_TAIL_LINES);
    if let Some(stderr) = child.stderr.take() {
        let mut lines = BufReader::new(stderr).lines();
        let mut last_update = Instant::now() - PROGRESS_INTERVAL;

        while let Ok(Some(line)) = lines.next_line().await {
            if tail.len() == STDERR_TAIL_LINES {
                tail.pop_front();
            }
            tail.push_back(line.clone());

            if let Some(current) = extract_time_secs(&line) {
                if last_update.elapsed() >= PROGRESS_INTERVAL {
                    on_progress(compute_progress(current, duration_secs));
                    last_update = Instant::now();
                }
            }
        }
    }

    let status = child.wait().await?;
    *pid_cell.lock().unwrap() = None;

    debug!(status = %status, "Transcoder exited");
    Ok(FfmpegRun {
        success: status.success(),
        exit_code: status.code(),
        stderr_tail: tail.into_iter().collect::<Vec<_>>().join("\n"),
    })
}

/// Pull the `time=HH:MM:SS.xx` value out of a progress line.
pub fn extract_time_secs(line: &str) -> Option<f64> {
    let start = line.find("time=")? + "time=".len();
    let rest = &line[start..];
    let token = rest.split_whitespace().next()?;
    parse_time_to_seconds(token)
}

/// Parse `HH:MM:SS.xx` into seconds.
pub fn parse_time_to_seconds(time_str: &str) -> Option<f64> {
    let parts: Vec<&str> = time_str.split(':').collect();
    if parts.len() != 3 {
        return None;
    }
    let hours = parts[0].parse::<f64>().ok()?;
    let minutes = parts[1].parse::<f64>().ok()?;
    let seconds = parts[2].parse::<f64>().ok()?;
    Some(hours * 3600.0 + minutes * 60.0 + seconds)
}

/// `min(100, current / duration × 100)`; zero when the duration is unknown.
pub fn compute_progress(current_secs: f64, duration_secs: Option<f64>) -> f64 {
    match duration_secs {
        Some(total) if total > 0.0 => (current_secs / total * 100.0).min(100.0),
        _ => 0.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const PROGRESS_LINE: &str =
        "frame= 1234 fps= 30.0 q=28.0 size=   12345kB time=00:20:41.36 bitrate= 244.8kbits/s speed=1.23x";

    #[test]
    fn test_parse_time_to_seconds() {
        assert_eq!(parse_time_to_seconds("00:00:41.36"), Some(41.36));
        assert_eq!(parse_time_to_seconds("01:02:03.00"), Some(3723.0));
        assert_eq!(parse_time_to_seconds("10:00:00.50"), Some(36000.5));
        assert_eq!(parse_time_to_seconds("41.36"), None);
        assert_eq!(parse_time_to_seconds("xx:yy:zz"), None);
    }

    #[test]
    fn test_extract_time_from_progress_line() {
        let secs = extract_time_secs(PROGRESS_LINE).unwrap();
        assert!((secs - 1241.36).abs() < 0.001);
    }

    #[test]
    fn test_extract_time_ignores_other_lines() {
        assert_eq!(extract_time_secs("Stream #0:0: Video: h264"), None);
        assert_eq!(extract_time_secs(""), None);
        // N/A time (before the first frame) does not parse.
        assert_eq!(extract_time_secs("size= 0kB time=N/A bitrate=N/A"), None);
    }

    #[test]
    fn test_compute_progress_clamps_at_100() {
        assert_eq!(compute_progress(50.0, Some(100.0)), 50.0);
        assert_eq!(compute_progress(150.0, Some(100.0)), 100.0);
        assert_eq!(compute_progress(10.0, None), 0.0);
        assert_eq!(compute_progress(10.0, Some(0.0)), 0.0);
    }

    proptest! {
        #[test]
        fn prop_progress_is_bounded(
            current in 0.0f64..1_000_000.0,
            duration in proptest::option::of(0.1f64..1_000_000.0),
        ) {
            let p = compute_progress(current, duration);
            prop_assert!((0.0..=100.0).contains(&p));
        }

        #[test]
        fn prop_time_round_trip(
            hours in 0u32..100,
            minutes in 0u32..60,
            seconds in 0u32..60,
        ) {
            let formatted = format!("{:02}:{:02}:{:02}.00", hours, minutes, seconds);
            let expected = f64::from(hours) * 3600.0 + f64::from(minutes) * 60.0 + f64::from(seconds);
            prop_assert_eq!(parse_time_to_seconds(&formatted), Some(expected));
        }
    }
}
