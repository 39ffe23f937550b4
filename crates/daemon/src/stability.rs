//! Write-finish detection for freshly added files.
//!
//! A file is considered quiescent once its size is unchanged across a wait
//! window. The watcher uses this as its debounce so a file still being copied
//! in is never handed to the classifier.

use std::path::Path;
use std::time::Duration;
use tokio::time::sleep;

/// Result of one stability check on a file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StabilityResult {
    /// File size remained unchanged during the window.
    Stable,
    /// File size changed during the window.
    Unstable {
        initial_size: u64,
        current_size: u64,
    },
}

/// Compare two sizes. Pure, extracted for testing.
#[inline]
pub fn compare_sizes(initial_size: u64, current_size: u64) -> StabilityResult {
    if initial_size == current_size {
        StabilityResult::Stable
    } else {
        StabilityResult::Unstable {
            initial_size,
            current_size,
        }
    }
}

/// Single-window check: stat, wait, stat again.
pub async fn check_stability(
    path: &Path,
    initial_size: u64,
    window: Duration,
) -> Result<StabilityResult, std::io::Error> {
    sleep(window).await;
    let metadata = tokio::fs::metadata(path).await?;
    Ok(compare_sizes(initial_size, metadata.len()))
}

/// Wait until the file has been quiescent for one full window, re-arming
/// after every observed growth. Gives up after `max_windows` re-arms so a
/// file that never settles cannot pin the caller forever.
///
/// Returns `Ok(size)` with the settled size, or `Err` when the file vanished
/// or kept changing past the limit.
pub async fn wait_for_quiescence(
    path: &Path,
    window: Duration,
    max_windows: u32,
) -> Result<u64, std::io::Error> {
    let mut size = tokio::fs::metadata(path).await?.len();

    for _ in 0..max_windows {
        match check_stability(path, size, window).await? {
            StabilityResult::Stable => return Ok(size),
            StabilityResult::Unstable { current_size, .. } => size = current_size,
        }
    }

    Err(std::io::Error::new(
        std::io::ErrorKind::TimedOut,
        format!("file kept changing for {} windows: {}", max_windows, path.display()),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::io::Write;
    use tempfile::TempDir;

    proptest! {
        #[test]
        fn prop_stability_size_comparison(initial_size: u64, current_size: u64) {
            let result = compare_sizes(initial_size, current_size);

            if initial_size == current_size {
                prop_assert_eq!(result, StabilityResult::Stable);
            } else {
                match result {
                    StabilityResult::Unstable { initial_size: i, current_size: c } => {
                        prop_assert_eq!(i, initial_size);
                        prop_assert_eq!(c, current_size);
                    }
                    StabilityResult::Stable => {
                        prop_assert!(false, "Expected Unstable when sizes differ");
                    }
                }
            }
        }
    }

    #[test]
    fn test_compare_sizes_stable() {
        assert_eq!(compare_sizes(1000, 1000), StabilityResult::Stable);
    }

    #[test]
    fn test_compare_sizes_unstable() {
        assert_eq!(
            compare_sizes(1000, 2000),
            StabilityResult::Unstable {
                initial_size: 1000,
                current_size: 2000
            }
        );
    }

    #[tokio::test]
    async fn test_quiescence_on_static_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("done.mkv");
        std::fs::write(&path, b"finished content").unwrap();

        let size = wait_for_quiescence(&path, Duration::from_millis(20), 3)
            .await
            .unwrap();
        assert_eq!(size, 16);
    }

    #[tokio::test]
    async fn test_quiescence_waits_out_a_growing_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("copying.mkv");
        std::fs::write(&path, b"start").unwrap();

        let writer_path = path.clone();
        let writer = tokio::spawn(async move {
            for _ in 0..3 {
                sleep(Duration::from_millis(10)).await;
                let mut f = std::fs::OpenOptions::new()
                    .append(true)
                    .open(&writer_path)
                    .unwrap();
                f.write_all(b"more-data").unwrap();
            }
        });

        let size = wait_for_quiescence(&path, Duration::from_millis(50), 20)
            .await
            .unwrap();
        writer.await.unwrap();
        assert_eq!(size, 5 + 3 * 9, "settled at the final size");
    }

    #[tokio::test]
    async fn test_quiescence_missing_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("ghost.mkv");
        let result = wait_for_quiescence(&path, Duration::from_millis(10), 2).await;
        assert!(result.is_err());
    }
}
