//! The classifier: from a discovered path to an initial file status.
//!
//! Scanner and watcher both funnel into [`classify_file`]. The decision order
//! is fixed: existence, already-known, size floor, exclusion rules, probe,
//! already-HEVC, queue. Re-running on an unchanged path is a no-op.

use crate::error::Result;
use crate::exclusions;
use crate::probe::{MediaInfo, MediaProber};
use crate::store::{FileRecord, FileStatus, NewFile, StatsDelta, Store};
use std::path::Path;
use tracing::{debug, warn};

const MIB: u64 = 1024 * 1024;

/// Outcome of classifying one path.
#[derive(Debug, Clone, PartialEq)]
pub enum Classification {
    Queued,
    Skipped(String),
    Excluded(String),
    Errored(String),
    /// A row already exists for this path; nothing was changed.
    AlreadyKnown,
    /// Not a readable regular file; nothing was recorded.
    NotAFile,
}

fn size_floor_reason(min_file_size_mb: u64) -> String {
    format!("File under {}MB minimum", min_file_size_mb)
}

fn base_record(path: &Path, library_id: i64, size: u64) -> NewFile {
    NewFile {
        library_id,
        file_path: path.to_string_lossy().into_owned(),
        file_name: path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default(),
        original_size: Some(size as i64),
        ..Default::default()
    }
}

fn with_metadata(mut record: NewFile, info: &MediaInfo) -> NewFile {
    record.original_codec = info.codec.clone();
    record.original_bitrate = info.bitrate;
    record.original_width = info.width;
    record.original_height = info.height;
    record.is_hdr = info.is_hdr;
    record
}

/// Classify a freshly discovered path and persist the result.
pub async fn classify_file(
    store: &Store,
    prober: &dyn MediaProber,
    path: &Path,
    library_id: i64,
) -> Result<Classification> {
    // 1. Must be a readable regular file.
    let metadata = match tokio::fs::metadata(path).await {
        Ok(m) if m.is_file() => m,
        _ => return Ok(Classification::NotAFile),
    };
    let size = metadata.len();

    // 2. Already known: re-discovery of an existing path is a no-op.
    let path_str = path.to_string_lossy();
    if store.get_file_by_path(&path_str).await?.is_some() {
        return Ok(Classification::AlreadyKnown);
    }

    let settings = store.load_settings().await?;

    // 3. Size floor.
    if size < settings.min_file_size_mb * MIB {
        let reason = size_floor_reason(settings.min_file_size_mb);
        let mut record = base_record(path, library_id, size);
        record.status = Some(FileStatus::Skipped);
        record.skip_reason = Some(reason.clone());
        store.upsert_file(&record).await?;
        store.record_stats(StatsDelta::skipped()).await?;
        debug!(path = %path_str, %reason, "Skipped at discovery");
        return Ok(Classification::Skipped(reason));
    }

    // 4. Exclusion rules.
    let rules = store.list_exclusions().await?;
    if let Some(matched) = exclusions::evaluate(&path_str, library_id, &rules) {
        let mut record = base_record(path, library_id, size);
        record.status = Some(FileStatus::Excluded);
        record.skip_reason = Some(matched.reason.clone());
        store.upsert_file(&record).await?;
        debug!(path = %path_str, rule_id = matched.rule_id, "Excluded at discovery");
        return Ok(Classification::Excluded(matched.reason));
    }

    // 5. Probe.
    let info = match prober.probe(path).await {
        Ok(info) => info,
        Err(e) => {
            let message = e.to_string();
            let mut record = base_record(path, library_id, size);
            record.status = Some(FileStatus::Errored);
            record.error_message = Some(message.clone());
            store.upsert_file(&record).await?;
            store.record_stats(StatsDelta::errored()).await?;
            warn!(path = %path_str, error = %message, "Probe failed during classification");
            return Ok(Classification::Errored(message));
        }
    };

    // 6. Already HEVC. Metadata is persisted either way.
    if info.is_hevc() {
        let reason = "Already HEVC".to_string();
        let mut record = with_metadata(base_record(path, library_id, size), &info);
        record.status = Some(FileStatus::Skipped);
        record.skip_reason = Some(reason.clone());
        store.upsert_file(&record).await?;
        store.record_stats(StatsDelta::skipped()).await?;
        return Ok(Classification::Skipped(reason));
    }

    // 7. Queue it.
    let mut record = with_metadata(base_record(path, library_id, size), &info);
    record.status = Some(FileStatus::Queued);
    store.upsert_file(&record).await?;
    debug!(path = %path_str, "Queued for transcoding");
    Ok(Classification::Queued)
}

/// Re-admit a formerly excluded file after its covering rule disappeared.
///
/// The transition target is `queued` unless the size floor or the
/// already-HEVC check still blocks it. Stored metadata is reused; the file is
/// only re-probed when no codec was recorded.
pub async fn reclassify_excluded(
    store: &Store,
    prober: &dyn MediaProber,
    file: &FileRecord,
) -> Result<Classification> {
    let settings = store.load_settings().await?;

    let size = match file.original_size {
        Some(size) => size as u64,
        None => match tokio::fs::metadata(&file.file_path).await {
            Ok(m) => m.len(),
            Err(_) => 0,
        },
    };

    if size < settings.min_file_size_mb * MIB {
        let reason = size_floor_reason(settings.min_file_size_mb);
        store
            .release_excluded(file.id, FileStatus::Skipped, Some(&reason))
            .await?;
        store.record_stats(StatsDelta::skipped()).await?;
        return Ok(Classification::Skipped(reason));
    }

    let codec = match &file.original_codec {
        Some(codec) => Some(codec.clone()),
        None => match prober.probe(Path::new(&file.file_path)).await {
            Ok(info) => info.codec,
            Err(e) => {
                let message = e.to_string();
                let mut record = NewFile {
                    library_id: file.library_id,
                    file_path: file.file_path.clone(),
                    file_name: file.file_name.clone(),
                    original_size: file.original_size,
                    status: Some(FileStatus::Errored),
                    error_message: Some(message.clone()),
                    ..Default::default()
                };
                record.is_hdr = file.is_hdr;
                store.upsert_file(&record).await?;
                store.record_stats(StatsDelta::errored()).await?;
                return Ok(Classification::Errored(message));
            }
        },
    };

    let is_hevc = codec
        .as_deref()
        .map(|c| {
            let c = c.to_lowercase();
            c == "hevc" || c == "h265"
        })
        .unwrap_or(false);

    if is_hevc {
        let reason = "Already HEVC".to_string();
        store
            .release_excluded(file.id, FileStatus::Skipped, Some(&reason))
            .await?;
        store.record_stats(StatsDelta::skipped()).await?;
        return Ok(Classification::Skipped(reason));
    }

    store
        .release_excluded(file.id, FileStatus::Queued, None)
        .await?;
    Ok(Classification::Queued)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exclusions::{ExclusionKind, NewExclusion};
    use crate::probe::testing::{h264_1080p, StubProber};
    use crate::probe::MediaInfo;
    use crate::store::NewLibrary;
    use std::collections::HashMap;
    use std::fs::File;
    use tempfile::TempDir;

    async fn fixture() -> (Store, i64, TempDir) {
        let dir = TempDir::new().unwrap();
        let store = Store::open_in_memory().await.unwrap();
        let lib = store
            .create_library(&NewLibrary {
                name: "Movies".to_string(),
                path: dir.path().to_string_lossy().into_owned(),
                enabled: true,
                watch_enabled: false,
            })
            .await
            .unwrap();
        (store, lib.id, dir)
    }

    fn create_file(dir: &TempDir, name: &str, size: u64) -> std::path::PathBuf {
        let path = dir.path().join(name);
        let file = File::create(&path).unwrap();
        file.set_len(size).unwrap();
        path
    }

    async fn set_min_size(store: &Store, mb: u64) {
        let mut changes = HashMap::new();
        changes.insert("min_file_size_mb".to_string(), mb.to_string());
        store.update_settings(&changes).await.unwrap();
    }

    #[tokio::test]
    async fn test_below_size_floor_is_skipped_without_probe() {
        let (store, lib, dir) = fixture().await;
        let prober = StubProber::new();
        let path = create_file(&dir, "a.mkv", 104_857_600);

        let result = classify_file(&store, &prober, &path, lib).await.unwrap();
        assert_eq!(
            result,
            Classification::Skipped("File under 500MB minimum".to_string())
        );

        let row = store
            .get_file_by_path(&path.to_string_lossy())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(row.status, FileStatus::Skipped);
        assert_eq!(row.skip_reason.as_deref(), Some("File under 500MB minimum"));
        assert_eq!(row.original_size, Some(104_857_600));
        assert_eq!(prober.call_count(), 0, "probe must not run for small files");

        let totals = store.stats_totals().await.unwrap();
        assert_eq!(totals.files_skipped, 1);
        assert_eq!(totals.total_files_processed, 1);
    }

    #[tokio::test]
    async fn test_already_hevc_is_skipped_with_metadata() {
        let (store, lib, dir) = fixture().await;
        let prober = StubProber::new();
        let path = create_file(&dir, "b.mkv", 2 * 1024 * 1024 * 1024);
        prober.set(
            &path,
            MediaInfo {
                codec: Some("hevc".to_string()),
                ..h264_1080p(Some(8_000_000))
            },
        );

        let result = classify_file(&store, &prober, &path, lib).await.unwrap();
        assert_eq!(result, Classification::Skipped("Already HEVC".to_string()));

        let row = store
            .get_file_by_path(&path.to_string_lossy())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(row.status, FileStatus::Skipped);
        assert_eq!(row.skip_reason.as_deref(), Some("Already HEVC"));
        assert_eq!(row.original_codec.as_deref(), Some("hevc"));
        assert_eq!(row.original_width, Some(1920));
        assert_eq!(row.original_height, Some(1080));
        assert!(!row.is_hdr);
    }

    #[tokio::test]
    async fn test_h264_is_queued_with_metadata() {
        let (store, lib, dir) = fixture().await;
        let prober = StubProber::new();
        let path = create_file(&dir, "c.mkv", 5_368_709_120);
        prober.set(&path, h264_1080p(Some(10_000_000)));

        let result = classify_file(&store, &prober, &path, lib).await.unwrap();
        assert_eq!(result, Classification::Queued);

        let row = store
            .get_file_by_path(&path.to_string_lossy())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(row.status, FileStatus::Queued);
        assert_eq!(row.original_bitrate, Some(10_000_000));
        assert_eq!(row.original_size, Some(5_368_709_120));
    }

    #[tokio::test]
    async fn test_exclusion_wins_over_probe() {
        let (store, lib, dir) = fixture().await;
        let prober = StubProber::new();
        let path = create_file(&dir, "d.mkv", 1_073_741_824);

        exclusions::create_rule(
            &store,
            NewExclusion {
                library_id: None,
                pattern: dir.path().to_string_lossy().into_owned(),
                kind: ExclusionKind::Folder,
                reason: Some("test folder".to_string()),
            },
        )
        .await
        .unwrap();

        let result = classify_file(&store, &prober, &path, lib).await.unwrap();
        assert_eq!(result, Classification::Excluded("test folder".to_string()));
        assert_eq!(prober.call_count(), 0);

        let row = store
            .get_file_by_path(&path.to_string_lossy())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(row.status, FileStatus::Excluded);
    }

    #[tokio::test]
    async fn test_probe_failure_records_errored() {
        let (store, lib, dir) = fixture().await;
        let prober = StubProber::new();
        let path = create_file(&dir, "e.mkv", 1_073_741_824);
        prober.fail(&path, "moov atom not found");

        let result = classify_file(&store, &prober, &path, lib).await.unwrap();
        assert!(matches!(result, Classification::Errored(_)));

        let row = store
            .get_file_by_path(&path.to_string_lossy())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(row.status, FileStatus::Errored);
        assert!(row.error_message.unwrap().contains("moov atom"));

        let totals = store.stats_totals().await.unwrap();
        assert_eq!(totals.files_errored, 1);
    }

    #[tokio::test]
    async fn test_missing_path_is_not_recorded() {
        let (store, lib, dir) = fixture().await;
        let prober = StubProber::new();
        let path = dir.path().join("ghost.mkv");

        let result = classify_file(&store, &prober, &path, lib).await.unwrap();
        assert_eq!(result, Classification::NotAFile);
        assert!(store
            .get_file_by_path(&path.to_string_lossy())
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_classification_is_idempotent() {
        let (store, lib, dir) = fixture().await;
        let prober = StubProber::new();
        let path = create_file(&dir, "f.mkv", 5_368_709_120);
        prober.set(&path, h264_1080p(Some(10_000_000)));

        let first = classify_file(&store, &prober, &path, lib).await.unwrap();
        assert_eq!(first, Classification::Queued);
        let row_before = store
            .get_file_by_path(&path.to_string_lossy())
            .await
            .unwrap()
            .unwrap();

        let second = classify_file(&store, &prober, &path, lib).await.unwrap();
        assert_eq!(second, Classification::AlreadyKnown);

        let row_after = store
            .get_file_by_path(&path.to_string_lossy())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(row_before, row_after, "second run produces no row changes");
        assert_eq!(prober.call_count(), 1, "no second probe");
    }

    #[tokio::test]
    async fn test_size_floor_respects_settings() {
        let (store, lib, dir) = fixture().await;
        set_min_size(&store, 100).await;
        let prober = StubProber::new();

        let path = create_file(&dir, "g.mkv", 150 * 1024 * 1024);
        prober.set(&path, h264_1080p(None));

        let result = classify_file(&store, &prober, &path, lib).await.unwrap();
        assert_eq!(result, Classification::Queued, "150MB passes a 100MB floor");
    }

    #[tokio::test]
    async fn test_reclassify_released_file_requeues_or_skips() {
        let (store, lib, dir) = fixture().await;
        let prober = StubProber::new();

        // Queue two files, then exclude the whole directory.
        let h264 = create_file(&dir, "h264.mkv", 5_368_709_120);
        let hevc = create_file(&dir, "hevc.mkv", 5_368_709_120);
        prober.set(&h264, h264_1080p(Some(10_000_000)));
        prober.set(
            &hevc,
            MediaInfo {
                codec: Some("hevc".to_string()),
                ..h264_1080p(None)
            },
        );

        classify_file(&store, &prober, &h264, lib).await.unwrap();
        let rule = exclusions::create_rule(
            &store,
            NewExclusion {
                library_id: None,
                pattern: dir.path().to_string_lossy().into_owned(),
                kind: ExclusionKind::Folder,
                reason: None,
            },
        )
        .await
        .unwrap();
        classify_file(&store, &prober, &hevc, lib).await.unwrap();

        let h264_row = store
            .get_file_by_path(&h264.to_string_lossy())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(h264_row.status, FileStatus::Excluded);

        // Deleting the rule re-admits the h264 file but the hevc one lands
        // in skipped: excluded rows carry no codec metadata, so it is probed
        // on release.
        exclusions::delete_rule(&store, &prober, rule.id).await.unwrap();

        let h264_row = store.get_file(h264_row.id).await.unwrap();
        assert_eq!(h264_row.status, FileStatus::Queued);

        let hevc_row = store
            .get_file_by_path(&hevc.to_string_lossy())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(hevc_row.status, FileStatus::Skipped);
        assert_eq!(hevc_row.skip_reason.as_deref(), Some("Already HEVC"));
    }
}
