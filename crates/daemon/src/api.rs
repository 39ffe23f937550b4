//! JSON control surface.
//!
//! Thin axum layer over the documented operations: library and exclusion
//! CRUD, file actions, queue control, settings, stats snapshots, scan
//! control, test encode, and an SSE stream of bus events.

use crate::encoder::{test_encode, CurrentEncode, EncoderWorker, TestEncodeResult};
use crate::error::Error;
use crate::events::EventBus;
use crate::exclusions::{self, Exclusion, ExclusionKind, NewExclusion};
use crate::probe::MediaProber;
use crate::scan::Scanner;
use crate::settings::Settings;
use crate::store::{
    DailyStats, EncodingLogEntry, FileRecord, FileStatus, HourlyStats, Library, NewLibrary,
    StatsTotals, StatusCounts, Store, UpdateLibrary,
};
use crate::watch::WatcherRegistry;
use axum::extract::{Path as AxumPath, Query, State};
use axum::response::sse::{Event as SseEvent, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use futures::stream::Stream;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_stream::wrappers::BroadcastStream;
use tracing::info;

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub store: Store,
    pub bus: EventBus,
    pub prober: Arc<dyn MediaProber>,
    pub worker: EncoderWorker,
    pub scanner: Scanner,
    pub watchers: Arc<WatcherRegistry>,
    pub ffmpeg: PathBuf,
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = match &self {
            Error::Validation { .. } => axum::http::StatusCode::BAD_REQUEST,
            Error::NotFound(_) => axum::http::StatusCode::NOT_FOUND,
            Error::Conflict(_) | Error::Cancelled => axum::http::StatusCode::CONFLICT,
            _ => axum::http::StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

type ApiResult<T> = std::result::Result<Json<T>, Error>;

/// Build the router over the given state.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/api/libraries", get(list_libraries).post(create_library))
        .route(
            "/api/libraries/:id",
            put(update_library).delete(delete_library),
        )
        .route("/api/libraries/:id/scan", post(scan_one_library))
        .route("/api/exclusions", get(list_exclusions).post(create_exclusion))
        .route(
            "/api/exclusions/:id",
            put(update_exclusion).delete(delete_exclusion),
        )
        .route("/api/exclusions/check", post(check_exclusion))
        .route("/api/files", get(list_files))
        .route("/api/files/:id", get(get_file))
        .route("/api/files/:id/retry", post(retry_file))
        .route("/api/files/:id/skip", post(skip_file))
        .route("/api/files/:id/exclude", post(exclude_file))
        .route("/api/queue", get(queue_state))
        .route("/api/queue/pause", post(pause_queue))
        .route("/api/queue/resume", post(resume_queue))
        .route("/api/queue/cancel", post(cancel_current))
        .route("/api/settings", get(get_settings).put(update_settings))
        .route("/api/stats", get(get_stats))
        .route("/api/scan/start", post(start_scan))
        .route("/api/scan/stop", post(stop_scan))
        .route("/api/scan/status", get(scan_status))
        .route("/api/test-encode", post(run_test_encode))
        .route("/api/events", get(event_stream))
        .with_state(state)
}

/// Serve the router on the given port until the process ends.
pub async fn serve(state: AppState, port: u16) -> std::io::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "API listening");
    axum::serve(listener, create_router(state)).await
}

// ---- libraries ----

async fn list_libraries(State(state): State<AppState>) -> ApiResult<Vec<Library>> {
    Ok(Json(state.store.list_libraries().await?))
}

async fn create_library(
    State(state): State<AppState>,
    Json(new): Json<NewLibrary>,
) -> ApiResult<Library> {
    let library = state.store.create_library(&new).await?;
    state.watchers.start(&library).await?;
    Ok(Json(library))
}

async fn update_library(
    State(state): State<AppState>,
    AxumPath(id): AxumPath<i64>,
    Json(update): Json<UpdateLibrary>,
) -> ApiResult<Library> {
    let before = state.store.get_library(id).await?;
    let library = state.store.update_library(id, &update).await?;

    // Disabling drops queued work and the watcher; toggling watch restarts
    // the subscription against the current path.
    if before.enabled && !library.enabled {
        let dropped = state.store.delete_queued_for_library(id).await?;
        info!(library = %library.name, dropped, "Library disabled, queued files dropped");
        state.watchers.stop(id).await;
    } else if library.enabled && library.watch_enabled {
        state.watchers.restart(&library).await?;
    } else {
        state.watchers.stop(id).await;
    }

    Ok(Json(library))
}

async fn delete_library(
    State(state): State<AppState>,
    AxumPath(id): AxumPath<i64>,
) -> ApiResult<serde_json::Value> {
    state.watchers.stop(id).await;
    state.store.delete_library(id).await?;
    Ok(Json(json!({ "deleted": id })))
}

// ---- exclusions ----

async fn list_exclusions(State(state): State<AppState>) -> ApiResult<Vec<Exclusion>> {
    Ok(Json(state.store.list_exclusions().await?))
}

async fn create_exclusion(
    State(state): State<AppState>,
    Json(new): Json<NewExclusion>,
) -> ApiResult<Exclusion> {
    Ok(Json(exclusions::create_rule(&state.store, new).await?))
}

async fn update_exclusion(
    State(state): State<AppState>,
    AxumPath(id): AxumPath<i64>,
    Json(new): Json<NewExclusion>,
) -> ApiResult<Exclusion> {
    Ok(Json(
        exclusions::update_rule(&state.store, state.prober.as_ref(), id, new).await?,
    ))
}

async fn delete_exclusion(
    State(state): State<AppState>,
    AxumPath(id): AxumPath<i64>,
) -> ApiResult<serde_json::Value> {
    exclusions::delete_rule(&state.store, state.prober.as_ref(), id).await?;
    Ok(Json(json!({ "deleted": id })))
}

#[derive(Debug, Deserialize)]
struct CheckExclusionRequest {
    path: String,
    library_id: Option<i64>,
}

#[derive(Debug, Serialize)]
struct CheckExclusionResponse {
    excluded: bool,
    reason: Option<String>,
    matched_rule_id: Option<i64>,
}

async fn check_exclusion(
    State(state): State<AppState>,
    Json(request): Json<CheckExclusionRequest>,
) -> ApiResult<CheckExclusionResponse> {
    let rules = state.store.list_exclusions().await?;
    // Without a library scope only global rules can apply.
    let library_id = request.library_id.unwrap_or(-1);
    let matched = exclusions::evaluate(&request.path, library_id, &rules);
    Ok(Json(match matched {
        Some(m) => CheckExclusionResponse {
            excluded: true,
            reason: Some(m.reason),
            matched_rule_id: Some(m.rule_id),
        },
        None => CheckExclusionResponse {
            excluded: false,
            reason: None,
            matched_rule_id: None,
        },
    }))
}

// ---- files ----

#[derive(Debug, Deserialize)]
struct FileListQuery {
    status: Option<FileStatus>,
    library_id: Option<i64>,
    limit: Option<i64>,
    offset: Option<i64>,
}

async fn list_files(
    State(state): State<AppState>,
    Query(query): Query<FileListQuery>,
) -> ApiResult<Vec<FileRecord>> {
    let rows = state
        .store
        .list_files(
            query.status,
            query.library_id,
            query.limit.unwrap_or(100).clamp(1, 1000),
            query.offset.unwrap_or(0).max(0),
        )
        .await?;
    Ok(Json(rows))
}

#[derive(Debug, Serialize)]
struct FileDetail {
    #[serde(flatten)]
    file: FileRecord,
    log: Vec<EncodingLogEntry>,
}

async fn get_file(
    State(state): State<AppState>,
    AxumPath(id): AxumPath<i64>,
) -> ApiResult<FileDetail> {
    let file = state.store.get_file(id).await?;
    let log = state.store.encoding_log_for_file(id).await?;
    Ok(Json(FileDetail { file, log }))
}

async fn retry_file(
    State(state): State<AppState>,
    AxumPath(id): AxumPath<i64>,
) -> ApiResult<FileRecord> {
    Ok(Json(state.store.retry_file(id).await?))
}

async fn skip_file(
    State(state): State<AppState>,
    AxumPath(id): AxumPath<i64>,
) -> ApiResult<FileRecord> {
    Ok(Json(state.store.skip_file(id, "Manually skipped").await?))
}

async fn exclude_file(
    State(state): State<AppState>,
    AxumPath(id): AxumPath<i64>,
) -> ApiResult<Exclusion> {
    let file = state.store.get_file(id).await?;
    let rule = exclusions::create_rule(
        &state.store,
        NewExclusion {
            library_id: Some(file.library_id),
            pattern: file.file_path.clone(),
            kind: ExclusionKind::Folder,
            reason: Some("Manually excluded".to_string()),
        },
    )
    .await?;
    Ok(Json(rule))
}

// ---- queue ----

#[derive(Debug, Serialize)]
struct QueueState {
    paused: bool,
    current: Option<CurrentEncode>,
    counts: StatusCounts,
    queued: Vec<FileRecord>,
}

async fn queue_state(State(state): State<AppState>) -> ApiResult<QueueState> {
    Ok(Json(QueueState {
        paused: state.worker.is_paused(),
        current: state.worker.current(),
        counts: state.store.count_files_by_status().await?,
        queued: state
            .store
            .list_files(Some(FileStatus::Queued), None, 100, 0)
            .await?,
    }))
}

async fn pause_queue(State(state): State<AppState>) -> ApiResult<serde_json::Value> {
    state.worker.pause();
    Ok(Json(json!({ "paused": true })))
}

async fn resume_queue(State(state): State<AppState>) -> ApiResult<serde_json::Value> {
    state.worker.resume();
    Ok(Json(json!({ "paused": false })))
}

async fn cancel_current(State(state): State<AppState>) -> ApiResult<serde_json::Value> {
    let cancelled = state.worker.cancel_current();
    Ok(Json(json!({ "cancelled": cancelled })))
}

// ---- settings ----

async fn get_settings(State(state): State<AppState>) -> ApiResult<Settings> {
    Ok(Json(state.store.load_settings().await?))
}

async fn update_settings(
    State(state): State<AppState>,
    Json(changes): Json<HashMap<String, String>>,
) -> ApiResult<Settings> {
    Ok(Json(state.store.update_settings(&changes).await?))
}

// ---- stats ----

#[derive(Debug, Serialize)]
struct StatsSnapshot {
    totals: StatsTotals,
    daily: Vec<DailyStats>,
    hourly: Vec<HourlyStats>,
}

async fn get_stats(State(state): State<AppState>) -> ApiResult<StatsSnapshot> {
    Ok(Json(StatsSnapshot {
        totals: state.store.stats_totals().await?,
        daily: state.store.daily_stats(30).await?,
        hourly: state.store.hourly_stats(48).await?,
    }))
}

// ---- scan ----

async fn start_scan(State(state): State<AppState>) -> ApiResult<serde_json::Value> {
    if state.scanner.is_running() {
        return Err(Error::Conflict("scan already in progress".to_string()));
    }
    let scanner = state.scanner.clone();
    tokio::spawn(async move {
        if let Err(e) = scanner.scan_all().await {
            tracing::warn!(error = %e, "Background scan failed");
        }
    });
    Ok(Json(json!({ "started": true })))
}

async fn scan_one_library(
    State(state): State<AppState>,
    AxumPath(id): AxumPath<i64>,
) -> ApiResult<serde_json::Value> {
    let library = state.store.get_library(id).await?;
    if state.scanner.is_running() {
        return Err(Error::Conflict("scan already in progress".to_string()));
    }
    let scanner = state.scanner.clone();
    tokio::spawn(async move {
        if let Err(e) = scanner.scan_library(&library).await {
            tracing::warn!(error = %e, "Background scan failed");
        }
    });
    Ok(Json(json!({ "started": true })))
}

async fn stop_scan(State(state): State<AppState>) -> ApiResult<serde_json::Value> {
    state.scanner.stop();
    Ok(Json(json!({ "stopping": true })))
}

#[derive(Debug, Serialize)]
struct ScanStatus {
    running: bool,
    progress: Option<crate::events::ScanProgressEvent>,
}

async fn scan_status(State(state): State<AppState>) -> ApiResult<ScanStatus> {
    Ok(Json(ScanStatus {
        running: state.scanner.is_running(),
        progress: state.scanner.status(),
    }))
}

// ---- test encode ----

#[derive(Debug, Deserialize)]
struct TestEncodeRequest {
    path: String,
    output_dir: String,
}

async fn run_test_encode(
    State(state): State<AppState>,
    Json(request): Json<TestEncodeRequest>,
) -> ApiResult<TestEncodeResult> {
    let settings = state.store.load_settings().await?;
    let result = test_encode(
        state.prober.as_ref(),
        &state.ffmpeg,
        std::path::Path::new(&request.path),
        std::path::Path::new(&request.output_dir),
        &settings.encode,
    )
    .await?;
    Ok(Json(result))
}

// ---- events ----

async fn event_stream(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<SseEvent, Infallible>>> {
    let stream = BroadcastStream::new(state.bus.subscribe()).filter_map(|result| async move {
        match result {
            Ok(event) => {
                let json = serde_json::to_string(&event).ok()?;
                Some(Ok(SseEvent::default().data(json)))
            }
            // A lagged subscriber just misses intermediate updates.
            Err(_) => None,
        }
    });
    Sse::new(stream).keep_alive(KeepAlive::default())
}
