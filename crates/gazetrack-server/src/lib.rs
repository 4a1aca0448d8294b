//! HTTP server for remote gaze capture.
//!
//! Exposes the stage lifecycle to the experimenter (create/start/stop), the
//! polled command snapshot to the capture client, artifact upload/listing/
//! download, per-artifact statistics, and a small admin view guarded by a
//! single shared bearer token.

mod error;

use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    Router,
    body::Bytes,
    extract::{Path, Query, State},
    http::{HeaderMap, header},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
};
use serde::Deserialize;

use gazetrack_analysis::{ArtifactStats, stats_from_csv};
use gazetrack_core::protocol::{
    CreatedTest, DeactivatedTest, StartedStage, StoppedStage, TestDetail, TestList, WebhookAck,
};
use gazetrack_core::storage::ArtifactList;
use gazetrack_core::{
    ArtifactInfo, ArtifactKind, CalibrationPoint, Command, CommandKind, DataService,
    DiskArtifactStore, Error, MemoryStageStore, StageStore, TrackingService,
};

pub use error::ApiError;

type ApiResult<T> = Result<Json<T>, ApiError>;

// ---------------------------------------------------------------------------
// Config and state
// ---------------------------------------------------------------------------

/// Server settings.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Root directory for uploaded artifacts.
    pub data_dir: PathBuf,
    /// Shared bearer token for `/api/admin/*`. Admin routes reject every
    /// request when unset.
    pub admin_token: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8000,
            data_dir: PathBuf::from("data"),
            admin_token: None,
        }
    }
}

/// Shared server state.
pub struct AppState {
    tracking: TrackingService,
    data: DataService,
    admin_token: Option<String>,
}

impl AppState {
    pub fn new(store: Arc<dyn StageStore>, data: DataService, admin_token: Option<String>) -> Self {
        Self {
            tracking: TrackingService::new(store),
            data,
            admin_token,
        }
    }

    /// In-memory lifecycle store plus on-disk artifacts under `config.data_dir`.
    pub fn from_config(config: &ServerConfig) -> Self {
        let store: Arc<dyn StageStore> = Arc::new(MemoryStageStore::new());
        let data = DataService::new(
            store.clone(),
            Arc::new(DiskArtifactStore::new(config.data_dir.clone())),
        );
        Self::new(store, data, config.admin_token.clone())
    }

    fn require_admin(&self, headers: &HeaderMap) -> Result<(), ApiError> {
        let Some(expected) = self.admin_token.as_deref() else {
            return Err(Error::Unauthorized("admin access is not configured".into()).into());
        };
        let presented = headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "));
        match presented {
            Some(token) if token == expected => Ok(()),
            _ => Err(Error::Unauthorized("invalid admin credentials".into()).into()),
        }
    }
}

// ---------------------------------------------------------------------------
// Request bodies
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct CreateTestBody {
    name: String,
}

#[derive(Deserialize)]
struct StartBody {
    test_number: Option<u32>,
    calibration_point: Option<CalibrationPoint>,
}

#[derive(Deserialize)]
struct StopBody {
    stage_id: u64,
}

#[derive(Deserialize)]
struct WebhookBody {
    stage_id: u64,
    command_type: CommandKind,
    status: String,
}

#[derive(Deserialize)]
struct UploadParams {
    stage_id: u64,
    filename: String,
}

#[derive(Deserialize)]
struct FilesParams {
    #[serde(rename = "type")]
    kind: Option<ArtifactKind>,
    stage_id: Option<u64>,
}

#[derive(Deserialize)]
struct ArtifactParams {
    stage_id: u64,
    #[serde(rename = "type")]
    kind: ArtifactKind,
}

// ---------------------------------------------------------------------------
// Tracking handlers
// ---------------------------------------------------------------------------

async fn handle_create_test(
    State(state): State<Arc<AppState>>,
    Json(body): Json<CreateTestBody>,
) -> ApiResult<CreatedTest> {
    Ok(Json(state.tracking.create_test(&body.name)?))
}

async fn handle_start(
    State(state): State<Arc<AppState>>,
    Path(token): Path<String>,
    Json(body): Json<StartBody>,
) -> ApiResult<StartedStage> {
    Ok(Json(state.tracking.send_start_command(
        &token,
        body.test_number,
        body.calibration_point,
    )?))
}

async fn handle_stop(
    State(state): State<Arc<AppState>>,
    Path(token): Path<String>,
    Json(body): Json<StopBody>,
) -> ApiResult<StoppedStage> {
    Ok(Json(state.tracking.send_stop_command(&token, body.stage_id)?))
}

async fn handle_webhook(
    State(state): State<Arc<AppState>>,
    Path(token): Path<String>,
    Json(body): Json<WebhookBody>,
) -> ApiResult<WebhookAck> {
    Ok(Json(state.tracking.webhook_ack(
        &token,
        body.stage_id,
        body.command_type,
        &body.status,
    )?))
}

async fn handle_commands(
    State(state): State<Arc<AppState>>,
    Path(token): Path<String>,
) -> ApiResult<Vec<Command>> {
    Ok(Json(state.tracking.get_pending_commands(&token)?))
}

async fn handle_deactivate(
    State(state): State<Arc<AppState>>,
    Path(token): Path<String>,
) -> ApiResult<DeactivatedTest> {
    Ok(Json(state.tracking.deactivate_test(&token)?))
}

// ---------------------------------------------------------------------------
// Admin handlers
// ---------------------------------------------------------------------------

async fn handle_admin_tests(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> ApiResult<TestList> {
    state.require_admin(&headers)?;
    Ok(Json(state.tracking.list_tests()))
}

async fn handle_admin_test_detail(
    State(state): State<Arc<AppState>>,
    Path(token): Path<String>,
    headers: HeaderMap,
) -> ApiResult<TestDetail> {
    state.require_admin(&headers)?;
    Ok(Json(state.tracking.test_detail(&token)?))
}

// ---------------------------------------------------------------------------
// Data handlers
// ---------------------------------------------------------------------------

async fn handle_upload(
    State(state): State<Arc<AppState>>,
    Path(token): Path<String>,
    Query(params): Query<UploadParams>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<ArtifactInfo> {
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok());
    Ok(Json(state.data.upload(
        &token,
        params.stage_id,
        &params.filename,
        content_type,
        &body,
    )?))
}

async fn handle_files(
    State(state): State<Arc<AppState>>,
    Path(token): Path<String>,
    Query(params): Query<FilesParams>,
) -> ApiResult<ArtifactList> {
    Ok(Json(state.data.list(&token, params.kind, params.stage_id)?))
}

async fn handle_download(
    State(state): State<Arc<AppState>>,
    Path(token): Path<String>,
    Query(params): Query<ArtifactParams>,
) -> Result<Response, ApiError> {
    let file = state.data.download(&token, params.stage_id, params.kind)?;
    Ok((
        [
            (header::CONTENT_TYPE, file.content_type.to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename={}", file.filename),
            ),
        ],
        file.bytes,
    )
        .into_response())
}

async fn handle_stats(
    State(state): State<Arc<AppState>>,
    Path(token): Path<String>,
    Query(params): Query<ArtifactParams>,
) -> ApiResult<ArtifactStats> {
    let text = state.data.read_table(&token, params.stage_id, params.kind)?;
    Ok(Json(stats_from_csv(params.kind, &text)?))
}

async fn handle_index() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "name": "gazetrack server",
        "version": gazetrack_core::VERSION,
        "endpoints": {
            "/": "This API index",
            "POST /api/tracking/tests": "Create a test: {name}",
            "POST /api/tracking/{token}/start": "Start a new stage: {test_number?, calibration_point?}",
            "POST /api/tracking/{token}/stop": "Stop a started stage: {stage_id}",
            "POST /api/tracking/{token}/webhook": "Acknowledge a command: {stage_id, command_type, status}",
            "GET /api/tracking/{token}/commands": "Current command snapshot",
            "POST /api/tracking/{token}/deactivate": "Stop every started stage",
            "POST /api/data/{token}/upload": "Upload an artifact: ?stage_id=&filename=, CSV body",
            "GET /api/data/{token}/files": "List artifacts: ?type=&stage_id=",
            "GET /api/data/{token}/download": "Download an artifact: ?stage_id=&type=",
            "GET /api/data/{token}/stats": "Artifact statistics: ?stage_id=&type=",
            "GET /api/admin/tests": "All tests (bearer token)",
            "GET /api/admin/tests/{token}": "One test with its stages (bearer token)",
        }
    }))
}

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

/// Build the axum router.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(handle_index))
        .route("/api/tracking/tests", post(handle_create_test))
        .route("/api/tracking/{token}/start", post(handle_start))
        .route("/api/tracking/{token}/stop", post(handle_stop))
        .route("/api/tracking/{token}/webhook", post(handle_webhook))
        .route("/api/tracking/{token}/commands", get(handle_commands))
        .route("/api/tracking/{token}/deactivate", post(handle_deactivate))
        .route("/api/admin/tests", get(handle_admin_tests))
        .route("/api/admin/tests/{token}", get(handle_admin_test_detail))
        .route("/api/data/{token}/upload", post(handle_upload))
        .route("/api/data/{token}/files", get(handle_files))
        .route("/api/data/{token}/download", get(handle_download))
        .route("/api/data/{token}/stats", get(handle_stats))
        .with_state(state)
}

/// Serve on an already bound listener until `shutdown` resolves.
pub async fn serve(
    listener: tokio::net::TcpListener,
    state: Arc<AppState>,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> std::io::Result<()> {
    axum::serve(listener, build_router(state))
        .with_graceful_shutdown(shutdown)
        .await
}

/// Run the HTTP server until Ctrl-C.
pub async fn run_server(config: ServerConfig) -> std::io::Result<()> {
    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    log::info!("listening on {addr}, artifacts in {}", config.data_dir.display());
    let state = Arc::new(AppState::from_config(&config));
    serve(listener, state, async {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::info!("shutting down");
        }
    })
    .await
}
