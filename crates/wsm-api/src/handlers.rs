use std::path::PathBuf;

use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::info;
use wsm_core::{ConfigUpdate, WorkspaceConfig};
use wsm_daemon::{ComponentHealth, MetricsReport, WorkspaceStatus};
use wsm_indexer::{AnalysisReport, FileAnalysis, Topology};
use wsm_watcher::{DirectoryStats, WatchedFile};

use crate::{ApiError, ApiResult, AppState};

#[derive(Serialize)]
pub struct LivenessResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub uptime_seconds: u64,
    pub websocket_clients: usize,
}

pub async fn health(State(state): State<AppState>) -> Json<LivenessResponse> {
    Json(LivenessResponse {
        status: "alive",
        version: env!("CARGO_PKG_VERSION"),
        uptime_seconds: state.uptime_seconds(),
        websocket_clients: state.ws_clients.active(),
    })
}

pub async fn status(State(state): State<AppState>) -> Json<WorkspaceStatus> {
    Json(state.manager.status())
}

pub async fn metrics(State(state): State<AppState>) -> Json<MetricsReport> {
    Json(state.manager.monitor().metrics())
}

pub async fn analysis(State(state): State<AppState>) -> Json<AnalysisReport> {
    Json(state.manager.indexer().analysis_report())
}

#[derive(Deserialize)]
pub struct FileQuery {
    pub path: String,
}

#[derive(Serialize)]
pub struct FileAnalysisResponse {
    pub analysis: FileAnalysis,
    /// Files that import this one.
    pub dependents: Vec<PathBuf>,
}

pub async fn file_analysis(
    State(state): State<AppState>,
    Query(query): Query<FileQuery>,
) -> ApiResult<Json<FileAnalysisResponse>> {
    let trimmed = query.path.trim().trim_start_matches("./");
    if trimmed.is_empty() {
        return Err(ApiError::BadRequest("query parameter 'path' is empty".to_string()));
    }
    let relative = PathBuf::from(trimmed);
    let indexer = state.manager.indexer();
    let analysis = indexer
        .file_analysis(&relative)
        .ok_or_else(|| ApiError::NotFound(format!("{} is not indexed", relative.display())))?;

    Ok(Json(FileAnalysisResponse {
        dependents: indexer.dependents(&relative),
        analysis,
    }))
}

pub async fn topology(State(state): State<AppState>) -> ApiResult<Json<Topology>> {
    if !state.manager.is_running() {
        return Err(ApiError::ServiceUnavailable(
            "workspace manager is not running".to_string(),
        ));
    }
    Ok(Json(state.manager.topology().await?))
}

#[derive(Serialize)]
pub struct FilesResponse {
    pub root: Option<PathBuf>,
    pub total_files: usize,
    pub files: Vec<WatchedFile>,
    pub directories: Vec<DirectoryStats>,
}

pub async fn files(State(state): State<AppState>) -> Json<FilesResponse> {
    let watcher = state.manager.watcher();
    let files = watcher.tracked_files();
    Json(FilesResponse {
        root: watcher.root(),
        total_files: files.len(),
        files,
        directories: watcher.directory_stats(),
    })
}

pub async fn get_config(State(state): State<AppState>) -> Json<WorkspaceConfig> {
    Json(state.manager.config())
}

pub async fn update_config(
    State(state): State<AppState>,
    Json(update): Json<ConfigUpdate>,
) -> ApiResult<Json<WorkspaceConfig>> {
    Ok(Json(state.manager.update_config(update)?))
}

#[derive(Serialize)]
pub struct RestartResponse {
    pub success: bool,
    pub component: ComponentHealth,
}

pub async fn restart_component(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> ApiResult<Json<RestartResponse>> {
    info!(target: "wsm::api", component = %name, "Manual restart requested");
    let component = state.manager.restart_component(&name).await?;
    Ok(Json(RestartResponse {
        success: !component.is_failed(),
        component,
    }))
}
