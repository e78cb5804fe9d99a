use axum::extract::{Multipart, Query, State};
use axum::http::HeaderMap;
use axum::Json;
use pairchat_engine::ActivityRecord;
use pairchat_telemetry::{LogQuery, LogRecord, MetricsSnapshot};
use serde::{Deserialize, Serialize};

use crate::error::ServerError;
use crate::server::AppState;
use crate::uploads::{self, UploadResponse, ANONYMOUS_OWNER};

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub online: usize,
    pub waiting: usize,
    pub sessions: usize,
}

pub async fn health(State(state): State<AppState>) -> Result<Json<HealthResponse>, ServerError> {
    let stats = state.hub.stats().await?;
    Ok(Json(HealthResponse {
        status: "ok",
        online: stats.online,
        waiting: stats.waiting,
        sessions: stats.sessions,
    }))
}

#[derive(Debug, Deserialize)]
pub struct CheckUsernameRequest {
    #[serde(default)]
    pub username: String,
}

#[derive(Debug, Serialize)]
pub struct CheckUsernameResponse {
    pub available: bool,
}

/// Advisory only: the name is claimed later by `setUsername`, not here.
pub async fn check_username(
    State(state): State<AppState>,
    Json(body): Json<CheckUsernameRequest>,
) -> Result<Json<CheckUsernameResponse>, ServerError> {
    let available = state.hub.check_name(&body.username).await?;
    Ok(Json(CheckUsernameResponse { available }))
}

pub async fn user_activity(
    State(state): State<AppState>,
) -> Result<Json<Vec<ActivityRecord>>, ServerError> {
    Ok(Json(state.hub.activity().await?))
}

pub async fn metrics(State(state): State<AppState>) -> Json<MetricsSnapshot> {
    Json(state.metrics.snapshot())
}

/// Persisted warn+ lines, newest first. Filters: `connection_id`, `level`,
/// `target`, `since`, `limit`.
pub async fn logs(
    State(state): State<AppState>,
    Query(query): Query<LogQuery>,
) -> Result<Json<Vec<LogRecord>>, ServerError> {
    let sink = state.logs.clone().ok_or(ServerError::LogsDisabled)?;
    let records = tokio::task::spawn_blocking(move || sink.query(&query))
        .await
        .map_err(|e| ServerError::LogQuery(e.to_string()))?
        .map_err(|e| ServerError::LogQuery(e.to_string()))?;
    Ok(Json(records))
}

pub async fn upload(
    State(state): State<AppState>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>, ServerError> {
    let owner = headers
        .get("user-id")
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .unwrap_or(ANONYMOUS_OWNER)
        .to_string();

    while let Some(field) = multipart.next_field().await? {
        if field.name() != Some("media") {
            continue;
        }
        let original_name = field.file_name().unwrap_or_default().to_string();
        let mimetype = field
            .content_type()
            .unwrap_or("application/octet-stream")
            .to_string();
        if !uploads::is_allowed(&original_name, &mimetype) {
            return Err(ServerError::InvalidFileType(original_name));
        }

        let bytes = field.bytes().await?;
        let (path, response) = uploads::store(
            &state.config.uploads_dir,
            &original_name,
            &mimetype,
            &bytes,
            state.config.max_upload_bytes,
        )
        .await?;
        state.hub.track_upload(&owner, path).await?;

        tracing::info!(
            owner = %owner,
            filename = %response.filename,
            size = response.size,
            "file uploaded"
        );
        return Ok(Json(response));
    }

    Err(ServerError::NoFile)
}
