//! Sync trigger, snapshot and merge handlers
//!
//! POST /users/:user_id/collect, GET /users/:user_id/snapshot,
//! GET /users/:user_id/archive, POST /merge, POST /reference/reload

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tastesync_common::Snapshot;

use crate::auth::Credential;
use crate::enrichment::ReferenceTable;
use crate::error::{status_for_code, ApiError, ApiResult};
use crate::merge::{MergeStats, MergedCorpus};
use crate::sync::{SyncResult, SyncStatus};
use crate::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct CollectQuery {
    #[serde(default)]
    pub force: bool,
}

#[derive(Debug, Deserialize)]
pub struct MergeRequest {
    pub user_ids: Vec<String>,
    #[serde(default)]
    pub include_archive: bool,
}

#[derive(Debug, Serialize)]
pub struct MergeResponse {
    pub corpus: MergedCorpus,
    pub stats: MergeStats,
}

#[derive(Debug, Serialize)]
pub struct ArchiveListResponse {
    pub user_id: String,
    pub entries: Vec<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
pub struct ReloadResponse {
    pub rows: usize,
}

/// POST /users/:user_id/collect?force=
///
/// Body is the user's credential. The sync result is returned for every
/// outcome; the HTTP status follows the failure reason.
pub async fn collect(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    Query(query): Query<CollectQuery>,
    Json(credential): Json<Credential>,
) -> (StatusCode, Json<SyncResult>) {
    let result = state.collector.collect(&user_id, credential, query.force).await;

    let status = match (&result.status, &result.reason) {
        (SyncStatus::Failed, Some(reason)) => {
            *state.last_error.write().await = Some(format!("{}: {}", reason.code, reason.message));
            status_for_code(&reason.code)
        }
        (SyncStatus::Failed, None) => StatusCode::INTERNAL_SERVER_ERROR,
        _ => StatusCode::OK,
    };

    (status, Json(result))
}

/// GET /users/:user_id/snapshot
pub async fn get_snapshot(State(state): State<AppState>, Path(user_id): Path<String>) -> ApiResult<Json<Snapshot>> {
    state
        .collector
        .writer()
        .read_current(&user_id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("No snapshot for user {}", user_id)))
}

/// GET /users/:user_id/archive
pub async fn list_archive(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> ApiResult<Json<ArchiveListResponse>> {
    let entries = state.collector.writer().list_archive(&user_id).await?;
    Ok(Json(ArchiveListResponse { user_id, entries }))
}

/// POST /merge
pub async fn merge(State(state): State<AppState>, Json(request): Json<MergeRequest>) -> ApiResult<Json<MergeResponse>> {
    if request.user_ids.is_empty() {
        return Err(ApiError::BadRequest("user_ids must not be empty".to_string()));
    }

    let histories = state
        .collector
        .load_histories(&request.user_ids, request.include_archive)
        .await?;

    let engine = state.merge_engine;
    let (corpus, stats) = tokio::task::spawn_blocking(move || engine.merge(histories))
        .await
        .map_err(|e| ApiError::Internal(format!("Merge task failed: {}", e)))?;

    Ok(Json(MergeResponse { corpus, stats }))
}

/// POST /reference/reload
pub async fn reload_reference(State(state): State<AppState>) -> ApiResult<Json<ReloadResponse>> {
    let path = state.reference_table_path.clone();
    let table = tokio::task::spawn_blocking(move || ReferenceTable::load(&path))
        .await
        .map_err(|e| ApiError::Internal(format!("Reload task failed: {}", e)))??;

    let rows = table.len();
    state.collector.resolver().reload(table);
    Ok(Json(ReloadResponse { rows }))
}

pub fn sync_routes() -> Router<AppState> {
    Router::new()
        .route("/users/:user_id/collect", post(collect))
        .route("/users/:user_id/snapshot", get(get_snapshot))
        .route("/users/:user_id/archive", get(list_archive))
        .route("/merge", post(merge))
        .route("/reference/reload", post(reload_reference))
}
