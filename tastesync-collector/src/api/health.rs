//! Health check endpoint

use axum::{extract::State, routing::get, Json, Router};
use chrono::Utc;
use serde::Serialize;

use crate::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// "ok", or "degraded" when the reference table is empty
    pub status: String,
    pub module: String,
    pub version: String,
    pub uptime_seconds: u64,
    pub store_backend: String,
    pub reference_rows: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

/// GET /health
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let uptime = Utc::now().signed_duration_since(state.startup_time);
    let uptime_seconds = uptime.num_seconds().max(0) as u64;
    let last_error = state.last_error.read().await.clone();
    let reference_rows = state.collector.resolver().table().len();

    Json(HealthResponse {
        status: if reference_rows == 0 { "degraded" } else { "ok" }.to_string(),
        module: "tastesync-collector".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds,
        store_backend: state.collector.writer().store().backend_name().to_string(),
        reference_rows,
        last_error,
    })
}

pub fn health_routes() -> Router<AppState> {
    Router::new().route("/health", get(health_check))
}
