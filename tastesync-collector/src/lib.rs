//! tastesync-collector library interface
//!
//! Syncs a user's listening history from the upstream service, enriches it
//! with descriptor vectors and persists per-user snapshots. Exposed as a
//! library for the binary and for integration tests.

pub mod api;
pub mod auth;
pub mod config;
pub mod enrichment;
pub mod error;
pub mod fetcher;
pub mod merge;
pub mod metrics;
pub mod store;
pub mod sync;

pub use crate::error::{ApiError, ApiResult, SyncError};

use axum::Router;
use chrono::{DateTime, Utc};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::merge::MergeEngine;
use crate::sync::Collector;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub collector: Arc<Collector>,
    pub merge_engine: MergeEngine,
    /// Source for `POST /reference/reload`
    pub reference_table_path: PathBuf,
    pub startup_time: DateTime<Utc>,
    /// Last sync failure, reported by `/health`
    pub last_error: Arc<RwLock<Option<String>>>,
}

impl AppState {
    pub fn new(collector: Arc<Collector>, reference_table_path: PathBuf) -> Self {
        Self {
            collector,
            merge_engine: MergeEngine::new(),
            reference_table_path,
            startup_time: Utc::now(),
            last_error: Arc::new(RwLock::new(None)),
        }
    }
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .merge(api::sync_routes())
        .merge(api::health_routes())
        .with_state(state)
}
