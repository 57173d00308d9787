//! Sync state machine
//!
//! IDLE → FETCHING → ENRICHING → WRITING → DONE, with FAILED reachable from
//! any non-terminal state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use tastesync_common::RecordCounts;
use uuid::Uuid;

use crate::error::SyncError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SyncState {
    Idle,
    /// Upstream requests in flight
    Fetching,
    /// Descriptor lookup and metrics
    Enriching,
    /// Committing current slot and archive
    Writing,
    Done,
    Failed,
}

impl SyncState {
    pub fn is_terminal(self) -> bool {
        matches!(self, SyncState::Done | SyncState::Failed)
    }

    pub fn can_transition_to(self, next: SyncState) -> bool {
        use SyncState::*;
        match (self, next) {
            (Idle, Fetching) | (Fetching, Enriching) | (Enriching, Writing) | (Writing, Done) => true,
            (from, Failed) => !from.is_terminal(),
            _ => false,
        }
    }
}

impl fmt::Display for SyncState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SyncState::Idle => "IDLE",
            SyncState::Fetching => "FETCHING",
            SyncState::Enriching => "ENRICHING",
            SyncState::Writing => "WRITING",
            SyncState::Done => "DONE",
            SyncState::Failed => "FAILED",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateTransition {
    pub sync_id: Uuid,
    pub old_state: SyncState,
    pub new_state: SyncState,
    pub transitioned_at: DateTime<Utc>,
}

/// In-memory state of one sync run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncSession {
    pub sync_id: Uuid,
    pub user_id: String,
    pub state: SyncState,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    /// Set once the current slot holds this sync's snapshot
    pub committed: bool,
}

impl SyncSession {
    pub fn new(user_id: &str) -> Self {
        Self {
            sync_id: Uuid::new_v4(),
            user_id: user_id.to_string(),
            state: SyncState::Idle,
            started_at: Utc::now(),
            ended_at: None,
            committed: false,
        }
    }

    /// Move to `new_state`
    ///
    /// # Errors
    /// `Internal` for a transition the state machine does not allow
    pub fn transition_to(&mut self, new_state: SyncState) -> Result<StateTransition, SyncError> {
        if !self.state.can_transition_to(new_state) {
            return Err(SyncError::Internal(format!(
                "Invalid sync transition {} -> {}",
                self.state, new_state
            )));
        }

        let transition = StateTransition {
            sync_id: self.sync_id,
            old_state: self.state,
            new_state,
            transitioned_at: Utc::now(),
        };
        self.state = new_state;
        if new_state.is_terminal() {
            self.ended_at = Some(transition.transitioned_at);
        }

        tracing::info!(
            sync_id = %self.sync_id,
            user_id = %self.user_id,
            from = %transition.old_state,
            to = %transition.new_state,
            "Sync state transition"
        );
        Ok(transition)
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    Success,
    /// Current slot written, archive copy missing
    PartialSuccess,
    /// Current snapshot still inside the freshness window
    Skipped,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureReason {
    pub code: String,
    pub message: String,
}

impl From<&SyncError> for FailureReason {
    fn from(err: &SyncError) -> Self {
        Self {
            code: err.code().to_string(),
            message: err.to_string(),
        }
    }
}

/// Structured outcome of one `collect` call
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncResult {
    pub sync_id: Uuid,
    pub user_id: String,
    pub status: SyncStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<FailureReason>,
    pub timestamp: DateTime<Utc>,
    pub counts: RecordCounts,
    /// Resolved share of distinct tracks in this sync (0.0-1.0)
    pub coverage: f64,
    /// True iff this sync durably committed any data
    pub partial_progress: bool,
    pub final_state: SyncState,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

impl SyncResult {
    pub fn is_success(&self) -> bool {
        matches!(self.status, SyncStatus::Success | SyncStatus::PartialSuccess)
    }
}
