//! Current + archive snapshot persistence
//!
//! A commit first replaces the user's current slot, then appends an archive
//! copy keyed by the sync timestamp. Both objects share one envelope schema
//! (`metadata` + `snapshot`) so archive entries can be read exactly like the
//! current slot.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tastesync_common::time::{archive_stamp, parse_archive_stamp};
use tastesync_common::{RecordCounts, Snapshot};

use super::ObjectStore;
use crate::error::SyncError;

const ARCHIVE_SUFFIX: &str = ".json";

/// Metadata written alongside every commit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotMetadata {
    pub user_id: String,
    pub synced_at: DateTime<Utc>,
    pub schema_version: u32,
    pub counts: RecordCounts,
}

impl SnapshotMetadata {
    pub fn for_snapshot(snapshot: &Snapshot) -> Self {
        Self {
            user_id: snapshot.user_id.clone(),
            synced_at: snapshot.synced_at,
            schema_version: snapshot.schema_version,
            counts: snapshot.record_counts(),
        }
    }
}

#[derive(Serialize)]
struct EnvelopeRef<'a> {
    metadata: &'a SnapshotMetadata,
    snapshot: &'a Snapshot,
}

#[derive(Deserialize)]
struct Envelope {
    snapshot: Snapshot,
}

#[derive(Deserialize)]
struct MetadataOnly {
    metadata: SnapshotMetadata,
}

/// Outcome of a commit whose current-slot write succeeded
#[derive(Debug, Clone, Serialize)]
pub struct CommitReport {
    pub metadata: SnapshotMetadata,
    pub current_key: String,
    /// Key of the archive entry, `None` when the archive append failed
    pub archive_key: Option<String>,
    /// Archive failure message (partial success, retry with `retry_archive`)
    pub archive_error: Option<String>,
}

impl CommitReport {
    pub fn is_partial(&self) -> bool {
        self.archive_key.is_none()
    }
}

/// Reject user ids that cannot be used as a single key segment
pub fn validate_user_id(user_id: &str) -> Result<(), SyncError> {
    let valid = !user_id.is_empty()
        && user_id != "."
        && user_id != ".."
        && !user_id.contains(['/', '\\'])
        && !user_id.chars().any(char::is_control);
    if valid {
        Ok(())
    } else {
        Err(SyncError::Config(format!("Invalid user id: {:?}", user_id)))
    }
}

pub fn current_key(user_id: &str) -> String {
    format!("users/{}/current.json", user_id)
}

pub fn archive_prefix(user_id: &str) -> String {
    format!("users/{}/archive/", user_id)
}

pub fn archive_key(user_id: &str, synced_at: DateTime<Utc>) -> String {
    format!(
        "{}{}{}",
        archive_prefix(user_id),
        archive_stamp(synced_at),
        ARCHIVE_SUFFIX
    )
}

/// Writes and reads user snapshots through an [`ObjectStore`]
#[derive(Clone)]
pub struct SnapshotWriter {
    store: Arc<dyn ObjectStore>,
}

impl SnapshotWriter {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn ObjectStore> {
        &self.store
    }

    fn encode(snapshot: &Snapshot) -> Result<(SnapshotMetadata, Vec<u8>), SyncError> {
        let metadata = SnapshotMetadata::for_snapshot(snapshot);
        let body = serde_json::to_vec(&EnvelopeRef {
            metadata: &metadata,
            snapshot,
        })?;
        Ok((metadata, body))
    }

    /// Persist `snapshot` as the user's current slot, then archive it
    ///
    /// # Errors
    /// - `WriteConflict` when the current slot could not be replaced (the
    ///   previous current snapshot is left untouched and nothing is archived)
    ///
    /// An archive failure is not an error: the report carries it as a partial
    /// success.
    pub async fn commit(&self, user_id: &str, snapshot: &Snapshot) -> Result<CommitReport, SyncError> {
        validate_user_id(user_id)?;
        if snapshot.user_id != user_id {
            return Err(SyncError::WriteConflict(format!(
                "Snapshot for user {} cannot be committed as user {}",
                snapshot.user_id, user_id
            )));
        }

        let (metadata, body) = Self::encode(snapshot)?;
        let current = current_key(user_id);

        if let Err(e) = self.store.put(&current, body.clone()).await {
            tracing::error!(user_id, key = %current, error = %e, "Current snapshot write failed");
            return Err(SyncError::WriteConflict(format!(
                "Failed to replace {}: {}",
                current, e
            )));
        }

        let archive = archive_key(user_id, snapshot.synced_at);
        let (archive_key, archive_error) = match self.append_archive(&archive, snapshot, body).await {
            Ok(()) => (Some(archive), None),
            Err(e) => {
                tracing::warn!(
                    user_id,
                    key = %archive,
                    error = %e,
                    "Archive append failed after current was written"
                );
                (None, Some(e.to_string()))
            }
        };

        tracing::info!(
            user_id,
            synced_at = %metadata.synced_at,
            events = metadata.counts.events,
            top_tracks = metadata.counts.top_tracks,
            top_artists = metadata.counts.top_artists,
            archived = archive_key.is_some(),
            "Snapshot committed"
        );

        Ok(CommitReport {
            metadata,
            current_key: current,
            archive_key,
            archive_error,
        })
    }

    /// Write an archive entry unless one already exists under `key`
    ///
    /// Archive entries are never replaced: an existing entry holding the same
    /// snapshot is left as is, a different one is a `WriteConflict`.
    async fn append_archive(&self, key: &str, snapshot: &Snapshot, body: Vec<u8>) -> Result<(), SyncError> {
        if let Some(existing) = self.store.get(key).await? {
            let envelope: Envelope = serde_json::from_slice(&existing)?;
            if envelope.snapshot == *snapshot {
                tracing::debug!(key, "Archive entry already present");
                return Ok(());
            }
            return Err(SyncError::WriteConflict(format!(
                "Archive entry {} already holds a different snapshot",
                key
            )));
        }
        self.store.put(key, body).await?;
        Ok(())
    }

    /// Re-attempt the archive append of an already committed snapshot
    pub async fn retry_archive(&self, snapshot: &Snapshot) -> Result<String, SyncError> {
        validate_user_id(&snapshot.user_id)?;
        let (_, body) = Self::encode(snapshot)?;
        let key = archive_key(&snapshot.user_id, snapshot.synced_at);
        self.append_archive(&key, snapshot, body).await?;
        tracing::info!(user_id = %snapshot.user_id, key = %key, "Archive entry written on retry");
        Ok(key)
    }

    /// Archive the current snapshot when an earlier partial commit left it
    /// out of the archive
    ///
    /// Returns the archive key written, `None` when there is no current
    /// snapshot or it is already archived.
    pub async fn archive_current_if_missing(&self, user_id: &str) -> Result<Option<String>, SyncError> {
        let Some(metadata) = self.read_current_metadata(user_id).await? else {
            return Ok(None);
        };
        if self.store.get(&archive_key(user_id, metadata.synced_at)).await?.is_some() {
            return Ok(None);
        }
        let Some(current) = self.read_current(user_id).await? else {
            return Ok(None);
        };
        self.retry_archive(&current).await.map(Some)
    }

    pub async fn read_current(&self, user_id: &str) -> Result<Option<Snapshot>, SyncError> {
        validate_user_id(user_id)?;
        match self.store.get(&current_key(user_id)).await? {
            Some(body) => {
                let envelope: Envelope = serde_json::from_slice(&body)?;
                Ok(Some(envelope.snapshot))
            }
            None => Ok(None),
        }
    }

    pub async fn read_current_metadata(
        &self,
        user_id: &str,
    ) -> Result<Option<SnapshotMetadata>, SyncError> {
        validate_user_id(user_id)?;
        match self.store.get(&current_key(user_id)).await? {
            Some(body) => {
                let envelope: MetadataOnly = serde_json::from_slice(&body)?;
                Ok(Some(envelope.metadata))
            }
            None => Ok(None),
        }
    }

    /// Archived sync timestamps for a user, oldest first
    pub async fn list_archive(&self, user_id: &str) -> Result<Vec<DateTime<Utc>>, SyncError> {
        validate_user_id(user_id)?;
        let prefix = archive_prefix(user_id);
        let keys = self.store.list(&prefix).await?;

        let mut stamps = Vec::with_capacity(keys.len());
        for key in keys {
            let Some(stamp) = key
                .strip_prefix(&prefix)
                .and_then(|rest| rest.strip_suffix(ARCHIVE_SUFFIX))
            else {
                continue;
            };
            match parse_archive_stamp(stamp) {
                Ok(ts) => stamps.push(ts),
                Err(e) => tracing::warn!(user_id, key = %key, error = %e, "Skipping unrecognized archive key"),
            }
        }
        stamps.sort();
        Ok(stamps)
    }

    pub async fn read_archive(
        &self,
        user_id: &str,
        synced_at: DateTime<Utc>,
    ) -> Result<Option<Snapshot>, SyncError> {
        validate_user_id(user_id)?;
        match self.store.get(&archive_key(user_id, synced_at)).await? {
            Some(body) => {
                let envelope: Envelope = serde_json::from_slice(&body)?;
                Ok(Some(envelope.snapshot))
            }
            None => Ok(None),
        }
    }

    /// Every stored snapshot of a user: archive entries oldest first, then the
    /// current slot when it is not already archived
    pub async fn read_all(&self, user_id: &str) -> Result<Vec<Snapshot>, SyncError> {
        let mut snapshots = Vec::new();
        for synced_at in self.list_archive(user_id).await? {
            if let Some(snapshot) = self.read_archive(user_id, synced_at).await? {
                snapshots.push(snapshot);
            }
        }
        if let Some(current) = self.read_current(user_id).await? {
            if !snapshots.iter().any(|s| s.synced_at == current.synced_at) {
                snapshots.push(current);
            }
        }
        Ok(snapshots)
    }
}
