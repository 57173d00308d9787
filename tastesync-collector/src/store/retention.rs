//! Count-based archive retention
//!
//! Pruning is a separate step run after a commit; the writer itself never
//! deletes archive entries.

use super::snapshot_writer::{archive_key, SnapshotWriter};
use crate::error::SyncError;

#[derive(Debug, Clone, Copy, Default)]
pub struct ArchiveRetention {
    /// Newest entries to keep per user, `None` keeps everything
    pub keep_last: Option<usize>,
}

impl ArchiveRetention {
    pub fn new(keep_last: Option<usize>) -> Self {
        Self { keep_last }
    }

    pub fn unbounded() -> Self {
        Self { keep_last: None }
    }

    /// Delete the oldest archive entries beyond `keep_last`
    ///
    /// Returns the deleted keys.
    pub async fn prune(&self, writer: &SnapshotWriter, user_id: &str) -> Result<Vec<String>, SyncError> {
        let Some(keep_last) = self.keep_last else {
            return Ok(Vec::new());
        };

        let stamps = writer.list_archive(user_id).await?;
        if stamps.len() <= keep_last {
            return Ok(Vec::new());
        }

        let excess = stamps.len() - keep_last;
        let mut deleted = Vec::with_capacity(excess);
        for synced_at in stamps.into_iter().take(excess) {
            let key = archive_key(user_id, synced_at);
            writer.store().delete(&key).await?;
            deleted.push(key);
        }

        tracing::info!(user_id, deleted = deleted.len(), keep_last, "Pruned archive");
        Ok(deleted)
    }
}
