//! Object store capability and snapshot persistence
//!
//! Snapshots live under per-user keys:
//! - `users/{user}/current.json` (replaced wholesale on every successful sync)
//! - `users/{user}/archive/{timestamp}.json` (append-only)
//!
//! Backends only need `put`/`get`/`list`/`delete`; `put` must replace the
//! whole object atomically so readers never observe a torn write.

pub mod fs;
pub mod memory;
pub mod retention;
pub mod snapshot_writer;
pub mod sqlite;

pub use fs::FsObjectStore;
pub use memory::MemoryObjectStore;
pub use retention::ArchiveRetention;
pub use snapshot_writer::{CommitReport, SnapshotMetadata, SnapshotWriter};
pub use sqlite::SqliteObjectStore;

use async_trait::async_trait;
use std::sync::Arc;
use tastesync_common::config::{RootFolderInitializer, StorageBackend};
use thiserror::Error;

/// Object store errors
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Invalid key: {0}")]
    InvalidKey(String),

    /// Backend-specific failure without a richer type
    #[error("Store backend error: {0}")]
    Backend(String),
}

/// Minimal key/value object storage
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Atomically create or replace the object at `key`
    async fn put(&self, key: &str, body: Vec<u8>) -> Result<(), StoreError>;

    /// Read the object at `key`, `None` when absent
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;

    /// Keys starting with `prefix`, sorted ascending
    async fn list(&self, prefix: &str) -> Result<Vec<String>, StoreError>;

    /// Remove the object at `key` (absent keys are not an error)
    async fn delete(&self, key: &str) -> Result<(), StoreError>;

    /// Backend name for logs and health output
    fn backend_name(&self) -> &'static str;
}

/// Reject keys that could escape the store namespace
pub(crate) fn validate_key(key: &str) -> Result<(), StoreError> {
    if key.is_empty() || key.starts_with('/') || key.contains('\\') {
        return Err(StoreError::InvalidKey(key.to_string()));
    }
    if key
        .split('/')
        .any(|segment| segment.is_empty() || segment == "." || segment == "..")
    {
        return Err(StoreError::InvalidKey(key.to_string()));
    }
    Ok(())
}

/// Open the configured backend under the root folder
pub async fn open_store(
    backend: StorageBackend,
    root: &RootFolderInitializer,
) -> Result<Arc<dyn ObjectStore>, StoreError> {
    let store: Arc<dyn ObjectStore> = match backend {
        StorageBackend::Filesystem => Arc::new(FsObjectStore::new(root.store_path())?),
        StorageBackend::Sqlite => Arc::new(SqliteObjectStore::open(&root.database_path()).await?),
        StorageBackend::Memory => Arc::new(MemoryObjectStore::new()),
    };
    tracing::info!(backend = store.backend_name(), "Object store ready");
    Ok(store)
}
