//! Persistence Adapter
//!
//! Serializes complete memory snapshots (both tiers plus index vectors)
//! to durable storage and reloads them on start. Two backends ship:
//! SQLite (default) and a single JSON file.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;

use crate::MemoryResult;
use crate::config::{SageConfig, StorageBackend};
use crate::types::Snapshot;

mod json;
pub mod migrations;
mod sqlite;

pub use json::JsonSnapshotStore;
pub use sqlite::{DEFAULT_BUSY_TIMEOUT, SqliteSnapshotStore};

/// Durable snapshot storage.
///
/// `save_snapshot` replaces the previous snapshot atomically: a failed save
/// leaves the last good snapshot readable.
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Latest snapshot, or `None` if nothing was ever saved
    async fn load_snapshot(&self) -> MemoryResult<Option<Snapshot>>;

    async fn save_snapshot(&self, snapshot: &Snapshot) -> MemoryResult<()>;

    /// Human-readable location for logs and the CLI
    fn describe(&self) -> String;
}

/// Open the configured backend. Relative paths resolve against `data_dir`.
///
/// SQLite waits on a locked database no longer than one persist attempt.
pub fn open_store(config: &SageConfig, data_dir: &Path) -> MemoryResult<Arc<dyn SnapshotStore>> {
    let storage = &config.storage;
    let path = if storage.path.is_absolute() {
        storage.path.clone()
    } else {
        data_dir.join(&storage.path)
    };

    let store: Arc<dyn SnapshotStore> = match storage.backend {
        StorageBackend::Sqlite => Arc::new(SqliteSnapshotStore::open_with_busy_timeout(
            &path,
            config.scheduler.persist_timeout(),
        )?),
        StorageBackend::Json => Arc::new(JsonSnapshotStore::new(&path)),
    };
    tracing::info!(store = %store.describe(), "opened snapshot store");
    Ok(store)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StorageConfig;
    use std::path::PathBuf;

    #[test]
    fn test_open_store_resolves_relative_path() {
        let dir = tempfile::tempdir().unwrap();
        let config = SageConfig::default().with_storage(StorageConfig {
            backend: StorageBackend::Json,
            path: PathBuf::from("snap/memory.json"),
        });
        let store = open_store(&config, dir.path()).unwrap();
        assert_eq!(
            store.describe(),
            format!("json:{}", dir.path().join("snap/memory.json").display())
        );
    }

    #[test]
    fn test_open_store_sqlite_creates_database() {
        let dir = tempfile::tempdir().unwrap();
        let config = SageConfig::default();
        open_store(&config, dir.path()).unwrap();
        assert!(dir.path().join("memory.db").exists());
    }
}
