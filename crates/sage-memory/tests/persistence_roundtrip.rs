//! Snapshot round-trips through both storage backends

use std::sync::Arc;

use sage_memory::embedding::HashingEmbedder;
use sage_memory::persistence::migrations::{SCHEMA_VERSION, schema_version};
use sage_memory::{
    FixedSalience, JsonSnapshotStore, MemoryConfig, Role, SageConfig, SageMemory, SnapshotStore,
    SqliteSnapshotStore, StorageBackend, StorageConfig, Tier,
};

fn config() -> SageConfig {
    SageConfig::default().with_memory(MemoryConfig {
        short_term_capacity: 3,
        ..MemoryConfig::default()
    })
}

async fn populated(persistence: Arc<dyn SnapshotStore>) -> SageMemory {
    let memory = SageMemory::open(
        config(),
        Arc::new(HashingEmbedder::new(48)),
        Arc::new(FixedSalience(0.8)),
        persistence,
    )
    .await
    .unwrap();

    memory
        .record_turn_as(Role::User, "my mother's birthday is March 3rd", vec!["family".into()])
        .unwrap();
    memory
        .record_turn_as(Role::Assistant, "Noted, March 3rd.", vec![])
        .unwrap();
    memory.record_turn("I'm training for a half marathon").unwrap();
    memory.run_pending().await.unwrap();

    memory.record_turn("what's the weather tomorrow?").unwrap();
    memory.record_turn_as(Role::System, "session resumed", vec![]).unwrap();
    memory
}

async fn assert_roundtrip(persistence: Arc<dyn SnapshotStore>) {
    let memory = populated(persistence.clone()).await;
    memory.save_now().await.unwrap();
    let before = memory.store().snapshot();
    assert!(!before.long_term.is_empty());
    assert!(!before.vectors.is_empty());

    let reopened = SageMemory::open(
        config(),
        Arc::new(HashingEmbedder::new(48)),
        Arc::new(FixedSalience(0.8)),
        persistence,
    )
    .await
    .unwrap();

    assert_eq!(reopened.store().short_term(), memory.store().short_term());
    assert_eq!(reopened.store().long_term(), memory.store().long_term());
    assert_eq!(reopened.store().index().records(), memory.store().index().records());

    let mut after = reopened.store().snapshot();
    after.saved_at = before.saved_at;
    assert_eq!(after, before);
}

#[tokio::test]
async fn test_sqlite_roundtrip_is_exact() {
    let dir = tempfile::tempdir().unwrap();
    let store = SqliteSnapshotStore::open(dir.path().join("db/memory.db")).unwrap();
    assert_roundtrip(Arc::new(store)).await;
}

#[tokio::test]
async fn test_json_roundtrip_is_exact() {
    let dir = tempfile::tempdir().unwrap();
    assert_roundtrip(Arc::new(JsonSnapshotStore::new(dir.path().join("memory.json")))).await;
}

#[tokio::test]
async fn test_sqlite_file_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("memory.db");

    let memory = populated(Arc::new(SqliteSnapshotStore::open(&path).unwrap())).await;
    let expected = memory.store().long_term();
    memory.shutdown().await.unwrap();

    let conn = rusqlite::Connection::open(&path).unwrap();
    assert_eq!(schema_version(&conn).unwrap(), SCHEMA_VERSION);
    drop(conn);

    let store = SqliteSnapshotStore::open(&path).unwrap();
    let snapshot = store.load_snapshot().await.unwrap().unwrap();
    let mut long_term = snapshot.long_term.clone();
    for entry in &mut long_term {
        entry.embedding = snapshot
            .vectors
            .iter()
            .find(|r| r.id == entry.id)
            .map(|r| r.vector.clone());
    }
    assert_eq!(long_term, expected);
}

#[tokio::test]
async fn test_open_in_uses_configured_backend() {
    let dir = tempfile::tempdir().unwrap();
    let config = SageConfig::default().with_storage(StorageConfig {
        backend: StorageBackend::Json,
        path: "snapshots/memory.json".into(),
    });

    let memory = SageMemory::open_in(config.clone(), dir.path()).await.unwrap();
    memory.record_turn("remember to water the ferns").unwrap();
    memory.shutdown().await.unwrap();
    assert!(dir.path().join("snapshots/memory.json").exists());

    let reopened = SageMemory::open_in(config, dir.path()).await.unwrap();
    assert_eq!(reopened.stats().total(), 1);
}

#[tokio::test]
async fn test_embedder_change_reindexes_restored_entries() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("memory.json");

    let memory = populated(Arc::new(JsonSnapshotStore::new(&path))).await;
    let long_term_ids: Vec<_> = memory.store().long_term().into_iter().map(|e| e.id).collect();
    memory.shutdown().await.unwrap();

    let reopened = SageMemory::open(
        config(),
        Arc::new(HashingEmbedder::new(32)),
        Arc::new(FixedSalience(0.8)),
        Arc::new(JsonSnapshotStore::new(&path)),
    )
    .await
    .unwrap();
    assert!(reopened.store().index().is_empty());

    reopened.run_pending().await.unwrap();
    for id in long_term_ids {
        let entry = reopened.store().get(&id).unwrap();
        assert_eq!(entry.tier, Tier::LongTerm);
        assert_eq!(entry.embedding.map(|v| v.len()), Some(32));
    }
}
