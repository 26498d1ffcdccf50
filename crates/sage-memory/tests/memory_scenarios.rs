//! End-to-end behaviour of the assembled memory system

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use chrono::{Duration, Utc};
use rand::Rng;
use sage_memory::embedding::HashingEmbedder;
use sage_memory::persistence::JsonSnapshotStore;
use sage_memory::types::IndexRecord;
use sage_memory::{
    EntryId, FixedSalience, HeuristicSalience, MemoryConfig, MemoryEntry, Role, SageConfig,
    SageMemory, SalienceStrategy, Snapshot, SnapshotStore, Tier,
};

const DIMENSIONS: usize = 64;

fn small_config(capacity: usize) -> SageConfig {
    SageConfig::default().with_memory(MemoryConfig {
        short_term_capacity: capacity,
        ..MemoryConfig::default()
    })
}

async fn open_with(dir: &Path, config: SageConfig, salience: Arc<dyn SalienceStrategy>) -> SageMemory {
    SageMemory::open(
        config,
        Arc::new(HashingEmbedder::new(DIMENSIONS)),
        salience,
        Arc::new(JsonSnapshotStore::new(dir.join("memory.json"))),
    )
    .await
    .unwrap()
}

// ─────────────────────────────────────────────────────────────────────────────
// Scenarios
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_capacity_three_keeps_latest_turns() {
    let dir = tempfile::tempdir().unwrap();
    let memory = open_with(dir.path(), small_config(3), Arc::new(FixedSalience(0.1))).await;

    let ids: Vec<EntryId> = ["A", "B", "C", "D"]
        .iter()
        .map(|t| memory.record_turn(t).unwrap().id)
        .collect();
    memory.run_pending().await.unwrap();

    let short: Vec<String> = memory.store().short_term().into_iter().map(|e| e.text).collect();
    assert_eq!(short, vec!["B", "C", "D"]);
    assert!(memory.store().long_term().iter().all(|e| e.id != ids[0]));
    assert!(memory.store().get(&ids[0]).is_none());
}

#[tokio::test]
async fn test_salient_turn_is_promoted_by_background_job() {
    let dir = tempfile::tempdir().unwrap();
    let memory = open_with(dir.path(), SageConfig::default(), Arc::new(FixedSalience(0.9))).await;

    let entry = memory.record_turn("my daughter's recital is on Friday").unwrap();
    assert_eq!(memory.store().tier_of(&entry.id), Some(Tier::ShortTerm));

    memory.run_pending().await.unwrap();

    let promoted = memory.store().get(&entry.id).unwrap();
    assert_eq!(promoted.tier, Tier::LongTerm);
    assert_eq!(promoted.embedding.as_ref().map(Vec::len), Some(DIMENSIONS));
    assert!(memory.store().index().contains(&entry.id));
}

#[tokio::test]
async fn test_decay_removes_stale_entry_from_store_and_index() {
    let dir = tempfile::tempdir().unwrap();
    let now = Utc::now();
    let embedder = HashingEmbedder::new(DIMENSIONS);

    let mut stale = MemoryEntry::new("we talked about the weather", Role::User, vec![], 0.2, now - Duration::days(60));
    stale.tier = Tier::LongTerm;
    let mut fresh = MemoryEntry::new("remember my passport expires in May", Role::User, vec![], 0.9, now);
    fresh.tier = Tier::LongTerm;

    let mut snapshot = Snapshot::empty(now);
    for entry in [&stale, &fresh] {
        snapshot.vectors.push(IndexRecord {
            id: entry.id,
            vector: embedder.embed_sync(&entry.text).unwrap(),
        });
    }
    snapshot.long_term = vec![stale.clone(), fresh.clone()];
    JsonSnapshotStore::new(dir.path().join("memory.json"))
        .save_snapshot(&snapshot)
        .await
        .unwrap();

    let memory = open_with(dir.path(), SageConfig::default(), Arc::new(HeuristicSalience::default())).await;
    assert!(memory.store().index().contains(&stale.id));

    memory.run_maintenance();
    memory.run_pending().await.unwrap();

    assert!(memory.store().get(&stale.id).is_none());
    assert!(!memory.store().index().contains(&stale.id));
    assert!(memory.store().get(&fresh.id).is_some());

    // the Persist job ran after the sweep
    let saved = JsonSnapshotStore::new(dir.path().join("memory.json"))
        .load_snapshot()
        .await
        .unwrap()
        .unwrap();
    assert!(saved.long_term.iter().all(|e| e.id != stale.id));
    assert!(saved.last_decay_at.is_some());
}

#[tokio::test]
async fn test_assemble_on_empty_memory() {
    let dir = tempfile::tempdir().unwrap();
    let memory = open_with(dir.path(), SageConfig::default(), Arc::new(FixedSalience(0.5))).await;

    let bundle = memory.assemble("budget question", 50).await.unwrap();
    assert!(bundle.is_empty());
    assert_eq!(bundle.token_count, 0);
}

// ─────────────────────────────────────────────────────────────────────────────
// Invariants
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_random_turns_respect_capacity_and_tiers() {
    let dir = tempfile::tempdir().unwrap();
    let memory = open_with(dir.path(), small_config(5), Arc::new(HeuristicSalience::default())).await;
    let words = ["remember", "lunch", "birthday", "rain", "my name", "train", "important", "ok"];
    let mut rng = rand::thread_rng();

    for i in 0..60 {
        let len = rng.gen_range(1..6);
        let text: Vec<&str> = (0..len).map(|_| words[rng.gen_range(0..words.len())]).collect();
        memory.record_turn(&format!("{} {}", text.join(" "), i)).unwrap();
        assert!(memory.store().short_term().len() <= 5);

        if i % 7 == 0 {
            memory.run_pending().await.unwrap();
        }
    }
    memory.run_pending().await.unwrap();

    let short: HashSet<EntryId> = memory.store().short_term().iter().map(|e| e.id).collect();
    let long: HashSet<EntryId> = memory.store().long_term().iter().map(|e| e.id).collect();
    assert!(short.is_disjoint(&long));
    for entry in memory.store().long_term() {
        assert_eq!(entry.tier, Tier::LongTerm);
    }
    for id in memory.store().index().records().iter().map(|r| r.id) {
        assert!(short.contains(&id) || long.contains(&id));
    }
}

#[tokio::test]
async fn test_query_relevant_is_bounded_and_unique() {
    let dir = tempfile::tempdir().unwrap();
    let memory = open_with(dir.path(), small_config(4), Arc::new(FixedSalience(0.9))).await;

    for text in [
        "my car is a blue hatchback",
        "the car needs new tyres",
        "I prefer tea over coffee",
        "dinner with Sam on Thursday",
        "the garage opens at eight",
        "car insurance renews in June",
    ] {
        memory.record_turn(text).unwrap();
    }
    memory.run_pending().await.unwrap();

    for k in [0, 1, 3, 10] {
        let ranked = memory.query_relevant("car", k).await.unwrap();
        assert!(ranked.len() <= k);
        let unique: HashSet<EntryId> = ranked.iter().map(|r| r.entry.id).collect();
        assert_eq!(unique.len(), ranked.len());
    }
}

#[tokio::test]
async fn test_assemble_is_deterministic_for_fixed_state() {
    let dir = tempfile::tempdir().unwrap();
    let memory = open_with(dir.path(), small_config(3), Arc::new(FixedSalience(0.8))).await;

    for text in ["flight to Denver at 9am", "hotel near the airport", "rent a car", "return Sunday"] {
        memory.record_turn(text).unwrap();
    }
    memory.run_pending().await.unwrap();

    let first = memory.assemble("Denver trip", 40).await.unwrap();
    let second = memory.assemble("Denver trip", 40).await.unwrap();
    assert_eq!(first.ids(), second.ids());
    assert_eq!(first.token_count, second.token_count);
    assert!(first.token_count <= 40);
}

#[tokio::test]
async fn test_assemble_records_access_for_packed_entries() {
    let dir = tempfile::tempdir().unwrap();
    let memory = open_with(dir.path(), SageConfig::default(), Arc::new(FixedSalience(0.3))).await;
    let entry = memory.record_turn("the spare key is under the mat").unwrap();
    memory.run_pending().await.unwrap();

    let bundle = memory.assemble("where is the key", 100).await.unwrap();
    assert_eq!(bundle.ids(), vec![entry.id]);
    memory.run_pending().await.unwrap();

    assert_eq!(memory.store().get(&entry.id).unwrap().access_count, 1);
}
