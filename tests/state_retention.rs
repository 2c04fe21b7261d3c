// tests/state_retention.rs
//
// Persistence and retention of the dedup store across restarts.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use rand::{rngs::StdRng, Rng, SeedableRng};
use serde_json::json;

use news_relay::{NewsItem, StateParams, StateStore};

const NOW: u64 = 1_704_070_800;
const DAY: u64 = 24 * 3600;

fn item(i: usize) -> NewsItem {
    NewsItem::new("Wire", "2024-01-01 09:00:00", format!("bulletin {i} {}", "x".repeat(i % 7)))
}

#[test]
fn sweep_keeps_exactly_the_fresh_identities() {
    let dir = tempfile::tempdir().unwrap();
    let mut rng = StdRng::seed_from_u64(42);
    let mut store = StateStore::new(dir.path().join("s.json"), StateParams::default());

    let mut fresh = Vec::new();
    let mut stale = Vec::new();
    for i in 0..200 {
        let it = item(i);
        let age = rng.random_range(0..2 * DAY);
        store.record(&it, NOW - age);
        if age < DAY {
            fresh.push(it);
        } else {
            stale.push(it);
        }
    }

    let (before, after) = store.sweep(NOW);
    assert_eq!(before, 200);
    assert_eq!(after, fresh.len());
    assert!(fresh.iter().all(|it| store.contains(it.identity())));
    assert!(stale.iter().all(|it| !store.contains(it.identity())));
}

#[test]
fn sweep_caps_to_the_most_recent_entries() {
    let dir = tempfile::tempdir().unwrap();
    let mut store = StateStore::new(
        dir.path().join("s.json"),
        StateParams {
            max_seen: 3,
            ..StateParams::default()
        },
    );
    for i in 0..5 {
        store.record(&item(i), NOW - 100 + i as u64);
    }

    assert_eq!(store.sweep(NOW), (5, 3));
    for i in 2..5 {
        assert!(store.contains(item(i).identity()), "newest entries survive");
    }
}

#[test]
fn load_drops_expired_entries_and_accepts_fractional_times() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("state.json");
    let doc = json!({
        "sent_ids": {
            "fresh": (NOW - 10) as f64 + 0.25,
            "old": (NOW - DAY - 1) as f64
        },
        "recent_contents": ["price up", "oil slips"]
    });
    std::fs::write(&path, doc.to_string()).unwrap();

    let store = StateStore::load(&path, StateParams::default(), NOW);
    assert!(store.contains("fresh"));
    assert_eq!(store.notified_at("fresh"), Some(NOW - 10));
    assert!(!store.contains("old"));
    assert_eq!(
        store.recent_texts().collect::<Vec<_>>(),
        vec!["price up", "oil slips"]
    );
}

#[tokio::test]
async fn corrupt_or_missing_state_starts_empty() {
    let dir = tempfile::tempdir().unwrap();

    let missing = StateStore::load(dir.path().join("nope.json"), StateParams::default(), NOW);
    assert_eq!(missing.seen_len(), 0);

    let path = dir.path().join("state.json");
    std::fs::write(&path, "{ not json").unwrap();
    let mut corrupt = StateStore::load(&path, StateParams::default(), NOW);
    assert_eq!(corrupt.seen_len(), 0);

    // and the next save repairs the file
    corrupt.record(&item(1), NOW);
    corrupt.save().await.unwrap();
    let repaired = StateStore::load(&path, StateParams::default(), NOW);
    assert_eq!(repaired.seen_len(), 1);
}

#[tokio::test]
async fn save_creates_parent_directories() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("deeper").join("state.json");
    let mut store = StateStore::new(&path, StateParams::default());
    store.record(&item(3), NOW);

    store.save().await.unwrap();
    assert!(path.exists());
    assert!(!path.with_extension("json.tmp").exists());
}

#[test]
fn recent_ring_evicts_oldest_first() {
    let dir = tempfile::tempdir().unwrap();
    let mut store = StateStore::new(
        dir.path().join("s.json"),
        StateParams {
            recent_capacity: 2,
            ..StateParams::default()
        },
    );
    let first = NewsItem::new("A", "", "Gold hits record high");
    store.record(&first, NOW);
    store.record(&NewsItem::new("A", "", "Bond yields retreat"), NOW);
    store.record(&NewsItem::new("A", "", "Copper demand weakens"), NOW);

    assert_eq!(store.recent_len(), 2);
    // identity is still remembered even after its text left the ring
    assert!(store.is_duplicate(&first));
    let reworded = NewsItem::new("B", "", "Gold hits record high!");
    assert!(!store.is_duplicate(&reworded));
}

#[tokio::test(flavor = "current_thread")]
async fn save_lets_other_tasks_run_on_the_same_thread() {
    let dir = tempfile::tempdir().unwrap();
    let mut store = StateStore::new(dir.path().join("state.json"), StateParams::default());
    store.record(&item(4), NOW);

    let ran = Arc::new(AtomicBool::new(false));
    let flag = ran.clone();
    tokio::spawn(async move { flag.store(true, Ordering::SeqCst) });

    // nothing here yields except the file writes
    store.save().await.unwrap();
    assert!(ran.load(Ordering::SeqCst), "save must not block the runtime thread");
}
