// src/state.rs
//! Durable dedup state: notified identities (with notify time) and a bounded
//! ring of recently seen normalized texts.
//!
//! Owned by the relay loop; nothing else writes to it, so it carries no locks.
//! Persisted as one JSON record:
//! `{"sent_ids": {"<identity>": <epoch secs>}, "recent_contents": ["..", newest last]}`.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::fs;
use std::path::{Path, PathBuf};

use crate::dedup::{normalize_text, similarity, DEFAULT_SIMILARITY_THRESHOLD};
use crate::item::NewsItem;

/// Tunables for dedup and retention.
#[derive(Debug, Clone, Copy)]
pub struct StateParams {
    /// Capacity of the recent-text ring (FIFO eviction).
    pub recent_capacity: usize,
    /// Similarity strictly above this marks a near-duplicate.
    pub similarity_threshold: f64,
    /// Seen identities at least this old are dropped by `sweep`.
    pub ttl_secs: u64,
    /// Upper bound on seen identities after a sweep.
    pub max_seen: usize,
}

impl Default for StateParams {
    fn default() -> Self {
        Self {
            recent_capacity: 1000,
            similarity_threshold: DEFAULT_SIMILARITY_THRESHOLD,
            ttl_secs: 24 * 3600,
            max_seen: 10_000,
        }
    }
}

/// Why an item was classified as a duplicate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Duplicate {
    /// Identity already notified.
    Seen,
    /// Normalized content close to a recent text.
    Similar { score: f64 },
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct PersistedState {
    #[serde(default)]
    sent_ids: HashMap<String, f64>,
    #[serde(default)]
    recent_contents: Vec<String>,
}

#[derive(Debug)]
pub struct StateStore {
    path: PathBuf,
    params: StateParams,
    seen: HashMap<String, u64>,
    recent: VecDeque<String>,
}

impl StateStore {
    /// Empty store that will persist to `path`.
    pub fn new(path: impl Into<PathBuf>, params: StateParams) -> Self {
        let params = sanitize(params);
        Self {
            path: path.into(),
            params,
            seen: HashMap::new(),
            recent: VecDeque::with_capacity(params.recent_capacity.min(10_000)),
        }
    }

    /// Load from `path`. A missing or unreadable record yields an empty store;
    /// identities already past the TTL at `now` are not carried over.
    pub fn load(path: impl Into<PathBuf>, params: StateParams, now: u64) -> Self {
        let mut store = Self::new(path, params);

        let raw = match fs::read_to_string(&store.path) {
            Ok(s) => s,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(target: "state", path = %store.path.display(), "no state file, starting empty");
                return store;
            }
            Err(e) => {
                tracing::error!(target: "state", path = %store.path.display(), error = %e, "reading state failed, starting empty");
                return store;
            }
        };

        let persisted: PersistedState = match serde_json::from_str(&raw) {
            Ok(p) => p,
            Err(e) => {
                tracing::error!(target: "state", path = %store.path.display(), error = %e, "corrupt state file, starting empty");
                return store;
            }
        };

        let ttl = store.params.ttl_secs;
        for (id, ts) in persisted.sent_ids {
            let ts = if ts.is_finite() && ts > 0.0 { ts as u64 } else { 0 };
            if now.saturating_sub(ts) < ttl {
                store.seen.insert(id, ts);
            }
        }
        for text in persisted.recent_contents {
            store.push_recent(text);
        }

        tracing::info!(
            target: "state",
            seen = store.seen.len(),
            recent = store.recent.len(),
            "state loaded"
        );
        store
    }

    /// Persist to disk (write temp file, then rename over the target).
    pub async fn save(&self) -> Result<()> {
        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(dir)
                .await
                .with_context(|| format!("creating state dir {}", dir.display()))?;
        }
        let persisted = PersistedState {
            sent_ids: self
                .seen
                .iter()
                .map(|(k, &v)| (k.clone(), v as f64))
                .collect(),
            recent_contents: self.recent.iter().cloned().collect(),
        };
        let body = serde_json::to_vec_pretty(&persisted).context("serializing state")?;
        let tmp = tmp_path(&self.path);
        tokio::fs::write(&tmp, body)
            .await
            .with_context(|| format!("writing {}", tmp.display()))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .with_context(|| format!("replacing {}", self.path.display()))?;
        Ok(())
    }

    /// Classify `item` against seen identities, then against recent texts.
    /// Does not mutate.
    pub fn duplicate_kind(&self, item: &NewsItem) -> Option<Duplicate> {
        if self.seen.contains_key(item.identity()) {
            return Some(Duplicate::Seen);
        }
        let normalized = normalize_text(item.content());
        self.recent
            .iter()
            .map(|old| similarity(&normalized, old))
            .find(|&score| score > self.params.similarity_threshold)
            .map(|score| Duplicate::Similar { score })
    }

    pub fn is_duplicate(&self, item: &NewsItem) -> bool {
        self.duplicate_kind(item).is_some()
    }

    /// Mark `item` as notified at `now` and remember its normalized text.
    pub fn record(&mut self, item: &NewsItem, now: u64) {
        self.seen.insert(item.identity().to_string(), now);
        self.push_recent(normalize_text(item.content()));
    }

    /// Drop identities with age >= TTL, then cap the map to the most recently
    /// notified `max_seen`. Returns `(before, after)`.
    pub fn sweep(&mut self, now: u64) -> (usize, usize) {
        let before = self.seen.len();
        let ttl = self.params.ttl_secs;
        self.seen.retain(|_, ts| now.saturating_sub(*ts) < ttl);

        let max = self.params.max_seen;
        if self.seen.len() > max {
            let mut entries: Vec<(String, u64)> = self.seen.drain().collect();
            entries.sort_by(|a, b| b.1.cmp(&a.1));
            entries.truncate(max);
            self.seen = entries.into_iter().collect();
        }

        let after = self.seen.len();
        if before != after {
            tracing::info!(
                target: "state",
                before,
                after,
                ttl_hours = ttl as f64 / 3600.0,
                max_seen = max,
                "swept seen identities"
            );
        }
        (before, after)
    }

    pub fn contains(&self, identity: &str) -> bool {
        self.seen.contains_key(identity)
    }

    pub fn notified_at(&self, identity: &str) -> Option<u64> {
        self.seen.get(identity).copied()
    }

    pub fn seen_len(&self) -> usize {
        self.seen.len()
    }

    pub fn recent_len(&self) -> usize {
        self.recent.len()
    }

    /// Recent normalized texts, oldest first.
    pub fn recent_texts(&self) -> impl Iterator<Item = &str> {
        self.recent.iter().map(String::as_str)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn push_recent(&mut self, text: String) {
        while self.recent.len() >= self.params.recent_capacity {
            self.recent.pop_front();
        }
        self.recent.push_back(text);
    }
}

fn sanitize(mut p: StateParams) -> StateParams {
    p.recent_capacity = p.recent_capacity.max(1);
    p.max_seen = p.max_seen.max(1);
    if !p.similarity_threshold.is_finite() {
        p.similarity_threshold = DEFAULT_SIMILARITY_THRESHOLD;
    }
    p.similarity_threshold = p.similarity_threshold.clamp(0.0, 1.0);
    p
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| "state.json".into());
    name.push(".tmp");
    path.with_file_name(name)
}
