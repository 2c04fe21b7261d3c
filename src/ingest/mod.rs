// src/ingest/mod.rs
pub mod providers;
pub mod types;

use crate::ingest::types::FeedSource;
use crate::item::NewsItem;
use metrics::{counter, describe_counter};
use once_cell::sync::OnceCell;
use std::collections::HashSet;

/// One-time metrics registration (so series show up on /metrics).
fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!(
            "relay_items_fetched_total",
            "Total items returned by feed sources."
        );
        describe_counter!(
            "relay_batch_duplicates_total",
            "Items dropped as exact duplicates within one fetch batch."
        );
        describe_counter!(
            "relay_source_errors_total",
            "Feed source fetch/parse errors."
        );
    });
}

/// Clean feed text for display: decode HTML entities, strip tags, collapse
/// whitespace, trim. This is not the dedup normalization (see `dedup`).
pub fn clean_text(s: &str) -> String {
    // 1) HTML entity decode
    let mut out = html_escape::decode_html_entities(s).to_string();

    // 2) Strip HTML tags
    static RE_TAGS: OnceCell<regex::Regex> = OnceCell::new();
    let re_tags = RE_TAGS.get_or_init(|| regex::Regex::new(r"(?is)</?[^>]+>").unwrap());
    out = re_tags.replace_all(&out, "").to_string();

    // 3) Collapse whitespace
    static RE_WS: OnceCell<regex::Regex> = OnceCell::new();
    let re_ws = RE_WS.get_or_init(|| regex::Regex::new(r"\s+").unwrap());
    out = re_ws.replace_all(&out, " ").to_string();
    out = out.trim().to_string();

    // 4) Length cap: 2000 chars
    if out.chars().count() > 2000 {
        out = out.chars().take(2000).collect();
    }

    out
}

/// Result of polling every source once.
#[derive(Debug, Default)]
pub struct Batch {
    /// Unique (by identity) items, ascending by parsed timestamp.
    pub items: Vec<NewsItem>,
    /// Items returned by sources before batch dedup.
    pub fetched: usize,
    /// Items dropped as exact repeats within this batch.
    pub batch_duplicates: usize,
    /// Sources that failed this round.
    pub source_errors: usize,
}

/// Poll each source in turn. A failing source is logged and contributes
/// nothing; it never aborts the round.
pub async fn fetch_all(sources: &[Box<dyn FeedSource>]) -> (Vec<NewsItem>, usize) {
    ensure_metrics_described();

    let mut raw = Vec::new();
    let mut errors = 0usize;
    for s in sources {
        match s.fetch_latest().await {
            Ok(mut v) => {
                tracing::info!(target: "ingest", source = s.name(), count = v.len(), "fetched");
                counter!("relay_items_fetched_total").increment(v.len() as u64);
                raw.append(&mut v);
            }
            Err(e) => {
                tracing::warn!(target: "ingest", error = ?e, source = s.name(), "source error");
                counter!("relay_source_errors_total").increment(1);
                errors += 1;
            }
        }
    }
    (raw, errors)
}

/// Drop repeats by identity, keeping the first occurrence.
/// Returns (unique, dropped).
pub fn merge_unique(items: Vec<NewsItem>) -> (Vec<NewsItem>, usize) {
    let mut seen: HashSet<String> = HashSet::with_capacity(items.len());
    let mut keep = Vec::with_capacity(items.len());
    let mut dropped = 0usize;
    for it in items {
        if seen.insert(it.identity().to_string()) {
            keep.push(it);
        } else {
            dropped += 1;
        }
    }
    (keep, dropped)
}

/// Stable ascending sort by parsed timestamp; unparsable timestamps first.
pub fn sort_by_timestamp(items: &mut [NewsItem]) {
    items.sort_by_key(NewsItem::sort_key);
}

/// Fetch from all sources, merge, dedup within the batch, and sort.
pub async fn collect_batch(sources: &[Box<dyn FeedSource>]) -> Batch {
    let (raw, source_errors) = fetch_all(sources).await;
    let fetched = raw.len();
    let (mut items, batch_duplicates) = merge_unique(raw);
    sort_by_timestamp(&mut items);

    if batch_duplicates > 0 {
        counter!("relay_batch_duplicates_total").increment(batch_duplicates as u64);
    }

    Batch {
        items,
        fetched,
        batch_duplicates,
        source_errors,
    }
}
