// src/pipeline.rs
//! The polling cycle: fetch every feed, merge + sort, drop what was already
//! relayed (exact or near-duplicate), archive and enqueue the rest, persist
//! the dedup state, and periodically sweep it.

use futures::FutureExt;
use metrics::{counter, describe_counter, describe_gauge, gauge};
use once_cell::sync::OnceCell;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::ingest::{self, types::FeedSource};
use crate::item::NewsItem;
use crate::notify::dispatcher::panic_message;
use crate::notify::Dispatcher;
use crate::sink::MessageSink;
use crate::state::{Duplicate, StateStore};

fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!(
            "relay_items_skipped_total",
            "Items skipped as already relayed or near-duplicate."
        );
        describe_counter!(
            "relay_items_enqueued_total",
            "Items archived and handed to the dispatcher."
        );
        describe_counter!(
            "relay_persist_errors_total",
            "Failed writes of the archive or the dedup state."
        );
        describe_counter!(
            "relay_cycle_panics_total",
            "Cycles aborted by a panic and skipped."
        );
        describe_gauge!("relay_seen_ids", "Identities currently remembered.");
        describe_gauge!("relay_last_cycle_ts", "Unix ts when the last cycle finished.");
    });
}

#[derive(Debug, Clone)]
pub struct RelayParams {
    /// Sleep between cycles.
    pub fetch_interval: Duration,
    /// Pause after each accepted item so the dispatcher and sink are not burst.
    pub item_pause: Duration,
    /// Sweep the store every N cycles.
    pub cleanup_every_cycles: u64,
}

impl Default for RelayParams {
    fn default() -> Self {
        Self {
            fetch_interval: Duration::from_secs(30),
            item_pause: Duration::from_secs(1),
            cleanup_every_cycles: 1440,
        }
    }
}

/// Counters for one cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub cycle: u64,
    pub fetched: usize,
    /// After in-batch identity dedup.
    pub unique: usize,
    pub skipped_seen: usize,
    pub skipped_similar: usize,
    /// Archived and enqueued for delivery.
    pub sent: usize,
    pub source_errors: usize,
    pub persist_errors: usize,
    /// `(before, after)` seen sizes when this cycle swept.
    pub swept: Option<(usize, usize)>,
}

pub struct Relay {
    sources: Vec<Box<dyn FeedSource>>,
    store: StateStore,
    sink: Arc<dyn MessageSink>,
    dispatcher: Arc<Dispatcher>,
    params: RelayParams,
    cycle: u64,
}

impl Relay {
    pub fn new(
        sources: Vec<Box<dyn FeedSource>>,
        store: StateStore,
        sink: Arc<dyn MessageSink>,
        dispatcher: Arc<Dispatcher>,
        params: RelayParams,
    ) -> Self {
        ensure_metrics_described();
        let mut params = params;
        params.cleanup_every_cycles = params.cleanup_every_cycles.max(1);
        Self {
            sources,
            store,
            sink,
            dispatcher,
            params,
            cycle: 0,
        }
    }

    pub fn store(&self) -> &StateStore {
        &self.store
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    /// Cycles completed so far.
    pub fn cycle(&self) -> u64 {
        self.cycle
    }

    /// One polling cycle at the current wall clock.
    pub async fn run_cycle(&mut self) -> CycleReport {
        self.run_cycle_at(now_unix()).await
    }

    /// One polling cycle, recording notify times as `now`.
    pub async fn run_cycle_at(&mut self, now: u64) -> CycleReport {
        self.cycle += 1;
        let batch = ingest::collect_batch(&self.sources).await;

        let mut report = CycleReport {
            cycle: self.cycle,
            fetched: batch.fetched,
            unique: batch.items.len(),
            source_errors: batch.source_errors,
            ..CycleReport::default()
        };

        if batch.items.is_empty() {
            tracing::info!(target: "relay", cycle = self.cycle, "no items this round");
        }

        for item in batch.items {
            match self.store.duplicate_kind(&item) {
                Some(Duplicate::Seen) => {
                    report.skipped_seen += 1;
                    continue;
                }
                Some(Duplicate::Similar { score }) => {
                    tracing::info!(
                        target: "relay",
                        source = item.source(),
                        score,
                        preview = %preview(&item),
                        "similar content skipped"
                    );
                    report.skipped_similar += 1;
                    continue;
                }
                None => {}
            }

            self.accept(item, now, &mut report).await;

            if !self.params.item_pause.is_zero() {
                tokio::time::sleep(self.params.item_pause).await;
            }
        }

        let skipped = report.skipped_seen + report.skipped_similar;
        if skipped > 0 {
            counter!("relay_items_skipped_total").increment(skipped as u64);
        }

        if report.sent > 0 {
            self.save_store(&mut report).await;
        }

        if self.cycle % self.params.cleanup_every_cycles == 0 {
            report.swept = Some(self.store.sweep(now));
            self.save_store(&mut report).await;
        }

        gauge!("relay_seen_ids").set(self.store.seen_len() as f64);
        gauge!("relay_last_cycle_ts").set(now as f64);
        report
    }

    async fn accept(&mut self, item: NewsItem, now: u64, report: &mut CycleReport) {
        if let Err(e) = self.sink.persist(&item).await {
            tracing::error!(target: "relay", error = %format!("{e:#}"), "archive write failed");
            counter!("relay_persist_errors_total").increment(1);
            report.persist_errors += 1;
        }
        self.store.record(&item, now);
        tracing::info!(
            target: "relay",
            source = item.source(),
            ts = item.timestamp(),
            preview = %preview(&item),
            "queued"
        );
        self.dispatcher.enqueue(item);
        counter!("relay_items_enqueued_total").increment(1);
        report.sent += 1;
    }

    async fn save_store(&self, report: &mut CycleReport) {
        if let Err(e) = self.store.save().await {
            tracing::error!(
                target: "relay",
                path = %self.store.path().display(),
                error = %format!("{e:#}"),
                "state save failed; continuing in memory"
            );
            counter!("relay_persist_errors_total").increment(1);
            report.persist_errors += 1;
        }
    }

    /// Poll forever, one cycle per `fetch_interval`.
    pub async fn run(mut self) {
        tracing::info!(
            target: "relay",
            sources = self.sources.len(),
            interval_secs = self.params.fetch_interval.as_secs(),
            "relay started"
        );
        loop {
            let outcome = AssertUnwindSafe(self.run_cycle()).catch_unwind().await;
            match outcome {
                Ok(r) => tracing::info!(
                    target: "relay",
                    cycle = r.cycle,
                    fetched = r.fetched,
                    unique = r.unique,
                    skipped = r.skipped_seen + r.skipped_similar,
                    sent = r.sent,
                    source_errors = r.source_errors,
                    persist_errors = r.persist_errors,
                    "cycle done"
                ),
                Err(p) => {
                    counter!("relay_cycle_panics_total").increment(1);
                    tracing::error!(
                        target: "relay",
                        cycle = self.cycle,
                        panic = %panic_message(&*p),
                        "cycle panicked; skipping to the next one"
                    );
                }
            }
            tokio::time::sleep(self.params.fetch_interval).await;
        }
    }
}

fn preview(item: &NewsItem) -> String {
    let content = item.content();
    if content.chars().count() > 100 {
        let head: String = content.chars().take(100).collect();
        format!("{head}...")
    } else {
        content.to_string()
    }
}

fn now_unix() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
