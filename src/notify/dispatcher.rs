// src/notify/dispatcher.rs
//! Rate-limited multi-channel dispatcher.
//!
//! - `enqueue` appends to an unbounded queue (the relay loop is the only writer
//!   at the back, apart from requeues).
//! - One delivery worker pops the front, picks a channel round-robin, and
//!   sends. At most one delivery is in flight.
//! - Channels over budget are skipped; if every channel is over budget the
//!   item goes back to the tail and the worker backs off.
//! - A failed send puts the item back at the tail (unbounded by default; see
//!   `DispatcherCfg::max_attempts`).
//! - A separate monitor loop logs `status_snapshot` periodically.

use anyhow::anyhow;
use futures::FutureExt;
use metrics::{counter, describe_counter, describe_gauge, gauge};
use once_cell::sync::OnceCell;
use std::any::Any;
use std::collections::VecDeque;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::Notify;
use tokio::time::Instant;
use tokio::task::JoinHandle;

use super::window::FixedWindow;
use super::Notifier;
use crate::item::NewsItem;

fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("relay_deliveries_total", "Successful channel deliveries.");
        describe_counter!(
            "relay_delivery_failures_total",
            "Failed deliveries (item requeued or dead-lettered)."
        );
        describe_counter!(
            "relay_saturated_total",
            "Ticks where every channel was over its window budget."
        );
        describe_counter!(
            "relay_dead_letter_total",
            "Items dropped after exhausting max_attempts."
        );
        describe_gauge!("relay_queue_depth", "Items waiting for delivery.");
    });
}

#[derive(Debug, Clone)]
pub struct DispatcherCfg {
    /// Sleep after a full round-robin pass finds no channel with budget.
    pub saturated_backoff: Duration,
    /// Upper bound on waiting for work when the queue is empty.
    pub idle_poll: Duration,
    /// Queue depth above which `enqueue` warns.
    pub queue_warn: usize,
    /// Queue depth above which the monitor escalates.
    pub queue_high_water: usize,
    /// Monitor period.
    pub monitor_interval: Duration,
    /// Failed attempts before an item is dead-lettered; 0 = retry forever.
    pub max_attempts: u32,
}

impl Default for DispatcherCfg {
    fn default() -> Self {
        Self {
            saturated_backoff: Duration::from_secs(10),
            idle_poll: Duration::from_millis(500),
            queue_warn: 100,
            queue_high_water: 200,
            monitor_interval: Duration::from_secs(30),
            max_attempts: 0,
        }
    }
}

/// One outbound endpoint with its own fixed-window budget.
pub struct Channel {
    label: String,
    notifier: Arc<dyn Notifier>,
    window: Mutex<FixedWindow>,
}

impl Channel {
    /// `max_per_window` sends per 60 s, first window opening at `now`.
    pub fn new(notifier: Arc<dyn Notifier>, max_per_window: u32, now: u64) -> Self {
        Self {
            label: notifier.label(),
            notifier,
            window: Mutex::new(FixedWindow::new(max_per_window, now)),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    fn window(&self) -> MutexGuard<'_, FixedWindow> {
        lock(&self.window)
    }

    fn status(&self) -> ChannelStatus {
        let w = self.window();
        ChannelStatus {
            label: self.label.clone(),
            window_start: w.window_start(),
            sent_in_window: w.sent_in_window(),
            max_per_window: w.max_per_window(),
        }
    }
}

/// Window usage of one channel at snapshot time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelStatus {
    pub label: String,
    pub window_start: u64,
    pub sent_in_window: u32,
    pub max_per_window: u32,
}

/// Read-only view for observability. May be slightly stale.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatcherStatus {
    pub queue_depth: usize,
    pub dead_letters: usize,
    pub channels: Vec<ChannelStatus>,
}

impl fmt::Display for DispatcherStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "queue={}", self.queue_depth)?;
        for (i, c) in self.channels.iter().enumerate() {
            write!(f, " | R{}:{}/{}", i + 1, c.sent_in_window, c.max_per_window)?;
        }
        if self.dead_letters > 0 {
            write!(f, " | dead={}", self.dead_letters)?;
        }
        Ok(())
    }
}

/// What one worker tick did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// Queue was empty.
    Idle,
    /// Sent through channel `channel` (index in construction order).
    Delivered { channel: usize },
    /// Send failed on `channel`; the item went back to the tail.
    Failed { channel: usize },
    /// Send failed and the item exhausted `max_attempts`.
    DeadLettered { channel: usize },
    /// No channel had budget; the item went back to the tail.
    Saturated,
}

struct Pending {
    item: NewsItem,
    attempts: u32,
}

pub struct Dispatcher {
    queue: Mutex<VecDeque<Pending>>,
    channels: Vec<Channel>,
    // position of the next channel to try; only the worker moves it
    cursor: Mutex<usize>,
    dead_letters: Mutex<Vec<NewsItem>>,
    wake: Notify,
    cfg: DispatcherCfg,
    // wall-clock second at construction plus a monotonic anchor; the worker
    // loop reads time from here so paused tokio time drives the windows too
    epoch: (u64, Instant),
}

impl Dispatcher {
    /// Channel order is fixed here and drives round-robin order.
    pub fn new(channels: Vec<Channel>, cfg: DispatcherCfg) -> Self {
        ensure_metrics_described();
        if channels.is_empty() {
            tracing::warn!(target: "dispatch", "dispatcher has no channels; items will queue up");
        }
        Self {
            queue: Mutex::new(VecDeque::new()),
            channels,
            cursor: Mutex::new(0),
            dead_letters: Mutex::new(Vec::new()),
            wake: Notify::new(),
            cfg,
            epoch: (now_unix(), Instant::now()),
        }
    }

    /// Unix seconds as seen by the delivery worker.
    pub fn now(&self) -> u64 {
        self.epoch.0 + self.epoch.1.elapsed().as_secs()
    }

    pub fn cfg(&self) -> &DispatcherCfg {
        &self.cfg
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// Append to the queue. Never blocks or rejects.
    pub fn enqueue(&self, item: NewsItem) {
        let depth = {
            let mut q = lock(&self.queue);
            q.push_back(Pending { item, attempts: 0 });
            q.len()
        };
        gauge!("relay_queue_depth").set(depth as f64);
        if depth > self.cfg.queue_warn {
            tracing::warn!(target: "dispatch", depth, "delivery queue backlog");
        }
        self.wake.notify_one();
    }

    pub fn queue_depth(&self) -> usize {
        lock(&self.queue).len()
    }

    /// Items given up on after `max_attempts` failures.
    pub fn dead_letters(&self) -> Vec<NewsItem> {
        lock(&self.dead_letters).clone()
    }

    /// Queue depth and per-channel window usage. Never mutates.
    pub fn status_snapshot(&self) -> DispatcherStatus {
        DispatcherStatus {
            queue_depth: self.queue_depth(),
            dead_letters: lock(&self.dead_letters).len(),
            channels: self.channels.iter().map(Channel::status).collect(),
        }
    }

    /// Round-robin from the channel after the last one tried. The cursor moves
    /// one step per channel examined, eligible or not.
    fn select_channel(&self, now: u64) -> Option<usize> {
        let n = self.channels.len();
        if n == 0 {
            return None;
        }
        let mut cursor = lock(&self.cursor);
        for _ in 0..n {
            let idx = *cursor % n;
            *cursor = (idx + 1) % n;
            if self.channels[idx].window().has_capacity(now) {
                return Some(idx);
            }
        }
        None
    }

    fn pop_front(&self) -> Option<Pending> {
        let mut q = lock(&self.queue);
        let p = q.pop_front();
        gauge!("relay_queue_depth").set(q.len() as f64);
        p
    }

    fn push_back(&self, p: Pending) {
        let mut q = lock(&self.queue);
        q.push_back(p);
        gauge!("relay_queue_depth").set(q.len() as f64);
    }

    /// One worker tick at wall-clock second `now`.
    pub async fn deliver_next_at(&self, now: u64) -> DeliveryOutcome {
        let Some(mut pending) = self.pop_front() else {
            return DeliveryOutcome::Idle;
        };

        let Some(idx) = self.select_channel(now) else {
            self.push_back(pending);
            counter!("relay_saturated_total").increment(1);
            return DeliveryOutcome::Saturated;
        };

        let channel = &self.channels[idx];
        // a panicking transport counts as a failed send; the item is requeued
        let sent = AssertUnwindSafe(channel.notifier.send(&pending.item))
            .catch_unwind()
            .await
            .unwrap_or_else(|p| Err(anyhow!("notifier panicked: {}", panic_message(&*p))));
        match sent {
            Ok(()) => {
                channel.window().record_send(now);
                counter!("relay_deliveries_total").increment(1);
                tracing::info!(
                    target: "dispatch",
                    channel = %channel.label,
                    source = pending.item.source(),
                    remaining = self.queue_depth(),
                    "delivered"
                );
                DeliveryOutcome::Delivered { channel: idx }
            }
            Err(e) => {
                counter!("relay_delivery_failures_total").increment(1);
                pending.attempts += 1;
                if self.cfg.max_attempts > 0 && pending.attempts >= self.cfg.max_attempts {
                    tracing::error!(
                        target: "dispatch",
                        channel = %channel.label,
                        error = %format!("{e:#}"),
                        attempts = pending.attempts,
                        id = pending.item.identity(),
                        "delivery failed, giving up"
                    );
                    counter!("relay_dead_letter_total").increment(1);
                    lock(&self.dead_letters).push(pending.item);
                    DeliveryOutcome::DeadLettered { channel: idx }
                } else {
                    tracing::error!(
                        target: "dispatch",
                        channel = %channel.label,
                        error = %format!("{e:#}"),
                        attempts = pending.attempts,
                        "delivery failed, requeued"
                    );
                    self.push_back(pending);
                    DeliveryOutcome::Failed { channel: idx }
                }
            }
        }
    }

    /// Delivery worker. Runs until the process exits.
    pub async fn run_delivery(self: Arc<Self>) {
        tracing::info!(target: "dispatch", channels = self.channels.len(), "delivery worker started");
        loop {
            match self.deliver_next_at(self.now()).await {
                DeliveryOutcome::Idle => {
                    tokio::select! {
                        _ = self.wake.notified() => {}
                        _ = tokio::time::sleep(self.cfg.idle_poll) => {}
                    }
                }
                DeliveryOutcome::Saturated => {
                    tracing::warn!(
                        target: "dispatch",
                        backoff_secs = self.cfg.saturated_backoff.as_secs_f64(),
                        "all channels at rate limit, backing off"
                    );
                    tokio::time::sleep(self.cfg.saturated_backoff).await;
                }
                _ => {}
            }
        }
    }

    /// Periodic status logger. Runs until the process exits.
    pub async fn run_monitor(self: Arc<Self>) {
        loop {
            tokio::time::sleep(self.cfg.monitor_interval).await;
            let status = self.status_snapshot();
            tracing::info!(target: "dispatch", "monitor | {status}");
            if status.queue_depth > self.cfg.queue_high_water {
                tracing::warn!(
                    target: "dispatch",
                    depth = status.queue_depth,
                    high_water = self.cfg.queue_high_water,
                    "delivery queue far behind; check channel limits and endpoints"
                );
            }
        }
    }

    /// Spawn the delivery worker and the monitor.
    pub fn spawn(self: &Arc<Self>) -> (JoinHandle<()>, JoinHandle<()>) {
        let worker = tokio::spawn(Arc::clone(self).run_delivery());
        let monitor = tokio::spawn(Arc::clone(self).run_monitor());
        (worker, monitor)
    }
}

/// Best-effort text of a caught panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

// A poisoned lock only means another task panicked mid-update of plain data;
// keep going with what is there.
fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    match m.lock() {
        Ok(g) => g,
        Err(poison) => poison.into_inner(),
    }
}

fn now_unix() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
