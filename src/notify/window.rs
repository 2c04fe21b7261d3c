// src/notify/window.rs
//! Fixed (non-sliding) per-channel send budget.
//!
//! - The window opens at construction (or at the last reset).
//! - Once `now >= window_start + window_secs`, the next check resets it:
//!   `window_start = now`, `sent = 0`.
//! - Bursts at a boundary are possible: `max` sends just before a reset and
//!   `max` more right after.

/// Window length used by channels.
pub const WINDOW_SECS: u64 = 60;

#[derive(Debug, Clone)]
pub struct FixedWindow {
    window_start: u64,
    sent: u32,
    max: u32,
    window_secs: u64,
}

impl FixedWindow {
    /// `max` sends per 60 s window, first window opening at `now`.
    pub fn new(max: u32, now: u64) -> Self {
        Self {
            window_start: now,
            sent: 0,
            max,
            window_secs: WINDOW_SECS,
        }
    }

    /// Reset the window if `now` is past its end.
    fn roll(&mut self, now: u64) {
        if now >= self.window_start.saturating_add(self.window_secs) {
            self.window_start = now;
            self.sent = 0;
        }
    }

    /// Whether one more send fits at `now` (lazily resetting first).
    pub fn has_capacity(&mut self, now: u64) -> bool {
        self.roll(now);
        self.sent < self.max
    }

    /// Count a successful send at `now`. Callers check `has_capacity` first.
    pub fn record_send(&mut self, now: u64) {
        self.roll(now);
        self.sent = self.sent.saturating_add(1);
    }

    pub fn sent_in_window(&self) -> u32 {
        self.sent
    }

    pub fn max_per_window(&self) -> u32 {
        self.max
    }

    pub fn window_start(&self) -> u64 {
        self.window_start
    }
}
