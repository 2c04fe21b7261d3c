// src/lib.rs
// Public library surface for the binary and integration tests.

pub mod api;
pub mod bootstrap;
pub mod config;
pub mod dedup;
pub mod item;
pub mod metrics;
pub mod pipeline;
pub mod sink;
pub mod state;

// Feed adapters
pub mod ingest;

// Channels, rate limiting and the delivery worker
pub mod notify;

// ---- Re-exports for stable public API ----
pub use crate::config::RelayConfig;
pub use crate::item::NewsItem;
pub use crate::notify::{Channel, Dispatcher, DispatcherCfg};
pub use crate::pipeline::{CycleReport, Relay, RelayParams};
pub use crate::state::{StateParams, StateStore};
