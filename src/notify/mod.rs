// src/notify/mod.rs
//! Outbound notification: channel transports, the fixed-window budget, and
//! the rate-limited multi-channel dispatcher.

pub mod dispatcher;
pub mod webhook;
pub mod window;

use anyhow::Result;

use crate::item::NewsItem;

pub use dispatcher::{
    Channel, ChannelStatus, DeliveryOutcome, Dispatcher, DispatcherCfg, DispatcherStatus,
};
pub use webhook::WebhookNotifier;
pub use window::FixedWindow;

/// One delivery endpoint. `send` must be bounded by its own timeout and
/// return `Err` for anything that is not a confirmed delivery.
#[async_trait::async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, item: &NewsItem) -> Result<()>;

    /// Short, log-safe name for this endpoint.
    fn label(&self) -> String;
}
