// src/ingest/types.rs
use anyhow::Result;

use crate::item::NewsItem;

/// A news feed adapter. Each call returns the feed's current items or fails;
/// a failure only affects this source for the current cycle.
#[async_trait::async_trait]
pub trait FeedSource: Send + Sync {
    async fn fetch_latest(&self) -> Result<Vec<NewsItem>>;
    fn name(&self) -> &str;
}
