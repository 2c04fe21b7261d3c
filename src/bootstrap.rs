// src/bootstrap.rs
use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::config::RelayConfig;
use crate::ingest::providers::rss::RssFeedSource;
use crate::ingest::types::FeedSource;
use crate::notify::{Channel, Dispatcher, WebhookNotifier};
use crate::pipeline::Relay;
use crate::sink::JsonFileSink;
use crate::state::StateStore;

/// Fully wired relay: the polling loop plus its dispatcher.
pub struct RelayRuntime {
    pub cfg: RelayConfig,
    pub relay: Relay,
    pub dispatcher: Arc<Dispatcher>,
}

/// Handles of the three long-running loops.
pub struct RelayTasks {
    pub relay: JoinHandle<()>,
    pub delivery: JoinHandle<()>,
    pub monitor: JoinHandle<()>,
}

impl RelayRuntime {
    pub async fn from_config(cfg: RelayConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("news-relay/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("building http client")?;
        let now = now_unix();

        let sources = build_sources(&cfg, &client);
        let channels = build_channels(&cfg, &client, now);
        // Safe diagnostics only: counts, never webhook URLs
        info!(
            feeds = sources.len(),
            channels = channels.len(),
            max_per_minute = cfg.dispatch.max_per_minute,
            "relay cfg loaded"
        );
        if sources.is_empty() {
            warn!("no feeds configured; the relay will idle");
        }
        if channels.is_empty() {
            warn!("no webhooks configured; items will accumulate in the queue");
        }

        let dispatcher = Arc::new(Dispatcher::new(channels, cfg.dispatcher_cfg()));
        let store = StateStore::load(&cfg.relay.state_path, cfg.state_params(), now);
        let sink = Arc::new(JsonFileSink::open(&cfg.relay.archive_path, cfg.relay.archive_cap).await);
        let relay = Relay::new(
            sources,
            store,
            sink,
            Arc::clone(&dispatcher),
            cfg.relay_params(),
        );

        Ok(Self {
            cfg,
            relay,
            dispatcher,
        })
    }

    /// Spawn the relay cycle, the delivery worker and the monitor.
    pub fn start(self) -> RelayTasks {
        let (delivery, monitor) = self.dispatcher.spawn();
        let relay = tokio::spawn(self.relay.run());
        RelayTasks {
            relay,
            delivery,
            monitor,
        }
    }
}

pub fn build_sources(cfg: &RelayConfig, client: &reqwest::Client) -> Vec<Box<dyn FeedSource>> {
    cfg.feeds
        .iter()
        .map(|f| {
            let src = RssFeedSource::from_url(
                f.name.clone(),
                f.url.clone(),
                client.clone(),
                Duration::from_secs(f.timeout_secs.max(1)),
            )
            .with_utc_offset(cfg.relay.utc_offset_hours);
            Box::new(src) as Box<dyn FeedSource>
        })
        .collect()
}

pub fn build_channels(cfg: &RelayConfig, client: &reqwest::Client, now: u64) -> Vec<Channel> {
    cfg.dispatch
        .webhooks
        .iter()
        .map(|url| {
            let notifier = WebhookNotifier::with_client(client.clone(), url.clone())
                .with_timeout(cfg.dispatch.request_timeout_secs);
            Channel::new(Arc::new(notifier), cfg.dispatch.max_per_minute, now)
        })
        .collect()
}

fn now_unix() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
