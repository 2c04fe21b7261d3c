//! news-relay: binary entrypoint
//! Starts the polling relay, the delivery worker and the monitor, then serves
//! the read-only browse API.

use shuttle_axum::ShuttleAxum;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use news_relay::api::{self, ApiState};
use news_relay::bootstrap::RelayRuntime;
use news_relay::metrics::Metrics;
use news_relay::RelayConfig;

/// Compact fmt logs filtered by RUST_LOG (default `news_relay=info,warn`).
/// No-op when the runtime already installed a subscriber.
fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("news_relay=info,warn"));

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().compact())
        .try_init();
}

#[shuttle_runtime::main]
async fn axum() -> ShuttleAxum {
    // Load .env in local/dev; no-op in prod environments.
    let _ = dotenvy::dotenv();
    init_tracing();

    let cfg = RelayConfig::load_default()?;
    let archive_path = cfg.relay.archive_path.clone();
    let web_dir = cfg.api.web_dir.clone();

    // Recorder goes in before any relay component describes its series.
    // One channel per sanitized webhook.
    let metrics = match Metrics::init(cfg.dispatch.max_per_minute, cfg.dispatch.webhooks.len()) {
        Ok(m) => Some(m),
        Err(e) => {
            tracing::warn!(error = %format!("{e:#}"), "metrics disabled");
            None
        }
    };

    let runtime = RelayRuntime::from_config(cfg).await?;
    let _tasks = runtime.start();

    let mut router = api::router(ApiState::new(archive_path), Some(web_dir));
    if let Some(m) = metrics {
        router = router.merge(m.router());
    }

    Ok(router.into())
}
