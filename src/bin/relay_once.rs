//! Run a single relay cycle against the configured feeds and webhooks, drain
//! the delivery queue, and exit. Handy for checking a config by hand.

use std::time::Duration;

use news_relay::bootstrap::RelayRuntime;
use news_relay::notify::DeliveryOutcome;
use news_relay::RelayConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    tracing_subscriber::fmt().with_target(false).init();

    let cfg = RelayConfig::load_default()?;
    let mut rt = RelayRuntime::from_config(cfg).await?;

    let report = rt.relay.run_cycle().await;
    println!("{report:?}");

    if rt.dispatcher.channel_count() == 0 {
        println!("no webhooks configured; {} item(s) left undelivered", rt.dispatcher.queue_depth());
        return Ok(());
    }

    let backoff = rt.dispatcher.cfg().saturated_backoff;
    loop {
        match rt.dispatcher.deliver_next_at(rt.dispatcher.now()).await {
            DeliveryOutcome::Idle => break,
            DeliveryOutcome::Saturated => tokio::time::sleep(backoff).await,
            DeliveryOutcome::Failed { .. } => tokio::time::sleep(Duration::from_secs(1)).await,
            _ => {}
        }
    }

    println!("relay-once done: {}", rt.dispatcher.status_snapshot());
    Ok(())
}
