// tests/dispatch_fairness.rs
//
// Round-robin order and per-channel window budgets under synthetic time.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use rand::{rngs::StdRng, Rng, SeedableRng};

use news_relay::notify::{Channel, DeliveryOutcome, Dispatcher, DispatcherCfg, Notifier};
use news_relay::NewsItem;

const T0: u64 = 1_700_000_000;

#[derive(Default)]
struct Sink {
    got: Mutex<Vec<String>>,
}

#[async_trait]
impl Notifier for Sink {
    async fn send(&self, item: &NewsItem) -> Result<()> {
        self.got.lock().unwrap().push(item.identity().to_string());
        Ok(())
    }
    fn label(&self) -> String {
        "sink".into()
    }
}

fn items(n: usize) -> Vec<NewsItem> {
    (0..n)
        .map(|i| NewsItem::new("F", "2024-01-01 09:00:00", format!("headline number {i}")))
        .collect()
}

#[tokio::test]
async fn channels_take_turns() {
    let sink = Arc::new(Sink::default());
    let d = Dispatcher::new(
        vec![
            Channel::new(sink.clone(), 20, T0),
            Channel::new(sink.clone(), 20, T0),
        ],
        DispatcherCfg::default(),
    );
    for it in items(6) {
        d.enqueue(it);
    }

    let mut used = Vec::new();
    while let DeliveryOutcome::Delivered { channel } = d.deliver_next_at(T0).await {
        used.push(channel);
    }
    assert_eq!(used, vec![0, 1, 0, 1, 0, 1]);
}

#[tokio::test]
async fn exhausted_channel_is_skipped_until_its_window_resets() {
    let sink = Arc::new(Sink::default());
    let d = Dispatcher::new(
        vec![
            Channel::new(sink.clone(), 1, T0),
            Channel::new(sink.clone(), 10, T0),
        ],
        DispatcherCfg::default(),
    );
    for it in items(5) {
        d.enqueue(it);
    }

    let mut used = Vec::new();
    for _ in 0..4 {
        match d.deliver_next_at(T0).await {
            DeliveryOutcome::Delivered { channel } => used.push(channel),
            other => panic!("unexpected {other:?}"),
        }
    }
    assert_eq!(used, vec![0, 1, 1, 1]);

    // channel 0 is usable again after 60 s
    assert_eq!(
        d.deliver_next_at(T0 + 60).await,
        DeliveryOutcome::Delivered { channel: 0 }
    );
}

#[tokio::test]
async fn zero_budget_channel_never_sends() {
    let sink = Arc::new(Sink::default());
    let d = Dispatcher::new(vec![Channel::new(sink.clone(), 0, T0)], DispatcherCfg::default());
    d.enqueue(items(1).remove(0));

    for dt in [0, 60, 3600] {
        assert_eq!(d.deliver_next_at(T0 + dt).await, DeliveryOutcome::Saturated);
    }
    assert!(sink.got.lock().unwrap().is_empty());
}

#[tokio::test]
async fn random_schedules_respect_budgets_and_deliver_everything_once() {
    let mut rng = StdRng::seed_from_u64(0x5eed);

    for _round in 0..20 {
        let n_channels = rng.random_range(1..=4usize);
        let caps: Vec<u32> = (0..n_channels).map(|_| rng.random_range(1..=5u32)).collect();
        let total = rng.random_range(0..=60usize);

        let sinks: Vec<Arc<Sink>> = (0..n_channels).map(|_| Arc::new(Sink::default())).collect();
        let channels = sinks
            .iter()
            .zip(&caps)
            .map(|(s, cap)| Channel::new(s.clone(), *cap, T0))
            .collect();
        let d = Dispatcher::new(channels, DispatcherCfg::default());
        let batch = items(total);
        for it in batch.clone() {
            d.enqueue(it);
        }

        let mut now = T0;
        // per channel: (window start, sends in it)
        let mut windows: Vec<(u64, u32)> = vec![(T0, 0); n_channels];
        let mut guard = 0;
        loop {
            guard += 1;
            assert!(guard < 10_000, "dispatcher made no progress");
            match d.deliver_next_at(now).await {
                DeliveryOutcome::Idle => break,
                DeliveryOutcome::Delivered { channel } => {
                    let w = &mut windows[channel];
                    if now >= w.0 + 60 {
                        *w = (now, 0);
                    }
                    w.1 += 1;
                    assert!(w.1 <= caps[channel], "channel {channel} over budget");
                }
                DeliveryOutcome::Saturated => now += rng.random_range(1..=30u64),
                other => panic!("unexpected {other:?}"),
            }
            if rng.random_bool(0.1) {
                now += rng.random_range(0..=5u64);
            }
        }

        let delivered: Vec<String> = sinks
            .iter()
            .flat_map(|s| s.got.lock().unwrap().clone())
            .collect();
        assert_eq!(delivered.len(), total);
        let unique: HashSet<&String> = delivered.iter().collect();
        assert_eq!(unique.len(), total);
        for it in &batch {
            assert!(unique.contains(&it.identity().to_string()));
        }
    }
}

#[tokio::test(start_paused = true)]
async fn spawned_worker_delivers_concurrent_enqueues_exactly_once() {
    let sink = Arc::new(Sink::default());
    let d = Arc::new(Dispatcher::new(
        vec![Channel::new(sink.clone(), 5, 0)],
        DispatcherCfg {
            saturated_backoff: Duration::from_secs(10),
            // long idle poll: only an enqueue wake-up can start a delivery quickly
            idle_poll: Duration::from_secs(3600),
            monitor_interval: Duration::from_secs(30),
            queue_warn: 2,
            queue_high_water: 4,
            ..DispatcherCfg::default()
        },
    ));
    let (worker, monitor) = d.spawn();

    let batch = items(12);
    let producer = {
        let d = d.clone();
        let batch = batch.clone();
        tokio::spawn(async move {
            for it in batch {
                d.enqueue(it);
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
        })
    };
    producer.await.unwrap();

    // 5 per 60 s window: the rest waits out saturation backoffs
    let mut waited = 0;
    while sink.got.lock().unwrap().len() < 12 && waited < 600 {
        tokio::time::sleep(Duration::from_secs(1)).await;
        waited += 1;
    }
    assert!(waited > 60, "budget must hold items past the first window");

    let got = sink.got.lock().unwrap().clone();
    assert_eq!(got.len(), 12);
    let unique: HashSet<&String> = got.iter().collect();
    assert_eq!(unique.len(), 12);
    for it in &batch {
        assert!(unique.contains(&it.identity().to_string()));
    }
    assert_eq!(d.queue_depth(), 0);

    // an idle worker is woken by enqueue, not by the hour-long idle poll
    tokio::time::sleep(Duration::from_secs(120)).await;
    d.enqueue(NewsItem::new("F", "", "late breaking"));
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(sink.got.lock().unwrap().len(), 13);

    assert!(!worker.is_finished());
    assert!(!monitor.is_finished());
    worker.abort();
    monitor.abort();
}
