// tests/webhook_transport.rs
//
// WebhookNotifier against a throwaway local axum server.
// Only a 200 counts as delivered; other statuses and timeouts are errors.

use std::sync::Arc;
use std::time::Duration;

use axum::{extract::State, routing::post, Json, Router};
use http::StatusCode;
use parking_lot::Mutex;
use serde_json::Value;

use news_relay::notify::{Notifier, WebhookNotifier};
use news_relay::NewsItem;

type Received = Arc<Mutex<Vec<Value>>>;

async fn spawn_receiver() -> (String, Received) {
    let received: Received = Arc::new(Mutex::new(Vec::new()));

    let app = Router::new()
        .route(
            "/ok",
            post(|State(r): State<Received>, Json(body): Json<Value>| async move {
                r.lock().push(body);
                StatusCode::OK
            }),
        )
        .route("/accepted", post(|| async { StatusCode::ACCEPTED }))
        .route("/fail", post(|| async { (StatusCode::INTERNAL_SERVER_ERROR, "boom") }))
        .route(
            "/slow",
            post(|| async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                StatusCode::OK
            }),
        )
        .with_state(received.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind");
    let addr = listener.local_addr().expect("addr");
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    (format!("http://{addr}"), received)
}

fn item() -> NewsItem {
    NewsItem::new("Flash", "2024-01-01 09:00:00", "Price up")
}

#[tokio::test]
async fn ok_response_is_a_delivery_with_text_payload() {
    let (base, received) = spawn_receiver().await;
    let n = WebhookNotifier::new(format!("{base}/ok"));

    n.send(&item()).await.expect("delivered");

    let got = received.lock().clone();
    assert_eq!(got.len(), 1);
    assert_eq!(got[0]["msgtype"], "text");
    assert_eq!(
        got[0]["text"]["content"],
        "📰【Flash】2024-01-01 09:00:00\nPrice up"
    );
}

#[tokio::test]
async fn non_200_statuses_are_failures() {
    let (base, _) = spawn_receiver().await;

    let err = WebhookNotifier::new(format!("{base}/fail"))
        .send(&item())
        .await
        .expect_err("500 must fail");
    assert!(format!("{err:#}").contains("500"));

    assert!(WebhookNotifier::new(format!("{base}/accepted"))
        .send(&item())
        .await
        .is_err());
}

#[tokio::test]
async fn slow_endpoint_times_out() {
    let (base, _) = spawn_receiver().await;
    let n = WebhookNotifier::new(format!("{base}/slow")).with_timeout(1);

    let started = std::time::Instant::now();
    assert!(n.send(&item()).await.is_err());
    assert!(started.elapsed() < Duration::from_secs(4));
}

#[tokio::test]
async fn unreachable_endpoint_is_a_failure() {
    // bind then drop to get a port nobody listens on
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let n = WebhookNotifier::new(format!("http://{addr}/hook")).with_timeout(2);
    assert!(n.send(&item()).await.is_err());
}
