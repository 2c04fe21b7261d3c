// tests/api_http.rs
//
// HTTP-level tests for the browse API Router without opening sockets.
// We exercise the router directly via tower::ServiceExt::oneshot.
//
// Covered:
// - GET /health
// - GET /api/messages (paging, default limit, missing archive)
// - static fallback to the web dir

use axum::{
    body::{self, Body},
    http::{Request, StatusCode},
    Router,
};
use serde_json::Value as Json;
use std::path::Path;
use tower::ServiceExt as _; // for `oneshot`

use news_relay::api::{self, ApiState};
use news_relay::sink::{JsonFileSink, MessageSink};
use news_relay::NewsItem;

const BODY_LIMIT: usize = 1024 * 1024;

async fn seed_archive(path: &Path, n: usize) {
    let sink = JsonFileSink::open(path, 1000).await;
    for i in 0..n {
        let it = NewsItem::new("Flash", "2024-01-01 09:00:00", format!("message {i}"));
        sink.persist(&it).await.expect("persist");
    }
}

async fn get(app: Router, uri: &str) -> (StatusCode, String) {
    let req = Request::builder()
        .method("GET")
        .uri(uri)
        .body(Body::empty())
        .expect("build request");
    let resp = app.oneshot(req).await.expect("oneshot");
    let status = resp.status();
    let bytes = body::to_bytes(resp.into_body(), BODY_LIMIT)
        .await
        .expect("read body");
    (status, String::from_utf8(bytes.to_vec()).expect("utf8"))
}

#[tokio::test]
async fn health_returns_ok() {
    let dir = tempfile::tempdir().unwrap();
    let app = api::router(ApiState::new(dir.path().join("messages.json")), None);

    let (status, body) = get(app, "/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.trim(), "OK");
}

#[tokio::test]
async fn messages_are_paged_newest_first() {
    let dir = tempfile::tempdir().unwrap();
    let archive = dir.path().join("messages.json");
    seed_archive(&archive, 5).await;
    let app = api::router(ApiState::new(&archive), None);

    let (status, body) = get(app.clone(), "/api/messages?skip=1&limit=2").await;
    assert_eq!(status, StatusCode::OK);
    let page: Json = serde_json::from_str(&body).expect("json");
    let page = page.as_array().expect("array");
    assert_eq!(page.len(), 2);
    assert_eq!(page[0]["content"], "message 3");
    assert_eq!(page[1]["content"], "message 2");
    for rec in page {
        for key in ["id", "time", "source", "content"] {
            assert!(rec.get(key).is_some(), "record missing {key}");
        }
    }

    let (_, all) = get(app, "/api/messages").await;
    let all: Json = serde_json::from_str(&all).unwrap();
    assert_eq!(all.as_array().unwrap().len(), 5);
}

#[tokio::test]
async fn missing_archive_is_an_empty_page() {
    let dir = tempfile::tempdir().unwrap();
    let app = api::router(ApiState::new(dir.path().join("absent.json")), None);

    let (status, body) = get(app, "/api/messages").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "[]");
}

#[tokio::test]
async fn unreadable_archive_is_a_server_error() {
    let dir = tempfile::tempdir().unwrap();
    let archive = dir.path().join("messages.json");
    std::fs::write(&archive, "garbage").unwrap();
    let app = api::router(ApiState::new(&archive), None);

    let (status, _) = get(app, "/api/messages").await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
}

#[tokio::test]
async fn unmatched_paths_fall_back_to_the_web_dir() {
    let dir = tempfile::tempdir().unwrap();
    let web = dir.path().join("web");
    std::fs::create_dir_all(&web).unwrap();
    std::fs::write(web.join("index.html"), "<h1>relay</h1>").unwrap();
    let app = api::router(ApiState::new(dir.path().join("m.json")), Some(web));

    let (status, body) = get(app.clone(), "/index.html").await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.contains("relay"));

    // API routes still win over the fallback
    let (status, _) = get(app, "/health").await;
    assert_eq!(status, StatusCode::OK);
}
