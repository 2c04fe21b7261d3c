// src/api.rs
//! Read-only browse API over the message archive.
//!
//! - `GET /health`                         -> "OK"
//! - `GET /api/messages?skip=0&limit=100`  -> newest-first archive slice
//! - everything else falls through to the static web dir, when present
//!
//! The API only reads the archive file; it never talks to the relay loop.

use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::Deserialize;
use tower_http::{cors::CorsLayer, services::ServeDir};

use crate::sink::read_page;

/// Largest page a client may ask for.
pub const MAX_PAGE: usize = 1000;

#[derive(Clone)]
pub struct ApiState {
    archive_path: Arc<PathBuf>,
}

impl ApiState {
    pub fn new(archive_path: impl Into<PathBuf>) -> Self {
        Self {
            archive_path: Arc::new(archive_path.into()),
        }
    }
}

/// Build the browse router. `web_dir` is served for unmatched paths when it
/// exists on disk.
pub fn router(state: ApiState, web_dir: Option<PathBuf>) -> Router {
    let mut r = Router::new()
        .route("/health", get(|| async { "OK" }))
        .route("/api/messages", get(list_messages))
        .with_state(state);

    if let Some(dir) = web_dir.filter(|d| d.is_dir()) {
        r = r.fallback_service(ServeDir::new(dir));
    }

    r.layer(CorsLayer::very_permissive())
}

#[derive(Debug, Deserialize)]
struct PageQuery {
    #[serde(default)]
    skip: usize,
    #[serde(default = "default_limit")]
    limit: usize,
}

fn default_limit() -> usize {
    100
}

async fn list_messages(State(state): State<ApiState>, Query(q): Query<PageQuery>) -> Response {
    let limit = q.limit.min(MAX_PAGE);
    match read_page(&state.archive_path, q.skip, limit).await {
        Ok(page) => Json(page).into_response(),
        Err(e) => {
            tracing::error!(target: "api", error = %format!("{e:#}"), "reading archive failed");
            (StatusCode::INTERNAL_SERVER_ERROR, "archive unavailable").into_response()
        }
    }
}
