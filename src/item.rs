// src/item.rs
//! News item value type with a derived, fixed identity.

use chrono::{DateTime, FixedOffset, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Display format used for item timestamps (`2024-01-01 09:00:00`).
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// One news entry. Immutable after construction; `identity` is computed once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "RawItem", into = "RawItem")]
pub struct NewsItem {
    source: String,
    timestamp: String,
    content: String,
    identity: String,
}

// Wire shape; `uid` is recomputed on read so a tampered file cannot desync it.
#[derive(Serialize, Deserialize)]
struct RawItem {
    source: String,
    timestamp: String,
    content: String,
    #[serde(default)]
    uid: String,
}

impl From<RawItem> for NewsItem {
    fn from(r: RawItem) -> Self {
        NewsItem::new(r.source, r.timestamp, r.content)
    }
}

impl From<NewsItem> for RawItem {
    fn from(it: NewsItem) -> Self {
        RawItem {
            source: it.source,
            timestamp: it.timestamp,
            content: it.content,
            uid: it.identity,
        }
    }
}

impl NewsItem {
    pub fn new(
        source: impl Into<String>,
        timestamp: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        let source = source.into();
        let timestamp = timestamp.into();
        let content = content.into();
        let identity = item_identity(&source, &timestamp, &content);
        Self {
            source,
            timestamp,
            content,
            identity,
        }
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn timestamp(&self) -> &str {
        &self.timestamp
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    /// Parsed timestamp as unix seconds; `i64::MIN` when it cannot be parsed,
    /// so malformed items sort first instead of failing the batch.
    pub fn sort_key(&self) -> i64 {
        parse_timestamp(&self.timestamp).unwrap_or(i64::MIN)
    }

    /// Plain text body sent to notification channels.
    pub fn message_text(&self) -> String {
        format!("📰【{}】{}\n{}", self.source, self.timestamp, self.content)
    }
}

/// Hex SHA-256 of `"{source}_{timestamp}_{content}"`.
pub fn item_identity(source: &str, timestamp: &str, content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(source.as_bytes());
    hasher.update(b"_");
    hasher.update(timestamp.as_bytes());
    hasher.update(b"_");
    hasher.update(content.as_bytes());
    let digest = hasher.finalize();
    let mut out = String::with_capacity(64);
    for b in digest.iter() {
        use std::fmt::Write as _;
        let _ = write!(&mut out, "{:02x}", b);
    }
    out
}

/// Parse an item timestamp into unix seconds.
///
/// Accepts the display format (read as UTC wall clock, which keeps ordering
/// stable regardless of offset) and RFC 3339.
pub fn parse_timestamp(ts: &str) -> Option<i64> {
    let ts = ts.trim();
    if ts.is_empty() {
        return None;
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(ts, TIMESTAMP_FORMAT) {
        return Some(naive.and_utc().timestamp());
    }
    DateTime::parse_from_rfc3339(ts).ok().map(|dt| dt.timestamp())
}

/// Render unix seconds as a display timestamp in the given UTC offset.
/// Out-of-range input yields an empty string.
pub fn format_local(unix_secs: i64, utc_offset_hours: i32) -> String {
    let Some(offset) = FixedOffset::east_opt(utc_offset_hours.clamp(-23, 23) * 3600) else {
        return String::new();
    };
    match Utc.timestamp_opt(unix_secs, 0).single() {
        Some(dt) => dt.with_timezone(&offset).format(TIMESTAMP_FORMAT).to_string(),
        None => String::new(),
    }
}
