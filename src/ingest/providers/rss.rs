// src/ingest/providers/rss.rs
//! Generic RSS 2.0 feed source, either fetched over HTTP or parsed from an
//! inline document (fixtures, demos).

use anyhow::{Context, Result};
use async_trait::async_trait;
use quick_xml::de::from_str;
use serde::Deserialize;
use std::time::Duration;
use time::{format_description::well_known::Rfc2822, OffsetDateTime};

use crate::ingest::clean_text;
use crate::ingest::types::FeedSource;
use crate::item::{format_local, NewsItem};

#[derive(Debug, Deserialize)]
struct Rss {
    channel: Channel,
}

#[derive(Debug, Deserialize)]
struct Channel {
    #[serde(rename = "item", default)]
    item: Vec<RssItem>,
}

#[derive(Debug, Deserialize)]
struct RssItem {
    title: Option<String>,
    #[serde(rename = "pubDate")]
    pub_date: Option<String>,
    description: Option<String>,
}

fn parse_rfc2822_to_unix(ts: &str) -> Option<i64> {
    OffsetDateTime::parse(ts.trim(), &Rfc2822)
        .ok()
        .map(|dt| dt.unix_timestamp())
}

enum Mode {
    Fixture(String),
    Http {
        url: String,
        client: reqwest::Client,
        timeout: Duration,
    },
}

pub struct RssFeedSource {
    name: String,
    utc_offset_hours: i32,
    mode: Mode,
}

impl RssFeedSource {
    /// Source that parses `xml` on every fetch.
    pub fn from_fixture(name: impl Into<String>, xml: &str) -> Self {
        Self {
            name: name.into(),
            utc_offset_hours: 8,
            mode: Mode::Fixture(xml.to_string()),
        }
    }

    /// Source that GETs `url` on every fetch, bounded by `timeout`.
    pub fn from_url(
        name: impl Into<String>,
        url: impl Into<String>,
        client: reqwest::Client,
        timeout: Duration,
    ) -> Self {
        Self {
            name: name.into(),
            utc_offset_hours: 8,
            mode: Mode::Http {
                url: url.into(),
                client,
                timeout,
            },
        }
    }

    /// Offset used when rendering item timestamps (default UTC+8).
    pub fn with_utc_offset(mut self, hours: i32) -> Self {
        self.utc_offset_hours = hours;
        self
    }

    fn parse_items_from_str(&self, s: &str) -> Result<Vec<NewsItem>> {
        let xml_clean = scrub_html_entities_for_xml(s);
        let rss: Rss = from_str(&xml_clean)
            .with_context(|| format!("parsing rss xml for {}", self.name))?;

        let mut out = Vec::with_capacity(rss.channel.item.len());
        for it in rss.channel.item {
            let title = it.title.as_deref().map(clean_text).unwrap_or_default();
            let body = it.description.as_deref().map(clean_text).unwrap_or_default();
            let content = match (title.is_empty(), body.is_empty()) {
                (false, false) => format!("{title}：{body}"),
                (false, true) => title,
                (true, _) => body,
            };
            if content.is_empty() {
                continue;
            }

            let timestamp = it
                .pub_date
                .as_deref()
                .and_then(parse_rfc2822_to_unix)
                .map(|secs| format_local(secs, self.utc_offset_hours))
                .unwrap_or_default();

            out.push(NewsItem::new(self.name.clone(), timestamp, content));
        }
        Ok(out)
    }
}

#[async_trait]
impl FeedSource for RssFeedSource {
    async fn fetch_latest(&self) -> Result<Vec<NewsItem>> {
        match &self.mode {
            Mode::Fixture(s) => self.parse_items_from_str(s),
            Mode::Http {
                url,
                client,
                timeout,
            } => {
                let body = client
                    .get(url.as_str())
                    .timeout(*timeout)
                    .send()
                    .await
                    .with_context(|| format!("{} http get()", self.name))?
                    .error_for_status()
                    .with_context(|| format!("{} non-2xx", self.name))?
                    .text()
                    .await
                    .with_context(|| format!("{} http .text()", self.name))?;
                self.parse_items_from_str(&body)
            }
        }
    }

    fn name(&self) -> &str {
        &self.name
    }
}

fn scrub_html_entities_for_xml(s: &str) -> String {
    s.replace("&nbsp;", " ")
        .replace("&ndash;", "-")
        .replace("&mdash;", "-")
        .replace("&ldquo;", "\"")
        .replace("&rdquo;", "\"")
        .replace("&lsquo;", "'")
        .replace("&rsquo;", "'")
}
