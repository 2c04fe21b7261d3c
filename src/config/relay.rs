// src/config/relay.rs
//! Relay configuration: TOML or JSON file, then env overrides.
//!
//! Lookup order:
//! 1) $RELAY_CONFIG_PATH (must exist)
//! 2) config/relay.toml
//! 3) config/relay.json
//! 4) built-in defaults
//!
//! Env overrides applied afterwards: RELAY_WEBHOOKS (comma separated),
//! RELAY_FETCH_INTERVAL_SECS, RELAY_STATE_PATH, RELAY_ARCHIVE_PATH.

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::dedup::DEFAULT_SIMILARITY_THRESHOLD;
use crate::notify::DispatcherCfg;
use crate::pipeline::RelayParams;
use crate::state::StateParams;

pub const ENV_CONFIG_PATH: &str = "RELAY_CONFIG_PATH";
pub const ENV_WEBHOOKS: &str = "RELAY_WEBHOOKS";
pub const ENV_FETCH_INTERVAL: &str = "RELAY_FETCH_INTERVAL_SECS";
pub const ENV_STATE_PATH: &str = "RELAY_STATE_PATH";
pub const ENV_ARCHIVE_PATH: &str = "RELAY_ARCHIVE_PATH";

fn default_fetch_interval_secs() -> u64 {
    30
}
fn default_item_pause_ms() -> u64 {
    1000
}
fn default_cleanup_every_cycles() -> u64 {
    1440
}
fn default_ttl_secs() -> u64 {
    24 * 3600
}
fn default_max_seen() -> usize {
    10_000
}
fn default_recent_capacity() -> usize {
    1000
}
fn default_similarity_threshold() -> f64 {
    DEFAULT_SIMILARITY_THRESHOLD
}
fn default_state_path() -> PathBuf {
    PathBuf::from("data/state.json")
}
fn default_archive_path() -> PathBuf {
    PathBuf::from("data/messages.json")
}
fn default_archive_cap() -> usize {
    1000
}
fn default_utc_offset_hours() -> i32 {
    8
}
fn default_max_per_minute() -> u32 {
    20
}
fn default_request_timeout_secs() -> u64 {
    10
}
fn default_saturated_backoff_secs() -> u64 {
    10
}
fn default_idle_poll_ms() -> u64 {
    500
}
fn default_queue_warn() -> usize {
    100
}
fn default_queue_high_water() -> usize {
    200
}
fn default_monitor_interval_secs() -> u64 {
    30
}
fn default_feed_timeout_secs() -> u64 {
    15
}
fn default_web_dir() -> PathBuf {
    PathBuf::from("web")
}

/// Polling loop and dedup settings (`[relay]`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelaySection {
    #[serde(default = "default_fetch_interval_secs")]
    pub fetch_interval_secs: u64,
    /// Pause between newly accepted items within a cycle.
    #[serde(default = "default_item_pause_ms")]
    pub item_pause_ms: u64,
    /// Sweep the seen identities every N cycles.
    #[serde(default = "default_cleanup_every_cycles")]
    pub cleanup_every_cycles: u64,
    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: u64,
    #[serde(default = "default_max_seen")]
    pub max_seen: usize,
    #[serde(default = "default_recent_capacity")]
    pub recent_capacity: usize,
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f64,
    #[serde(default = "default_state_path")]
    pub state_path: PathBuf,
    #[serde(default = "default_archive_path")]
    pub archive_path: PathBuf,
    #[serde(default = "default_archive_cap")]
    pub archive_cap: usize,
    /// Offset used to render feed timestamps.
    #[serde(default = "default_utc_offset_hours")]
    pub utc_offset_hours: i32,
}

/// Outbound channels (`[dispatch]`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchSection {
    #[serde(default)]
    pub webhooks: Vec<String>,
    #[serde(default = "default_max_per_minute")]
    pub max_per_minute: u32,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_saturated_backoff_secs")]
    pub saturated_backoff_secs: u64,
    #[serde(default = "default_idle_poll_ms")]
    pub idle_poll_ms: u64,
    #[serde(default = "default_queue_warn")]
    pub queue_warn: usize,
    #[serde(default = "default_queue_high_water")]
    pub queue_high_water: usize,
    #[serde(default = "default_monitor_interval_secs")]
    pub monitor_interval_secs: u64,
    /// 0 keeps retrying failed items forever.
    #[serde(default)]
    pub max_attempts: u32,
}

/// One RSS feed (`[[feeds]]`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedSection {
    pub name: String,
    pub url: String,
    #[serde(default = "default_feed_timeout_secs")]
    pub timeout_secs: u64,
}

/// Browse API (`[api]`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiSection {
    /// Static files served at `/`, if the directory exists.
    #[serde(default = "default_web_dir")]
    pub web_dir: PathBuf,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RelayConfig {
    #[serde(default)]
    pub relay: RelaySection,
    #[serde(default)]
    pub dispatch: DispatchSection,
    #[serde(default)]
    pub feeds: Vec<FeedSection>,
    #[serde(default)]
    pub api: ApiSection,
}

impl Default for RelaySection {
    fn default() -> Self {
        Self {
            fetch_interval_secs: default_fetch_interval_secs(),
            item_pause_ms: default_item_pause_ms(),
            cleanup_every_cycles: default_cleanup_every_cycles(),
            ttl_secs: default_ttl_secs(),
            max_seen: default_max_seen(),
            recent_capacity: default_recent_capacity(),
            similarity_threshold: default_similarity_threshold(),
            state_path: default_state_path(),
            archive_path: default_archive_path(),
            archive_cap: default_archive_cap(),
            utc_offset_hours: default_utc_offset_hours(),
        }
    }
}

impl Default for DispatchSection {
    fn default() -> Self {
        Self {
            webhooks: Vec::new(),
            max_per_minute: default_max_per_minute(),
            request_timeout_secs: default_request_timeout_secs(),
            saturated_backoff_secs: default_saturated_backoff_secs(),
            idle_poll_ms: default_idle_poll_ms(),
            queue_warn: default_queue_warn(),
            queue_high_water: default_queue_high_water(),
            monitor_interval_secs: default_monitor_interval_secs(),
            max_attempts: 0,
        }
    }
}

impl Default for ApiSection {
    fn default() -> Self {
        Self {
            web_dir: default_web_dir(),
        }
    }
}

impl RelayConfig {
    /// Load from an explicit path. Supports TOML or JSON.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("reading relay config from {}", path.display()))?;
        let ext = path
            .extension()
            .and_then(|s| s.to_str())
            .unwrap_or_default()
            .to_ascii_lowercase();
        let cfg = parse_config(&content, ext.as_str())
            .with_context(|| format!("parsing relay config {}", path.display()))?;
        Ok(cfg.sanitized())
    }

    /// Load using env var + fallbacks, then apply env overrides.
    pub fn load_default() -> Result<Self> {
        let base = if let Ok(p) = std::env::var(ENV_CONFIG_PATH) {
            let pb = PathBuf::from(p);
            if !pb.exists() {
                return Err(anyhow!("{ENV_CONFIG_PATH} points to non-existent path"));
            }
            Self::load_from(&pb)?
        } else {
            let toml_p = PathBuf::from("config/relay.toml");
            let json_p = PathBuf::from("config/relay.json");
            if toml_p.exists() {
                Self::load_from(&toml_p)?
            } else if json_p.exists() {
                Self::load_from(&json_p)?
            } else {
                Self::default()
            }
        };
        Ok(base.with_env_overrides().sanitized())
    }

    fn with_env_overrides(mut self) -> Self {
        if let Ok(v) = std::env::var(ENV_WEBHOOKS) {
            self.dispatch.webhooks = split_list(&v);
        }
        if let Some(secs) = std::env::var(ENV_FETCH_INTERVAL)
            .ok()
            .and_then(|v| v.trim().parse().ok())
        {
            self.relay.fetch_interval_secs = secs;
        }
        if let Ok(p) = std::env::var(ENV_STATE_PATH) {
            self.relay.state_path = PathBuf::from(p);
        }
        if let Ok(p) = std::env::var(ENV_ARCHIVE_PATH) {
            self.relay.archive_path = PathBuf::from(p);
        }
        self
    }

    /// Clamp values into workable ranges.
    pub fn sanitized(mut self) -> Self {
        let r = &mut self.relay;
        r.fetch_interval_secs = r.fetch_interval_secs.max(1);
        r.cleanup_every_cycles = r.cleanup_every_cycles.max(1);
        r.recent_capacity = r.recent_capacity.max(1);
        r.max_seen = r.max_seen.max(1);
        r.archive_cap = r.archive_cap.max(1);
        if !(0.0..=1.0).contains(&r.similarity_threshold) {
            r.similarity_threshold = default_similarity_threshold();
        }
        r.utc_offset_hours = r.utc_offset_hours.clamp(-23, 23);

        let d = &mut self.dispatch;
        d.webhooks = clean_list(std::mem::take(&mut d.webhooks));
        d.request_timeout_secs = d.request_timeout_secs.max(1);
        d.monitor_interval_secs = d.monitor_interval_secs.max(1);
        if d.queue_high_water < d.queue_warn {
            d.queue_high_water = d.queue_warn;
        }

        self.feeds.retain(|f| !f.name.trim().is_empty() && !f.url.trim().is_empty());
        self
    }

    pub fn state_params(&self) -> StateParams {
        StateParams {
            recent_capacity: self.relay.recent_capacity,
            similarity_threshold: self.relay.similarity_threshold,
            ttl_secs: self.relay.ttl_secs,
            max_seen: self.relay.max_seen,
        }
    }

    pub fn relay_params(&self) -> RelayParams {
        RelayParams {
            fetch_interval: Duration::from_secs(self.relay.fetch_interval_secs),
            item_pause: Duration::from_millis(self.relay.item_pause_ms),
            cleanup_every_cycles: self.relay.cleanup_every_cycles,
        }
    }

    pub fn dispatcher_cfg(&self) -> DispatcherCfg {
        let d = &self.dispatch;
        DispatcherCfg {
            saturated_backoff: Duration::from_secs(d.saturated_backoff_secs),
            idle_poll: Duration::from_millis(d.idle_poll_ms.max(1)),
            queue_warn: d.queue_warn,
            queue_high_water: d.queue_high_water,
            monitor_interval: Duration::from_secs(d.monitor_interval_secs),
            max_attempts: d.max_attempts,
        }
    }
}

fn parse_config(s: &str, hint_ext: &str) -> Result<RelayConfig> {
    if hint_ext == "json" {
        return serde_json::from_str(s).context("invalid JSON relay config");
    }
    match toml::from_str::<RelayConfig>(s) {
        Ok(v) => Ok(v),
        Err(toml_err) => serde_json::from_str(s)
            .map_err(|_| anyhow!(toml_err))
            .context("unsupported relay config format"),
    }
}

fn split_list(s: &str) -> Vec<String> {
    clean_list(s.split(',').map(str::to_string).collect())
}

// Trim, drop empties, keep first-seen order (channel order drives round robin).
fn clean_list(items: Vec<String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(items.len());
    for it in items {
        let t = it.trim();
        if !t.is_empty() && !out.iter().any(|o| o == t) {
            out.push(t.to_string());
        }
    }
    out
}
