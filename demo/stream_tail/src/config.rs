use std::fs;
use std::path::Path;

use hive_stream::{ChannelKey, StreamConfig};

/// Configuration for the stream tail demo
#[derive(Clone, Debug)]
pub struct StreamTailConfig {
    pub stream: StreamConfig,
    /// Channels to print; `any` is the wildcard on either side
    pub channels: Vec<ChannelKey>,
    /// Print full event JSON instead of a one-line summary
    pub verbose: bool,
    /// Log dispatcher statistics every N seconds (0 disables)
    pub stats_interval_secs: u64,
}

impl Default for StreamTailConfig {
    fn default() -> Self {
        let root = std::env::var("TAIL_ROOT_ID").unwrap_or_else(|_| "any".to_string());
        let object_type = std::env::var("TAIL_OBJECT_TYPE").unwrap_or_else(|_| "any".to_string());
        Self {
            stream: StreamConfig::default(),
            channels: vec![ChannelKey::parse(&root, &object_type)],
            verbose: std::env::var("TAIL_VERBOSE")
                .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
                .unwrap_or(false),
            stats_interval_secs: std::env::var("TAIL_STATS_INTERVAL_SECS")
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(60),
        }
    }
}

impl StreamTailConfig {
    /// Load configuration from a TOML file (path via STREAM_TAIL_CONFIG or ./stream_tail.toml),
    /// overlaying values onto env-driven defaults.
    pub fn load() -> Self {
        let default = Self::default();
        let path =
            std::env::var("STREAM_TAIL_CONFIG").unwrap_or_else(|_| "stream_tail.toml".into());
        let p = Path::new(&path);
        if !p.exists() {
            tracing::info!(target: "stream_tail", path = %path, "No TOML config found; using defaults/env");
            return default;
        }
        match fs::read_to_string(p) {
            Ok(s) => match toml::from_str::<StreamTailToml>(&s) {
                Ok(t) => t.overlay(default),
                Err(e) => {
                    tracing::warn!(target: "stream_tail", error = %e, "Failed to parse TOML; using defaults");
                    default
                }
            },
            Err(e) => {
                tracing::warn!(target: "stream_tail", error = %e, "Failed to read TOML; using defaults");
                default
            }
        }
    }
}

// =========================
// TOML overlay definitions
// =========================

#[derive(Debug, Clone, Default, serde::Deserialize)]
struct StreamTailToml {
    pub verbose: Option<bool>,
    pub stats_interval_secs: Option<u64>,
    pub stream: Option<StreamToml>,
    #[serde(default)]
    pub channels: Vec<ChannelToml>,
}

impl StreamTailToml {
    fn overlay(self, mut base: StreamTailConfig) -> StreamTailConfig {
        if let Some(v) = self.verbose {
            base.verbose = v;
        }
        if let Some(v) = self.stats_interval_secs {
            base.stats_interval_secs = v;
        }
        if let Some(s) = self.stream {
            s.apply(&mut base.stream);
        }
        if !self.channels.is_empty() {
            base.channels = self.channels.into_iter().map(ChannelToml::key).collect();
        }
        base
    }
}

#[derive(Debug, Clone, Default, serde::Deserialize)]
struct StreamToml {
    pub base_url: Option<String>,
    pub api_key: Option<String>,
    pub request_timeout_ms: Option<u64>,
    pub user_agent: Option<String>,
    pub keep_alive_status: Option<u16>,
}
impl StreamToml {
    fn apply(self, s: &mut StreamConfig) {
        if let Some(v) = self.base_url {
            s.base_url = v;
        }
        if let Some(v) = self.api_key {
            s.api_key = Some(v).filter(|k| !k.is_empty());
        }
        if let Some(v) = self.request_timeout_ms {
            s.request_timeout_ms = v;
        }
        if let Some(v) = self.user_agent {
            s.user_agent = v;
        }
        if let Some(v) = self.keep_alive_status {
            s.keep_alive_status = v;
        }
    }
}

#[derive(Debug, Clone, serde::Deserialize)]
struct ChannelToml {
    #[serde(default = "any")]
    pub root: String,
    #[serde(default = "any")]
    pub object_type: String,
}
impl ChannelToml {
    fn key(self) -> ChannelKey {
        ChannelKey::parse(&self.root, &self.object_type)
    }
}

fn any() -> String {
    "any".to_string()
}
