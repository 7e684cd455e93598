use serde::{Deserialize, Serialize};

/// Status the backend uses on a successful poll to announce that the
/// session is about to expire.
pub const KEEP_ALIVE_STATUS: u16 = 220;

/// Connection settings for the stream API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamConfig {
    /// Backend root, e.g. `http://localhost:9000/`
    pub base_url: String,
    /// Sent as a bearer token when present
    pub api_key: Option<String>,
    /// Must exceed the server long-poll window
    pub request_timeout_ms: u64,
    pub user_agent: String,
    pub keep_alive_status: u16,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            base_url: std::env::var("HIVE_BASE_URL")
                .ok()
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| "http://localhost:9000/".to_string()),
            api_key: std::env::var("HIVE_API_KEY").ok().filter(|s| !s.is_empty()),
            request_timeout_ms: std::env::var("HIVE_REQUEST_TIMEOUT_MS")
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(60_000),
            user_agent: std::env::var("HIVE_USER_AGENT")
                .ok()
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| "hive-stream/0.1".to_string()),
            keep_alive_status: KEEP_ALIVE_STATUS,
        }
    }
}

impl StreamConfig {
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }
}
