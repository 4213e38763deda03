//! Lobby sync configuration

use crate::types::MAX_PARTICIPANTS;
use std::time::Duration;

/// Shortest accepted timer period; tokio intervals reject zero.
pub const MIN_INTERVAL: Duration = Duration::from_millis(1);

/// Lobby sync configuration
#[derive(Debug, Clone)]
pub struct LobbyConfig {
    /// Base URL of the challenge API (e.g., "https://quiz.example.com/api")
    pub api_base_url: String,
    /// Push channel URL template; `{code}` is replaced by the join code.
    /// Derived from `api_base_url` when unset.
    pub push_url: Option<String>,
    /// Base URL used to build shareable join links
    pub share_base_url: Option<String>,
    /// Polling fallback interval (default: 5s)
    pub poll_interval: Duration,
    /// Countdown tick interval (default: 1s)
    pub tick_interval: Duration,
    /// Total lobby time in seconds (default: 300)
    pub countdown_seconds: u64,
    /// Delay between a cancellation/removal notice and navigation (default: 2s)
    pub cancel_grace: Duration,
    /// First reconnect delay (default: 500ms)
    pub reconnect_min: Duration,
    /// Reconnect delay ceiling (default: 10s)
    pub reconnect_max: Duration,
    /// HTTP request timeout (default: 10s)
    pub request_timeout: Duration,
    /// Capacity of the event channel used by `ChannelSink` (default: 64)
    pub event_channel_capacity: usize,
    /// Maximum participants (default: 8)
    pub max_participants: usize,
}

impl Default for LobbyConfig {
    fn default() -> Self {
        Self {
            api_base_url: String::new(),
            push_url: None,
            share_base_url: None,
            poll_interval: Duration::from_secs(5),
            tick_interval: Duration::from_secs(1),
            countdown_seconds: 300,
            cancel_grace: Duration::from_secs(2),
            reconnect_min: Duration::from_millis(500),
            reconnect_max: Duration::from_secs(10),
            request_timeout: Duration::from_secs(10),
            event_channel_capacity: 64,
            max_participants: MAX_PARTICIPANTS,
        }
    }
}

impl LobbyConfig {
    pub fn new(api_base_url: impl Into<String>) -> Self {
        Self {
            api_base_url: api_base_url.into(),
            ..Default::default()
        }
    }

    pub fn push_url(mut self, url: impl Into<String>) -> Self {
        self.push_url = Some(url.into());
        self
    }

    pub fn share_base_url(mut self, url: impl Into<String>) -> Self {
        self.share_base_url = Some(url.into());
        self
    }

    /// Values below 1ms are clamped to 1ms.
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval.max(MIN_INTERVAL);
        self
    }

    /// Values below 1ms are clamped to 1ms.
    pub fn tick_interval(mut self, interval: Duration) -> Self {
        self.tick_interval = interval.max(MIN_INTERVAL);
        self
    }

    pub fn countdown_seconds(mut self, secs: u64) -> Self {
        self.countdown_seconds = secs;
        self
    }

    pub fn cancel_grace(mut self, grace: Duration) -> Self {
        self.cancel_grace = grace;
        self
    }

    pub fn reconnect_backoff(mut self, min: Duration, max: Duration) -> Self {
        self.reconnect_min = min;
        self.reconnect_max = max.max(min);
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Values below 1 are clamped to 1.
    pub fn event_channel_capacity(mut self, capacity: usize) -> Self {
        self.event_channel_capacity = capacity.max(1);
        self
    }

    pub fn max_participants(mut self, n: usize) -> Self {
        self.max_participants = n;
        self
    }

    /// Resolve the push channel URL for a join code.
    ///
    /// Without an explicit template the API base is reused with its scheme
    /// switched to `ws`/`wss`.
    pub fn resolve_push_url(&self, join_code: &str) -> String {
        if let Some(template) = &self.push_url {
            return template.replace("{code}", join_code);
        }
        let base = self.api_base_url.trim_end_matches('/');
        let base = if let Some(rest) = base.strip_prefix("https://") {
            format!("wss://{rest}")
        } else if let Some(rest) = base.strip_prefix("http://") {
            format!("ws://{rest}")
        } else {
            base.to_string()
        };
        format!("{base}/challenges/{join_code}/ws")
    }
}
