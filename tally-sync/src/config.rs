//! Configuration for the HTTP, realtime and session layers.

use std::time::Duration;

/// Backoff schedule for automatic reconnection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Delay before retry `n`; the last entry repeats.
    pub delays: Vec<Duration>,
    /// Consecutive failed attempts before giving up (`None` = never).
    pub max_attempts: Option<u32>,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            delays: vec![
                Duration::ZERO,
                Duration::from_secs(2),
                Duration::from_secs(10),
                Duration::from_secs(30),
            ],
            max_attempts: None,
        }
    }
}

impl ReconnectPolicy {
    /// Short delays and a bounded number of attempts.
    pub fn for_testing() -> Self {
        Self {
            delays: vec![Duration::ZERO, Duration::from_millis(50), Duration::from_millis(100)],
            max_attempts: Some(3),
        }
    }

    pub fn delay_for(&self, retry: u32) -> Duration {
        let index = (retry as usize).min(self.delays.len().saturating_sub(1));
        self.delays.get(index).copied().unwrap_or(Duration::ZERO)
    }

    pub fn is_exhausted(&self, failed_attempts: u32) -> bool {
        self.max_attempts.is_some_and(|max| failed_attempts >= max)
    }
}

/// Realtime hub configuration.
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// WebSocket endpoint of the hub (`ws://` or `wss://`).
    pub url: String,
    /// Hub method that adds the connection to a group.
    pub join_group_method: String,
    pub reconnect: ReconnectPolicy,
    pub handshake_timeout: Duration,
    /// Client ping interval.
    pub keep_alive_interval: Duration,
    /// Silence after which the connection is considered lost.
    pub server_timeout: Duration,
    /// Wait for a completion message.
    pub invocation_timeout: Duration,
    /// Bounded wait for a connection before `join_group`/`invoke` give up.
    pub connect_wait: Duration,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            url: "ws://127.0.0.1:5000/appHub".to_string(),
            join_group_method: "JoinInventoryGroup".to_string(),
            reconnect: ReconnectPolicy::default(),
            handshake_timeout: Duration::from_secs(15),
            keep_alive_interval: Duration::from_secs(15),
            server_timeout: Duration::from_secs(30),
            invocation_timeout: Duration::from_secs(30),
            connect_wait: Duration::from_secs(30),
        }
    }
}

impl HubConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }

    /// Config for tests: fast retries, short waits.
    pub fn for_testing(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            reconnect: ReconnectPolicy::for_testing(),
            handshake_timeout: Duration::from_secs(2),
            keep_alive_interval: Duration::from_secs(5),
            server_timeout: Duration::from_secs(10),
            invocation_timeout: Duration::from_secs(2),
            connect_wait: Duration::from_secs(2),
            ..Self::default()
        }
    }
}

/// HTTP collaborator configuration.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    /// Base url, e.g. `https://inventory.example.com/`.
    pub base_url: String,
    pub request_timeout: Duration,
    pub connect_timeout: Duration,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:5000/".to_string(),
            request_timeout: Duration::from_secs(15),
            connect_timeout: Duration::from_secs(5),
        }
    }
}

/// Session-level settings.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Pushed topic carrying accepted scans.
    pub item_confirmed_topic: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            item_confirmed_topic: "ItemConfirmed".to_string(),
        }
    }
}

/// Everything a device needs, assembled from the environment.
#[derive(Debug, Clone, Default)]
pub struct TallyConfig {
    pub api: ApiConfig,
    pub hub: HubConfig,
    pub session: SessionConfig,
    /// Bearer token, if one was provided.
    pub token: Option<String>,
}

impl TallyConfig {
    /// Read `TALLY_API_URL`, `TALLY_HUB_URL`, `TALLY_TOKEN` and
    /// `TALLY_ITEM_TOPIC`, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        if let Some(url) = lookup("TALLY_API_URL") {
            config.api.base_url = url;
        }
        if let Some(url) = lookup("TALLY_HUB_URL") {
            config.hub.url = url;
        }
        if let Some(topic) = lookup("TALLY_ITEM_TOPIC") {
            config.session.item_confirmed_topic = topic;
        }
        config.token = lookup("TALLY_TOKEN").filter(|t| !t.trim().is_empty());
        config
    }
}
