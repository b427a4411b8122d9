//! Client configuration.

use std::time::Duration;

use jobwatch_shared::{ws_url_from_api_base, JOBS_WS_PATH};

/// Default delay between an unexpected close and the next connection attempt.
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_millis(3000);

/// Default cap on consecutive reconnect attempts.
pub const DEFAULT_MAX_RECONNECT_ATTEMPTS: u32 = 10;

/// Connection behavior of a [`ConnectionManager`](crate::ws::ConnectionManager).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionConfig {
    /// Call `connect()` as soon as the manager is built.
    pub auto_connect: bool,
    /// Schedule a new `connect()` after an unexpected close.
    pub auto_reconnect: bool,
    /// Fixed delay before each reconnect attempt.
    pub reconnect_delay: Duration,
    /// Maximum consecutive reconnect attempts (0 = unlimited)
    pub max_reconnect_attempts: u32,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            auto_connect: true,
            auto_reconnect: true,
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
            max_reconnect_attempts: DEFAULT_MAX_RECONNECT_ATTEMPTS,
        }
    }
}

impl ConnectionConfig {
    /// Whether another reconnect may be scheduled after `attempts` so far.
    pub fn allows_attempt(&self, attempts: u32) -> bool {
        self.max_reconnect_attempts == 0 || attempts < self.max_reconnect_attempts
    }
}

/// Everything the `jobwatch` binary needs to start.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    pub ws_url: String,
    pub connection: ConnectionConfig,
}

impl ClientConfig {
    /// Load configuration from environment variables.
    ///
    /// Environment variables:
    /// - `JOBWATCH_WS_URL`: full socket URL
    /// - `JOBWATCH_API_BASE`: REST base URL, used to derive the socket URL when
    ///   `JOBWATCH_WS_URL` is unset (default socket URL: "ws://localhost:8000/ws/jobs")
    /// - `JOBWATCH_AUTO_RECONNECT`: "true" | "false" (default: "true")
    /// - `JOBWATCH_RECONNECT_DELAY_MS`: delay in milliseconds (default: 3000)
    /// - `JOBWATCH_MAX_RECONNECT_ATTEMPTS`: cap, 0 for unlimited (default: 10)
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`ClientConfig::from_env`] with an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let ws_url = lookup("JOBWATCH_WS_URL")
            .filter(|url| !url.trim().is_empty())
            .or_else(|| {
                let base = lookup("JOBWATCH_API_BASE")?;
                let url = ws_url_from_api_base(&base);
                if url.is_none() {
                    tracing::warn!(%base, "Ignoring JOBWATCH_API_BASE: not an http(s) URL");
                }
                url
            })
            .unwrap_or_else(|| format!("ws://localhost:8000{}", JOBS_WS_PATH));

        let defaults = ConnectionConfig::default();
        let connection = ConnectionConfig {
            auto_connect: true,
            auto_reconnect: parse_or(&lookup, "JOBWATCH_AUTO_RECONNECT", defaults.auto_reconnect),
            reconnect_delay: Duration::from_millis(parse_or(
                &lookup,
                "JOBWATCH_RECONNECT_DELAY_MS",
                defaults.reconnect_delay.as_millis() as u64,
            )),
            max_reconnect_attempts: parse_or(
                &lookup,
                "JOBWATCH_MAX_RECONNECT_ATTEMPTS",
                defaults.max_reconnect_attempts,
            ),
        };

        Self { ws_url, connection }
    }
}

fn parse_or<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T
where
    T: std::str::FromStr,
{
    let Some(raw) = lookup(key) else {
        return default;
    };
    match raw.trim().to_lowercase().parse() {
        Ok(value) => value,
        Err(_) => {
            tracing::warn!(%key, value = %raw, "Ignoring invalid config value");
            default
        }
    }
}
