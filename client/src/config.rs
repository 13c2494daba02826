//! Configuration management for the sync client.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;
use url::Url;

/// Reconnection policy.
///
/// Serialized with camelCase keys and durations in milliseconds, e.g.
/// `{"maxReconnectDelay": 30000, "backoffGrowthFactor": 2.0}`. Missing keys
/// take their defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ReconnectConfig {
    /// Delay before the first retry
    #[serde(with = "millis")]
    pub initial_delay: Duration,
    /// Upper bound for any retry delay
    #[serde(with = "millis")]
    pub max_reconnect_delay: Duration,
    /// Time allowed for each step of a connection attempt
    #[serde(with = "millis")]
    pub connection_timeout: Duration,
    /// Multiplier applied to the delay after each failure
    pub backoff_growth_factor: f64,
    /// Consecutive failures tolerated before going offline
    pub max_retries: u32,
    /// Random extra delay, as a fraction of the computed delay (0.0 to 1.0)
    pub jitter: f64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(500),
            max_reconnect_delay: Duration::from_secs(30),
            connection_timeout: Duration::from_secs(10),
            backoff_growth_factor: 2.0,
            max_retries: 10,
            jitter: 0.2,
        }
    }
}

impl ReconnectConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if !self.backoff_growth_factor.is_finite() || self.backoff_growth_factor < 1.0 {
            return Err(ConfigError::InvalidValue {
                name: "backoffGrowthFactor",
                value: self.backoff_growth_factor.to_string(),
            });
        }
        if !(0.0..=1.0).contains(&self.jitter) {
            return Err(ConfigError::InvalidValue {
                name: "jitter",
                value: self.jitter.to_string(),
            });
        }
        if self.connection_timeout.is_zero() {
            return Err(ConfigError::InvalidValue {
                name: "connectionTimeout",
                value: "0".into(),
            });
        }
        Ok(())
    }
}

/// Client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base WebSocket URL of the sync server, e.g. `ws://localhost:3000`
    pub server_url: Url,
    /// Retry policy
    pub reconnect: ReconnectConfig,
    /// Interval between keep-alive pings while syncing
    pub ping_interval: Duration,
}

impl ClientConfig {
    pub const DEFAULT_PING_INTERVAL: Duration = Duration::from_secs(25);

    pub fn new(server_url: &str) -> Result<Self, ConfigError> {
        Self::with_reconnect(server_url, ReconnectConfig::default())
    }

    pub fn with_reconnect(server_url: &str, reconnect: ReconnectConfig) -> Result<Self, ConfigError> {
        reconnect.validate()?;
        Ok(Self {
            server_url: parse_server_url(server_url)?,
            reconnect,
            ping_interval: Self::DEFAULT_PING_INTERVAL,
        })
    }

    /// Load configuration from environment variables, after loading a
    /// `.env` file from the working directory if there is one.
    ///
    /// `LISTSYNC_SERVER_URL` is required. Reconnection settings may be
    /// overridden with `LISTSYNC_MAX_RECONNECT_DELAY_MS`,
    /// `LISTSYNC_CONNECTION_TIMEOUT_MS`, `LISTSYNC_BACKOFF_GROWTH_FACTOR` and
    /// `LISTSYNC_MAX_RETRIES`.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Same as [`from_env`](Self::from_env) with variables taken from `lookup`.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let server_url = lookup("LISTSYNC_SERVER_URL")
            .filter(|s| !s.trim().is_empty())
            .ok_or(ConfigError::MissingServerUrl)?;

        let mut reconnect = ReconnectConfig::default();
        if let Some(ms) = parse_var::<u64, _>(&lookup, "LISTSYNC_MAX_RECONNECT_DELAY_MS")? {
            reconnect.max_reconnect_delay = Duration::from_millis(ms);
        }
        if let Some(ms) = parse_var::<u64, _>(&lookup, "LISTSYNC_CONNECTION_TIMEOUT_MS")? {
            reconnect.connection_timeout = Duration::from_millis(ms);
        }
        if let Some(factor) = parse_var::<f64, _>(&lookup, "LISTSYNC_BACKOFF_GROWTH_FACTOR")? {
            reconnect.backoff_growth_factor = factor;
        }
        if let Some(retries) = parse_var::<u32, _>(&lookup, "LISTSYNC_MAX_RETRIES")? {
            reconnect.max_retries = retries;
        }

        Self::with_reconnect(&server_url, reconnect)
    }

    /// WebSocket endpoint for one group.
    pub fn endpoint(&self, group_id: &str, token: &str) -> Url {
        let mut url = self.server_url.clone();
        let base = url.path().trim_end_matches('/').to_string();
        url.set_path(&format!("{base}/sync/{group_id}"));
        url.query_pairs_mut().clear().append_pair("token", token);
        url
    }
}

fn parse_server_url(raw: &str) -> Result<Url, ConfigError> {
    let url = Url::parse(raw.trim()).map_err(|e| ConfigError::InvalidServerUrl {
        url: raw.to_string(),
        reason: e.to_string(),
    })?;
    match url.scheme() {
        "ws" | "wss" => Ok(url),
        other => Err(ConfigError::InvalidServerUrl {
            url: raw.to_string(),
            reason: format!("unsupported scheme {other}"),
        }),
    }
}

fn parse_var<T, F>(lookup: &F, name: &'static str) -> Result<Option<T>, ConfigError>
where
    T: std::str::FromStr,
    F: Fn(&str) -> Option<String>,
{
    match lookup(name) {
        Some(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue { name, value }),
        None => Ok(None),
    }
}

mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis().try_into().unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}
