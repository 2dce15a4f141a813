use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::ConfigError;

pub const DEFAULT_URL: &str = "ws://127.0.0.1:3001/ws";
pub const DEFAULT_BACKOFF_MS: [u64; 5] = [1_000, 2_000, 4_000, 8_000, 16_000];
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// Connection settings, loadable from a `[connection]` TOML table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ConnectionConfig {
    /// Base `ws://` or `wss://` endpoint.
    pub url: String,
    /// Query parameter that carries the credential.
    pub token_param: String,
    /// Delay before each reconnect attempt; the last entry repeats.
    pub backoff_ms: Vec<u64>,
    /// Consecutive unexpected closes tolerated before giving up.
    pub max_attempts: u32,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_URL.to_string(),
            token_param: "token".to_string(),
            backoff_ms: DEFAULT_BACKOFF_MS.to_vec(),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }
}

impl ConnectionConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }

    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.base_url()?;
        if self.backoff_ms.is_empty() {
            return Err(ConfigError::EmptyBackoff);
        }
        if self.token_param.trim().is_empty() {
            return Err(ConfigError::EmptyTokenParam);
        }
        Ok(())
    }

    fn base_url(&self) -> Result<Url, ConfigError> {
        let url = Url::parse(&self.url).map_err(|source| ConfigError::InvalidUrl {
            url: self.url.clone(),
            source,
        })?;
        match url.scheme() {
            "ws" | "wss" => Ok(url),
            other => Err(ConfigError::UnsupportedScheme(other.to_string())),
        }
    }

    /// The URL to dial for `token`: the base URL with the credential appended
    /// as a query parameter (percent-encoded).
    pub fn endpoint(&self, token: &str) -> Result<String, ConfigError> {
        let mut url = self.base_url()?;
        url.query_pairs_mut().append_pair(&self.token_param, token);
        Ok(url.into())
    }

    pub fn reconnect_policy(&self) -> ReconnectPolicy {
        ReconnectPolicy {
            delays: self
                .backoff_ms
                .iter()
                .copied()
                .map(Duration::from_millis)
                .collect(),
            max_attempts: self.max_attempts,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectPolicy {
    delays: Vec<Duration>,
    max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        ConnectionConfig::default().reconnect_policy()
    }
}

impl ReconnectPolicy {
    /// Delay before reconnect attempt number `attempt` (0-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let last = self.delays.len().saturating_sub(1);
        let idx = usize::try_from(attempt).unwrap_or(usize::MAX).min(last);
        self.delays.get(idx).copied().unwrap_or_default()
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }
}
