//! skywatch.toml configuration parser.

use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context};
use serde::{Deserialize, Serialize};

use crate::filter::Filter;

/// Instance socket the dashboard serves by default.
pub const DEFAULT_URL: &str = "ws://127.0.0.1:8080/instances/ws";

pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5);

/// Connections a session may lose before it gives up.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// Longest heartbeat interval or backoff delay a session accepts.
pub const MAX_DURATION: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SkywatchConfig {
    pub server: Option<ServerConfig>,
    pub connection: Option<ConnectionConfig>,
    pub subscription: Option<SubscriptionConfig>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServerConfig {
    pub url: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConnectionConfig {
    pub heartbeat_interval: Option<String>,
    pub max_attempts: Option<u32>,
    pub backoff_initial: Option<String>,
    pub backoff_max: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SubscriptionConfig {
    pub filter: Option<String>,
}

/// When and how often a dropped connection is re-established.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Lost connections tolerated before giving up for good.
    pub max_attempts: u32,
    /// Delay before the first retry. Zero retries immediately.
    pub backoff_initial: Duration,
    /// Cap for the doubling delay.
    pub backoff_max: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            backoff_initial: Duration::ZERO,
            backoff_max: Duration::from_secs(60),
        }
    }
}

impl ReconnectPolicy {
    /// Delay before retry number `attempt` (1-based): doubles from
    /// `backoff_initial` up to `backoff_max`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        if self.backoff_initial.is_zero() || attempt == 0 {
            return Duration::ZERO;
        }
        let shift = (attempt - 1).min(16);
        self.backoff_initial
            .saturating_mul(1u32 << shift)
            .min(self.backoff_max)
    }
}

/// Fully resolved settings for one sync session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSettings {
    pub url: String,
    pub heartbeat_interval: Duration,
    pub reconnect: ReconnectPolicy,
    pub filter: Filter,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            url: DEFAULT_URL.to_string(),
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            reconnect: ReconnectPolicy::default(),
            filter: Filter::AllInstances,
        }
    }
}

impl SessionSettings {
    /// Reject timings a session cannot schedule.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.heartbeat_interval.is_zero() {
            bail!("heartbeat_interval must be greater than zero");
        }
        for (field, value) in [
            ("heartbeat_interval", self.heartbeat_interval),
            ("backoff_initial", self.reconnect.backoff_initial),
            ("backoff_max", self.reconnect.backoff_max),
        ] {
            if value > MAX_DURATION {
                bail!("{field} must be at most {}s, got {}s", MAX_DURATION.as_secs(), value.as_secs());
            }
        }
        Ok(())
    }
}

impl SkywatchConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> anyhow::Result<Self> {
        let config: SkywatchConfig = toml::from_str(content)?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Resolve the file into session settings, filling in defaults.
    pub fn settings(&self) -> anyhow::Result<SessionSettings> {
        let mut settings = SessionSettings::default();

        if let Some(url) = self.server.as_ref().and_then(|s| s.url.clone()) {
            settings.url = url;
        }

        if let Some(conn) = &self.connection {
            if let Some(s) = &conn.heartbeat_interval {
                settings.heartbeat_interval = duration_field("heartbeat_interval", s)?;
            }
            if let Some(max) = conn.max_attempts {
                settings.reconnect.max_attempts = max;
            }
            if let Some(s) = &conn.backoff_initial {
                settings.reconnect.backoff_initial = duration_field("backoff_initial", s)?;
            }
            if let Some(s) = &conn.backoff_max {
                settings.reconnect.backoff_max = duration_field("backoff_max", s)?;
            }
        }

        if let Some(filter) = self.subscription.as_ref().and_then(|s| s.filter.as_deref()) {
            settings.filter = filter.parse()?;
        }

        settings.validate()?;
        Ok(settings)
    }

    /// Scaffold a config file that spells out every default.
    pub fn scaffold(url: &str) -> Self {
        SkywatchConfig {
            server: Some(ServerConfig {
                url: Some(url.to_string()),
            }),
            connection: Some(ConnectionConfig {
                heartbeat_interval: Some("5s".to_string()),
                max_attempts: Some(DEFAULT_MAX_ATTEMPTS),
                backoff_initial: Some("0s".to_string()),
                backoff_max: Some("60s".to_string()),
            }),
            subscription: Some(SubscriptionConfig {
                filter: Some(Filter::AllInstances.to_string()),
            }),
        }
    }
}

fn duration_field(field: &str, value: &str) -> anyhow::Result<Duration> {
    match parse_duration(value) {
        Some(d) => Ok(d),
        None => bail!("invalid duration for {field}: {value:?}"),
    }
}

/// Parse a duration string like "5s", "500ms", "1m".
pub fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    if let Some(secs) = s.strip_suffix('s') {
        if let Some(ms) = secs.strip_suffix('m') {
            ms.parse::<u64>().ok().map(Duration::from_millis)
        } else {
            secs.parse::<u64>().ok().map(Duration::from_secs)
        }
    } else if let Some(mins) = s.strip_suffix('m') {
        mins.parse::<u64>()
            .ok()
            .and_then(|m| m.checked_mul(60))
            .map(Duration::from_secs)
    } else {
        s.parse::<u64>().ok().map(Duration::from_secs)
    }
}
