//! Connection manager configuration.
//!
//! Loaded from TOML. Durations are written as strings (`"30s"`,
//! `"500ms"`, `"2m"`) and resolved into the typed options used by the
//! dialer and the reset retry loop.
//!
//! ```toml
//! meta_addrs = ["10.0.0.1:2379", "10.0.0.2:2379"]
//! store_behavior = "skip_auxiliary"
//! check_requirements = true
//!
//! [keepalive]
//! time = "10s"
//! timeout = "3s"
//!
//! [reset_retry]
//! attempts = 3
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use shardline_meta::SecurityConfig;

use crate::dial::{DialBackoff, DialOptions, Keepalive};
use crate::error::{ConnError, ConnResult};
use crate::retry::RetryPolicy;
use crate::stores::StoreBehavior;

/// Top-level configuration for a [`ConnManager`](crate::ConnManager).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnConfig {
    /// Metadata service endpoints, tried in order.
    pub meta_addrs: Vec<String>,
    /// What to do with auxiliary members during discovery.
    pub store_behavior: StoreBehavior,
    /// Verify member versions before handing out connections.
    pub check_requirements: bool,
    /// Semver requirement every primary member must satisfy.
    pub required_version: String,
    /// TLS material for the metadata service and the members.
    pub security: SecurityConfig,
    pub keepalive: KeepaliveConfig,
    pub dial: DialConfig,
    pub reset_retry: RetryConfig,
}

impl Default for ConnConfig {
    fn default() -> Self {
        Self {
            meta_addrs: vec!["127.0.0.1:2379".to_string()],
            store_behavior: StoreBehavior::default(),
            check_requirements: true,
            required_version: ">=4.0.0".to_string(),
            security: SecurityConfig::default(),
            keepalive: KeepaliveConfig::default(),
            dial: DialConfig::default(),
            reset_retry: RetryConfig::default(),
        }
    }
}

/// Client-side keepalive parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KeepaliveConfig {
    /// Ping interval when the connection is idle.
    pub time: String,
    /// How long to wait for a ping ack before closing.
    pub timeout: String,
    /// Keep pinging even with no active streams.
    pub permit_without_stream: bool,
}

impl Default for KeepaliveConfig {
    fn default() -> Self {
        Self {
            time: "10s".to_string(),
            timeout: "3s".to_string(),
            permit_without_stream: false,
        }
    }
}

/// Channel establishment settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DialConfig {
    /// Overall bound on a blocking dial, including reconnect backoff.
    pub timeout: String,
    /// Bound on a single TCP/TLS connect attempt.
    pub connect_timeout: String,
    pub backoff_base: String,
    pub backoff_max: String,
    pub backoff_multiplier: f64,
}

impl Default for DialConfig {
    fn default() -> Self {
        Self {
            timeout: "30s".to_string(),
            connect_timeout: "5s".to_string(),
            backoff_base: "1s".to_string(),
            backoff_max: "3s".to_string(),
            backoff_multiplier: 1.6,
        }
    }
}

/// Retry budget for resetting a broken member connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub attempts: u32,
    /// Delay after the first failed attempt.
    pub base_delay: String,
    /// Added to the delay after every further failure.
    pub step: String,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            attempts: 3,
            base_delay: "3s".to_string(),
            step: "1s".to_string(),
        }
    }
}

impl ConnConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> anyhow::Result<Self> {
        let config: ConnConfig = toml::from_str(content)?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Parsed `required_version`.
    pub fn version_requirement(&self) -> ConnResult<semver::VersionReq> {
        semver::VersionReq::parse(&self.required_version).map_err(|e| {
            ConnError::Config(format!(
                "required_version {:?}: {e}",
                self.required_version
            ))
        })
    }
}

impl KeepaliveConfig {
    pub fn resolve(&self) -> ConnResult<Keepalive> {
        Ok(Keepalive {
            interval: duration_field("keepalive.time", &self.time)?,
            timeout: duration_field("keepalive.timeout", &self.timeout)?,
            while_idle: self.permit_without_stream,
        })
    }
}

impl DialConfig {
    pub fn resolve(&self) -> ConnResult<DialOptions> {
        if self.backoff_multiplier.is_nan() || self.backoff_multiplier < 1.0 {
            return Err(ConnError::Config(format!(
                "dial.backoff_multiplier must be >= 1.0, got {}",
                self.backoff_multiplier
            )));
        }
        Ok(DialOptions {
            timeout: duration_field("dial.timeout", &self.timeout)?,
            connect_timeout: duration_field("dial.connect_timeout", &self.connect_timeout)?,
            backoff: DialBackoff {
                base: duration_field("dial.backoff_base", &self.backoff_base)?,
                max: duration_field("dial.backoff_max", &self.backoff_max)?,
                multiplier: self.backoff_multiplier,
            },
        })
    }
}

impl RetryConfig {
    pub fn resolve(&self) -> ConnResult<RetryPolicy> {
        if self.attempts == 0 {
            return Err(ConnError::Config(
                "reset_retry.attempts must be at least 1".to_string(),
            ));
        }
        Ok(RetryPolicy {
            attempts: self.attempts,
            base_delay: duration_field("reset_retry.base_delay", &self.base_delay)?,
            step: duration_field("reset_retry.step", &self.step)?,
        })
    }
}

fn duration_field(name: &str, value: &str) -> ConnResult<Duration> {
    parse_duration(value)
        .ok_or_else(|| ConnError::Config(format!("{name}: invalid duration {value:?}")))
}

/// Parse a duration string like "5s", "500ms", "2m", or bare seconds.
pub fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    if let Some(ms) = s.strip_suffix("ms") {
        ms.parse::<u64>().ok().map(Duration::from_millis)
    } else if let Some(secs) = s.strip_suffix('s') {
        secs.parse::<u64>().ok().map(Duration::from_secs)
    } else if let Some(mins) = s.strip_suffix('m') {
        mins.parse::<u64>()
            .ok()
            .and_then(|m| m.checked_mul(60))
            .map(Duration::from_secs)
    } else {
        s.parse::<u64>().ok().map(Duration::from_secs)
    }
}
