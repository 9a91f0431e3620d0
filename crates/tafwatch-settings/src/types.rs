//! Settings type definitions.
//!
//! All types use `#[serde(rename_all = "camelCase", default)]`, so a
//! settings file only needs the keys it changes.

use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Root settings type.
///
/// ```json
/// {
///   "upstream": { "baseUrl": "http://taf.local:8080/api/" },
///   "server": { "port": 9000 }
/// }
/// ```
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TafwatchSettings {
    pub upstream: UpstreamSettings,
    pub retry: RetrySettings,
    pub reconnect: ReconnectSettings,
    pub replica: ReplicaSettings,
    pub server: ServerSettings,
    pub logging: LoggingSettings,
}

impl TafwatchSettings {
    /// Reject combinations the process cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.upstream.base_url.trim().is_empty() {
            return Err(SettingsError::InvalidValue("upstream.baseUrl is empty".into()));
        }
        if self.upstream.ws_url.trim().is_empty() {
            return Err(SettingsError::InvalidValue("upstream.wsUrl is empty".into()));
        }
        if self.retry.backoff_multiplier < 1.0 {
            return Err(SettingsError::InvalidValue(format!(
                "retry.backoffMultiplier must be >= 1.0, got {}",
                self.retry.backoff_multiplier
            )));
        }
        if !(0.0..=1.0).contains(&self.retry.jitter_factor) {
            return Err(SettingsError::InvalidValue(format!(
                "retry.jitterFactor must be within [0, 1], got {}",
                self.retry.jitter_factor
            )));
        }
        if self.reconnect.initial_delay_ms > self.reconnect.max_delay_ms {
            return Err(SettingsError::InvalidValue(
                "reconnect.initialDelayMs exceeds reconnect.maxDelayMs".into(),
            ));
        }
        Ok(())
    }
}

/// Where the trust-assessment server lives.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UpstreamSettings {
    /// Root of the snapshot fetch API; `tmis` is resolved against it.
    pub base_url: String,
    /// Push-stream WebSocket endpoint.
    pub ws_url: String,
    /// Per-request timeout for snapshot fetches.
    pub request_timeout_ms: u64,
    /// Fetch every version of every TMI after each resync.
    pub hydrate_on_resync: bool,
}

impl Default for UpstreamSettings {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8080/api/".to_string(),
            ws_url: "ws://127.0.0.1:8080/ws".to_string(),
            request_timeout_ms: 10_000,
            hydrate_on_resync: true,
        }
    }
}

/// Retry policy for snapshot fetches.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RetrySettings {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_multiplier: f64,
    pub jitter_factor: f64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 500,
            max_delay_ms: 10_000,
            backoff_multiplier: 2.0,
            jitter_factor: 0.2,
        }
    }
}

/// Push-stream reconnect backoff.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ReconnectSettings {
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for ReconnectSettings {
    fn default() -> Self {
        Self {
            initial_delay_ms: 1_000,
            max_delay_ms: 30_000,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ReplicaSettings {
    /// Entries kept in the diagnostic event log; 0 disables it.
    pub event_log_capacity: usize,
}

impl Default for ReplicaSettings {
    fn default() -> Self {
        Self {
            event_log_capacity: 1_000,
        }
    }
}

/// Read-only replica API.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    pub enabled: bool,
    pub host: String,
    /// 0 picks an ephemeral port.
    pub port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            host: "127.0.0.1".to_string(),
            port: 8090,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// `trace`, `debug`, `info`, `warn` or `error`.
    pub level: String,
    /// Per-module overrides, e.g. `{"tafwatch_client": "debug"}`.
    pub modules: std::collections::BTreeMap<String, String>,
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            modules: std::collections::BTreeMap::new(),
            json: false,
        }
    }
}
