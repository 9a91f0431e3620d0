//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`TafwatchSettings::default()`]
//! 2. If the settings file exists, deep-merge its values over defaults
//! 3. Apply `TAFWATCH_*` environment variable overrides (highest priority)
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::debug;

use crate::errors::Result;
use crate::types::TafwatchSettings;

/// Resolve the default settings file (`~/.tafwatch/settings.json`).
pub fn settings_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".tafwatch").join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<TafwatchSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// A missing file yields defaults; invalid JSON or an invalid merged
/// result is an error.
pub fn load_settings_from_path(path: &Path) -> Result<TafwatchSettings> {
    let mut settings = load_file_layer(path)?;
    apply_env_overrides(&mut settings);
    settings.validate()?;
    Ok(settings)
}

/// Defaults with the file at `path` merged over them. No env overrides.
pub fn load_file_layer(path: &Path) -> Result<TafwatchSettings> {
    let defaults = serde_json::to_value(TafwatchSettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    Ok(serde_json::from_value(merged)?)
}

/// Recursive deep merge of two JSON values.
pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target_map), Value::Object(source_map)) => {
            for (key, source_val) in source_map {
                if source_val.is_null() {
                    continue;
                }
                let merged = if let Some(target_val) = target_map.remove(&key) {
                    deep_merge(target_val, source_val)
                } else {
                    source_val
                };
                let _ = target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

/// Apply `TAFWATCH_*` overrides from the process environment.
pub fn apply_env_overrides(settings: &mut TafwatchSettings) {
    apply_overrides_from(settings, |name| std::env::var(name).ok());
}

/// Apply overrides read through `lookup`.
///
/// Integers must parse and fall within range, booleans accept
/// `true`/`1`/`yes`/`on` or `false`/`0`/`no`/`off`. Invalid values are
/// logged and ignored.
pub fn apply_overrides_from(settings: &mut TafwatchSettings, lookup: impl Fn(&str) -> Option<String>) {
    let env = EnvReader { lookup };

    // ── Upstream ────────────────────────────────────────────────────
    if let Some(v) = env.string("TAFWATCH_UPSTREAM_URL") {
        settings.upstream.base_url = v;
    }
    if let Some(v) = env.string("TAFWATCH_UPSTREAM_WS_URL") {
        settings.upstream.ws_url = v;
    }
    if let Some(v) = env.u64("TAFWATCH_REQUEST_TIMEOUT_MS", 100, 600_000) {
        settings.upstream.request_timeout_ms = v;
    }
    if let Some(v) = env.bool("TAFWATCH_HYDRATE") {
        settings.upstream.hydrate_on_resync = v;
    }

    // ── Retry / reconnect ───────────────────────────────────────────
    if let Some(v) = env.u64("TAFWATCH_MAX_RETRIES", 0, 100) {
        settings.retry.max_retries = v as u32;
    }
    if let Some(v) = env.u64("TAFWATCH_RECONNECT_MAX_MS", 100, 3_600_000) {
        settings.reconnect.max_delay_ms = v;
    }

    // ── Replica ─────────────────────────────────────────────────────
    if let Some(v) = env.usize("TAFWATCH_EVENT_LOG_CAPACITY", 0, 1_000_000) {
        settings.replica.event_log_capacity = v;
    }

    // ── Read API ────────────────────────────────────────────────────
    if let Some(v) = env.bool("TAFWATCH_SERVER_ENABLED") {
        settings.server.enabled = v;
    }
    if let Some(v) = env.string("TAFWATCH_HOST") {
        settings.server.host = v;
    }
    if let Some(v) = env.u16("TAFWATCH_PORT", 0, 65535) {
        settings.server.port = v;
    }

    // ── Logging ─────────────────────────────────────────────────────
    if let Some(v) = env.string("TAFWATCH_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(v) = env.bool("TAFWATCH_LOG_JSON") {
        settings.logging.json = v;
    }
}

// ── Pure parsing functions ──────────────────────────────────────────────────

/// Parse a string as a boolean.
pub fn parse_bool(val: &str) -> Option<bool> {
    match val.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

pub fn parse_u16_range(val: &str, min: u16, max: u16) -> Option<u16> {
    let n: u16 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

pub fn parse_usize_range(val: &str, min: usize, max: usize) -> Option<usize> {
    let n: usize = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

// ── Env readers ─────────────────────────────────────────────────────────────

struct EnvReader<F> {
    lookup: F,
}

impl<F: Fn(&str) -> Option<String>> EnvReader<F> {
    fn string(&self, name: &str) -> Option<String> {
        (self.lookup)(name).filter(|v| !v.is_empty())
    }

    fn parsed<T>(&self, name: &str, kind: &str, parse: impl FnOnce(&str) -> Option<T>) -> Option<T> {
        let val = (self.lookup)(name)?;
        let result = parse(&val);
        if result.is_none() {
            tracing::warn!(key = name, value = %val, kind, "invalid env var, ignoring");
        }
        result
    }

    fn bool(&self, name: &str) -> Option<bool> {
        self.parsed(name, "bool", parse_bool)
    }

    fn u16(&self, name: &str, min: u16, max: u16) -> Option<u16> {
        self.parsed(name, "u16", |v| parse_u16_range(v, min, max))
    }

    fn u64(&self, name: &str, min: u64, max: u64) -> Option<u64> {
        self.parsed(name, "u64", |v| parse_u64_range(v, min, max))
    }

    fn usize(&self, name: &str, min: usize, max: usize) -> Option<usize> {
        self.parsed(name, "usize", |v| parse_usize_range(v, min, max))
    }
}
