// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Queue and worker-pool configuration.

use crate::error::{EngineError, Result};
use serde::Deserialize;
use std::time::Duration;

/// Configuration for the queue, worker pool, and monitors.
///
/// Every field can be overridden via `FOREMAN_QUEUE_*` environment
/// variables; durations accept `ms`/`s`/`m`/`h` suffixes.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct QueueConfig {
    pub queue_name: String,
    /// Worker pool size: concurrent poll-execute cycles.
    pub concurrency: usize,
    #[serde(deserialize_with = "de_duration")]
    pub poll_interval: Duration,
    /// How long a received message stays invisible before redelivery.
    #[serde(deserialize_with = "de_duration")]
    pub visibility_timeout: Duration,
    /// Receives allowed before a message is dead-lettered.
    pub max_receive: u32,
    /// Failed children a monitor tolerates before failing the aggregate.
    pub error_tolerance: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            queue_name: "foreman_jobs".to_string(),
            concurrency: 4,
            poll_interval: Duration::from_secs(1),
            visibility_timeout: Duration::from_secs(300),
            max_receive: 3,
            error_tolerance: 0,
        }
    }
}

impl QueueConfig {
    /// Parse from TOML.
    pub fn from_toml(source: &str) -> Result<Self> {
        toml::from_str(source).map_err(|e| EngineError::InvalidConfig(e.to_string()))
    }

    /// Defaults overlaid with `FOREMAN_QUEUE_*` environment variables.
    pub fn from_env() -> Result<Self> {
        Self::default().with_env_overrides()
    }

    /// Apply environment overrides to an existing configuration.
    pub fn with_env_overrides(mut self) -> Result<Self> {
        if let Ok(v) = std::env::var("FOREMAN_QUEUE_NAME") {
            self.queue_name = v;
        }
        if let Ok(v) = std::env::var("FOREMAN_QUEUE_CONCURRENCY") {
            self.concurrency = parse_env("FOREMAN_QUEUE_CONCURRENCY", &v)?;
        }
        if let Ok(v) = std::env::var("FOREMAN_QUEUE_POLL_INTERVAL") {
            self.poll_interval = parse_duration(&v).map_err(EngineError::InvalidConfig)?;
        }
        if let Ok(v) = std::env::var("FOREMAN_QUEUE_VISIBILITY_TIMEOUT") {
            self.visibility_timeout = parse_duration(&v).map_err(EngineError::InvalidConfig)?;
        }
        if let Ok(v) = std::env::var("FOREMAN_QUEUE_MAX_RECEIVE") {
            self.max_receive = parse_env("FOREMAN_QUEUE_MAX_RECEIVE", &v)?;
        }
        if let Ok(v) = std::env::var("FOREMAN_QUEUE_ERROR_TOLERANCE") {
            self.error_tolerance = parse_env("FOREMAN_QUEUE_ERROR_TOLERANCE", &v)?;
        }
        Ok(self)
    }
}

fn parse_env<T: std::str::FromStr>(name: &str, value: &str) -> Result<T> {
    value
        .parse()
        .map_err(|_| EngineError::InvalidConfig(format!("{name}: cannot parse '{value}'")))
}

/// Parse a duration string like `500ms`, `5s`, `5m`, or `2h`.
/// A bare integer is taken as seconds.
pub fn parse_duration(s: &str) -> std::result::Result<Duration, String> {
    let s = s.trim();
    let (digits, unit) = match s.find(|c: char| !c.is_ascii_digit()) {
        Some(pos) => s.split_at(pos),
        None => (s, "s"),
    };
    let n: u64 = digits.parse().map_err(|_| format!("invalid duration '{s}'"))?;
    match unit {
        "ms" => Ok(Duration::from_millis(n)),
        "s" => Ok(Duration::from_secs(n)),
        "m" => Ok(Duration::from_secs(n * 60)),
        "h" => Ok(Duration::from_secs(n * 3600)),
        _ => Err(format!("invalid duration unit '{unit}' in '{s}'")),
    }
}

fn de_duration<'de, D>(deserializer: D) -> std::result::Result<Duration, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    parse_duration(&s).map_err(serde::de::Error::custom)
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
