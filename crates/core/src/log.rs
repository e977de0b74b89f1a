// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-job log entries.

use serde::{Deserialize, Serialize};
use std::str::FromStr;
use thiserror::Error;

/// Severity of a log entry.
///
/// Ordered so publication gating can compare (`debug` entries are persisted
/// but not fanned out to the event bus).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

crate::simple_display! {
    LogLevel {
        Debug => "debug",
        Info => "info",
        Warn => "warn",
        Error => "error",
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown log level '{0}'")]
pub struct ParseLevelError(pub String);

impl FromStr for LogLevel {
    type Err = ParseLevelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "debug" => Ok(LogLevel::Debug),
            "info" => Ok(LogLevel::Info),
            "warn" => Ok(LogLevel::Warn),
            "error" => Ok(LogLevel::Error),
            other => Err(ParseLevelError(other.to_string())),
        }
    }
}

/// Which layer of the job tree produced a log entry.
///
/// Serializes as `"step"`, `"worker"`, or `""` (system/monitor code), the
/// values the UI transport expects.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Originator {
    #[serde(rename = "step")]
    Step,
    #[serde(rename = "worker")]
    Worker,
    #[default]
    #[serde(rename = "")]
    System,
}

crate::simple_display! {
    Originator {
        Step => "step",
        Worker => "worker",
        System => "",
    }
}

/// Sort order for log retrieval.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogOrder {
    Asc,
    #[default]
    Desc,
}

crate::simple_display! {
    LogOrder {
        Asc => "asc",
        Desc => "desc",
    }
}

/// One log line belonging to exactly one job.
///
/// `index` is per-job, 1-based, strictly increasing with no gaps; assignment
/// is serialized by the job manager even under concurrent writers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub index: u64,
    pub timestamp_ms: u64,
    pub level: LogLevel,
    pub message: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub step_name: String,
    #[serde(default)]
    pub originator: Originator,
}

impl LogEntry {
    pub fn new(index: u64, timestamp_ms: u64, level: LogLevel, message: impl Into<String>) -> Self {
        Self {
            index,
            timestamp_ms,
            level,
            message: message.into(),
            step_name: String::new(),
            originator: Originator::System,
        }
    }

    pub fn with_context(mut self, step_name: impl Into<String>, originator: Originator) -> Self {
        self.step_name = step_name.into();
        self.originator = originator;
        self
    }
}

#[cfg(test)]
#[path = "log_tests.rs"]
mod tests;
