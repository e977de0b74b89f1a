// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Query-parameter DTOs with the documented defaults.

use fm_core::LogOrder;
use serde::{Deserialize, Serialize};

pub const DEFAULT_LOGS_LIMIT: usize = 100;
pub const DEFAULT_AGGREGATED_LIMIT: usize = 1000;

fn default_logs_limit() -> usize {
    DEFAULT_LOGS_LIMIT
}

fn default_aggregated_limit() -> usize {
    DEFAULT_AGGREGATED_LIMIT
}

fn default_include_children() -> bool {
    true
}

/// Parameters of `GET jobs/{id}/logs`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct JobLogsQuery {
    pub limit: usize,
    pub offset: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub level: Option<String>,
}

impl Default for JobLogsQuery {
    fn default() -> Self {
        Self { limit: default_logs_limit(), offset: 0, level: None }
    }
}

/// Parameters of `GET jobs/{id}/logs/aggregated`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AggregatedLogsQuery {
    pub limit: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cursor: Option<String>,
    pub order: LogOrder,
    pub include_children: bool,
}

impl Default for AggregatedLogsQuery {
    fn default() -> Self {
        Self {
            limit: default_aggregated_limit(),
            cursor: None,
            order: LogOrder::default(),
            include_children: default_include_children(),
        }
    }
}
