// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Response envelopes with stable field names.

use fm_core::{ChildStats, Job, JobId, JobKind, JobStatus, LogEntry, LogOrder};
use serde::{Deserialize, Serialize};

/// One log line in an aggregated response, tagged with its owning job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogLine {
    pub job_id: JobId,
    #[serde(flatten)]
    pub entry: LogEntry,
}

/// Envelope of `GET jobs/{id}/logs`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogsResponse {
    pub job_id: JobId,
    pub logs: Vec<LogEntry>,
    pub count: usize,
    pub limit: usize,
    pub offset: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub level: Option<String>,
}

/// Envelope of `GET jobs/{id}/logs/aggregated`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregatedLogsResponse {
    pub job_id: JobId,
    pub logs: Vec<LogLine>,
    pub count: usize,
    pub limit: usize,
    pub order: LogOrder,
    pub include_children: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,
}

/// Job projection for listings and status displays.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSummary {
    pub id: JobId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<JobId>,
    pub manager_id: JobId,
    pub kind: JobKind,
    pub name: String,
    pub status: JobStatus,
    pub created_at_ms: u64,
    pub updated_at_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub child_stats: ChildStats,
}

impl From<&Job> for JobSummary {
    fn from(job: &Job) -> Self {
        Self {
            id: job.id.clone(),
            parent_id: job.parent_id.clone(),
            manager_id: job.manager_id.clone(),
            kind: job.kind,
            name: job.name.clone(),
            status: job.status,
            created_at_ms: job.created_at_ms,
            updated_at_ms: job.updated_at_ms,
            error: job.error.clone(),
            child_stats: job.child_stats,
        }
    }
}

#[cfg(test)]
#[path = "wire_tests.rs"]
mod tests;
