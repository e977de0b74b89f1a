// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Log retrieval: per-job queries and the aggregated parent+descendant
//! merge with cursor pagination.

use crate::error::{EngineError, Result};
use fm_core::{Job, JobId, LogEntry, LogLevel, LogOrder};
use fm_storage::{keys, KvStore};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use std::sync::Arc;

pub const DEFAULT_LOG_LIMIT: usize = 100;
pub const DEFAULT_AGGREGATED_LIMIT: usize = 1000;

/// Filter for a single job's logs. Newest first.
#[derive(Debug, Clone)]
pub struct LogFilter {
    pub limit: usize,
    pub offset: usize,
    pub level: Option<LogLevel>,
}

impl Default for LogFilter {
    fn default() -> Self {
        Self { limit: DEFAULT_LOG_LIMIT, offset: 0, level: None }
    }
}

/// Query over merged parent + descendant logs.
#[derive(Debug, Clone)]
pub struct AggregatedQuery {
    pub limit: usize,
    /// Opaque resume token from a previous page's `next_cursor`.
    pub cursor: Option<String>,
    pub order: LogOrder,
    pub include_children: bool,
}

impl Default for AggregatedQuery {
    fn default() -> Self {
        Self {
            limit: DEFAULT_AGGREGATED_LIMIT,
            cursor: None,
            order: LogOrder::default(),
            include_children: true,
        }
    }
}

/// One merged line: the owning job plus its entry.
#[derive(Debug, Clone, PartialEq)]
pub struct AggregatedLogLine {
    pub job_id: JobId,
    pub entry: LogEntry,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AggregatedLogs {
    pub entries: Vec<AggregatedLogLine>,
    /// Present only when more entries remain past this page.
    pub next_cursor: Option<String>,
}

/// Merge position: entries sort by `(timestamp, job, index)`.
type CursorKey = (u64, String, u64);

fn entry_key(line: &AggregatedLogLine) -> CursorKey {
    (line.entry.timestamp_ms, line.job_id.to_string(), line.entry.index)
}

fn encode_cursor(key: &CursorKey) -> String {
    BASE64.encode(format!("{}|{}|{}", key.0, key.1, key.2))
}

fn decode_cursor(cursor: &str) -> Result<CursorKey> {
    let invalid = || EngineError::InvalidCursor(cursor.to_string());
    let raw = BASE64.decode(cursor).map_err(|_| invalid())?;
    let raw = String::from_utf8(raw).map_err(|_| invalid())?;
    let mut parts = raw.splitn(3, '|');
    let ts = parts.next().and_then(|p| p.parse().ok()).ok_or_else(invalid)?;
    let job = parts.next().ok_or_else(invalid)?.to_string();
    let index = parts.next().and_then(|p| p.parse().ok()).ok_or_else(invalid)?;
    Ok((ts, job, index))
}

pub struct LogQuery {
    store: Arc<dyn KvStore>,
}

impl LogQuery {
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self { store }
    }

    fn entries_for(&self, job_id: &JobId) -> Result<Vec<LogEntry>> {
        let mut entries = Vec::new();
        for (_, bytes) in self.store.scan_prefix(&keys::log_prefix(job_id))? {
            let entry: LogEntry =
                serde_json::from_slice(&bytes).map_err(fm_storage::StorageError::from)?;
            entries.push(entry);
        }
        Ok(entries)
    }

    /// Logs for one job, newest first. `level` filters exactly; default
    /// limit is 100.
    pub fn job_logs(&self, job_id: &JobId, filter: &LogFilter) -> Result<Vec<LogEntry>> {
        let mut entries = self.entries_for(job_id)?;
        if let Some(level) = filter.level {
            entries.retain(|e| e.level == level);
        }
        entries.reverse();
        Ok(entries.into_iter().skip(filter.offset).take(filter.limit).collect())
    }

    pub fn count_logs(&self, job_id: &JobId) -> Result<usize> {
        Ok(self.store.scan_prefix(&keys::log_prefix(job_id))?.len())
    }

    /// Merged logs for a job and (optionally) all of its descendants,
    /// ordered by `(timestamp, job, index)` in the requested direction, with
    /// an opaque cursor for resumption. The job itself must exist.
    pub fn aggregated(&self, job_id: &JobId, query: &AggregatedQuery) -> Result<AggregatedLogs> {
        if self.store.get(&keys::job(job_id))?.is_none() {
            return Err(EngineError::NotFound(format!("job {job_id}")));
        }

        let mut job_ids = vec![job_id.clone()];
        if query.include_children {
            let mut frontier = vec![job_id.clone()];
            while let Some(parent) = frontier.pop() {
                for key in self.store.scan_by_tag(&keys::parent_tag(&parent))? {
                    if let Some(child) = self.store.get_json::<Job>(&key)? {
                        frontier.push(child.id.clone());
                        job_ids.push(child.id);
                    }
                }
            }
        }

        let mut lines = Vec::new();
        for id in &job_ids {
            for entry in self.entries_for(id)? {
                lines.push(AggregatedLogLine { job_id: id.clone(), entry });
            }
        }

        lines.sort_by_key(entry_key);
        if query.order == LogOrder::Desc {
            lines.reverse();
        }

        if let Some(cursor) = &query.cursor {
            let resume = decode_cursor(cursor)?;
            // Skip everything at or before the cursor in traversal order.
            lines.retain(|line| match query.order {
                LogOrder::Asc => entry_key(line) > resume,
                LogOrder::Desc => entry_key(line) < resume,
            });
        }

        let more = lines.len() > query.limit;
        lines.truncate(query.limit);
        let next_cursor = match (more, lines.last()) {
            (true, Some(last)) => Some(encode_cursor(&entry_key(last))),
            _ => None,
        };

        Ok(AggregatedLogs { entries: lines, next_cursor })
    }
}

#[cfg(test)]
#[path = "logs_tests.rs"]
mod tests;
