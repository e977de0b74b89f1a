// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Event types published on the in-process bus.

use crate::job::{JobId, JobKind, JobStatus};
use crate::log::LogEntry;
use crate::message::MessageId;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// Topic names, one per event variant.
///
/// Subscribers register against these; [`Event::topic`] maps an event to its
/// topic for fan-out.
pub mod topic {
    pub const JOB_LOG: &str = "job_log";
    pub const JOB_STATUS_CHANGE: &str = "job_status_change";
    pub const JOB_UPDATE: &str = "job_update";
    pub const REFRESH_LOGS: &str = "refresh_logs";
    pub const QUEUE_ITEM_DEAD: &str = "queue_item_dead";
}

/// Events published by the engine and consumed by monitors, the orchestrator,
/// and the (out-of-scope) UI transport.
///
/// Serializes with `{"type": "<topic>", ...fields}` format; the wire names
/// are part of the UI contract.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Event {
    #[serde(rename = "job_log")]
    JobLog {
        job_id: JobId,
        manager_id: JobId,
        #[serde(default, skip_serializing_if = "String::is_empty")]
        step_name: String,
        entry: LogEntry,
    },

    #[serde(rename = "job_status_change")]
    JobStatusChange {
        job_id: JobId,
        status: JobStatus,
        manager_id: JobId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        parent_id: Option<JobId>,
        kind: JobKind,
    },

    #[serde(rename = "job_update")]
    JobUpdate { job_id: JobId, metadata: HashMap<String, Value> },

    #[serde(rename = "refresh_logs")]
    RefreshLogs { job_id: JobId, manager_id: JobId },

    #[serde(rename = "queue_item_dead")]
    QueueItemDead { message_id: MessageId, job_id: JobId, receive_count: u32 },
}

impl Event {
    pub fn topic(&self) -> &'static str {
        match self {
            Event::JobLog { .. } => topic::JOB_LOG,
            Event::JobStatusChange { .. } => topic::JOB_STATUS_CHANGE,
            Event::JobUpdate { .. } => topic::JOB_UPDATE,
            Event::RefreshLogs { .. } => topic::REFRESH_LOGS,
            Event::QueueItemDead { .. } => topic::QUEUE_ITEM_DEAD,
        }
    }

    pub fn job_id(&self) -> &JobId {
        match self {
            Event::JobLog { job_id, .. }
            | Event::JobStatusChange { job_id, .. }
            | Event::JobUpdate { job_id, .. }
            | Event::RefreshLogs { job_id, .. }
            | Event::QueueItemDead { job_id, .. } => job_id,
        }
    }
}

#[cfg(test)]
#[path = "event_tests.rs"]
mod tests;
