// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Job record and status state machine.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

crate::define_id! {
    /// Unique identifier for a job in the manager → step → worker tree.
    pub struct JobId("job-");
}

/// Level of a job within the three-level tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    /// Root of a job tree, one end-to-end execution of a definition
    Manager,
    /// One stage of a definition, child of a manager
    Step,
    /// Leaf unit of dispatched work, child of a step
    Worker,
}

impl JobKind {
    /// The kind a direct child of this kind must have, if children are allowed.
    pub fn child_kind(&self) -> Option<JobKind> {
        match self {
            JobKind::Manager => Some(JobKind::Step),
            JobKind::Step => Some(JobKind::Worker),
            JobKind::Worker => None,
        }
    }
}

crate::simple_display! {
    JobKind {
        Manager => "manager",
        Step => "step",
        Worker => "worker",
    }
}

/// Job lifecycle status: `pending → running → {completed, failed, cancelled}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled)
    }

    /// Whether a transition to `next` is permitted.
    ///
    /// Terminal states are absorbing, with one carve-out: `failed → running`
    /// is allowed so a redelivered queue message can retry the job until its
    /// receive budget is spent. Cancellation is accepted from any
    /// non-terminal state.
    pub fn can_transition(&self, next: JobStatus) -> bool {
        match (self, next) {
            (a, b) if *a == b => false,
            (JobStatus::Pending, _) => true,
            (JobStatus::Running, s) if s != JobStatus::Pending => true,
            (JobStatus::Failed, JobStatus::Running) => true,
            _ => false,
        }
    }
}

crate::simple_display! {
    JobStatus {
        Pending => "pending",
        Running => "running",
        Completed => "completed",
        Failed => "failed",
        Cancelled => "cancelled",
    }
}

/// Aggregated direct-child outcome counts for a parent job.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChildStats {
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
    pub total: usize,
}

impl ChildStats {
    /// Number of children in a terminal state.
    pub fn terminal(&self) -> usize {
        self.completed + self.failed + self.cancelled
    }

    /// True once every child is terminal and at least one child exists.
    pub fn is_settled(&self) -> bool {
        self.total > 0 && self.terminal() >= self.total
    }
}

/// Configuration for creating a new job
#[derive(Debug, Clone, Default)]
pub struct JobConfig {
    pub name: String,
    pub metadata: HashMap<String, Value>,
}

impl JobConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), metadata: HashMap::new() }
    }

    pub fn with_meta(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// A job record.
///
/// Invariant: the parent-pointer graph forms a forest of depth exactly three.
/// Managers have no parent, a step's parent is a manager, a worker's parent
/// is a step, and `manager_id` on every job equals the root of its chain
/// (a manager points at itself).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<JobId>,
    pub manager_id: JobId,
    pub kind: JobKind,
    pub name: String,
    pub status: JobStatus,
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
    pub created_at_ms: u64,
    pub updated_at_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at_ms: Option<u64>,
    /// Set once the job and all of its descendants are terminal.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub child_stats: ChildStats,
    /// Write counter for optimistic concurrency on whole-record updates.
    #[serde(default)]
    pub revision: u64,
}

impl Job {
    /// Create a new pending job. `manager_id` must already be resolved by the
    /// caller (self for managers, the chain root otherwise).
    pub fn new(
        id: JobId,
        kind: JobKind,
        parent_id: Option<JobId>,
        manager_id: JobId,
        config: JobConfig,
        epoch_ms: u64,
    ) -> Self {
        Self {
            id,
            parent_id,
            manager_id,
            kind,
            name: config.name,
            status: JobStatus::Pending,
            metadata: config.metadata,
            created_at_ms: epoch_ms,
            updated_at_ms: epoch_ms,
            started_at_ms: None,
            completed_at_ms: None,
            finished_at_ms: None,
            error: None,
            child_stats: ChildStats::default(),
            revision: 0,
        }
    }

    /// Look up a string metadata value.
    pub fn meta_str(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).and_then(Value::as_str)
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

crate::builder! {
    pub struct JobBuilder => Job {
        into {
            id: JobId = "job-test-1",
            manager_id: JobId = "job-test-1",
            name: String = "test-job",
        }
        set {
            kind: JobKind = JobKind::Manager,
            status: JobStatus = JobStatus::Pending,
            metadata: HashMap<String, Value> = HashMap::new(),
            created_at_ms: u64 = 1_000_000,
            updated_at_ms: u64 = 1_000_000,
            child_stats: ChildStats = ChildStats::default(),
            revision: u64 = 0,
        }
        option {
            parent_id: JobId = None,
            started_at_ms: u64 = None,
            completed_at_ms: u64 = None,
            finished_at_ms: u64 = None,
            error: String = None,
        }
    }
}

#[cfg(test)]
#[path = "job_tests.rs"]
mod tests;
