// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Job lifecycle, hierarchy, and per-job logging.
//!
//! The JobManager exclusively owns job mutation. Monitors and the dispatcher
//! change `status`/`child_stats`/`error` through this API, never the store
//! directly; read-modify-write runs under a per-job lock so racing callers
//! cannot lose updates.

use crate::error::{EngineError, Result};
use crate::events::EventService;
use fm_core::{
    ChildStats, Clock, Event, Job, JobConfig, JobId, JobKind, JobStatus, LogEntry, LogLevel,
    Originator,
};
use fm_storage::{keys, KvStore};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Hard bound on parent-chain walks during context resolution.
pub const MAX_CONTEXT_DEPTH: usize = 64;

/// Parent constraint for [`JobFilter`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParentFilter {
    /// Jobs with no parent (managers).
    Root,
    /// Direct children of one job.
    Job(JobId),
}

/// Filter for [`JobManager::list_jobs`] / [`JobManager::count_jobs`].
#[derive(Debug, Clone, Default)]
pub struct JobFilter {
    pub parent: Option<ParentFilter>,
    pub kind: Option<JobKind>,
    /// Empty matches every status.
    pub statuses: Vec<JobStatus>,
    pub limit: Option<usize>,
    pub offset: usize,
}

impl JobFilter {
    pub fn roots() -> Self {
        Self { parent: Some(ParentFilter::Root), ..Self::default() }
    }

    pub fn children_of(parent: &JobId) -> Self {
        Self { parent: Some(ParentFilter::Job(parent.clone())), ..Self::default() }
    }
}

/// Result of resolving a job's logging context from its parent chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedContext {
    pub step_name: String,
    pub originator: Originator,
    pub manager_id: JobId,
}

pub struct JobManager {
    store: Arc<dyn KvStore>,
    events: Arc<EventService>,
    clock: Arc<dyn Clock>,
    /// Per-job mutual exclusion for read-modify-write cycles.
    locks: Mutex<HashMap<JobId, Arc<Mutex<()>>>>,
    /// Next log index per job; single-writer monotonic counters.
    log_seq: Mutex<HashMap<JobId, u64>>,
}

impl JobManager {
    pub fn new(store: Arc<dyn KvStore>, events: Arc<EventService>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            events,
            clock,
            locks: Mutex::new(HashMap::new()),
            log_seq: Mutex::new(HashMap::new()),
        }
    }

    fn job_lock(&self, id: &JobId) -> Arc<Mutex<()>> {
        Arc::clone(self.locks.lock().entry(id.clone()).or_default())
    }

    fn put_job(&self, job: &Job) -> Result<()> {
        let tags = match &job.parent_id {
            Some(parent) => vec![keys::parent_tag(parent)],
            None => Vec::new(),
        };
        self.store.put_json(&keys::job(&job.id), job, &tags)?;
        Ok(())
    }

    fn publish_status(&self, job: &Job) {
        self.events.publish(Event::JobStatusChange {
            job_id: job.id.clone(),
            status: job.status,
            manager_id: job.manager_id.clone(),
            parent_id: job.parent_id.clone(),
            kind: job.kind,
        });
    }

    /// Create a job. Hierarchy is enforced: managers have no parent, steps
    /// hang off managers, workers off steps.
    pub fn create_job(
        &self,
        kind: JobKind,
        parent_id: Option<&JobId>,
        config: JobConfig,
    ) -> Result<JobId> {
        let (parent_id, manager_id, id) = match (kind, parent_id) {
            (JobKind::Manager, None) => {
                let id = JobId::new();
                (None, id.clone(), id)
            }
            (JobKind::Manager, Some(parent)) => {
                return Err(EngineError::CorruptHierarchy(format!(
                    "manager job cannot have parent {parent}"
                )));
            }
            (kind, None) => {
                return Err(EngineError::CorruptHierarchy(format!("{kind} job requires a parent")));
            }
            (kind, Some(parent_id)) => {
                let parent = self.get_job(parent_id)?;
                if parent.kind.child_kind() != Some(kind) {
                    return Err(EngineError::CorruptHierarchy(format!(
                        "{} job {} cannot parent a {} job",
                        parent.kind, parent.id, kind
                    )));
                }
                let manager_id = match kind {
                    JobKind::Step => parent.id.clone(),
                    _ => parent.manager_id.clone(),
                };
                (Some(parent_id.clone()), manager_id, JobId::new())
            }
        };

        let job = Job::new(
            id.clone(),
            kind,
            parent_id,
            manager_id,
            config,
            self.clock.epoch_ms(),
        );
        self.put_job(&job)?;
        tracing::debug!(job_id = %job.id, kind = %kind, "job created");
        self.publish_status(&job);
        Ok(id)
    }

    pub fn get_job(&self, id: &JobId) -> Result<Job> {
        self.store
            .get_json(&keys::job(id))?
            .ok_or_else(|| EngineError::NotFound(format!("job {id}")))
    }

    /// Whole-record update with optimistic concurrency: the caller's
    /// `revision` must match the stored one or the update is rejected.
    pub fn update_job(&self, mut job: Job) -> Result<Job> {
        let lock = self.job_lock(&job.id);
        let _guard = lock.lock();

        let current = self.get_job(&job.id)?;
        if current.revision != job.revision {
            return Err(EngineError::Conflict(format!(
                "job {} revision {} is stale (stored {})",
                job.id, job.revision, current.revision
            )));
        }
        job.revision += 1;
        job.updated_at_ms = self.clock.epoch_ms();
        self.put_job(&job)?;

        self.events.publish(Event::JobUpdate {
            job_id: job.id.clone(),
            metadata: job.metadata.clone(),
        });
        Ok(job)
    }

    /// Read-modify-write one job under its lock.
    fn with_job(&self, id: &JobId, mutate: impl FnOnce(&mut Job) -> Result<()>) -> Result<Job> {
        let lock = self.job_lock(id);
        let _guard = lock.lock();

        let mut job = self.get_job(id)?;
        mutate(&mut job)?;
        job.revision += 1;
        job.updated_at_ms = self.clock.epoch_ms();
        self.put_job(&job)?;
        Ok(job)
    }

    pub fn list_jobs(&self, filter: &JobFilter) -> Result<Vec<Job>> {
        let mut jobs = self.matching_jobs(filter)?;
        // Newest first, stable on id for records created in the same tick.
        jobs.sort_by(|a, b| {
            b.created_at_ms.cmp(&a.created_at_ms).then_with(|| b.id.cmp(&a.id))
        });
        let jobs: Vec<Job> = jobs.into_iter().skip(filter.offset).collect();
        match filter.limit {
            Some(limit) => Ok(jobs.into_iter().take(limit).collect()),
            None => Ok(jobs),
        }
    }

    pub fn count_jobs(&self, filter: &JobFilter) -> Result<usize> {
        Ok(self.matching_jobs(filter)?.len())
    }

    fn matching_jobs(&self, filter: &JobFilter) -> Result<Vec<Job>> {
        // Children-of queries go through the tag index instead of a full scan.
        let candidates: Vec<Job> = match &filter.parent {
            Some(ParentFilter::Job(parent)) => self.children(parent)?,
            _ => {
                let mut jobs = Vec::new();
                for (_, bytes) in self.store.scan_prefix(keys::JOB_PREFIX)? {
                    let job: Job = serde_json::from_slice(&bytes)
                        .map_err(fm_storage::StorageError::from)?;
                    jobs.push(job);
                }
                jobs
            }
        };

        Ok(candidates
            .into_iter()
            .filter(|job| match &filter.parent {
                Some(ParentFilter::Root) => job.parent_id.is_none(),
                _ => true,
            })
            .filter(|job| filter.kind.map_or(true, |k| job.kind == k))
            .filter(|job| filter.statuses.is_empty() || filter.statuses.contains(&job.status))
            .collect())
    }

    /// Direct children of a job, oldest first.
    pub fn children(&self, parent: &JobId) -> Result<Vec<Job>> {
        let mut jobs = Vec::new();
        for key in self.store.scan_by_tag(&keys::parent_tag(parent))? {
            if let Some(job) = self.store.get_json::<Job>(&key)? {
                jobs.push(job);
            }
        }
        jobs.sort_by(|a, b| a.created_at_ms.cmp(&b.created_at_ms).then_with(|| a.id.cmp(&b.id)));
        Ok(jobs)
    }

    /// Direct-child outcome counts for each existing parent.
    pub fn get_job_child_stats(&self, parent_ids: &[JobId]) -> Result<HashMap<JobId, ChildStats>> {
        let mut stats = HashMap::new();
        for parent in parent_ids {
            if self.store.get(&keys::job(parent))?.is_none() {
                continue;
            }
            let children = self.children(parent)?;
            let mut s = ChildStats { total: children.len(), ..ChildStats::default() };
            for child in &children {
                match child.status {
                    JobStatus::Completed => s.completed += 1,
                    JobStatus::Failed => s.failed += 1,
                    JobStatus::Cancelled => s.cancelled += 1,
                    JobStatus::Pending | JobStatus::Running => {}
                }
            }
            stats.insert(parent.clone(), s);
        }
        Ok(stats)
    }

    /// Delete a job and cascade to its descendants, their logs, and any
    /// still-queued messages. Deleting a nonexistent job is not an error and
    /// reports zero cascades.
    pub fn delete_job(&self, id: &JobId) -> Result<usize> {
        if self.store.get(&keys::job(id))?.is_none() {
            return Ok(0);
        }

        let mut pending = vec![id.clone()];
        let mut doomed = Vec::new();
        while let Some(next) = pending.pop() {
            for child in self.children(&next)? {
                pending.push(child.id.clone());
            }
            doomed.push(next);
        }

        for job_id in &doomed {
            for (key, _) in self.store.scan_prefix(&keys::log_prefix(job_id))? {
                self.store.delete(&key)?;
            }
            for key in self.store.scan_by_tag(&keys::job_msg_tag(job_id))? {
                self.store.delete(&key)?;
            }
            self.store.delete(&keys::job(job_id))?;
            self.log_seq.lock().remove(job_id);
            self.locks.lock().remove(job_id);
        }

        tracing::info!(job_id = %id, deleted = doomed.len(), "job deleted with cascade");
        Ok(doomed.len())
    }

    /// Duplicate a job's configuration under a new ID with status reset to
    /// pending. Descendants are not copied.
    pub fn copy_job(&self, id: &JobId) -> Result<JobId> {
        let source = self.get_job(id)?;
        let now = self.clock.epoch_ms();
        let copy_id = JobId::new();
        let manager_id = match source.kind {
            JobKind::Manager => copy_id.clone(),
            _ => source.manager_id.clone(),
        };
        let copy = Job {
            id: copy_id.clone(),
            parent_id: source.parent_id.clone(),
            manager_id,
            kind: source.kind,
            name: format!("{} (copy)", source.name),
            status: JobStatus::Pending,
            metadata: source.metadata.clone(),
            created_at_ms: now,
            updated_at_ms: now,
            started_at_ms: None,
            completed_at_ms: None,
            finished_at_ms: None,
            error: None,
            child_stats: ChildStats::default(),
            revision: 0,
        };
        self.put_job(&copy)?;
        self.publish_status(&copy);
        Ok(copy_id)
    }

    /// Transition a job's status. Terminal states are absorbing except for
    /// the `failed → running` retry carve-out; a same-status call is an
    /// idempotent no-op.
    pub fn update_status(&self, id: &JobId, status: JobStatus) -> Result<Job> {
        let now = self.clock.epoch_ms();
        let mut changed = false;
        let job = self.with_job(id, |job| {
            if job.status == status {
                return Ok(());
            }
            if !job.status.can_transition(status) {
                return Err(EngineError::Conflict(format!(
                    "job {} cannot move {} -> {}",
                    job.id, job.status, status
                )));
            }
            job.status = status;
            if status == JobStatus::Running && job.started_at_ms.is_none() {
                job.started_at_ms = Some(now);
            }
            if status.is_terminal() {
                job.completed_at_ms = Some(now);
            }
            changed = true;
            Ok(())
        })?;

        if changed {
            // Logging is non-critical; a failed append must not fail the
            // transition.
            if let Err(e) =
                self.add_job_log(id, LogLevel::Info, &format!("status changed: {status}"))
            {
                tracing::warn!(job_id = %id, error = %e, "failed to append status log");
            }
            self.publish_status(&job);
        }
        Ok(job)
    }

    /// Record an error on a job without settling it: the error and a log
    /// line are attached and a status-change event is published at the
    /// current status. Used for transient failures that the queue will
    /// retry.
    pub fn record_error(&self, id: &JobId, reason: &str) -> Result<Job> {
        let job = self.with_job(id, |job| {
            job.error = Some(reason.to_string());
            Ok(())
        })?;
        if let Err(e) = self.add_job_log(id, LogLevel::Error, reason) {
            tracing::warn!(job_id = %id, error = %e, "failed to append error log");
        }
        self.publish_status(&job);
        Ok(job)
    }

    /// Record an error message and mark the job failed where the state
    /// machine allows it; an already-terminal job keeps its status but the
    /// error is still attached.
    pub fn record_failure(&self, id: &JobId, reason: &str) -> Result<Job> {
        let now = self.clock.epoch_ms();
        let mut became_failed = false;
        let job = self.with_job(id, |job| {
            job.error = Some(reason.to_string());
            if job.status != JobStatus::Failed && job.status.can_transition(JobStatus::Failed) {
                job.status = JobStatus::Failed;
                job.completed_at_ms = Some(now);
                became_failed = true;
            }
            Ok(())
        })?;

        if let Err(e) = self.add_job_log(id, LogLevel::Error, reason) {
            tracing::warn!(job_id = %id, error = %e, "failed to append error log");
        }
        if became_failed {
            self.publish_status(&job);
        }
        Ok(job)
    }

    /// Stamp `finished_at`; called by monitors once the job and all of its
    /// descendants are terminal.
    pub fn set_finished(&self, id: &JobId) -> Result<Job> {
        let now = self.clock.epoch_ms();
        self.with_job(id, |job| {
            if job.finished_at_ms.is_none() {
                job.finished_at_ms = Some(now);
            }
            Ok(())
        })
    }

    /// Merge entries into a job's metadata and publish a `job_update` event.
    pub fn merge_metadata(&self, id: &JobId, entries: HashMap<String, Value>) -> Result<Job> {
        let job = self.with_job(id, |job| {
            job.metadata.extend(entries);
            Ok(())
        })?;
        self.events.publish(Event::JobUpdate {
            job_id: job.id.clone(),
            metadata: job.metadata.clone(),
        });
        Ok(job)
    }

    pub fn set_child_stats(&self, id: &JobId, stats: ChildStats) -> Result<Job> {
        self.with_job(id, |job| {
            job.child_stats = stats;
            Ok(())
        })
    }

    /// Update one step's entry in the manager's `step_stats` metadata array,
    /// and `current_step_status` when it is the current step. Called by the
    /// StepMonitor as steps finish.
    pub fn update_step_stat(
        &self,
        manager_id: &JobId,
        step_id: &JobId,
        status: JobStatus,
        stats: Option<ChildStats>,
    ) -> Result<Job> {
        let job = self.with_job(manager_id, |job| {
            let is_current = job.meta_str("current_step_id") == Some(step_id.as_str());
            if let Some(Value::Array(entries)) = job.metadata.get_mut("step_stats") {
                for entry in entries {
                    let Some(obj) = entry.as_object_mut() else { continue };
                    if obj.get("step_id").and_then(Value::as_str) != Some(step_id.as_str()) {
                        continue;
                    }
                    obj.insert("status".to_string(), Value::from(status.to_string()));
                    if let Some(stats) = stats {
                        obj.insert("child_count".to_string(), Value::from(stats.total));
                        obj.insert("completed_children".to_string(), Value::from(stats.completed));
                        obj.insert("failed_children".to_string(), Value::from(stats.failed));
                    }
                    break;
                }
            }
            if is_current {
                job.metadata.insert("current_step_status".to_string(), Value::from(status.to_string()));
            }
            Ok(())
        })?;
        self.events.publish(Event::JobUpdate {
            job_id: job.id.clone(),
            metadata: job.metadata.clone(),
        });
        Ok(job)
    }

    /// Cancel all pending/running descendants of `parent` and drop their
    /// queued messages. Cooperative: a worker mid-execute is not interrupted;
    /// the dispatcher skips cancelled jobs on redelivery.
    pub fn stop_all_child_jobs(&self, parent: &JobId) -> Result<usize> {
        let mut count = 0;
        for child in self.children(parent)? {
            if child.kind.child_kind().is_some() {
                count += self.stop_all_child_jobs(&child.id)?;
            }
            if matches!(child.status, JobStatus::Pending | JobStatus::Running) {
                self.update_status(&child.id, JobStatus::Cancelled)?;
                for key in self.store.scan_by_tag(&keys::job_msg_tag(&child.id))? {
                    if key.starts_with("msg:") {
                        self.store.delete(&key)?;
                    }
                }
                count += 1;
            }
        }
        Ok(count)
    }

    // -- logging --

    /// Append a log entry, resolving step context from the job's metadata or
    /// its parent chain.
    pub fn add_job_log(&self, id: &JobId, level: LogLevel, message: &str) -> Result<u64> {
        let ctx = self.resolve_job_context(id)?;
        self.append_log(id, level, message, &ctx.step_name, ctx.originator, &ctx.manager_id)
    }

    /// Append a log entry with an explicit originator; step name is still
    /// resolved from the chain.
    pub fn add_job_log_with_originator(
        &self,
        id: &JobId,
        level: LogLevel,
        message: &str,
        originator: Originator,
    ) -> Result<u64> {
        let ctx = self.resolve_job_context(id)?;
        self.append_log(id, level, message, &ctx.step_name, originator, &ctx.manager_id)
    }

    /// Append a log entry with explicit step name and originator, bypassing
    /// resolution entirely.
    pub fn add_job_log_with_context(
        &self,
        id: &JobId,
        level: LogLevel,
        message: &str,
        step_name: &str,
        originator: Originator,
    ) -> Result<u64> {
        let job = self.get_job(id)?;
        self.append_log(id, level, message, step_name, originator, &job.manager_id)
    }

    fn append_log(
        &self,
        id: &JobId,
        level: LogLevel,
        message: &str,
        step_name: &str,
        originator: Originator,
        manager_id: &JobId,
    ) -> Result<u64> {
        let index = self.next_log_index(id)?;
        let entry = LogEntry::new(index, self.clock.epoch_ms(), level, message)
            .with_context(step_name, originator);
        self.store.put_json(&keys::log(id, index), &entry, &[])?;

        // Best-effort fan-out, info and above. The entry is durable either
        // way; observers reconcile via pull.
        if level >= LogLevel::Info {
            self.events.publish(Event::JobLog {
                job_id: id.clone(),
                manager_id: manager_id.clone(),
                step_name: step_name.to_string(),
                entry,
            });
        }
        Ok(index)
    }

    /// Assign the next per-job index. Serialized by the counter map lock;
    /// the first append for a job seeds the counter from the store.
    fn next_log_index(&self, id: &JobId) -> Result<u64> {
        let mut seq = self.log_seq.lock();
        let next = match seq.get(id) {
            Some(last) => last + 1,
            None => {
                let existing = self.store.scan_prefix(&keys::log_prefix(id))?;
                let last = match existing.last() {
                    Some((_, bytes)) => {
                        let entry: LogEntry = serde_json::from_slice(bytes)
                            .map_err(fm_storage::StorageError::from)?;
                        entry.index
                    }
                    None => 0,
                };
                last + 1
            }
        };
        seq.insert(id.clone(), next);
        Ok(next)
    }

    /// Resolve `(step_name, originator, manager_id)` for a job.
    ///
    /// The job's own `step_name` metadata wins; otherwise the parent chain
    /// is walked upward until a step is found or the chain ends. The walk is
    /// bounded and revisits fail with `CorruptHierarchy` rather than looping.
    pub fn resolve_job_context(&self, id: &JobId) -> Result<ResolvedContext> {
        let job = self.get_job(id)?;
        let originator = match job.kind {
            JobKind::Manager => Originator::System,
            JobKind::Step => Originator::Step,
            JobKind::Worker => Originator::Worker,
        };
        let done = |step_name: String| ResolvedContext {
            step_name,
            originator,
            manager_id: job.manager_id.clone(),
        };

        if let Some(name) = job.meta_str("step_name") {
            return Ok(done(name.to_string()));
        }
        if job.kind == JobKind::Step {
            return Ok(done(job.name.clone()));
        }

        let mut visited: HashSet<JobId> = HashSet::from([job.id.clone()]);
        let mut cursor = job.parent_id.clone();
        let mut depth = 0;
        while let Some(parent_id) = cursor {
            depth += 1;
            if depth > MAX_CONTEXT_DEPTH {
                return Err(EngineError::CorruptHierarchy(format!(
                    "parent chain for job {id} exceeds depth {MAX_CONTEXT_DEPTH}"
                )));
            }
            if !visited.insert(parent_id.clone()) {
                return Err(EngineError::CorruptHierarchy(format!(
                    "parent chain for job {id} revisits {parent_id}"
                )));
            }
            let parent = match self.get_job(&parent_id) {
                Ok(parent) => parent,
                // Broken chain: fall back to no step context.
                Err(EngineError::NotFound(_)) => break,
                Err(e) => return Err(e),
            };
            if let Some(name) = parent.meta_str("step_name") {
                return Ok(done(name.to_string()));
            }
            if parent.kind == JobKind::Step {
                return Ok(done(parent.name.clone()));
            }
            cursor = parent.parent_id;
        }

        Ok(done(String::new()))
    }
}

#[cfg(test)]
#[path = "job_manager_tests.rs"]
mod tests;
