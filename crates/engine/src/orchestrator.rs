// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Definition execution: turns a job definition into a running
//! manager + step job tree.
//!
//! `run_job_definition` creates the tree, enqueues step work, and returns
//! immediately; execution proceeds asynchronously through the worker pool
//! and monitors. Sequential definitions gate each step on the previous
//! step's `completed` event via a registered continuation keyed by step ID,
//! never a blocking wait.

use crate::error::Result;
use crate::events::{EventService, SubscriptionHandle};
use crate::job_manager::JobManager;
use crate::monitor::{JobMonitor, MonitorConfig, StepMonitor};
use crate::queue::QueueManager;
use crate::steps::StepManager;
use fm_core::{
    Clock, Event, JobConfig, JobDefinition, JobId, JobKind, JobStatus, LogLevel, StepMode,
    StepSpec,
};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

/// Remaining steps of a sequential definition, keyed by the step job whose
/// completion releases them.
struct Continuation {
    manager_id: JobId,
    remaining: VecDeque<(JobId, StepSpec)>,
    /// 1-based position of the next step to enqueue.
    next_position: usize,
    total_steps: usize,
}

pub struct Orchestrator {
    jobs: Arc<JobManager>,
    queue: Arc<QueueManager>,
    steps: Arc<StepManager>,
    events: Arc<EventService>,
    clock: Arc<dyn Clock>,
    monitor_config: MonitorConfig,
    continuations: Mutex<HashMap<JobId, Continuation>>,
    subscription: Mutex<Option<SubscriptionHandle>>,
}

impl Orchestrator {
    pub fn new(
        jobs: Arc<JobManager>,
        queue: Arc<QueueManager>,
        steps: Arc<StepManager>,
        events: Arc<EventService>,
        clock: Arc<dyn Clock>,
        monitor_config: MonitorConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            jobs,
            queue,
            steps,
            events,
            clock,
            monitor_config,
            continuations: Mutex::new(HashMap::new()),
            subscription: Mutex::new(None),
        })
    }

    fn ensure_subscribed(self: &Arc<Self>) {
        let mut slot = self.subscription.lock();
        if slot.is_some() {
            return;
        }
        let orchestrator = Arc::clone(self);
        let handle = self
            .events
            .subscribe(fm_core::topic::JOB_STATUS_CHANGE, move |ev| {
                orchestrator.on_status_event(ev);
            });
        *slot = Some(handle);
    }

    /// Execute a definition: create the manager job and one step job per
    /// StepSpec in declaration order, enqueue step work per the definition's
    /// mode, and return the manager job ID.
    pub fn run_job_definition(
        self: &Arc<Self>,
        def: &JobDefinition,
        source_id: &str,
    ) -> Result<JobId> {
        self.ensure_subscribed();

        let manager_config = JobConfig::new(&def.name)
            .with_meta("definition_id", def.id.as_str())
            .with_meta("source_id", source_id)
            .with_meta("mode", def.mode.to_string())
            .with_meta("total_steps", def.steps.len())
            .with_meta("current_step", 0);
        let manager_id = self.jobs.create_job(JobKind::Manager, None, manager_config)?;
        self.jobs.add_job_log(
            &manager_id,
            LogLevel::Info,
            &format!("starting definition '{}' ({} steps)", def.name, def.steps.len()),
        )?;

        let mut created: Vec<(JobId, StepSpec)> = Vec::with_capacity(def.steps.len());
        let mut step_stats: Vec<Value> = Vec::with_capacity(def.steps.len());
        for (index, spec) in def.steps.iter().enumerate() {
            let step_config = JobConfig::new(&spec.name)
                .with_meta("step_name", spec.name.as_str())
                .with_meta("step_index", index)
                .with_meta("worker", spec.worker.as_str());
            let step_id = self.jobs.create_job(JobKind::Step, Some(&manager_id), step_config)?;
            step_stats.push(json!({
                "step_id": step_id.as_str(),
                "step_index": index,
                "step_name": spec.name,
                "worker": spec.worker,
                "status": JobStatus::Pending.to_string(),
            }));
            created.push((step_id, spec.clone()));
        }
        self.jobs.merge_metadata(
            &manager_id,
            HashMap::from([("step_stats".to_string(), Value::Array(step_stats))]),
        )?;

        // Monitors watch before any work can flow. The configured tolerance
        // applies to worker failures within a step; a failed step always
        // fails its manager.
        let manager = self.jobs.get_job(&manager_id)?;
        JobMonitor::start(
            Arc::clone(&self.jobs),
            Arc::clone(&self.events),
            &manager,
            MonitorConfig::default(),
        );
        for (step_id, _) in &created {
            let step = self.jobs.get_job(step_id)?;
            StepMonitor::start(
                Arc::clone(&self.jobs),
                Arc::clone(&self.events),
                &step,
                self.monitor_config,
            );
        }

        self.jobs.update_status(&manager_id, JobStatus::Running)?;

        match def.mode {
            StepMode::FanOut => {
                let total = created.len();
                for (position, (step_id, spec)) in created.iter().enumerate() {
                    self.enqueue_or_fail(&manager_id, step_id, spec, position + 1, total);
                }
            }
            StepMode::Sequential => {
                let total = created.len();
                let mut remaining: VecDeque<(JobId, StepSpec)> = created.into();
                if let Some((step_id, spec)) = remaining.pop_front() {
                    if !remaining.is_empty() {
                        self.continuations.lock().insert(
                            step_id.clone(),
                            Continuation {
                                manager_id: manager_id.clone(),
                                remaining,
                                next_position: 2,
                                total_steps: total,
                            },
                        );
                    }
                    self.enqueue_or_fail(&manager_id, &step_id, &spec, 1, total);
                }
            }
        }

        Ok(manager_id)
    }

    /// Enqueue a step; an enqueue failure (e.g. an unroutable worker kind)
    /// fails the step job instead of aborting the definition, and the
    /// monitors apply the tolerance policy from there.
    fn enqueue_or_fail(
        &self,
        manager_id: &JobId,
        step_id: &JobId,
        spec: &StepSpec,
        position: usize,
        total: usize,
    ) {
        if let Err(e) = self.enqueue_step(manager_id, step_id, spec, position, total) {
            tracing::error!(step_id = %step_id, error = %e, "failed to enqueue step");
            if let Err(record_err) =
                self.jobs.record_failure(step_id, &format!("failed to enqueue step: {e}"))
            {
                tracing::warn!(step_id = %step_id, error = %record_err, "failed to record step failure");
            }
        }
    }

    fn enqueue_step(
        &self,
        manager_id: &JobId,
        step_id: &JobId,
        spec: &StepSpec,
        position: usize,
        total: usize,
    ) -> Result<()> {
        let message = self.steps.build_message(spec, step_id, self.clock.epoch_ms())?;
        self.queue.enqueue(message)?;
        self.jobs.merge_metadata(
            manager_id,
            HashMap::from([
                ("current_step".to_string(), Value::from(position)),
                ("current_step_id".to_string(), Value::from(step_id.as_str())),
                ("current_step_name".to_string(), Value::from(spec.name.as_str())),
                ("current_step_status".to_string(), Value::from(JobStatus::Running.to_string())),
            ]),
        )?;
        self.jobs.add_job_log_with_context(
            manager_id,
            LogLevel::Info,
            &format!("step '{}' enqueued ({position} of {total})", spec.name),
            &spec.name,
            fm_core::Originator::System,
        )?;
        Ok(())
    }

    /// Registered continuation: a gated step's `completed` event releases
    /// the next step. Any other terminal outcome drops the chain — the
    /// manager's monitor fails the aggregate and cancels what remains.
    fn on_status_event(&self, event: &Event) {
        let Event::JobStatusChange { job_id, status, .. } = event else {
            return;
        };
        if !status.is_terminal() {
            return;
        }
        let Some(continuation) = self.continuations.lock().remove(job_id) else {
            return;
        };

        if *status == JobStatus::Completed {
            self.advance(continuation);
        } else {
            tracing::debug!(
                manager_id = %continuation.manager_id,
                status = %status,
                "dropping step chain after terminal step"
            );
        }
    }

    fn advance(&self, mut continuation: Continuation) {
        let Some((step_id, spec)) = continuation.remaining.pop_front() else {
            return;
        };
        let manager_id = continuation.manager_id.clone();
        let position = continuation.next_position;
        let total = continuation.total_steps;
        continuation.next_position += 1;

        // Register before enqueueing so the next completion event always
        // finds its continuation, even if the step settles instantly.
        if !continuation.remaining.is_empty() {
            self.continuations.lock().insert(step_id.clone(), continuation);
        }

        // An enqueue failure re-enters on_status_event via the failed event
        // and drops the rest of the chain there.
        self.enqueue_or_fail(&manager_id, &step_id, &spec, position, total);
    }

    /// Continuations currently waiting on a step, for diagnostics and tests.
    pub fn pending_continuations(&self) -> usize {
        self.continuations.lock().len()
    }
}

#[cfg(test)]
#[path = "orchestrator_tests.rs"]
mod tests;
