// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Monitors driving the hierarchical state machine.
//!
//! Each monitor subscribes to status-change events scoped to one parent's
//! direct children, recomputes child stats on every terminal event, and
//! rolls the outcome up: worker outcomes settle steps (StepMonitor), step
//! outcomes settle managers (JobMonitor). When failures exceed the
//! configured tolerance the monitor cooperatively cancels the remaining
//! siblings before failing the aggregate.

use crate::config::QueueConfig;
use crate::error::Result;
use crate::events::{EventService, SubscriptionHandle};
use crate::job_manager::JobManager;
use fm_core::{ChildStats, Event, Job, JobId, JobStatus, LogLevel, Originator};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, Default)]
pub struct MonitorConfig {
    /// Failed children tolerated before the aggregate is failed.
    pub error_tolerance: usize,
}

impl From<&QueueConfig> for MonitorConfig {
    fn from(config: &QueueConfig) -> Self {
        Self { error_tolerance: config.error_tolerance }
    }
}

/// Terminal status for a parent given its children's outcomes.
fn aggregate_status(stats: ChildStats, tolerance: usize) -> JobStatus {
    if stats.failed > tolerance {
        JobStatus::Failed
    } else if stats.cancelled > 0 && stats.completed < stats.total {
        JobStatus::Cancelled
    } else {
        JobStatus::Completed
    }
}

struct Watch {
    jobs: Arc<JobManager>,
    events: Arc<EventService>,
    /// The job whose children this watch aggregates.
    subject_id: JobId,
    subject_name: String,
    manager_id: JobId,
    /// Step watches report into the manager's `step_stats`; the manager
    /// watch does not.
    is_step: bool,
    config: MonitorConfig,
    done: AtomicBool,
    handle: Mutex<Option<SubscriptionHandle>>,
}

impl Watch {
    fn start(
        jobs: Arc<JobManager>,
        events: Arc<EventService>,
        subject: &Job,
        is_step: bool,
        config: MonitorConfig,
    ) {
        let watch = Arc::new(Watch {
            jobs,
            events: Arc::clone(&events),
            subject_id: subject.id.clone(),
            subject_name: subject.name.clone(),
            manager_id: subject.manager_id.clone(),
            is_step,
            config,
            done: AtomicBool::new(false),
            handle: Mutex::new(None),
        });
        let observer = Arc::clone(&watch);
        let handle =
            events.subscribe(fm_core::topic::JOB_STATUS_CHANGE, move |ev| observer.on_event(ev));
        *watch.handle.lock() = Some(handle);
    }

    fn on_event(&self, event: &Event) {
        let Event::JobStatusChange { job_id, status, parent_id, .. } = event else {
            return;
        };
        if !status.is_terminal() || self.done.load(Ordering::Acquire) {
            return;
        }

        if job_id == &self.subject_id {
            // Settled outside this watch: a step completed directly by the
            // dispatcher (no children spawned), or an external cancellation.
            self.finalize_external(*status);
            return;
        }
        if parent_id.as_ref() != Some(&self.subject_id) {
            return;
        }
        if let Err(e) = self.check() {
            tracing::warn!(
                job_id = %self.subject_id,
                error = %e,
                "monitor aggregation failed"
            );
        }
    }

    fn stats(&self) -> Result<ChildStats> {
        Ok(self
            .jobs
            .get_job_child_stats(std::slice::from_ref(&self.subject_id))?
            .remove(&self.subject_id)
            .unwrap_or_default())
    }

    fn check(&self) -> Result<()> {
        let mut stats = self.stats()?;
        self.jobs.set_child_stats(&self.subject_id, stats)?;

        if !stats.is_settled() {
            if stats.failed <= self.config.error_tolerance {
                return Ok(());
            }
            // Tolerance exceeded: cooperatively cancel the remaining
            // pending/running siblings before failing the aggregate.
            let stopped = self.jobs.stop_all_child_jobs(&self.subject_id)?;
            tracing::info!(
                job_id = %self.subject_id,
                failed = stats.failed,
                stopped,
                "error tolerance exceeded; cancelled remaining children"
            );
            stats = self.stats()?;
            self.jobs.set_child_stats(&self.subject_id, stats)?;
            if !stats.is_settled() {
                return Ok(());
            }
        }

        if self.done.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let status = aggregate_status(stats, self.config.error_tolerance);
        match status {
            JobStatus::Failed => {
                self.jobs.record_failure(
                    &self.subject_id,
                    &format!("{} of {} child jobs failed", stats.failed, stats.total),
                )?;
            }
            status => {
                self.jobs.update_status(&self.subject_id, status)?;
            }
        }
        self.jobs.set_finished(&self.subject_id)?;
        self.report(status, stats)?;
        self.unsubscribe();
        Ok(())
    }

    fn finalize_external(&self, status: JobStatus) {
        if self.done.swap(true, Ordering::AcqRel) {
            return;
        }
        let stats = self.stats().unwrap_or_default();
        if let Err(e) = self
            .jobs
            .set_child_stats(&self.subject_id, stats)
            .and_then(|_| self.jobs.set_finished(&self.subject_id))
            .and_then(|_| self.report(status, stats))
        {
            tracing::warn!(job_id = %self.subject_id, error = %e, "monitor finalization failed");
        }
        self.unsubscribe();
    }

    fn report(&self, status: JobStatus, stats: ChildStats) -> Result<()> {
        if self.is_step {
            self.jobs.update_step_stat(&self.manager_id, &self.subject_id, status, Some(stats))?;
            self.jobs.add_job_log_with_context(
                &self.subject_id,
                LogLevel::Info,
                &format!(
                    "step finished: {} completed, {} failed of {} jobs",
                    stats.completed, stats.failed, stats.total
                ),
                &self.subject_name,
                Originator::Step,
            )?;
            // Observers re-fetch instead of relying on incremental events.
            self.events.publish(Event::RefreshLogs {
                job_id: self.subject_id.clone(),
                manager_id: self.manager_id.clone(),
            });
        } else {
            self.jobs.add_job_log(
                &self.subject_id,
                LogLevel::Info,
                &format!(
                    "manager finished: {} completed, {} failed, {} cancelled of {} steps",
                    stats.completed, stats.failed, stats.cancelled, stats.total
                ),
            )?;
        }
        tracing::debug!(job_id = %self.subject_id, status = %status, "monitor settled job");
        Ok(())
    }

    fn unsubscribe(&self) {
        if let Some(handle) = self.handle.lock().take() {
            self.events.unsubscribe(&handle);
        }
    }
}

/// Manager-level monitor: aggregates step outcomes into the manager job.
pub struct JobMonitor;

impl JobMonitor {
    pub fn start(
        jobs: Arc<JobManager>,
        events: Arc<EventService>,
        manager: &Job,
        config: MonitorConfig,
    ) {
        Watch::start(jobs, events, manager, false, config);
    }
}

/// Step-level monitor: aggregates worker outcomes into the step job and the
/// manager's `step_stats` metadata.
pub struct StepMonitor;

impl StepMonitor {
    pub fn start(
        jobs: Arc<JobManager>,
        events: Arc<EventService>,
        step: &Job,
        config: MonitorConfig,
    ) {
        Watch::start(jobs, events, step, true, config);
    }
}

#[cfg(test)]
#[path = "monitor_tests.rs"]
mod tests;
