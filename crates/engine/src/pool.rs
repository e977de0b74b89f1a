// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Worker pool: polls the queue and dispatches messages to registered
//! workers.
//!
//! Per received message: unknown routing key is a permanent failure (the
//! message is acknowledged and the job failed, never redelivered); a worker
//! error is left unacknowledged so the lease expires and the queue retries;
//! a panic is caught at the dispatch boundary and converted into a recorded
//! failure.

use crate::config::QueueConfig;
use crate::error::Result;
use crate::events::EventService;
use crate::job_manager::JobManager;
use crate::queue::{AckToken, QueueManager};
use async_trait::async_trait;
use fm_core::{Clock, Job, JobStatus, LogLevel, Payload, QueueMessage};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Capabilities handed to every worker execution.
#[derive(Clone)]
pub struct WorkerContext {
    pub jobs: Arc<JobManager>,
    pub queue: Arc<QueueManager>,
    pub events: Arc<EventService>,
    pub clock: Arc<dyn Clock>,
}

/// A pluggable work implementation, registered under a routing key.
///
/// A long-running worker should check its job's status (cancellation is
/// cooperative) and may extend its message lease through the context's
/// queue handle.
#[async_trait]
pub trait Worker: Send + Sync {
    async fn execute(&self, ctx: &WorkerContext, job: &Job, payload: &Payload) -> Result<()>;
}

pub struct WorkerPool {
    ctx: WorkerContext,
    config: QueueConfig,
    workers: RwLock<HashMap<String, Arc<dyn Worker>>>,
    cancel: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    dead_letter_sub: Mutex<Option<crate::events::SubscriptionHandle>>,
}

impl WorkerPool {
    pub fn new(ctx: WorkerContext, config: QueueConfig) -> Arc<Self> {
        Arc::new(Self {
            ctx,
            config,
            workers: RwLock::new(HashMap::new()),
            cancel: CancellationToken::new(),
            tasks: Mutex::new(Vec::new()),
            dead_letter_sub: Mutex::new(None),
        })
    }

    pub fn register_worker(&self, routing_key: impl Into<String>, worker: Arc<dyn Worker>) {
        let routing_key = routing_key.into();
        tracing::debug!(routing_key = %routing_key, "worker registered");
        self.workers.write().insert(routing_key, worker);
    }

    /// Begin the configured number of concurrent poll-execute cycles.
    pub fn start(self: &Arc<Self>) {
        // A message can dead-letter while no attempt is running (e.g. the
        // process died mid-execute); the event settles its job as failed.
        let jobs = Arc::clone(&self.ctx.jobs);
        let handle = self.ctx.events.subscribe(fm_core::topic::QUEUE_ITEM_DEAD, move |ev| {
            let fm_core::Event::QueueItemDead { job_id, receive_count, .. } = ev else {
                return;
            };
            if let Err(e) = jobs.record_failure(
                job_id,
                &format!("message dead-lettered after {receive_count} receives"),
            ) {
                tracing::debug!(job_id = %job_id, error = %e, "dead-letter failure already settled");
            }
        });
        *self.dead_letter_sub.lock() = Some(handle);

        let mut tasks = self.tasks.lock();
        for unit in 0..self.config.concurrency {
            let pool = Arc::clone(self);
            tasks.push(tokio::spawn(async move { pool.run_unit(unit).await }));
        }
        tracing::info!(
            concurrency = self.config.concurrency,
            queue = %self.ctx.queue.queue_name(),
            "worker pool started"
        );
    }

    /// Halt polling and drain in-flight work.
    pub async fn stop(&self) {
        self.cancel.cancel();
        let tasks = std::mem::take(&mut *self.tasks.lock());
        for task in tasks {
            let _ = task.await;
        }
        if let Some(handle) = self.dead_letter_sub.lock().take() {
            self.ctx.events.unsubscribe(&handle);
        }
        tracing::info!("worker pool stopped");
    }

    async fn run_unit(&self, unit: usize) {
        loop {
            if self.cancel.is_cancelled() {
                break;
            }
            match self.ctx.queue.receive() {
                Ok(Some((message, token))) => self.dispatch(message, token).await,
                Ok(None) => {
                    tokio::select! {
                        _ = self.cancel.cancelled() => break,
                        _ = tokio::time::sleep(self.config.poll_interval) => {}
                    }
                }
                Err(e) => {
                    tracing::warn!(unit, error = %e, "queue receive failed");
                    tokio::select! {
                        _ = self.cancel.cancelled() => break,
                        _ = tokio::time::sleep(self.config.poll_interval) => {}
                    }
                }
            }
        }
        tracing::debug!(unit, "execution unit stopped");
    }

    async fn dispatch(&self, message: QueueMessage, token: AckToken) {
        let jobs = &self.ctx.jobs;

        let job = match jobs.get_job(&message.job_id) {
            Ok(job) => job,
            Err(e) => {
                // Message for a deleted job: drop it.
                tracing::warn!(message_id = %message.id, error = %e, "dropping orphaned message");
                ack_or_warn(token);
                return;
            }
        };

        // Cooperative cancellation: a cancelled (or otherwise finished) job's
        // redelivered message is consumed without executing.
        if job.is_terminal() && job.status != JobStatus::Failed {
            tracing::debug!(job_id = %job.id, status = %job.status, "skipping message for settled job");
            ack_or_warn(token);
            return;
        }

        let worker = self.workers.read().get(&message.payload.routing_key).cloned();
        let Some(worker) = worker else {
            // Routing errors are permanent: consume the message so it never
            // burns retry budget, and fail the job.
            let reason =
                format!("no worker registered for routing key '{}'", message.payload.routing_key);
            tracing::error!(job_id = %job.id, message_id = %message.id, "{reason}");
            ack_or_warn(token);
            if let Err(e) = jobs.record_failure(&job.id, &reason) {
                tracing::warn!(job_id = %job.id, error = %e, "failed to record routing failure");
            }
            return;
        };

        if job.status != JobStatus::Running {
            if let Err(e) = jobs.update_status(&job.id, JobStatus::Running) {
                tracing::warn!(job_id = %job.id, error = %e, "failed to mark job running");
            }
        }

        // Panic isolation: the worker runs in its own task so a crash is
        // recovered here instead of taking down the execution unit.
        let ctx = self.ctx.clone();
        let exec_job = job.clone();
        let payload = message.payload.clone();
        let handle = tokio::spawn(async move { worker.execute(&ctx, &exec_job, &payload).await });

        match handle.await {
            Ok(Ok(())) => {
                if let Err(e) = token.ack() {
                    tracing::warn!(message_id = %message.id, error = %e, "ack failed; message may be redelivered");
                }
                self.finish_success(&job);
            }
            Ok(Err(err)) => {
                // No ack: the lease expires and the queue retries up to the
                // receive budget.
                tracing::warn!(
                    job_id = %job.id,
                    receive_count = message.receive_count,
                    error = %err,
                    "worker execution failed"
                );
                self.record_attempt_failure(&message, &err.to_string());
            }
            Err(join_err) => {
                let reason = if join_err.is_panic() {
                    format!("worker panicked: {}", panic_message(join_err.into_panic()))
                } else {
                    "worker task was cancelled".to_string()
                };
                tracing::error!(job_id = %job.id, "{reason}");
                self.record_attempt_failure(&message, &reason);
            }
        }
    }

    /// Report a failed attempt. The job settles to `failed` only once its
    /// retry budget is spent; earlier attempts record the error and keep it
    /// in flight for redelivery.
    fn record_attempt_failure(&self, message: &QueueMessage, reason: &str) {
        let jobs = &self.ctx.jobs;
        let result = if message.receive_count >= self.config.max_receive {
            jobs.record_failure(&message.job_id, reason)
        } else {
            jobs.record_error(&message.job_id, reason)
        };
        if let Err(e) = result {
            tracing::warn!(job_id = %message.job_id, error = %e, "failed to record worker failure");
        }
    }

    fn finish_success(&self, job: &Job) {
        let jobs = &self.ctx.jobs;
        let spawned = match jobs.children(&job.id) {
            Ok(children) => children.len(),
            Err(e) => {
                tracing::warn!(job_id = %job.id, error = %e, "failed to list children after success");
                0
            }
        };
        if spawned > 0 {
            // A job that spawned children stays running; its monitor marks
            // the terminal status once the children settle.
            if let Err(e) = jobs.add_job_log(
                &job.id,
                LogLevel::Info,
                &format!("spawned {spawned} child jobs"),
            ) {
                tracing::warn!(job_id = %job.id, error = %e, "failed to append spawn log");
            }
            return;
        }
        if let Err(e) = jobs.update_status(&job.id, JobStatus::Completed) {
            tracing::warn!(job_id = %job.id, error = %e, "failed to mark job completed");
        }
    }
}

fn ack_or_warn(token: AckToken) {
    let message_id = token.message_id().clone();
    if let Err(e) = token.ack() {
        tracing::warn!(message_id = %message_id, error = %e, "ack failed");
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
#[path = "pool_tests.rs"]
mod tests;
