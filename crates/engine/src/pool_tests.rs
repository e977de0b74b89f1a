// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::error::EngineError;
use crate::testutil::{engine, wait_until, TestEngine};
use fm_core::{JobConfig, JobId, JobKind, QueueMessage};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

struct OkWorker {
    calls: AtomicUsize,
}

#[async_trait]
impl Worker for OkWorker {
    async fn execute(&self, _ctx: &WorkerContext, _job: &Job, _payload: &Payload) -> crate::Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

struct FailingWorker {
    attempts: AtomicUsize,
}

impl FailingWorker {
    fn new() -> Self {
        Self { attempts: AtomicUsize::new(0) }
    }
}

#[async_trait]
impl Worker for FailingWorker {
    async fn execute(&self, _ctx: &WorkerContext, _job: &Job, _payload: &Payload) -> crate::Result<()> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Err(EngineError::TransientExecution("no response from upstream".to_string()))
    }
}

struct PanickingWorker;

#[async_trait]
impl Worker for PanickingWorker {
    async fn execute(&self, _ctx: &WorkerContext, _job: &Job, _payload: &Payload) -> crate::Result<()> {
        panic!("worker blew up");
    }
}

/// Step-level worker that spawns one child worker job per `count` arg.
struct SpawningWorker;

#[async_trait]
impl Worker for SpawningWorker {
    async fn execute(&self, ctx: &WorkerContext, job: &Job, payload: &Payload) -> crate::Result<()> {
        let count = payload.args.get("count").and_then(|v| v.as_u64()).unwrap_or(1);
        for i in 0..count {
            ctx.jobs.create_job(
                JobKind::Worker,
                Some(&job.id),
                JobConfig::new(format!("unit {i}")),
            )?;
        }
        Ok(())
    }
}

fn pool_for(fixture: &TestEngine) -> std::sync::Arc<WorkerPool> {
    let ctx = WorkerContext {
        jobs: std::sync::Arc::clone(&fixture.jobs),
        queue: std::sync::Arc::clone(&fixture.queue),
        events: std::sync::Arc::clone(&fixture.events),
        clock: std::sync::Arc::clone(&fixture.clock),
    };
    WorkerPool::new(ctx, fixture.config.clone())
}

fn worker_job(fixture: &TestEngine) -> JobId {
    let manager = fixture
        .jobs
        .create_job(JobKind::Manager, None, JobConfig::new("m"))
        .unwrap();
    let step = fixture
        .jobs
        .create_job(JobKind::Step, Some(&manager), JobConfig::new("s"))
        .unwrap();
    fixture
        .jobs
        .create_job(JobKind::Worker, Some(&step), JobConfig::new("w"))
        .unwrap()
}

fn enqueue(fixture: &TestEngine, job: &JobId, routing_key: &str) {
    fixture
        .queue
        .enqueue(QueueMessage::new(
            job.clone(),
            Payload::new(routing_key),
            fixture.clock.epoch_ms(),
        ))
        .unwrap();
}

#[tokio::test]
async fn successful_execution_acks_and_completes() {
    let fixture = engine();
    let pool = pool_for(&fixture);
    let worker = std::sync::Arc::new(OkWorker { calls: AtomicUsize::new(0) });
    pool.register_worker("work.ok", std::sync::Arc::clone(&worker) as std::sync::Arc<dyn Worker>);

    let job = worker_job(&fixture);
    enqueue(&fixture, &job, "work.ok");
    pool.start();

    assert!(
        wait_until(Duration::from_secs(2), || {
            fixture.jobs.get_job(&job).map(|j| j.status == JobStatus::Completed).unwrap_or(false)
        })
        .await
    );
    assert_eq!(worker.calls.load(Ordering::SeqCst), 1);
    assert_eq!(fixture.queue.queued_count().unwrap(), 0);
    pool.stop().await;
}

#[tokio::test]
async fn transient_failure_keeps_the_job_in_flight() {
    let fixture = engine();
    let pool = pool_for(&fixture);
    pool.register_worker("work.bad", std::sync::Arc::new(FailingWorker::new()));

    let job = worker_job(&fixture);
    enqueue(&fixture, &job, "work.bad");
    pool.start();

    // First attempt: error recorded, but the job is not settled — retries
    // remain in the receive budget.
    assert!(
        wait_until(Duration::from_secs(2), || {
            fixture
                .jobs
                .get_job(&job)
                .map(|j| j.error.as_deref().unwrap_or_default().contains("no response"))
                .unwrap_or(false)
        })
        .await
    );
    assert_eq!(fixture.jobs.get_job(&job).unwrap().status, JobStatus::Running);

    // Not acked: the message survives, leased, for queue-level retry once
    // the visibility timeout lapses.
    assert_eq!(fixture.queue.queued_count().unwrap(), 1);
    pool.stop().await;
}

#[tokio::test]
async fn final_attempt_failure_settles_the_job() {
    let fixture = engine();
    let pool = pool_for(&fixture);
    let worker = std::sync::Arc::new(FailingWorker::new());
    pool.register_worker("work.bad", std::sync::Arc::clone(&worker) as std::sync::Arc<dyn Worker>);

    let job = worker_job(&fixture);
    enqueue(&fixture, &job, "work.bad");
    pool.start();

    // Walk through the receive budget: each lease expiry releases one retry.
    for attempt in 1..=2u32 {
        assert!(
            wait_until(Duration::from_secs(2), || {
                worker.attempts.load(Ordering::SeqCst) == attempt as usize
            })
            .await
        );
        assert_eq!(fixture.jobs.get_job(&job).unwrap().status, JobStatus::Running);
        fixture.fake_clock.advance(Duration::from_secs(1));
    }

    // Third (final) attempt fails the job for good.
    assert!(
        wait_until(Duration::from_secs(2), || {
            worker.attempts.load(Ordering::SeqCst) == 3
                && fixture
                    .jobs
                    .get_job(&job)
                    .map(|j| j.status == JobStatus::Failed)
                    .unwrap_or(false)
        })
        .await
    );
    pool.stop().await;
}

#[tokio::test]
async fn unknown_routing_key_fails_permanently() {
    let fixture = engine();
    let pool = pool_for(&fixture);

    let job = worker_job(&fixture);
    enqueue(&fixture, &job, "work.unregistered");
    pool.start();

    assert!(
        wait_until(Duration::from_secs(2), || {
            fixture.jobs.get_job(&job).map(|j| j.status == JobStatus::Failed).unwrap_or(false)
        })
        .await
    );
    let failed = fixture.jobs.get_job(&job).unwrap();
    assert!(failed.error.as_deref().unwrap_or_default().contains("work.unregistered"));

    // Consumed, not retried: no redelivery even after the lease window.
    assert_eq!(fixture.queue.queued_count().unwrap(), 0);
    assert!(fixture.queue.dead_letters().unwrap().is_empty());
    pool.stop().await;
}

#[tokio::test]
async fn panicking_worker_is_contained() {
    let fixture = engine();
    let pool = pool_for(&fixture);
    pool.register_worker("work.panic", std::sync::Arc::new(PanickingWorker));
    let ok = std::sync::Arc::new(OkWorker { calls: AtomicUsize::new(0) });
    pool.register_worker("work.ok", std::sync::Arc::clone(&ok) as std::sync::Arc<dyn Worker>);

    let doomed = worker_job(&fixture);
    enqueue(&fixture, &doomed, "work.panic");
    pool.start();

    assert!(
        wait_until(Duration::from_secs(2), || {
            fixture
                .jobs
                .get_job(&doomed)
                .map(|j| {
                    j.status == JobStatus::Failed
                        && j.error.as_deref().unwrap_or_default().contains("panicked")
                })
                .unwrap_or(false)
        })
        .await
    );

    // The pool survived: it still processes other work.
    let healthy = worker_job(&fixture);
    enqueue(&fixture, &healthy, "work.ok");
    assert!(
        wait_until(Duration::from_secs(2), || {
            fixture.jobs.get_job(&healthy).map(|j| j.status == JobStatus::Completed).unwrap_or(false)
        })
        .await
    );
    pool.stop().await;
}

#[tokio::test]
async fn cancelled_job_is_skipped_without_execution() {
    let fixture = engine();
    let pool = pool_for(&fixture);
    let worker = std::sync::Arc::new(OkWorker { calls: AtomicUsize::new(0) });
    pool.register_worker("work.ok", std::sync::Arc::clone(&worker) as std::sync::Arc<dyn Worker>);

    let job = worker_job(&fixture);
    fixture.jobs.update_status(&job, JobStatus::Cancelled).unwrap();
    enqueue(&fixture, &job, "work.ok");
    pool.start();

    assert!(
        wait_until(Duration::from_secs(2), || fixture.queue.queued_count().unwrap_or(1) == 0).await
    );
    assert_eq!(worker.calls.load(Ordering::SeqCst), 0);
    assert_eq!(fixture.jobs.get_job(&job).unwrap().status, JobStatus::Cancelled);
    pool.stop().await;
}

#[tokio::test]
async fn orphaned_message_is_dropped() {
    let fixture = engine();
    let pool = pool_for(&fixture);
    pool.register_worker("work.ok", std::sync::Arc::new(OkWorker { calls: AtomicUsize::new(0) }));

    enqueue(&fixture, &"job-deleted".into(), "work.ok");
    pool.start();

    assert!(
        wait_until(Duration::from_secs(2), || fixture.queue.queued_count().unwrap_or(1) == 0).await
    );
    pool.stop().await;
}

#[tokio::test]
async fn spawning_step_stays_running_for_its_monitor() {
    let fixture = engine();
    let pool = pool_for(&fixture);
    pool.register_worker("work.spawn", std::sync::Arc::new(SpawningWorker));

    let manager = fixture
        .jobs
        .create_job(JobKind::Manager, None, JobConfig::new("m"))
        .unwrap();
    let step = fixture
        .jobs
        .create_job(JobKind::Step, Some(&manager), JobConfig::new("collect"))
        .unwrap();
    fixture
        .queue
        .enqueue(QueueMessage::new(
            step.clone(),
            Payload::new("work.spawn").with_arg("count", 2),
            fixture.clock.epoch_ms(),
        ))
        .unwrap();
    pool.start();

    assert!(
        wait_until(Duration::from_secs(2), || {
            fixture.jobs.children(&step).map(|c| c.len() == 2).unwrap_or(false)
        })
        .await
    );
    // Message consumed, but the step is left running for the StepMonitor.
    assert!(
        wait_until(Duration::from_secs(2), || fixture.queue.queued_count().unwrap_or(1) == 0).await
    );
    assert_eq!(fixture.jobs.get_job(&step).unwrap().status, JobStatus::Running);
    pool.stop().await;
}

#[tokio::test]
async fn stop_halts_polling() {
    let fixture = engine();
    let pool = pool_for(&fixture);
    let worker = std::sync::Arc::new(OkWorker { calls: AtomicUsize::new(0) });
    pool.register_worker("work.ok", std::sync::Arc::clone(&worker) as std::sync::Arc<dyn Worker>);
    pool.start();
    pool.stop().await;

    // Work enqueued after stop is never picked up.
    let job = worker_job(&fixture);
    enqueue(&fixture, &job, "work.ok");
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(worker.calls.load(Ordering::SeqCst), 0);
    assert_eq!(fixture.queue.queued_count().unwrap(), 1);
}
