// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared fixtures for engine tests.

use crate::config::QueueConfig;
use crate::events::EventService;
use crate::job_manager::JobManager;
use crate::queue::QueueManager;
use fm_core::{Clock, FakeClock};
use fm_storage::{KvStore, MemoryStore};
use std::sync::Arc;
use std::time::Duration;

pub(crate) struct TestEngine {
    pub store: Arc<dyn KvStore>,
    pub events: Arc<EventService>,
    pub fake_clock: FakeClock,
    pub clock: Arc<dyn Clock>,
    pub jobs: Arc<JobManager>,
    pub queue: Arc<QueueManager>,
    pub config: QueueConfig,
}

pub(crate) fn fast_config() -> QueueConfig {
    QueueConfig {
        queue_name: "test_jobs".to_string(),
        concurrency: 2,
        poll_interval: Duration::from_millis(10),
        visibility_timeout: Duration::from_secs(1),
        max_receive: 3,
        error_tolerance: 0,
    }
}

pub(crate) fn engine() -> TestEngine {
    engine_with(fast_config())
}

pub(crate) fn engine_with(config: QueueConfig) -> TestEngine {
    let store: Arc<dyn KvStore> = Arc::new(MemoryStore::new());
    let events = Arc::new(EventService::new());
    let fake_clock = FakeClock::new();
    let clock: Arc<dyn Clock> = Arc::new(fake_clock.clone());
    let jobs = Arc::new(JobManager::new(
        Arc::clone(&store),
        Arc::clone(&events),
        Arc::clone(&clock),
    ));
    let queue = Arc::new(QueueManager::new(
        Arc::clone(&store),
        Arc::clone(&events),
        Arc::clone(&clock),
        &config,
    ));
    TestEngine { store, events, fake_clock, clock, jobs, queue, config }
}

/// Poll `condition` until it holds or `timeout` elapses.
pub(crate) async fn wait_until(timeout: Duration, condition: impl Fn() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
