// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! In-process publish/subscribe bus.
//!
//! Fan-out is per topic to all current subscribers. Each subscriber owns an
//! unbounded channel drained by a dedicated dispatch task, so a slow or
//! panicking handler never stalls the publisher or other subscribers.
//! Delivery preserves per-publisher FIFO within a topic; there is no
//! persistence or replay.

use fm_core::Event;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;

/// Returned by [`EventService::subscribe`]; pass back to
/// [`EventService::unsubscribe`] to stop delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionHandle {
    topic: String,
    id: u64,
}

struct SubEntry {
    id: u64,
    tx: mpsc::UnboundedSender<Event>,
}

/// Owned subscriber registry with explicit lifecycle.
///
/// Constructed once at wiring time and passed by `Arc` to every component
/// that publishes or subscribes; never ambient/global.
#[derive(Default)]
pub struct EventService {
    topics: RwLock<HashMap<String, Vec<SubEntry>>>,
    next_id: AtomicU64,
}

impl EventService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for a topic. The handler runs on a dispatch task
    /// decoupled from publishers; it must not assume any thread affinity.
    ///
    /// Must be called from within a tokio runtime.
    pub fn subscribe(
        &self,
        topic: &str,
        handler: impl Fn(&Event) + Send + Sync + 'static,
    ) -> SubscriptionHandle {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, mut rx) = mpsc::unbounded_channel::<Event>();
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                handler(&event);
            }
        });

        self.topics
            .write()
            .entry(topic.to_string())
            .or_default()
            .push(SubEntry { id, tx });

        SubscriptionHandle { topic: topic.to_string(), id }
    }

    /// Remove a subscription. Returns false if it was already gone.
    /// Events already queued to the subscriber may still be delivered.
    pub fn unsubscribe(&self, handle: &SubscriptionHandle) -> bool {
        let mut topics = self.topics.write();
        let Some(entries) = topics.get_mut(&handle.topic) else {
            return false;
        };
        let before = entries.len();
        entries.retain(|e| e.id != handle.id);
        let removed = entries.len() < before;
        if entries.is_empty() {
            topics.remove(&handle.topic);
        }
        removed
    }

    /// Deliver `event` to all current subscribers of its topic.
    ///
    /// Best-effort and non-blocking: the subscriber list is snapshotted
    /// under the lock, then the lock is released before any send, so
    /// handlers mutating subscriptions cannot deadlock against a publish.
    pub fn publish(&self, event: Event) {
        let targets: Vec<mpsc::UnboundedSender<Event>> = {
            let topics = self.topics.read();
            match topics.get(event.topic()) {
                Some(entries) => entries.iter().map(|e| e.tx.clone()).collect(),
                None => return,
            }
        };

        for tx in targets {
            if tx.send(event.clone()).is_err() {
                tracing::debug!(topic = event.topic(), "subscriber gone, dropping event");
            }
        }
    }

    /// Number of subscribers on a topic, for diagnostics and tests.
    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.topics.read().get(topic).map_or(0, Vec::len)
    }

    /// Drop every subscription. Dispatch tasks drain and exit.
    pub fn close(&self) {
        self.topics.write().clear();
    }
}

#[cfg(test)]
#[path = "events_tests.rs"]
mod tests;
