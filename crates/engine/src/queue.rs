// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Durable message queue with lease-based delivery.
//!
//! A received message becomes invisible for the visibility timeout; if not
//! acknowledged before the deadline it is redelivered with `receive_count`
//! incremented. Once the count exceeds `max_receive` the message is parked
//! under a dead-letter key, reported, and never redelivered.

use crate::config::QueueConfig;
use crate::error::{EngineError, Result};
use crate::events::EventService;
use fm_core::{Clock, Event, JobId, MessageId, QueueMessage};
use fm_storage::{keys, KvStore};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Deletes the message on successful processing. Dropping the token without
/// calling [`AckToken::ack`] is equivalent to a processing failure: the
/// lease expires and the queue redelivers.
pub struct AckToken {
    store: Arc<dyn KvStore>,
    key: String,
    message_id: MessageId,
}

impl AckToken {
    pub fn message_id(&self) -> &MessageId {
        &self.message_id
    }

    pub fn ack(self) -> Result<()> {
        self.store.delete(&self.key)?;
        Ok(())
    }
}

pub struct QueueManager {
    store: Arc<dyn KvStore>,
    events: Arc<EventService>,
    clock: Arc<dyn Clock>,
    queue_name: String,
    visibility_timeout: Duration,
    max_receive: u32,
    /// Serializes check-and-lease so two receivers cannot take one message.
    lease: Mutex<()>,
    closed: AtomicBool,
}

impl QueueManager {
    pub fn new(
        store: Arc<dyn KvStore>,
        events: Arc<EventService>,
        clock: Arc<dyn Clock>,
        config: &QueueConfig,
    ) -> Self {
        Self {
            store,
            events,
            clock,
            queue_name: config.queue_name.clone(),
            visibility_timeout: config.visibility_timeout,
            max_receive: config.max_receive,
            lease: Mutex::new(()),
            closed: AtomicBool::new(false),
        }
    }

    pub fn queue_name(&self) -> &str {
        &self.queue_name
    }

    fn job_tags(message: &QueueMessage) -> Vec<String> {
        vec![keys::job_msg_tag(&message.job_id)]
    }

    pub fn enqueue(&self, message: QueueMessage) -> Result<()> {
        if self.closed.load(Ordering::Relaxed) {
            return Err(EngineError::QueueClosed);
        }
        let key = keys::msg(&self.queue_name, &message.id);
        let tags = Self::job_tags(&message);
        self.store.put_json(&key, &message, &tags)?;
        tracing::debug!(
            message_id = %message.id,
            job_id = %message.job_id,
            routing_key = %message.payload.routing_key,
            "message enqueued"
        );
        Ok(())
    }

    /// Non-blocking poll: the first visible message is leased and returned,
    /// or `None` when nothing is eligible. Callers govern retry cadence via
    /// their polling interval.
    pub fn receive(&self) -> Result<Option<(QueueMessage, AckToken)>> {
        if self.closed.load(Ordering::Relaxed) {
            return Ok(None);
        }
        let _guard = self.lease.lock();
        let now = self.clock.epoch_ms();

        for (key, bytes) in self.store.scan_prefix(&keys::msg_prefix(&self.queue_name))? {
            let Ok(mut message) = serde_json::from_slice::<QueueMessage>(&bytes) else {
                tracing::warn!(key = %key, "dropping undecodable queue record");
                self.store.delete(&key)?;
                continue;
            };
            if !message.is_visible(now) {
                continue;
            }

            message.receive_count += 1;
            if message.receive_count > self.max_receive {
                self.dead_letter(&key, message)?;
                continue;
            }

            message.visible_at_ms = now + self.visibility_timeout.as_millis() as u64;
            let tags = Self::job_tags(&message);
            self.store.put_json(&key, &message, &tags)?;
            tracing::debug!(
                message_id = %message.id,
                receive_count = message.receive_count,
                "message leased"
            );

            let token = AckToken {
                store: Arc::clone(&self.store),
                key,
                message_id: message.id.clone(),
            };
            return Ok(Some((message, token)));
        }
        Ok(None)
    }

    fn dead_letter(&self, key: &str, message: QueueMessage) -> Result<()> {
        self.store.delete(key)?;
        let tags = Self::job_tags(&message);
        self.store
            .put_json(&keys::dead(&self.queue_name, &message.id), &message, &tags)?;
        tracing::warn!(
            message_id = %message.id,
            job_id = %message.job_id,
            receive_count = message.receive_count,
            "message dead-lettered"
        );
        self.events.publish(Event::QueueItemDead {
            message_id: message.id.clone(),
            job_id: message.job_id.clone(),
            receive_count: message.receive_count,
        });
        Ok(())
    }

    /// Push back the visibility deadline of a currently leased message, for
    /// long-running work.
    pub fn extend(&self, message_id: &MessageId, extra: Duration) -> Result<()> {
        let _guard = self.lease.lock();
        let key = keys::msg(&self.queue_name, message_id);
        let Some(mut message) = self.store.get_json::<QueueMessage>(&key)? else {
            return Err(EngineError::NotLeased(message_id.clone()));
        };
        if message.is_visible(self.clock.epoch_ms()) {
            return Err(EngineError::NotLeased(message_id.clone()));
        }
        message.visible_at_ms += extra.as_millis() as u64;
        let tags = Self::job_tags(&message);
        self.store.put_json(&key, &message, &tags)?;
        Ok(())
    }

    pub fn delete_by_job_id(&self, job_id: &JobId) -> Result<usize> {
        self.delete_by_job_ids(std::slice::from_ref(job_id))
    }

    /// Remove queued and dead-lettered messages for the given jobs, for
    /// cascading cleanup. Returns how many records were removed.
    pub fn delete_by_job_ids(&self, job_ids: &[JobId]) -> Result<usize> {
        let _guard = self.lease.lock();
        let mut count = 0;
        for job_id in job_ids {
            for key in self.store.scan_by_tag(&keys::job_msg_tag(job_id))? {
                if self.store.delete(&key)? {
                    count += 1;
                }
            }
        }
        Ok(count)
    }

    /// Dead-lettered messages, kept inspectable and never retried.
    pub fn dead_letters(&self) -> Result<Vec<QueueMessage>> {
        let mut messages = Vec::new();
        for (_, bytes) in self.store.scan_prefix(&keys::dead_prefix(&self.queue_name))? {
            let message = serde_json::from_slice(&bytes).map_err(fm_storage::StorageError::from)?;
            messages.push(message);
        }
        Ok(messages)
    }

    /// Number of messages still queued (leased or visible), for diagnostics.
    pub fn queued_count(&self) -> Result<usize> {
        Ok(self.store.scan_prefix(&keys::msg_prefix(&self.queue_name))?.len())
    }

    /// Stop handing out messages. In-flight leases stay valid; pollers see
    /// an empty queue and wind down.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Relaxed);
        tracing::info!(queue = %self.queue_name, "queue closed");
    }
}

#[cfg(test)]
#[path = "queue_tests.rs"]
mod tests;
