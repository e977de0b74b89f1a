// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Durable queue messages.

use crate::job::JobId;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

crate::define_id! {
    /// Unique identifier for a queued message.
    pub struct MessageId("msg-");
}

/// Routing key plus arguments carried by a queue message.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Payload {
    pub routing_key: String,
    #[serde(default)]
    pub args: HashMap<String, Value>,
}

impl Payload {
    pub fn new(routing_key: impl Into<String>) -> Self {
        Self { routing_key: routing_key.into(), args: HashMap::new() }
    }

    pub fn with_arg(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.args.insert(key.into(), value.into());
        self
    }
}

/// A message awaiting delivery, referencing exactly one job.
///
/// A message is either visible (eligible for receive) or leased
/// (`visible_at_ms` in the future). `receive_count` increments on every
/// successful receive; once it would exceed the configured maximum the
/// message is dead-lettered instead of redelivered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueMessage {
    pub id: MessageId,
    pub job_id: JobId,
    pub payload: Payload,
    pub enqueued_at_ms: u64,
    pub visible_at_ms: u64,
    pub receive_count: u32,
}

impl QueueMessage {
    pub fn new(job_id: JobId, payload: Payload, epoch_ms: u64) -> Self {
        Self {
            id: MessageId::new(),
            job_id,
            payload,
            enqueued_at_ms: epoch_ms,
            visible_at_ms: epoch_ms,
            receive_count: 0,
        }
    }

    pub fn is_visible(&self, epoch_ms: u64) -> bool {
        self.visible_at_ms <= epoch_ms
    }
}

#[cfg(test)]
#[path = "message_tests.rs"]
mod tests;
