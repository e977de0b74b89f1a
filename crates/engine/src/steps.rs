// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Step-to-worker routing.
//!
//! The step manager owns the static table mapping a step's worker kind to
//! the routing key the worker pool dispatches on, and builds the initiating
//! message for a step job. New workers register without touching the
//! dispatcher.

use crate::error::{EngineError, Result};
use fm_core::{JobId, Payload, QueueMessage, StepSpec};
use parking_lot::RwLock;
use std::collections::HashMap;

#[derive(Default)]
pub struct StepManager {
    routes: RwLock<HashMap<String, String>>,
}

impl StepManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Map a step worker kind to a routing key.
    pub fn register_route(&self, worker_kind: impl Into<String>, routing_key: impl Into<String>) {
        let worker_kind = worker_kind.into();
        let routing_key = routing_key.into();
        tracing::debug!(worker_kind = %worker_kind, routing_key = %routing_key, "route registered");
        self.routes.write().insert(worker_kind, routing_key);
    }

    /// Resolve the routing key for a step spec.
    pub fn resolve_route(&self, spec: &StepSpec) -> Result<String> {
        self.routes
            .read()
            .get(&spec.worker)
            .cloned()
            .ok_or_else(|| EngineError::Routing(spec.worker.clone()))
    }

    /// Build the initiating message for a step job: the resolved routing key
    /// plus the step's parameters and name.
    pub fn build_message(
        &self,
        spec: &StepSpec,
        step_job_id: &JobId,
        epoch_ms: u64,
    ) -> Result<QueueMessage> {
        let routing_key = self.resolve_route(spec)?;
        let mut payload = Payload::new(routing_key).with_arg("step_name", spec.name.as_str());
        payload.args.extend(spec.params.clone());
        Ok(QueueMessage::new(step_job_id.clone(), payload, epoch_ms))
    }
}

#[cfg(test)]
#[path = "steps_tests.rs"]
mod tests;
