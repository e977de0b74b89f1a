// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Job definitions: the step sequences the orchestrator executes.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

crate::define_id! {
    /// Unique identifier for a job definition.
    pub struct DefinitionId("def-");
}

/// Whether steps gate on the previous step finishing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepMode {
    /// Each step's initiating message is enqueued only after the previous
    /// step reaches `completed`.
    #[default]
    Sequential,
    /// All steps are enqueued immediately.
    FanOut,
}

crate::simple_display! {
    StepMode {
        Sequential => "sequential",
        FanOut => "fan_out",
    }
}

/// One stage of a definition: a name, the worker kind that executes it, and
/// its parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepSpec {
    pub name: String,
    /// Worker kind, resolved to a routing key by the step manager.
    pub worker: String,
    #[serde(default)]
    pub params: HashMap<String, Value>,
}

impl StepSpec {
    pub fn new(name: impl Into<String>, worker: impl Into<String>) -> Self {
        Self { name: name.into(), worker: worker.into(), params: HashMap::new() }
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }
}

/// An ordered sequence of steps loaded from an external definition source.
///
/// `content_hash` is recomputed on load and compared to the persisted value;
/// a mismatch flips `updated` and triggers cache invalidation for documents
/// tagged with this definition's ID.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobDefinition {
    pub id: DefinitionId,
    pub name: String,
    #[serde(default)]
    pub mode: StepMode,
    pub steps: Vec<StepSpec>,
    #[serde(default)]
    pub content_hash: String,
    /// Derived on load, never persisted.
    #[serde(skip)]
    pub updated: bool,
}

impl JobDefinition {
    pub fn new(id: DefinitionId, name: impl Into<String>, steps: Vec<StepSpec>) -> Self {
        Self {
            id,
            name: name.into(),
            mode: StepMode::default(),
            steps,
            content_hash: String::new(),
            updated: false,
        }
    }

    pub fn with_mode(mut self, mode: StepMode) -> Self {
        self.mode = mode;
        self
    }
}

#[cfg(test)]
#[path = "definition_tests.rs"]
mod tests;
