// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Engine error taxonomy.

use fm_core::MessageId;
use fm_storage::StorageError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, EngineError>;

#[derive(Debug, Error)]
pub enum EngineError {
    /// Job or message absent.
    #[error("not found: {0}")]
    NotFound(String),

    /// A concurrent update lost a race, or a status transition is not
    /// permitted from the current state.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Parent-chain resolution exceeded the depth limit or revisited a job.
    #[error("corrupt hierarchy: {0}")]
    CorruptHierarchy(String),

    /// No worker registered for a message's routing key. Permanent; the
    /// message is acknowledged and never retried.
    #[error("no worker registered for routing key '{0}'")]
    Routing(String),

    /// Worker execution failed; retried via queue redelivery up to the
    /// receive budget.
    #[error("worker execution failed: {0}")]
    TransientExecution(String),

    /// Retry budget exhausted; the message is parked for inspection.
    #[error("message {0} dead-lettered after {1} receives")]
    DeadLettered(MessageId, u32),

    /// Extend called for a message that is not currently leased.
    #[error("message {0} is not leased")]
    NotLeased(MessageId),

    #[error("queue is closed")]
    QueueClosed,

    #[error("invalid cursor: {0}")]
    InvalidCursor(String),

    #[error("invalid config: {0}")]
    InvalidConfig(String),

    #[error(transparent)]
    Storage(#[from] StorageError),
}
