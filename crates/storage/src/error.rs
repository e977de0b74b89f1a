// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Storage error type.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("serialization failed: {0}")]
    Serde(#[from] serde_json::Error),

    /// Backend-specific failure (I/O, corruption). [`crate::MemoryStore`]
    /// never produces this; persistent adapters do.
    #[error("storage backend: {0}")]
    Backend(String),
}
