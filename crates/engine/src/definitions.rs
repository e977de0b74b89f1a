// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Definition change detection and cache invalidation.
//!
//! Loading a definition is a side-effecting reconciliation: the content hash
//! of its source is compared against the persisted record, and a mismatch
//! invalidates every cached document tagged with the definition's ID before
//! the new hash is stored.

use crate::error::Result;
use fm_core::{Clock, DefinitionId, JobDefinition};
use fm_storage::{keys, KvStore};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::Arc;

/// External cache collaborator holding documents derived from definitions,
/// tagged with the definition ID that produced them.
pub trait DocumentCache: Send + Sync {
    /// Delete cached documents carrying `tag`; returns how many were removed.
    fn invalidate_tag(&self, tag: &str) -> Result<usize>;
}

/// Cache stand-in for deployments without a document cache.
#[derive(Default)]
pub struct NoopCache;

impl DocumentCache for NoopCache {
    fn invalidate_tag(&self, _tag: &str) -> Result<usize> {
        Ok(0)
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct DefinitionRecord {
    id: DefinitionId,
    content_hash: String,
    updated_at_ms: u64,
}

pub struct DefinitionRegistry {
    store: Arc<dyn KvStore>,
    cache: Arc<dyn DocumentCache>,
    clock: Arc<dyn Clock>,
}

impl DefinitionRegistry {
    pub fn new(
        store: Arc<dyn KvStore>,
        cache: Arc<dyn DocumentCache>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self { store, cache, clock }
    }

    /// Truncated hex digest of a definition source, for change detection.
    pub fn content_hash(source: &str) -> String {
        let digest = Sha256::digest(source.as_bytes());
        digest.iter().take(4).map(|b| format!("{b:02x}")).collect()
    }

    /// Compare the definition source against the persisted hash. On change:
    /// flip `updated`, invalidate cached documents tagged with the
    /// definition ID, log, and persist the new hash. Returns whether the
    /// definition changed. A first-time load stores the hash silently.
    pub fn reconcile(&self, def: &mut JobDefinition, source: &str) -> Result<bool> {
        let hash = Self::content_hash(source);
        def.content_hash = hash.clone();

        let key = keys::definition(&def.id);
        let prior: Option<DefinitionRecord> = self.store.get_json(&key)?;
        let changed = match &prior {
            None => false,
            Some(record) => record.content_hash != hash,
        };

        if changed {
            def.updated = true;
            let removed = self.cache.invalidate_tag(def.id.as_str())?;
            tracing::info!(
                definition_id = %def.id,
                content_hash = %hash,
                invalidated = removed,
                "definition content changed"
            );
        }

        self.store.put_json(
            &key,
            &DefinitionRecord {
                id: def.id.clone(),
                content_hash: hash,
                updated_at_ms: self.clock.epoch_ms(),
            },
            &[],
        )?;
        Ok(changed)
    }

    /// The persisted hash for a definition, if any.
    pub fn stored_hash(&self, id: &DefinitionId) -> Result<Option<String>> {
        let record: Option<DefinitionRecord> = self.store.get_json(&keys::definition(id))?;
        Ok(record.map(|r| r.content_hash))
    }
}

#[cfg(test)]
#[path = "definitions_tests.rs"]
mod tests;
