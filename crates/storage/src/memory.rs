// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! In-memory store implementation.

use crate::error::StorageError;
use crate::kv::KvStore;
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet, HashMap};

struct Record {
    value: Vec<u8>,
    tags: Vec<String>,
}

#[derive(Default)]
struct Inner {
    records: BTreeMap<String, Record>,
    /// tag → keys carrying it. Maintained on every put/delete.
    tags: HashMap<String, BTreeSet<String>>,
}

impl Inner {
    fn drop_tags(&mut self, key: &str, tags: &[String]) {
        for tag in tags {
            if let Some(keys) = self.tags.get_mut(tag) {
                keys.remove(key);
                if keys.is_empty() {
                    self.tags.remove(tag);
                }
            }
        }
    }
}

/// In-memory [`KvStore`] backed by a BTreeMap and a tag index.
///
/// One mutex guards both maps so prefix and tag scans observe a consistent
/// snapshot relative to writes.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records, for tests and diagnostics.
    pub fn len(&self) -> usize {
        self.inner.lock().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().records.is_empty()
    }
}

impl KvStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        Ok(self.inner.lock().records.get(key).map(|r| r.value.clone()))
    }

    fn put(&self, key: &str, value: Vec<u8>, tags: &[String]) -> Result<(), StorageError> {
        let mut inner = self.inner.lock();
        if let Some(old) = inner.records.remove(key) {
            let old_tags = old.tags;
            inner.drop_tags(key, &old_tags);
        }
        for tag in tags {
            inner.tags.entry(tag.clone()).or_default().insert(key.to_string());
        }
        inner.records.insert(key.to_string(), Record { value, tags: tags.to_vec() });
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<bool, StorageError> {
        let mut inner = self.inner.lock();
        match inner.records.remove(key) {
            Some(record) => {
                let tags = record.tags;
                inner.drop_tags(key, &tags);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn scan_prefix(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>, StorageError> {
        let inner = self.inner.lock();
        Ok(inner
            .records
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, r)| (k.clone(), r.value.clone()))
            .collect())
    }

    fn scan_by_tag(&self, tag: &str) -> Result<Vec<String>, StorageError> {
        let inner = self.inner.lock();
        Ok(inner
            .tags
            .get(tag)
            .map(|keys| keys.iter().cloned().collect())
            .unwrap_or_default())
    }
}

#[cfg(test)]
#[path = "memory_tests.rs"]
mod tests;
