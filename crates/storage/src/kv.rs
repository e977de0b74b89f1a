// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The store-adapter trait shared by every engine component.

use crate::error::StorageError;

/// Key-value persistence with prefix scans and secondary-tag lookup.
///
/// Implementations must be safe for concurrent access (internally serialized
/// per key); callers never coordinate store access among themselves.
pub trait KvStore: Send + Sync {
    /// Fetch a value by key. Absent keys are `Ok(None)`, not an error.
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError>;

    /// Insert or replace a value. `tags` replaces the key's previous tag set.
    fn put(&self, key: &str, value: Vec<u8>, tags: &[String]) -> Result<(), StorageError>;

    /// Delete a key, returning whether it existed.
    fn delete(&self, key: &str) -> Result<bool, StorageError>;

    /// All `(key, value)` pairs whose key starts with `prefix`, in key order.
    fn scan_prefix(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>, StorageError>;

    /// All keys carrying `tag`, in key order.
    fn scan_by_tag(&self, tag: &str) -> Result<Vec<String>, StorageError>;
}

/// Serialize + put in one call.
pub(crate) fn put_json<T: serde::Serialize>(
    store: &dyn KvStore,
    key: &str,
    value: &T,
    tags: &[String],
) -> Result<(), StorageError> {
    store.put(key, serde_json::to_vec(value)?, tags)
}

impl dyn KvStore {
    /// Fetch and deserialize a JSON record.
    pub fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        key: &str,
    ) -> Result<Option<T>, StorageError> {
        match self.get(key)? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Serialize and store a JSON record.
    pub fn put_json<T: serde::Serialize>(
        &self,
        key: &str,
        value: &T,
        tags: &[String],
    ) -> Result<(), StorageError> {
        put_json(self, key, value, tags)
    }
}
