//! Local key-value store backing the DHT.
//!
//! Values live in memory only and are capped in count and size; a rejected
//! write is reported to the requester as `stored: false` rather than an
//! error, matching the best-effort replication semantics.

use serde_json::Value;
use std::collections::HashMap;

/// Maximum number of keys held locally
pub const MAX_KEYS: usize = 4096;

/// Maximum encoded size of a single value (64 KB)
pub const MAX_VALUE_SIZE: usize = 64 * 1024;

/// A stored value with its write stamp
#[derive(Debug, Clone)]
pub struct StoreEntry {
    pub value: Value,
    pub stored_at: i64,
}

/// In-memory DHT value store
#[derive(Debug, Default)]
pub struct DhtStore {
    entries: HashMap<String, StoreEntry>,
}

impl DhtStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a value. Returns false when the value is oversized or the
    /// store is full with a new key.
    pub fn insert(&mut self, key: impl Into<String>, value: Value) -> bool {
        let key = key.into();

        let size = value.to_string().len();
        if size > MAX_VALUE_SIZE {
            return false;
        }
        if !self.entries.contains_key(&key) && self.entries.len() >= MAX_KEYS {
            return false;
        }

        self.entries.insert(
            key,
            StoreEntry {
                value,
                stored_at: chrono::Utc::now().timestamp(),
            },
        );
        true
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries.get(key).map(|entry| &entry.value)
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.entries.remove(key).map(|entry| entry.value)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
