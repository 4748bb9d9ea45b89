//! In-memory storage backend.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::RwLock;

use super::Storage;
use crate::error::{Result, StoreError};

/// A `DashMap`-backed storage backend.
///
/// Besides serving embedded deployments, it counts writes and can be told to
/// fail writes to selected keys, which tests use to observe the service's
/// all-or-nothing and best-effort paths.
#[derive(Default)]
pub struct MemoryStorage {
    entries: DashMap<String, Vec<u8>>,
    /// Number of successful puts and deletes
    writes: AtomicU64,
    /// Writes to keys with this prefix fail
    failing_prefix: RwLock<Option<String>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of successful writes (puts and deletes) so far.
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::SeqCst)
    }

    /// Copy of every stored entry, ordered by key.
    pub fn snapshot(&self) -> BTreeMap<String, Vec<u8>> {
        self.entries
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }

    /// Make writes to keys starting with `prefix` fail; `None` clears it.
    pub fn fail_writes_with_prefix(&self, prefix: Option<&str>) {
        *self.failing_prefix.write() = prefix.map(str::to_string);
    }

    /// Number of stored keys.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn check_writable(&self, key: &str) -> Result<()> {
        match self.failing_prefix.read().as_deref() {
            Some(prefix) if key.starts_with(prefix) => Err(StoreError::Storage(format!(
                "write to '{}' rejected",
                key
            ))),
            _ => Ok(()),
        }
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.entries.get(key).map(|entry| entry.value().clone()))
    }

    async fn put(&self, key: &str, value: Vec<u8>) -> Result<()> {
        self.check_writable(key)?;
        self.entries.insert(key.to_string(), value);
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.check_writable(key)?;
        self.entries.remove(key);
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.entries.contains_key(key))
    }
}
