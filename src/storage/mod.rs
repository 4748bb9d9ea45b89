//! Key-value storage adapters.
//!
//! The store persists everything through the [`Storage`] trait: string keys,
//! opaque byte values. Rule bodies, the id index and version histories are all
//! JSON documents under the keys defined in [`keys`].

mod file;
mod memory;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::Result;

pub use file::FileStorage;
pub use memory::MemoryStorage;

/// Trait for key-value storage backends.
///
/// Implementations are expected to be safe to share across tasks; the
/// service layer serializes its own read-modify-write sequences.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Read the value stored under `key`, if any.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Store `value` under `key`, replacing any previous value.
    async fn put(&self, key: &str, value: Vec<u8>) -> Result<()>;

    /// Remove `key`. Deleting a missing key is not an error.
    async fn delete(&self, key: &str) -> Result<()>;

    /// Whether a value exists under `key`.
    async fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.get(key).await?.is_some())
    }
}

/// Storage key layout.
pub mod keys {
    /// JSON array of live rule ids.
    pub const RULE_IDS: &str = "rule_ids";

    /// Pre-migration JSON array of every rule.
    pub const LEGACY_RULES: &str = "rules";

    /// JSON rule body.
    pub fn rule(id: &str) -> String {
        format!("rule_{}", id)
    }

    /// JSON array of versions, newest first.
    pub fn versions(id: &str) -> String {
        format!("versions_{}", id)
    }

    /// Pre-migration version history.
    pub fn legacy_versions(id: &str) -> String {
        format!("versions:{}", id)
    }
}

/// Read and decode a JSON document.
pub async fn get_json<T, S>(storage: &S, key: &str) -> Result<Option<T>>
where
    T: DeserializeOwned,
    S: Storage + ?Sized,
{
    match storage.get(key).await? {
        Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        None => Ok(None),
    }
}

/// Encode and store a JSON document.
pub async fn put_json<T, S>(storage: &S, key: &str, value: &T) -> Result<()>
where
    T: Serialize + ?Sized,
    S: Storage + ?Sized,
{
    let bytes = serde_json::to_vec(value)?;
    storage.put(key, bytes).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_layout() {
        assert_eq!(keys::rule("api-limit"), "rule_api-limit");
        assert_eq!(keys::versions("api-limit"), "versions_api-limit");
        assert_eq!(keys::legacy_versions("api-limit"), "versions:api-limit");
    }

    #[tokio::test]
    async fn test_json_helpers() {
        let storage = MemoryStorage::new();
        let ids = vec!["a".to_string(), "b".to_string()];

        put_json(&storage, keys::RULE_IDS, &ids).await.unwrap();
        let loaded: Option<Vec<String>> = get_json(&storage, keys::RULE_IDS).await.unwrap();
        assert_eq!(loaded, Some(ids));

        let missing: Option<Vec<String>> = get_json(&storage, "nothing").await.unwrap();
        assert!(missing.is_none());
        assert!(!storage.exists("nothing").await.unwrap());
    }

    #[tokio::test]
    async fn test_get_json_rejects_garbage() {
        let storage = MemoryStorage::new();
        storage.put(keys::RULE_IDS, b"not json".to_vec()).await.unwrap();
        let result: Result<Option<Vec<String>>> = get_json(&storage, keys::RULE_IDS).await;
        assert!(result.is_err());
    }
}
