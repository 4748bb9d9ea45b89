//! File-system storage backend: one file per key.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::{debug, info};

use super::Storage;
use crate::error::{Result, StoreError};

/// Stores each key as a file under a root directory.
///
/// Key characters outside `[A-Za-z0-9_-]` are percent-encoded in the file
/// name, so keys can never escape the root. Writes land in a temporary file
/// that is renamed over the target.
#[derive(Debug, Clone)]
pub struct FileStorage {
    root: PathBuf,
}

impl FileStorage {
    /// Open (creating if needed) a storage directory.
    pub async fn open<P: AsRef<Path>>(root: P) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        tokio::fs::create_dir_all(&root).await?;
        info!(path = %root.display(), "Opened file storage");
        Ok(Self { root })
    }

    /// The storage root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.root.join(encode_key(key))
    }
}

/// Encode a storage key as a file name.
fn encode_key(key: &str) -> String {
    let mut name = String::with_capacity(key.len() + 5);
    for byte in key.bytes() {
        if byte.is_ascii_alphanumeric() || byte == b'-' || byte == b'_' {
            name.push(byte as char);
        } else {
            name.push_str(&format!("%{:02X}", byte));
        }
    }
    name.push_str(".json");
    name
}

fn storage_error(key: &str, err: std::io::Error) -> StoreError {
    StoreError::Storage(format!("{}: {}", key, err))
}

#[async_trait]
impl Storage for FileStorage {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        match tokio::fs::read(self.path_for(key)).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(storage_error(key, e)),
        }
    }

    async fn put(&self, key: &str, value: Vec<u8>) -> Result<()> {
        let path = self.path_for(key);
        let tmp = path.with_extension("json.tmp");

        tokio::fs::write(&tmp, &value)
            .await
            .map_err(|e| storage_error(key, e))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|e| storage_error(key, e))?;

        debug!(key = %key, bytes = value.len(), "Wrote key");
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        match tokio::fs::remove_file(self.path_for(key)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(storage_error(key, e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_key() {
        assert_eq!(encode_key("rule_api-1"), "rule_api-1.json");
        assert_eq!(encode_key("versions:a"), "versions%3Aa.json");
        assert_eq!(encode_key("../etc"), "%2E%2E%2Fetc.json");
    }

    #[tokio::test]
    async fn test_round_trip_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileStorage::open(dir.path().join("data")).await.unwrap();

        assert_eq!(storage.get("rule_ids").await.unwrap(), None);

        storage.put("rule_ids", b"[\"a\"]".to_vec()).await.unwrap();
        assert_eq!(
            storage.get("rule_ids").await.unwrap(),
            Some(b"[\"a\"]".to_vec())
        );
        assert!(storage.root().join("rule_ids.json").exists());

        storage.put("rule_ids", b"[]".to_vec()).await.unwrap();
        assert_eq!(storage.get("rule_ids").await.unwrap(), Some(b"[]".to_vec()));

        storage.delete("rule_ids").await.unwrap();
        assert_eq!(storage.get("rule_ids").await.unwrap(), None);

        // Deleting again is fine
        storage.delete("rule_ids").await.unwrap();
    }

    #[tokio::test]
    async fn test_keys_with_separators_stay_in_root() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileStorage::open(dir.path()).await.unwrap();

        storage.put("versions:r1", b"[]".to_vec()).await.unwrap();
        assert!(storage.exists("versions:r1").await.unwrap());
        assert!(!storage.exists("versions_r1").await.unwrap());
    }
}
