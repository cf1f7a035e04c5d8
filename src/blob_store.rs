//! Opaque key/value blob storage
//!
//! Artifacts are addressed by slash-separated keys (see [`crate::keys`]).
//! The batch generator writes through [`FsBlobStore`]; clients usually read
//! through [`HttpBlobStore`], which serves the same layout from a static
//! origin and refuses writes. [`MemoryBlobStore`] backs tests.

use async_trait::async_trait;
use dashmap::DashMap;
use std::path::{Component, Path, PathBuf};
use std::time::Duration;
use tokio::fs;
use tracing::{debug, info};

use crate::error::StoreError;

/// Key to bytes storage
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Fetch a blob; `Ok(None)` when the key does not exist
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;

    /// Create or replace a blob
    async fn put(&self, key: &str, data: &[u8]) -> Result<(), StoreError>;

    /// Remove a blob; removing a missing key is not an error
    async fn delete(&self, key: &str) -> Result<(), StoreError>;

    /// Keys starting with `prefix`, sorted
    async fn list(&self, prefix: &str) -> Result<Vec<String>, StoreError>;
}

/// Reject keys that could escape the store root
fn validate_key(key: &str) -> Result<(), StoreError> {
    if key.is_empty() || key.starts_with('/') || key.contains('\\') {
        return Err(StoreError::InvalidKey(key.to_string()));
    }
    let ok = Path::new(key)
        .components()
        .all(|c| matches!(c, Component::Normal(_)));
    if !ok {
        return Err(StoreError::InvalidKey(key.to_string()));
    }
    Ok(())
}

// =============================================================================
// Filesystem
// =============================================================================

const TEMP_PREFIX: &str = ".tmp-";

/// Blob store rooted at a local directory; keys map to relative paths
pub struct FsBlobStore {
    root_dir: PathBuf,
}

impl FsBlobStore {
    /// Open (and create if needed) a store at `root_dir`
    pub async fn new<P: AsRef<Path>>(root_dir: P) -> Result<Self, StoreError> {
        let root_dir = root_dir.as_ref().to_path_buf();
        fs::create_dir_all(&root_dir).await?;

        info!(path = %root_dir.display(), "Initialized blob store");

        Ok(Self { root_dir })
    }

    pub fn root_dir(&self) -> &Path {
        &self.root_dir
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, StoreError> {
        validate_key(key)?;
        Ok(self.root_dir.join(key))
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let path = self.path_for(key)?;
        match fs::read(&path).await {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn put(&self, key: &str, data: &[u8]) -> Result<(), StoreError> {
        let path = self.path_for(key)?;
        let parent = path
            .parent()
            .ok_or_else(|| StoreError::InvalidKey(key.to_string()))?;
        fs::create_dir_all(parent).await?;

        // Write beside the target and rename so readers never see a partial file
        let temp = parent.join(format!("{}{}", TEMP_PREFIX, uuid::Uuid::new_v4()));
        fs::write(&temp, data).await?;
        if let Err(e) = fs::rename(&temp, &path).await {
            let _ = fs::remove_file(&temp).await;
            return Err(e.into());
        }

        debug!(key = %key, size = data.len(), "Stored blob");
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        let path = self.path_for(key)?;
        match fs::remove_file(&path).await {
            Ok(()) => {
                debug!(key = %key, "Deleted blob");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        // Walk from the deepest directory the prefix names
        let dir_part = match prefix.rfind('/') {
            Some(pos) => &prefix[..pos],
            None => "",
        };
        let start = if dir_part.is_empty() {
            self.root_dir.clone()
        } else {
            self.path_for(dir_part)?
        };

        let mut keys = Vec::new();
        let mut pending = vec![start];
        while let Some(dir) = pending.pop() {
            let mut entries = match fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                if entry.file_type().await?.is_dir() {
                    pending.push(path);
                    continue;
                }
                if entry.file_name().to_string_lossy().starts_with(TEMP_PREFIX) {
                    continue;
                }
                let Ok(relative) = path.strip_prefix(&self.root_dir) else {
                    continue;
                };
                let key = relative
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy())
                    .collect::<Vec<_>>()
                    .join("/");
                if key.starts_with(prefix) {
                    keys.push(key);
                }
            }
        }

        keys.sort();
        Ok(keys)
    }
}

// =============================================================================
// In-memory
// =============================================================================

/// Process-local store
#[derive(Default)]
pub struct MemoryBlobStore {
    blobs: DashMap<String, Vec<u8>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.blobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blobs.is_empty()
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        validate_key(key)?;
        Ok(self.blobs.get(key).map(|v| v.value().clone()))
    }

    async fn put(&self, key: &str, data: &[u8]) -> Result<(), StoreError> {
        validate_key(key)?;
        self.blobs.insert(key.to_string(), data.to_vec());
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        validate_key(key)?;
        self.blobs.remove(key);
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        let mut keys: Vec<String> = self
            .blobs
            .iter()
            .filter(|entry| entry.key().starts_with(prefix))
            .map(|entry| entry.key().clone())
            .collect();
        keys.sort();
        Ok(keys)
    }
}

// =============================================================================
// HTTP (read-only)
// =============================================================================

/// Reads blobs from a static HTTP origin serving the store layout
pub struct HttpBlobStore {
    base_url: String,
    http_client: reqwest::Client,
}

impl HttpBlobStore {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, StoreError> {
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| StoreError::Http(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            http_client,
        })
    }

    fn url_for(&self, key: &str) -> Result<String, StoreError> {
        validate_key(key)?;
        Ok(format!("{}/{}", self.base_url, key))
    }
}

#[async_trait]
impl BlobStore for HttpBlobStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let url = self.url_for(key)?;
        let response = self
            .http_client
            .get(&url)
            .send()
            .await
            .map_err(|e| StoreError::Http(format!("Request failed: {e}")))?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(StoreError::Http(format!("HTTP {} from {}", response.status(), url)));
        }

        let data = response
            .bytes()
            .await
            .map_err(|e| StoreError::Http(format!("Body read failed: {e}")))?;

        debug!(url = %url, size = data.len(), "Fetched blob");
        Ok(Some(data.to_vec()))
    }

    async fn put(&self, key: &str, _data: &[u8]) -> Result<(), StoreError> {
        Err(StoreError::ReadOnly(key.to_string()))
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        Err(StoreError::ReadOnly(key.to_string()))
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        Err(StoreError::ReadOnly(prefix.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_fs_put_get_delete() {
        let temp = TempDir::new().unwrap();
        let store = FsBlobStore::new(temp.path()).await.unwrap();

        let key = "include-exclude/Worlds 2025/Gardevoir_ex/index.json";
        assert!(store.get(key).await.unwrap().is_none());

        store.put(key, b"{}").await.unwrap();
        assert_eq!(store.get(key).await.unwrap().unwrap(), b"{}");

        store.put(key, b"[1]").await.unwrap();
        assert_eq!(store.get(key).await.unwrap().unwrap(), b"[1]");

        store.delete(key).await.unwrap();
        assert!(store.get(key).await.unwrap().is_none());
        store.delete(key).await.unwrap();
    }

    #[tokio::test]
    async fn test_fs_list_by_prefix() {
        let temp = TempDir::new().unwrap();
        let store = FsBlobStore::new(temp.path()).await.unwrap();

        store.put("a/x/unique_subsets/subset_002.json", b"2").await.unwrap();
        store.put("a/x/unique_subsets/subset_001.json", b"1").await.unwrap();
        store.put("a/x/index.json", b"i").await.unwrap();
        store.put("a/y/index.json", b"i").await.unwrap();

        assert_eq!(
            store.list("a/x/unique_subsets/").await.unwrap(),
            vec![
                "a/x/unique_subsets/subset_001.json".to_string(),
                "a/x/unique_subsets/subset_002.json".to_string(),
            ]
        );
        assert_eq!(store.list("a/x/").await.unwrap().len(), 3);
        assert!(store.list("missing/").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_keys_cannot_escape_root() {
        let temp = TempDir::new().unwrap();
        let store = FsBlobStore::new(temp.path()).await.unwrap();

        assert!(matches!(store.put("../evil", b"x").await, Err(StoreError::InvalidKey(_))));
        assert!(matches!(store.get("/etc/passwd").await, Err(StoreError::InvalidKey(_))));
        assert!(matches!(store.get("").await, Err(StoreError::InvalidKey(_))));
    }

    #[tokio::test]
    async fn test_memory_store() {
        let store = MemoryBlobStore::new();
        store.put("p/b", b"b").await.unwrap();
        store.put("p/a", b"a").await.unwrap();
        store.put("q/c", b"c").await.unwrap();

        assert_eq!(store.list("p/").await.unwrap(), vec!["p/a".to_string(), "p/b".to_string()]);
        store.delete("p/a").await.unwrap();
        assert_eq!(store.len(), 2);
        assert!(store.get("p/a").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_http_store_is_read_only() {
        let store = HttpBlobStore::new("http://127.0.0.1:9", Duration::from_secs(1)).unwrap();
        assert!(matches!(store.put("a/b", b"x").await, Err(StoreError::ReadOnly(_))));
        assert!(matches!(store.delete("a/b").await, Err(StoreError::ReadOnly(_))));
    }
}
