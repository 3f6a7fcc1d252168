use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use time::OffsetDateTime;
use tokio::fs;
use tracing::debug;
use uuid::Uuid;

use super::{CacheBackend, CacheEntry, StoreError};
use crate::cache::keys::CacheKey;
use crate::cache::pattern::KeyPattern;

/// One JSON file per key inside a single directory.
///
/// File names are the keys themselves, which the key builder keeps path-safe. Writes go
/// to a dot-prefixed temporary file first and are renamed into place, so readers never
/// observe a partial entry.
pub struct FileBackend {
    directory: PathBuf,
}

impl FileBackend {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
        }
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.directory.join(key)
    }
}

async fn remove_if_present(path: &Path) -> Result<bool, StoreError> {
    match fs::remove_file(path).await {
        Ok(()) => Ok(true),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(false),
        Err(err) => Err(err.into()),
    }
}

#[async_trait]
impl CacheBackend for FileBackend {
    fn name(&self) -> &'static str {
        "file"
    }

    async fn get(&self, key: &CacheKey) -> Result<Option<Bytes>, StoreError> {
        let path = self.path_for(key.as_str());
        let raw = match fs::read(&path).await {
            Ok(raw) => raw,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };

        let entry: CacheEntry = serde_json::from_slice(&raw)
            .map_err(|err| StoreError::corrupt(key.as_str(), err.to_string()))?;

        if entry.is_expired(OffsetDateTime::now_utc()) {
            debug!(key = %key, "dropping expired cache file");
            remove_if_present(&path).await?;
            return Ok(None);
        }

        Ok(Some(entry.value))
    }

    async fn put(
        &self,
        key: &CacheKey,
        value: Bytes,
        ttl: Option<Duration>,
    ) -> Result<(), StoreError> {
        fs::create_dir_all(&self.directory).await?;

        let entry = CacheEntry::new(key, value, ttl, OffsetDateTime::now_utc());
        let encoded = serde_json::to_vec(&entry)
            .map_err(|err| StoreError::corrupt(key.as_str(), err.to_string()))?;

        let staging = self.directory.join(format!(".{}.tmp", Uuid::new_v4()));
        fs::write(&staging, encoded).await?;

        if let Err(err) = fs::rename(&staging, self.path_for(key.as_str())).await {
            let _ = fs::remove_file(&staging).await;
            return Err(err.into());
        }

        Ok(())
    }

    async fn forget(&self, key: &CacheKey) -> Result<(), StoreError> {
        remove_if_present(&self.path_for(key.as_str())).await?;
        Ok(())
    }

    async fn delete_matching(&self, pattern: &KeyPattern) -> Result<usize, StoreError> {
        let mut dir = match fs::read_dir(&self.directory).await {
            Ok(dir) => dir,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(0),
            Err(err) => return Err(err.into()),
        };

        let mut removed = 0;
        while let Some(entry) = dir.next_entry().await? {
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            if name.starts_with('.') || !pattern.matches(name) {
                continue;
            }
            if remove_if_present(&entry.path()).await? {
                removed += 1;
            }
        }

        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::keys::{KeyBuilder, build_key};

    #[tokio::test]
    async fn entries_persist_as_files_named_by_key() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FileBackend::new(dir.path().join("data"));
        let key = build_key("perf", ["model", "product", "5"]);

        store
            .put(&key, Bytes::from("payload"), Some(Duration::from_secs(60)))
            .await
            .expect("put");

        assert!(dir.path().join("data").join("perf:model:product:5").exists());
        assert_eq!(
            store.get(&key).await.expect("get"),
            Some(Bytes::from("payload"))
        );
    }

    #[tokio::test]
    async fn long_slugs_are_stored_under_short_names() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FileBackend::new(dir.path());
        let key = KeyBuilder::new("perf").model("product", &"a".repeat(230));

        store
            .put(&key, Bytes::from("page"), Some(Duration::from_secs(60)))
            .await
            .expect("put");

        assert_eq!(store.get(&key).await.expect("get"), Some(Bytes::from("page")));
        let names: Vec<String> = std::fs::read_dir(dir.path())
            .expect("read dir")
            .map(|entry| entry.expect("entry").file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, [key.as_str()]);
    }

    #[tokio::test]
    async fn missing_directory_reads_as_empty() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FileBackend::new(dir.path().join("never-created"));
        let key = build_key("perf", ["absent"]);

        assert_eq!(store.get(&key).await.expect("get"), None);
        store.forget(&key).await.expect("forget");
        let pattern = KeyPattern::new("perf:*").expect("pattern");
        assert_eq!(store.delete_matching(&pattern).await.expect("delete"), 0);
    }

    #[tokio::test]
    async fn expired_file_is_removed_on_read() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FileBackend::new(dir.path());
        let key = build_key("perf", ["stale"]);

        store
            .put(&key, Bytes::from("v"), Some(Duration::ZERO))
            .await
            .expect("put");
        assert_eq!(store.get(&key).await.expect("get"), None);
        assert!(!dir.path().join("perf:stale").exists());
    }

    #[tokio::test]
    async fn corrupt_file_is_reported() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FileBackend::new(dir.path());
        std::fs::write(dir.path().join("perf:broken"), b"not json").expect("write");

        let err = store
            .get(&build_key("perf", ["broken"]))
            .await
            .expect_err("corrupt entry");
        assert!(matches!(err, StoreError::Corrupt { .. }));
    }

    #[tokio::test]
    async fn delete_matching_scans_directory() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FileBackend::new(dir.path());
        for parts in [["product", "5"], ["product", "9"], ["category", "1"]] {
            let key = build_key("perf", ["model", parts[0], parts[1]]);
            store.put(&key, Bytes::from("v"), None).await.expect("put");
        }

        let pattern = KeyPattern::new("perf:model:product:*").expect("pattern");
        assert_eq!(store.delete_matching(&pattern).await.expect("delete"), 2);
        assert!(dir.path().join("perf:model:category:1").exists());
        assert!(!dir.path().join("perf:model:product:5").exists());
    }
}
