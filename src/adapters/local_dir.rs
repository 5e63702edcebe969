//! Local Directory Connector
//!
//! Implements the `StorageConnector` port over a plain directory, so a
//! mounted volume or network share can act as one virtual disk of the
//! array. Shards are copied out of the split staging directory.

use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use tracing::{debug, error, info, instrument, warn};

use crate::config::Settings;
use crate::domain::ports::{ContentHash, ShardHead, ShardIndex, StorageConnector};
use crate::error::Result;

/// Connector storing its shards below a root directory.
#[derive(Debug, Clone)]
pub struct LocalDirConnector {
    index: ShardIndex,
    name: String,
    root: PathBuf,
    /// Split output directory holding the freshly split shards
    staging: PathBuf,
}

impl LocalDirConnector {
    /// Create a connector for `index` rooted at `root`.
    pub fn new(index: ShardIndex, root: impl Into<PathBuf>, staging: impl Into<PathBuf>) -> Self {
        Self {
            index,
            name: format!("local-dir-{}", index),
            root: root.into(),
            staging: staging.into(),
        }
    }

    /// Build from `connector.{index}.path` in the settings.
    pub fn from_settings(settings: &Settings, index: ShardIndex, staging: &Path) -> Result<Self> {
        let key = format!("connector.{}.path", index);
        let root = settings.get_string(&key)?;
        Ok(Self::new(index, root, staging))
    }

    /// Root directory of this virtual disk.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn shard_name(&self, id: &ContentHash) -> String {
        id.shard_file_name(self.index)
    }

    /// Copy the staged shard and metadata shard into the root.
    async fn store(&self, id: &ContentHash) -> io::Result<()> {
        for name in [self.shard_name(id), id.metadata_file_name()] {
            tokio::fs::copy(self.staging.join(&name), self.root.join(&name)).await?;
        }
        Ok(())
    }

    async fn remove_if_present(path: &Path) -> io::Result<()> {
        match tokio::fs::remove_file(path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }
}

#[async_trait]
impl StorageConnector for LocalDirConnector {
    fn shard_index(&self) -> ShardIndex {
        self.index
    }

    fn name(&self) -> &str {
        &self.name
    }

    async fn connect(&self) -> bool {
        match tokio::fs::create_dir_all(&self.root).await {
            Ok(()) => {
                debug!(connector = %self.name, root = %self.root.display(), "Connected");
                true
            }
            Err(e) => {
                error!(connector = %self.name, root = %self.root.display(), "Connect failed: {}", e);
                false
            }
        }
    }

    #[instrument(skip(self), fields(connector = %self.name))]
    async fn upload(&self, id: &ContentHash) -> bool {
        match self.store(id).await {
            Ok(()) => true,
            Err(e) => {
                error!("Upload of {} failed: {}", self.shard_name(id), e);
                false
            }
        }
    }

    #[instrument(skip(self), fields(connector = %self.name))]
    async fn update(&self, id: &ContentHash) -> bool {
        if tokio::fs::try_exists(self.root.join(self.shard_name(id)))
            .await
            .unwrap_or(false)
        {
            info!("Replacing {}", self.shard_name(id));
        }
        match self.store(id).await {
            Ok(()) => true,
            Err(e) => {
                error!("Update of {} failed: {}", self.shard_name(id), e);
                false
            }
        }
    }

    #[instrument(skip(self), fields(connector = %self.name))]
    async fn delete(&self, id: &ContentHash) -> bool {
        for name in [self.shard_name(id), id.metadata_file_name()] {
            if let Err(e) = Self::remove_if_present(&self.root.join(&name)).await {
                error!("Delete of {} failed: {}", name, e);
                return false;
            }
        }
        true
    }

    async fn get(&self, id: &ContentHash) -> Option<Bytes> {
        match tokio::fs::read(self.root.join(self.shard_name(id))).await {
            Ok(data) => Some(Bytes::from(data)),
            Err(e) => {
                warn!(connector = %self.name, "Get of {} failed: {}", self.shard_name(id), e);
                None
            }
        }
    }

    async fn get_metadata(&self, id: &ContentHash, expected_size: usize) -> Option<Bytes> {
        let path = self.root.join(id.metadata_file_name());
        match tokio::fs::read(&path).await {
            Ok(data) if data.len() == expected_size => Some(Bytes::from(data)),
            Ok(data) => {
                warn!(
                    connector = %self.name,
                    expected = expected_size,
                    actual = data.len(),
                    "Metadata shard has unexpected size"
                );
                None
            }
            Err(e) => {
                warn!(connector = %self.name, "Get of {} failed: {}", path.display(), e);
                None
            }
        }
    }

    async fn head(&self, id: &ContentHash) -> Option<ShardHead> {
        let meta = tokio::fs::metadata(self.root.join(self.shard_name(id)))
            .await
            .ok()?;
        Some(ShardHead {
            size_bytes: meta.len(),
            modified: meta.modified().ok().map(DateTime::<Utc>::from),
        })
    }

    async fn options(&self, id: &ContentHash) -> Vec<String> {
        let exists = tokio::fs::try_exists(self.root.join(self.shard_name(id)))
            .await
            .unwrap_or(false);
        let ops: &[&str] = if exists {
            &["GET", "HEAD", "PUT", "DELETE", "OPTIONS"]
        } else {
            &["PUT", "OPTIONS"]
        };
        ops.iter().map(|s| s.to_string()).collect()
    }
}

/// Build the three local-directory connectors from the settings.
pub fn local_dir_connectors(settings: &Settings, staging: &Path) -> Result<Vec<LocalDirConnector>> {
    ShardIndex::all()
        .into_iter()
        .map(|index| LocalDirConnector::from_settings(settings, index, staging))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use tempfile::TempDir;

    struct Fixture {
        _dir: TempDir,
        staging: PathBuf,
        connector: LocalDirConnector,
        hash: ContentHash,
    }

    async fn fixture() -> Fixture {
        let dir = TempDir::new().unwrap();
        let staging = dir.path().join("staging");
        std::fs::create_dir_all(&staging).unwrap();

        let hash = ContentHash::new("cafe");
        std::fs::write(staging.join("cafe.1"), b"shard one").unwrap();
        std::fs::write(staging.join("cafe.m"), b"meta").unwrap();

        let index = ShardIndex::new(1).unwrap();
        let connector = LocalDirConnector::new(index, dir.path().join("disk1"), &staging);
        assert!(connector.connect().await);

        Fixture {
            _dir: dir,
            staging,
            connector,
            hash,
        }
    }

    #[tokio::test]
    async fn test_upload_then_get() {
        let f = fixture().await;
        assert!(f.connector.upload(&f.hash).await);

        let data = f.connector.get(&f.hash).await.unwrap();
        assert_eq!(&data[..], b"shard one");

        let meta = f.connector.get_metadata(&f.hash, 4).await.unwrap();
        assert_eq!(&meta[..], b"meta");
        assert!(f.connector.get_metadata(&f.hash, 272).await.is_none());
    }

    #[tokio::test]
    async fn test_upload_without_staged_shard_fails() {
        let f = fixture().await;
        std::fs::remove_file(f.staging.join("cafe.1")).unwrap();
        assert!(!f.connector.upload(&f.hash).await);
    }

    #[tokio::test]
    async fn test_update_replaces_content() {
        let f = fixture().await;
        assert!(f.connector.upload(&f.hash).await);

        std::fs::write(f.staging.join("cafe.1"), b"newer").unwrap();
        assert!(f.connector.update(&f.hash).await);
        assert_eq!(&f.connector.get(&f.hash).await.unwrap()[..], b"newer");
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let f = fixture().await;
        assert!(f.connector.upload(&f.hash).await);

        assert!(f.connector.delete(&f.hash).await);
        assert!(f.connector.get(&f.hash).await.is_none());
        assert!(f.connector.delete(&f.hash).await);
    }

    #[tokio::test]
    async fn test_head_and_options() {
        let f = fixture().await;
        assert!(f.connector.head(&f.hash).await.is_none());
        assert_eq!(f.connector.options(&f.hash).await, vec!["PUT", "OPTIONS"]);

        assert!(f.connector.upload(&f.hash).await);
        let head = f.connector.head(&f.hash).await.unwrap();
        assert_eq!(head.size_bytes, 9);
        assert!(head.modified.is_some());
        assert!(f.connector.options(&f.hash).await.contains(&"DELETE".to_string()));
    }

    #[test]
    fn test_from_settings_requires_path() {
        let mut settings = Settings::default();
        let index = ShardIndex::new(0).unwrap();
        let staging = Path::new("/tmp/staging");

        let result = LocalDirConnector::from_settings(&settings, index, staging);
        assert!(matches!(result, Err(Error::MissingConfigValue(key)) if key == "connector.0.path"));

        settings.put("connector.0.path", "/srv/disk0");
        let connector = LocalDirConnector::from_settings(&settings, index, staging).unwrap();
        assert_eq!(connector.root(), Path::new("/srv/disk0"));
        assert_eq!(connector.shard_index(), index);
    }
}
