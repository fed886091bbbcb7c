use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::warn;

use super::{CacheStore, StoreError};

const TEMP_PREFIX: &str = "tmp_";

/// Filesystem backend. Values live in a two-level shard layout keyed by the
/// blake3 hex of the cache key; writes go to a `tmp_` file first and rename
/// into place so readers never observe a partial value.
#[derive(Debug, Clone)]
pub struct DiskStore {
    root: PathBuf,
}

impl DiskStore {
    /// Opens (and creates) the store rooted at `root`, discarding any temp
    /// files a previous process left behind.
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)
            .await
            .with_context(|| format!("failed to create cache root {}", root.display()))?;
        let store = Self { root };
        store.remove_temp_files().await?;
        Ok(store)
    }

    fn value_path(&self, key: &str) -> PathBuf {
        let name = blake3::hash(key.as_bytes()).to_hex().to_string();
        let (first, remainder) = name.split_at(2);
        let (second, _) = remainder.split_at(2);
        self.root.join(first).join(second).join(name)
    }

    fn temp_path(&self) -> PathBuf {
        self.root.join(format!("{TEMP_PREFIX}{}", uuid::Uuid::new_v4()))
    }

    async fn remove_temp_files(&self) -> Result<()> {
        let mut entries = fs::read_dir(&self.root)
            .await
            .with_context(|| format!("failed to read cache root {}", self.root.display()))?;
        while let Some(entry) = entries.next_entry().await? {
            let is_file = entry.file_type().await.map(|ft| ft.is_file()).unwrap_or(false);
            let name = entry.file_name();
            if is_file && name.to_string_lossy().starts_with(TEMP_PREFIX) {
                let _ = fs::remove_file(entry.path()).await;
            }
        }
        Ok(())
    }

    async fn dir_is_empty(path: &Path) -> bool {
        match fs::read_dir(path).await {
            Ok(mut entries) => matches!(entries.next_entry().await, Ok(None)),
            Err(_) => false,
        }
    }

    /// Drops shard directories the last delete emptied out.
    async fn prune_empty_shards(&self, value_path: &Path) {
        let Some(shard2) = value_path.parent() else { return };
        if Self::dir_is_empty(shard2).await {
            let _ = fs::remove_dir(shard2).await;
        }
        let Some(shard1) = shard2.parent() else { return };
        if shard1 != self.root && Self::dir_is_empty(shard1).await {
            let _ = fs::remove_dir(shard1).await;
        }
    }
}

fn map_io(err: std::io::Error, path: &Path, action: &str) -> StoreError {
    if err.kind() == ErrorKind::NotFound {
        StoreError::NotFound
    } else {
        StoreError::Backend(anyhow::Error::new(err).context(format!(
            "failed to {action} {}",
            path.display()
        )))
    }
}

#[async_trait]
impl CacheStore for DiskStore {
    async fn get(&self, key: &str) -> Result<Vec<u8>, StoreError> {
        let path = self.value_path(key);
        fs::read(&path).await.map_err(|err| map_io(err, &path, "read"))
    }

    async fn set(&self, key: &str, value: &[u8]) -> Result<(), StoreError> {
        let path = self.value_path(key);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|err| map_io(err, parent, "create shard"))?;
        }

        let temp = self.temp_path();
        let mut options = fs::OpenOptions::new();
        options.create(true).truncate(true).write(true);
        #[cfg(unix)]
        {
            options.mode(0o600);
        }
        let mut file = options
            .open(&temp)
            .await
            .map_err(|err| map_io(err, &temp, "open temp file for"))?;
        if let Err(err) = async {
            file.write_all(value).await?;
            file.flush().await
        }
        .await
        {
            let _ = fs::remove_file(&temp).await;
            return Err(map_io(err, &temp, "write"));
        }
        drop(file);

        if let Err(err) = fs::rename(&temp, &path).await {
            let _ = fs::remove_file(&temp).await;
            return Err(map_io(err, &path, "commit"));
        }
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        let path = self.value_path(key);
        match fs::remove_file(&path).await {
            Ok(()) => {
                self.prune_empty_shards(&path).await;
                Ok(())
            }
            Err(err) => {
                let mapped = map_io(err, &path, "delete");
                if !mapped.is_not_found() {
                    warn!(error = %mapped, "cache delete failed");
                }
                Err(mapped)
            }
        }
    }
}
