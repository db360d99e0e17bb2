//! Filesystem storage backends.
//!
//! # Layout
//!
//! ```text
//! data_dir/
//! ├── kv/
//! │   └── content%3Aproduction%3Ahacker-news%3A2025-05-06.json
//! └── blobs/
//!     └── 2025/05/06/production/hacker-news-2025-05-06.mp3
//! ```
//!
//! KV keys are percent-encoded into flat file names. Every write goes to a
//! sibling temporary file that is renamed over the target, so a concurrent
//! reader sees the previous value or the new one, never a partial file.

use super::{BlobMeta, BlobStore, KvStore};
use crate::error::{Error, Result};
use async_trait::async_trait;
use rand::{Rng, rng};
use serde_json::Value;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use tokio::fs;
use tracing::{debug, instrument};

const KV_EXT: &str = "json";

/// Write `bytes` to `path` through a temporary file and an atomic rename.
///
/// Each call gets its own temporary name, so concurrent writers to one key
/// never share a file; the last rename wins.
async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| Error::Storage(format!("invalid path: {}", path.display())))?;
    let tmp = path.with_file_name(format!(
        ".{file_name}.{}.{:016x}.tmp",
        std::process::id(),
        rng().random::<u64>()
    ));

    fs::write(&tmp, bytes).await?;
    if let Err(e) = fs::rename(&tmp, path).await {
        let _ = fs::remove_file(&tmp).await;
        return Err(e.into());
    }
    Ok(())
}

pub struct FsKvStore {
    dir: PathBuf,
}

impl FsKvStore {
    pub fn new(data_dir: impl AsRef<Path>) -> Self {
        Self {
            dir: data_dir.as_ref().join("kv"),
        }
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir
            .join(format!("{}.{KV_EXT}", urlencoding::encode(key)))
    }
}

#[async_trait]
impl KvStore for FsKvStore {
    async fn get(&self, key: &str) -> Result<Option<Value>> {
        match fs::read(self.path_for(key)).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    #[instrument(level = "debug", skip_all, fields(%key))]
    async fn put(&self, key: &str, value: &Value) -> Result<()> {
        let bytes = serde_json::to_vec(value)?;
        write_atomic(&self.path_for(key), &bytes).await?;
        debug!(bytes = bytes.len(), "Stored value");
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let mut entries = match fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut keys = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if name.starts_with('.') {
                continue;
            }
            let Some(stem) = name.strip_suffix(&format!(".{KV_EXT}")) else {
                continue;
            };
            if let Ok(key) = urlencoding::decode(stem) {
                if key.starts_with(prefix) {
                    keys.push(key.into_owned());
                }
            }
        }
        keys.sort();
        Ok(keys)
    }
}

pub struct FsBlobStore {
    dir: PathBuf,
}

impl FsBlobStore {
    pub fn new(data_dir: impl AsRef<Path>) -> Self {
        Self {
            dir: data_dir.as_ref().join("blobs"),
        }
    }

    /// Map a slash-separated key under the blob directory, refusing keys
    /// that would escape it.
    fn path_for(&self, key: &str) -> Result<PathBuf> {
        let relative = Path::new(key);
        let clean = relative
            .components()
            .all(|c| matches!(c, Component::Normal(_)));
        if key.is_empty() || !clean {
            return Err(Error::Storage(format!("invalid blob key: {key:?}")));
        }
        Ok(self.dir.join(relative))
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    #[instrument(level = "info", skip_all, fields(%key, bytes = bytes.len()))]
    async fn put(&self, key: &str, bytes: &[u8]) -> Result<()> {
        write_atomic(&self.path_for(key)?, bytes).await
    }

    async fn head(&self, key: &str) -> Result<Option<BlobMeta>> {
        match fs::metadata(self.path_for(key)?).await {
            Ok(meta) if meta.is_file() => Ok(Some(BlobMeta { size: meta.len() })),
            Ok(_) => Ok(None),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
