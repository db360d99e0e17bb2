//! Durable key-value and blob storage.
//!
//! The pipeline needs two storage capabilities:
//!
//! - [`KvStore`]: JSON values by string key. Holds Run Records, the step
//!   journal and run instance statuses.
//! - [`BlobStore`]: raw bytes by key, plus a `head` lookup used to verify an
//!   upload landed in full.
//!
//! A `put` replaces the whole value at once; readers see either the old
//! value or the new one.
//!
//! # Backends
//!
//! | Backend | Module | Notes |
//! |---------|--------|-------|
//! | Memory | [`memory`] | tests and dry runs |
//! | Filesystem | [`fs`] | write-to-temp then rename |

use crate::error::Result;
use async_trait::async_trait;
use serde_json::Value;

pub mod fs;
pub mod memory;

pub use fs::{FsBlobStore, FsKvStore};
pub use memory::{MemoryBlobStore, MemoryKvStore};

#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Value>>;

    async fn put(&self, key: &str, value: &Value) -> Result<()>;

    /// Keys starting with `prefix`, sorted.
    async fn list(&self, prefix: &str) -> Result<Vec<String>>;
}

/// Metadata returned by [`BlobStore::head`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlobMeta {
    pub size: u64,
}

#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn put(&self, key: &str, bytes: &[u8]) -> Result<()>;

    async fn head(&self, key: &str) -> Result<Option<BlobMeta>>;
}
