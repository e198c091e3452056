//! Durable object storage for finished videos.

mod s3;

pub use s3::{S3Config, S3Store};

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::info;
use url::Url;

use crate::error::StorageError;

/// Publishes an object and returns the locator callers can resolve.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn put(&self, name: &str, bytes: Vec<u8>) -> Result<Url, StorageError>;

    fn name(&self) -> &'static str;
}

/// Stores objects in a local directory and hands out `file://` URLs.
#[derive(Debug, Clone)]
pub struct FsStore {
    root: PathBuf,
}

impl FsStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

#[async_trait]
impl ObjectStore for FsStore {
    async fn put(&self, name: &str, bytes: Vec<u8>) -> Result<Url, StorageError> {
        validate_key(name)?;

        tokio::fs::create_dir_all(&self.root).await?;
        let root = tokio::fs::canonicalize(&self.root).await?;
        let path = root.join(name);
        tokio::fs::write(&path, &bytes).await?;

        info!(key = name, bytes = bytes.len(), path = %path.display(), "stored object");
        Url::from_file_path(&path)
            .map_err(|_| StorageError::Upload(format!("cannot express '{}' as a URL", path.display())))
    }

    fn name(&self) -> &'static str {
        "fs"
    }
}

pub(crate) fn validate_key(name: &str) -> Result<(), StorageError> {
    if name.is_empty() || name.contains("..") || name.starts_with('/') || name.contains('\\') {
        return Err(StorageError::Upload(format!("invalid object name '{}'", name)));
    }
    Ok(())
}
