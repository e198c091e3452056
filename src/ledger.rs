//! Append-only record of published videos, one JSON object per line.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tracing::debug;
use uuid::Uuid;

use crate::error::LedgerError;
use crate::scene::BrandDescriptor;
use crate::video::VideoArtifact;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    pub brand: BrandDescriptor,
    pub artifact: VideoArtifact,
}

#[derive(Debug, Clone)]
pub struct ArtifactLedger {
    path: PathBuf,
}

impl ArtifactLedger {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Record `artifact` and return the stored entry.
    pub async fn append(&self, brand: &BrandDescriptor, artifact: &VideoArtifact) -> Result<LedgerEntry, LedgerError> {
        let entry = LedgerEntry {
            id: Uuid::new_v4(),
            created_at: Utc::now(),
            brand: brand.clone(),
            artifact: artifact.clone(),
        };

        let mut line = serde_json::to_vec(&entry)?;
        line.push(b'\n');

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(&line).await?;
        file.flush().await?;

        debug!(id = %entry.id, ledger = %self.path.display(), "ledger entry appended");
        Ok(entry)
    }

    /// All entries in insertion order. A missing file is an empty ledger.
    pub async fn entries(&self) -> Result<Vec<LedgerEntry>, LedgerError> {
        let contents = match tokio::fs::read_to_string(&self.path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        contents
            .lines()
            .enumerate()
            .filter(|(_, line)| !line.trim().is_empty())
            .map(|(idx, line)| {
                serde_json::from_str(line).map_err(|source| LedgerError::Malformed { line: idx + 1, source })
            })
            .collect()
    }

    pub async fn find(&self, id: Uuid) -> Result<Option<LedgerEntry>, LedgerError> {
        Ok(self.entries().await?.into_iter().find(|e| e.id == id))
    }
}
