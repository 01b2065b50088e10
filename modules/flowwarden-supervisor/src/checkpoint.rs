//! Durable progress state for the execution context.
//!
//! The supervisor only needs two things from a checkpoint store: "is there
//! valid state at this path" and "write this state to this path". The on-disk
//! layout is private to [`FileCheckpointStore`].

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::io::AsyncWriteExt;

use flowwarden_common::SourceKind;

/// Bumped whenever `ContextState` changes shape.
pub const CHECKPOINT_FORMAT_VERSION: u32 = 2;

const CHECKPOINT_FILE: &str = "context.json";
const CHECKPOINT_TMP_FILE: &str = "context.json.tmp";

#[derive(Error, Debug)]
pub enum CheckpointError {
    #[error("checkpoint I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("corrupt checkpoint at {path}: {reason}")]
    Corrupt { path: PathBuf, reason: String },
}

impl CheckpointError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    pub fn corrupt(path: &Path, reason: impl Into<String>) -> Self {
        Self::Corrupt {
            path: path.to_path_buf(),
            reason: reason.into(),
        }
    }
}

/// Everything needed to resume a computation where it left off.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextState {
    pub version: u32,
    /// Directory the state was created for. A copy found anywhere else is
    /// refused on recovery.
    pub checkpoint_dir: PathBuf,
    pub batch_interval_ms: u64,
    /// Sequence number of the last batch whose output was persisted.
    pub batch_seq: u64,
    /// Last consumed offset per source kind.
    #[serde(default)]
    pub source_offsets: BTreeMap<SourceKind, i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ContextState {
    pub fn fresh(checkpoint_dir: &Path, batch_interval: Duration) -> Self {
        let now = Utc::now();
        Self {
            version: CHECKPOINT_FORMAT_VERSION,
            checkpoint_dir: checkpoint_dir.to_path_buf(),
            batch_interval_ms: batch_interval.as_millis() as u64,
            batch_seq: 0,
            source_offsets: BTreeMap::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn batch_interval(&self) -> Duration {
        Duration::from_millis(self.batch_interval_ms)
    }

    /// Structural checks applied before a state recovered from `dir` is
    /// resumed.
    pub fn validate(&self, dir: &Path) -> Result<(), String> {
        if self.version != CHECKPOINT_FORMAT_VERSION {
            return Err(format!(
                "unsupported format version {} (expected {CHECKPOINT_FORMAT_VERSION})",
                self.version
            ));
        }
        if self.checkpoint_dir != dir {
            return Err(format!(
                "state belongs to {}, not {}",
                self.checkpoint_dir.display(),
                dir.display()
            ));
        }
        if self.batch_interval_ms == 0 {
            return Err("batch interval is zero".to_string());
        }
        if let Some((kind, offset)) = self.source_offsets.iter().find(|(_, o)| **o < 0) {
            return Err(format!("negative offset {offset} for source {kind}"));
        }
        if self.updated_at < self.created_at {
            return Err("updated_at precedes created_at".to_string());
        }
        Ok(())
    }
}

/// Path-addressed durable store for [`ContextState`].
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Load the state at `dir`. `Ok(None)` means nothing has been
    /// checkpointed there yet.
    async fn recover(&self, dir: &Path) -> Result<Option<ContextState>, CheckpointError>;

    /// Durably replace the state at `dir`.
    async fn checkpoint(&self, dir: &Path, state: &ContextState) -> Result<(), CheckpointError>;
}

/// Stores the state as a JSON document inside the checkpoint directory.
/// Writes go to a temp file that is synced and renamed over the old one, so a
/// crash mid-write leaves the previous checkpoint intact.
#[derive(Debug, Default, Clone)]
pub struct FileCheckpointStore;

impl FileCheckpointStore {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl CheckpointStore for FileCheckpointStore {
    async fn recover(&self, dir: &Path) -> Result<Option<ContextState>, CheckpointError> {
        let path = dir.join(CHECKPOINT_FILE);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(CheckpointError::io(&path, e)),
        };

        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|e| CheckpointError::corrupt(&path, e.to_string()))
    }

    async fn checkpoint(&self, dir: &Path, state: &ContextState) -> Result<(), CheckpointError> {
        tokio::fs::create_dir_all(dir)
            .await
            .map_err(|e| CheckpointError::io(dir, e))?;

        let tmp = dir.join(CHECKPOINT_TMP_FILE);
        let path = dir.join(CHECKPOINT_FILE);
        let bytes = serde_json::to_vec_pretty(state)
            .map_err(|e| CheckpointError::corrupt(&path, e.to_string()))?;

        let mut file = tokio::fs::File::create(&tmp)
            .await
            .map_err(|e| CheckpointError::io(&tmp, e))?;
        file.write_all(&bytes)
            .await
            .map_err(|e| CheckpointError::io(&tmp, e))?;
        file.sync_all()
            .await
            .map_err(|e| CheckpointError::io(&tmp, e))?;
        drop(file);

        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|e| CheckpointError::io(&path, e))
    }
}
