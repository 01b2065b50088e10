use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::info;

use flowwarden_common::{Settings, SourceKind};

use crate::checkpoint::{CheckpointError, CheckpointStore, ContextState};

/// Whether a context started cold or resumed checkpointed progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextOrigin {
    Fresh,
    Recovered,
}

impl fmt::Display for ContextOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fresh => write!(f, "fresh"),
            Self::Recovered => write!(f, "recovered"),
        }
    }
}

/// Handle to one lifetime of the streaming computation. Owned exclusively by
/// the supervisor and dropped when its computation terminates.
pub struct ExecutionContext {
    checkpoint_dir: PathBuf,
    state: ContextState,
    origin: ContextOrigin,
    store: Arc<dyn CheckpointStore>,
}

impl ExecutionContext {
    pub fn checkpoint_dir(&self) -> &Path {
        &self.checkpoint_dir
    }

    pub fn batch_interval(&self) -> Duration {
        self.state.batch_interval()
    }

    pub fn batch_seq(&self) -> u64 {
        self.state.batch_seq
    }

    pub fn origin(&self) -> ContextOrigin {
        self.origin
    }

    pub fn state(&self) -> &ContextState {
        &self.state
    }

    /// Last consumed offset for `kind`, or 0 if the kind never ran.
    pub fn offset(&self, kind: SourceKind) -> i64 {
        self.state.source_offsets.get(&kind).copied().unwrap_or(0)
    }

    pub fn offsets(&self) -> &BTreeMap<SourceKind, i64> {
        &self.state.source_offsets
    }

    /// Record a completed batch and write it to the checkpoint store.
    /// In-memory state only advances once the write succeeded.
    pub async fn commit(
        &mut self,
        batch_seq: u64,
        offsets: BTreeMap<SourceKind, i64>,
    ) -> Result<(), CheckpointError> {
        let mut next = self.state.clone();
        next.batch_seq = batch_seq;
        next.source_offsets = offsets;
        next.updated_at = Utc::now();

        self.store.checkpoint(&self.checkpoint_dir, &next).await?;
        self.state = next;
        Ok(())
    }
}

impl fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("checkpoint_dir", &self.checkpoint_dir)
            .field("origin", &self.origin)
            .field("state", &self.state)
            .finish()
    }
}

/// Creates execution contexts, resuming checkpointed state when present.
#[derive(Clone)]
pub struct ContextFactory {
    store: Arc<dyn CheckpointStore>,
}

impl ContextFactory {
    pub fn new(store: Arc<dyn CheckpointStore>) -> Self {
        Self { store }
    }

    /// Recover the context checkpointed at the settings' path, or create and
    /// immediately checkpoint a fresh one.
    ///
    /// Present-but-invalid state is an error, never silently replaced.
    pub async fn obtain_or_recover(
        &self,
        settings: &Settings,
    ) -> Result<ExecutionContext, CheckpointError> {
        let dir = settings.checkpoint_dir.clone();

        if let Some(state) = self.store.recover(&dir).await? {
            state
                .validate(&dir)
                .map_err(|reason| CheckpointError::corrupt(&dir, reason))?;

            info!(
                checkpoint_dir = %dir.display(),
                batch_seq = state.batch_seq,
                batch_interval_ms = state.batch_interval_ms,
                sources = state.source_offsets.len(),
                "Recovered execution context from checkpoint"
            );

            return Ok(ExecutionContext {
                checkpoint_dir: dir,
                state,
                origin: ContextOrigin::Recovered,
                store: self.store.clone(),
            });
        }

        let state = ContextState::fresh(&dir, settings.batch_interval);
        self.store.checkpoint(&dir, &state).await?;

        info!(
            checkpoint_dir = %dir.display(),
            batch_interval_ms = state.batch_interval_ms,
            "Created fresh execution context"
        );

        Ok(ExecutionContext {
            checkpoint_dir: dir,
            state,
            origin: ContextOrigin::Fresh,
            store: self.store.clone(),
        })
    }
}
