pub mod analyzer;
pub mod attach;
pub mod checkpoint;
pub mod config_manager;
pub mod context;
pub mod features;
pub mod listener;
pub mod pipeline;
pub mod retry;
pub mod runtime;
pub mod schema;
pub mod sources;
pub mod supervisor;
pub mod types;

#[cfg(feature = "test-support")]
pub mod testing;

pub use checkpoint::{CheckpointError, CheckpointStore, ContextState, FileCheckpointStore};
pub use context::{ContextFactory, ContextOrigin, ExecutionContext};
pub use supervisor::{Supervisor, SupervisorDeps, SupervisorError};
pub use types::{CycleReport, Phase, StopReason, Termination};
