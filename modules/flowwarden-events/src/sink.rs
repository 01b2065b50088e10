use async_trait::async_trait;

use flowwarden_common::RecordBatch;

/// Where analyzed output ends up. Shared by every pipeline of a cycle;
/// pipelines only ever append to it.
#[async_trait]
pub trait EventSink: Send + Sync {
    /// Persist one batch. Either all events of the batch are stored or none.
    async fn persist(&self, batch: &RecordBatch) -> anyhow::Result<()>;
}
