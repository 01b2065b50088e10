use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use anyhow::bail;
use async_trait::async_trait;

use flowwarden_common::{AnalyzedEvent, RecordBatch};

use crate::sink::EventSink;

/// In-memory sink for tests. Can be told to fail the next N persists.
#[derive(Default)]
pub struct MemorySink {
    batches: Mutex<Vec<RecordBatch>>,
    failures_left: AtomicUsize,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `n` calls to `persist`.
    pub fn failing(self, n: usize) -> Self {
        self.failures_left.store(n, Ordering::SeqCst);
        self
    }

    pub fn batches(&self) -> Vec<RecordBatch> {
        self.batches.lock().unwrap().clone()
    }

    pub fn events(&self) -> Vec<AnalyzedEvent> {
        self.batches
            .lock()
            .unwrap()
            .iter()
            .flat_map(|b| b.events.iter().cloned())
            .collect()
    }
}

#[async_trait]
impl EventSink for MemorySink {
    async fn persist(&self, batch: &RecordBatch) -> anyhow::Result<()> {
        let should_fail = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if should_fail {
            bail!("MemorySink: injected failure for batch {}", batch.batch_seq);
        }
        self.batches.lock().unwrap().push(batch.clone());
        Ok(())
    }
}
