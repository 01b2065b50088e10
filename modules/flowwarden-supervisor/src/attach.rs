use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use flowwarden_common::Settings;
use flowwarden_events::EventSink;

use crate::listener::{ChangeListener, ControlCommand};
use crate::pipeline::UnifiedEventStream;

const COMMAND_BUFFER: usize = 16;

/// A unified stream wired to its sink and control channel, not yet running.
pub struct AttachedComputation {
    pub(crate) stream: UnifiedEventStream,
    pub(crate) sink: Arc<dyn EventSink>,
    pub(crate) commands: mpsc::Receiver<ControlCommand>,
    pub(crate) listener_task: JoinHandle<()>,
    pub(crate) stop_wait: Duration,
    pub(crate) max_batch_records: usize,
}

impl Drop for AttachedComputation {
    fn drop(&mut self) {
        self.listener_task.abort();
    }
}

/// Wire the stream to the durable sink and start the change listener.
/// Batch processing does not begin until the computation is run.
pub fn attach_sink(
    stream: UnifiedEventStream,
    settings: &Settings,
    sink: Arc<dyn EventSink>,
    listener: Arc<dyn ChangeListener>,
) -> AttachedComputation {
    let (tx, commands) = mpsc::channel(COMMAND_BUFFER);

    let listener_task = tokio::spawn(async move {
        if let Err(e) = listener.listen(tx).await {
            warn!(error = %e, "Change listener stopped");
        }
    });

    info!(pipelines = stream.len(), "Sink and change listener attached");

    AttachedComputation {
        stream,
        sink,
        commands,
        listener_task,
        stop_wait: settings.context_stop_wait,
        max_batch_records: settings.max_batch_records,
    }
}
