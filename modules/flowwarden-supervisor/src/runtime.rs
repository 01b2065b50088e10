//! The running computation: pull, analyze, persist and checkpoint one batch
//! per interval until something ends it.

use std::collections::BTreeMap;

use anyhow::{Context, Result};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use flowwarden_common::{RecordBatch, SourceKind};
use flowwarden_events::EventSink;

use crate::attach::AttachedComputation;
use crate::context::ExecutionContext;
use crate::listener::ControlCommand;
use crate::pipeline::UnifiedEventStream;
use crate::types::{StopReason, Termination};

/// What a successful batch leaves behind to be checkpointed.
#[derive(Debug)]
struct BatchProgress {
    batch_seq: u64,
    offsets: BTreeMap<SourceKind, i64>,
    events: usize,
}

/// Run batches on the context's interval until a command arrives, the
/// listener goes away, or a batch fails.
///
/// A command arriving mid-batch gives the in-flight batch up to the stop
/// window to finish; a batch that does not finish in time is abandoned and
/// its offsets are not checkpointed.
pub async fn run_until_terminated(
    context: &mut ExecutionContext,
    mut attached: AttachedComputation,
) -> Termination {
    let mut ticker = tokio::time::interval(context.batch_interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let sink = attached.sink.clone();
    let limit = attached.max_batch_records;
    let stop_wait = attached.stop_wait;

    info!(
        batch_seq = context.batch_seq(),
        batch_interval_ms = context.batch_interval().as_millis() as u64,
        pipelines = attached.stream.len(),
        "Computation started"
    );

    loop {
        tokio::select! {
            cmd = attached.commands.recv() => {
                return Termination::Stopped(stop_reason(cmd));
            }
            _ = ticker.tick() => {}
        }

        let batch_seq = context.batch_seq() + 1;
        let work = process_batch(
            &mut attached.stream,
            sink.as_ref(),
            context.offsets().clone(),
            batch_seq,
            limit,
        );
        tokio::pin!(work);

        let mut stop = None;
        let outcome = tokio::select! {
            res = &mut work => Some(res),
            cmd = attached.commands.recv() => {
                let reason = stop_reason(cmd);
                info!(
                    batch_seq,
                    reason = %reason,
                    stop_wait_ms = stop_wait.as_millis() as u64,
                    "Stop requested mid-batch, draining"
                );
                stop = Some(reason);
                match tokio::time::timeout(stop_wait, &mut work).await {
                    Ok(res) => Some(res),
                    Err(_) => {
                        warn!(batch_seq, "In-flight batch missed the stop window, abandoning it");
                        None
                    }
                }
            }
        };

        match outcome {
            Some(Ok(progress)) => {
                if let Err(e) = context.commit(progress.batch_seq, progress.offsets).await {
                    error!(batch_seq, error = %e, "Checkpoint write failed");
                    return Termination::Failed(format!("checkpoint write failed: {e}"));
                }
                debug!(batch_seq, events = progress.events, "Batch committed");
            }
            Some(Err(e)) => {
                error!(batch_seq, error = %e, "Batch failed");
                return Termination::Failed(format!("{e:#}"));
            }
            None => {}
        }

        if let Some(reason) = stop {
            return Termination::Stopped(reason);
        }
    }
}

fn stop_reason(cmd: Option<ControlCommand>) -> StopReason {
    match cmd {
        Some(cmd) => StopReason::Command(cmd),
        None => StopReason::ListenerClosed,
    }
}

/// Pull every binding once, persist the combined batch, and return the
/// advanced offsets. Nothing is checkpointed here.
async fn process_batch(
    stream: &mut UnifiedEventStream,
    sink: &dyn EventSink,
    mut offsets: BTreeMap<SourceKind, i64>,
    batch_seq: u64,
    limit: usize,
) -> Result<BatchProgress> {
    let mut batch = RecordBatch::new(batch_seq);

    for binding in stream.bindings_mut() {
        let kind = binding.kind();
        let after = offsets.get(&kind).copied().unwrap_or(0);
        let pulled = binding
            .next_events(after, limit)
            .await
            .with_context(|| format!("{kind} pipeline failed"))?;

        if let Some(last) = pulled.last_offset {
            offsets.insert(kind, last);
        }
        batch.events.extend(pulled.events);
    }

    let events = batch.len();
    if !batch.is_empty() {
        sink.persist(&batch)
            .await
            .with_context(|| format!("persisting batch {batch_seq}"))?;
    }

    Ok(BatchProgress {
        batch_seq,
        offsets,
        events,
    })
}
