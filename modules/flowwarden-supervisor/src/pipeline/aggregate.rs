use std::collections::BTreeSet;

use futures::future::join_all;
use tracing::debug;

use flowwarden_common::SourceKind;

use crate::analyzer::AnalyzerRegistry;
use crate::context::ExecutionContext;
use crate::pipeline::binding::UnifiedEventStream;
use crate::pipeline::factory::PipelineFactory;

/// Result of one attachment attempt.
#[derive(Debug, Default)]
pub struct Aggregation {
    stream: Option<UnifiedEventStream>,
}

impl Aggregation {
    pub fn has_any(&self) -> bool {
        self.stream.is_some()
    }

    pub fn kinds(&self) -> BTreeSet<SourceKind> {
        self.stream
            .as_ref()
            .map(UnifiedEventStream::kinds)
            .unwrap_or_default()
    }

    pub fn into_stream(self) -> Option<UnifiedEventStream> {
        self.stream
    }
}

/// Try every kind once and union whatever attached. Kinds with no registered
/// analyzer are skipped.
pub async fn attach_pipelines(
    kinds: &[SourceKind],
    factory: &PipelineFactory,
    analyzers: &AnalyzerRegistry,
    context: &ExecutionContext,
) -> Aggregation {
    let attempts = kinds.iter().filter_map(|kind| {
        let Some(analyzer) = analyzers.get(*kind) else {
            debug!(kind = %kind, "No analyzer registered, skipping");
            return None;
        };
        Some(factory.create_pipeline(*kind, analyzer, context))
    });

    let stream = join_all(attempts)
        .await
        .into_iter()
        .flatten()
        .map(UnifiedEventStream::single)
        .reduce(UnifiedEventStream::union);

    Aggregation { stream }
}
