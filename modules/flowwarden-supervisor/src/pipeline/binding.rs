use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

use anyhow::{bail, Result};

use flowwarden_common::{AnalyzedEvent, SourceKind};

use crate::analyzer::Analyzer;
use crate::features::TransformContext;
use crate::sources::StreamSource;

/// A source kind bound to its analyzer, live source and transform context.
pub struct PipelineBinding {
    kind: SourceKind,
    analyzer: Arc<dyn Analyzer>,
    source: Box<dyn StreamSource>,
    transform: TransformContext,
}

/// Output of one pull on a binding.
#[derive(Debug, Default)]
pub struct PulledEvents {
    pub events: Vec<AnalyzedEvent>,
    /// Offset of the newest record consumed, if any record was pulled.
    pub last_offset: Option<i64>,
}

impl PipelineBinding {
    pub fn new(
        kind: SourceKind,
        analyzer: Arc<dyn Analyzer>,
        source: Box<dyn StreamSource>,
        transform: TransformContext,
    ) -> Self {
        Self {
            kind,
            analyzer,
            source,
            transform,
        }
    }

    pub fn kind(&self) -> SourceKind {
        self.kind
    }

    pub fn transform(&self) -> &TransformContext {
        &self.transform
    }

    /// Pull records after `after` and run them through the analyzer.
    pub async fn next_events(&mut self, after: i64, limit: usize) -> Result<PulledEvents> {
        let records = self.source.pull(after, limit).await?;

        let mut pulled = PulledEvents::default();
        let mut last = after;
        for record in &records {
            if record.offset <= last {
                bail!(
                    "{} source returned offset {} after {}",
                    self.kind,
                    record.offset,
                    last
                );
            }
            last = record.offset;

            let events = self.analyzer.analyze(self.kind, record, &self.transform)?;
            pulled.events.extend(events);
            pulled.last_offset = Some(record.offset);
        }

        Ok(pulled)
    }
}

impl fmt::Debug for PipelineBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineBinding")
            .field("kind", &self.kind)
            .field("analyzer", &self.analyzer.name())
            .field("tenant", &self.transform.tenant)
            .finish()
    }
}

/// Union of every binding attached in one cycle, keyed by source kind.
///
/// Keying by kind makes `union` associative and commutative over bindings of
/// distinct kinds, so the order kinds are attached in never matters. If both
/// sides carry the same kind the left binding is kept.
#[derive(Debug, Default)]
pub struct UnifiedEventStream {
    bindings: BTreeMap<SourceKind, PipelineBinding>,
}

impl UnifiedEventStream {
    pub fn single(binding: PipelineBinding) -> Self {
        Self {
            bindings: BTreeMap::from([(binding.kind(), binding)]),
        }
    }

    pub fn union(mut self, other: UnifiedEventStream) -> Self {
        for (kind, binding) in other.bindings {
            self.bindings.entry(kind).or_insert(binding);
        }
        self
    }

    pub fn kinds(&self) -> BTreeSet<SourceKind> {
        self.bindings.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    pub fn bindings_mut(&mut self) -> impl Iterator<Item = &mut PipelineBinding> {
        self.bindings.values_mut()
    }
}
