//! Pipeline factory and aggregation.

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::json;

use flowwarden_common::{RawRecord, SourceKind};
use flowwarden_supervisor::analyzer::{Analyzer, AnalyzerRegistry, EnvelopeAnalyzer};
use flowwarden_supervisor::config_manager::{ConfigManager, SourceConfig};
use flowwarden_supervisor::features::TransformContext;
use flowwarden_supervisor::pipeline::{
    attach_pipelines, PipelineBinding, PipelineFactory, UnifiedEventStream,
};
use flowwarden_supervisor::sources::StreamSource;
use flowwarden_supervisor::testing::{
    record, records, test_settings, MemoryCheckpointStore, MockConfigManager,
    MockSourceProvider, StaticTransformProvider, TEST_TENANT,
};
use flowwarden_supervisor::{ContextFactory, ExecutionContext};

async fn context() -> ExecutionContext {
    let settings = test_settings(Path::new("/checkpoints/pipeline-test"));
    ContextFactory::new(Arc::new(MemoryCheckpointStore::new()))
        .obtain_or_recover(&settings)
        .await
        .unwrap()
}

fn factory(configs: MockConfigManager, sources: MockSourceProvider) -> PipelineFactory {
    factory_with(Arc::new(configs), sources, StaticTransformProvider::new())
}

fn factory_with(
    configs: Arc<dyn ConfigManager>,
    sources: MockSourceProvider,
    transforms: StaticTransformProvider,
) -> PipelineFactory {
    PipelineFactory::new(Arc::new(sources), Arc::new(transforms), configs)
}

fn envelope() -> Arc<dyn Analyzer> {
    Arc::new(EnvelopeAnalyzer)
}

/// A source that yields a fixed list regardless of the requested offset.
struct FixedSource(Vec<RawRecord>);

#[async_trait]
impl StreamSource for FixedSource {
    async fn pull(&mut self, _after: i64, _limit: usize) -> Result<Vec<RawRecord>> {
        Ok(std::mem::take(&mut self.0))
    }
}

fn binding(kind: SourceKind, tenant: &str) -> PipelineBinding {
    PipelineBinding::new(
        kind,
        envelope(),
        Box::new(FixedSource(Vec::new())),
        TransformContext::new(tenant),
    )
}

fn single(kind: SourceKind) -> UnifiedEventStream {
    UnifiedEventStream::single(binding(kind, TEST_TENANT))
}

// ---------------------------------------------------------------------------
// create_pipeline
// ---------------------------------------------------------------------------

#[tokio::test]
async fn configured_kind_with_live_source_binds() {
    let ctx = context().await;
    let f = factory(
        MockConfigManager::enabled(&[SourceKind::Tls]),
        MockSourceProvider::new().with_records(SourceKind::Tls, records(1)),
    );

    let binding = f
        .create_pipeline(SourceKind::Tls, envelope(), &ctx)
        .await
        .unwrap();

    assert_eq!(binding.kind(), SourceKind::Tls);
    assert_eq!(binding.transform().tenant, TEST_TENANT);
}

#[tokio::test]
async fn unconfigured_kind_is_unavailable() {
    let ctx = context().await;
    let f = factory(
        MockConfigManager::new(),
        MockSourceProvider::new().with_records(SourceKind::Tls, records(1)),
    );

    assert!(f
        .create_pipeline(SourceKind::Tls, envelope(), &ctx)
        .await
        .is_none());
}

#[tokio::test]
async fn disabled_config_is_unavailable() {
    let ctx = context().await;
    let configs = MockConfigManager::new();
    configs.insert(SourceConfig::new(SourceKind::Smtp, TEST_TENANT).disabled());
    let f = factory(
        configs,
        MockSourceProvider::new().with_records(SourceKind::Smtp, records(1)),
    );

    assert!(f
        .create_pipeline(SourceKind::Smtp, envelope(), &ctx)
        .await
        .is_none());
}

#[tokio::test]
async fn feature_flag_off_is_unavailable() {
    let ctx = context().await;
    let f = factory_with(
        Arc::new(MockConfigManager::enabled(&[SourceKind::Http])),
        MockSourceProvider::new().with_records(SourceKind::Http, records(1)),
        StaticTransformProvider::new().with_feature(SourceKind::Http, "enabled", json!(false)),
    );

    assert!(f
        .create_pipeline(SourceKind::Http, envelope(), &ctx)
        .await
        .is_none());
}

#[tokio::test]
async fn config_lookup_error_is_unavailable() {
    let ctx = context().await;
    let configs = MockConfigManager::enabled(&[SourceKind::Dns]);
    configs.error_on(SourceKind::Dns);
    let f = factory(
        configs,
        MockSourceProvider::new().with_records(SourceKind::Dns, records(1)),
    );

    assert!(f
        .create_pipeline(SourceKind::Dns, envelope(), &ctx)
        .await
        .is_none());
}

/// Never answers.
struct HangingConfigManager;

#[async_trait]
impl ConfigManager for HangingConfigManager {
    async fn source_config(&self, _kind: SourceKind) -> Result<Option<SourceConfig>> {
        std::future::pending().await
    }
}

#[tokio::test(start_paused = true)]
async fn config_lookup_timeout_is_unavailable() {
    let ctx = context().await;
    let f = factory_with(
        Arc::new(HangingConfigManager),
        MockSourceProvider::new().with_records(SourceKind::Ssh, records(1)),
        StaticTransformProvider::new(),
    )
    .with_lookup_timeout(Duration::from_secs(3));

    let started = tokio::time::Instant::now();
    let result = f.create_pipeline(SourceKind::Ssh, envelope(), &ctx).await;

    assert!(result.is_none());
    assert!(started.elapsed() >= Duration::from_secs(3));
}

// ---------------------------------------------------------------------------
// PipelineBinding
// ---------------------------------------------------------------------------

#[tokio::test]
async fn next_events_tracks_last_offset() {
    let mut b = PipelineBinding::new(
        SourceKind::Syslog,
        envelope(),
        Box::new(FixedSource(vec![record(4), record(9)])),
        TransformContext::new(TEST_TENANT),
    );

    let pulled = b.next_events(3, 10).await.unwrap();

    assert_eq!(pulled.last_offset, Some(9));
    let offsets: Vec<i64> = pulled.events.iter().map(|e| e.source_offset).collect();
    assert_eq!(offsets, vec![4, 9]);
    assert!(pulled.events.iter().all(|e| e.tenant == TEST_TENANT));
}

#[tokio::test]
async fn empty_pull_has_no_offset() {
    let mut b = binding(SourceKind::Syslog, TEST_TENANT);

    let pulled = b.next_events(7, 10).await.unwrap();

    assert!(pulled.events.is_empty());
    assert_eq!(pulled.last_offset, None);
}

#[tokio::test]
async fn non_increasing_offset_is_an_error() {
    let mut b = PipelineBinding::new(
        SourceKind::Netflow,
        envelope(),
        Box::new(FixedSource(vec![record(5), record(5)])),
        TransformContext::new(TEST_TENANT),
    );

    let err = b.next_events(0, 10).await.unwrap_err();
    assert!(err.to_string().contains("returned offset 5 after 5"), "{err}");
}

#[tokio::test]
async fn offset_at_or_before_resume_point_is_an_error() {
    let mut b = PipelineBinding::new(
        SourceKind::Netflow,
        envelope(),
        Box::new(FixedSource(vec![record(2)])),
        TransformContext::new(TEST_TENANT),
    );

    assert!(b.next_events(2, 10).await.is_err());
}

// ---------------------------------------------------------------------------
// Union
// ---------------------------------------------------------------------------

#[test]
fn union_is_order_independent() {
    use SourceKind::*;
    let orders = [
        [Dns, Tls, Ssh],
        [Dns, Ssh, Tls],
        [Tls, Dns, Ssh],
        [Tls, Ssh, Dns],
        [Ssh, Dns, Tls],
        [Ssh, Tls, Dns],
    ];
    let expected: BTreeSet<SourceKind> = [Dns, Tls, Ssh].into_iter().collect();

    for order in orders {
        let stream = order
            .into_iter()
            .map(single)
            .reduce(UnifiedEventStream::union)
            .unwrap();
        assert_eq!(stream.kinds(), expected, "order {order:?}");
    }
}

#[test]
fn union_is_associative() {
    use SourceKind::*;
    let left = single(Http).union(single(Smtp)).union(single(Dhcp));
    let right = single(Http).union(single(Smtp).union(single(Dhcp)));

    assert_eq!(left.kinds(), right.kinds());
    assert_eq!(left.len(), 3);
}

#[test]
fn union_keeps_left_binding_for_duplicate_kind() {
    let mut stream = UnifiedEventStream::single(binding(SourceKind::Dns, "first"))
        .union(UnifiedEventStream::single(binding(SourceKind::Dns, "second")));

    assert_eq!(stream.len(), 1);
    let kept = stream.bindings_mut().next().unwrap();
    assert_eq!(kept.transform().tenant, "first");
}

// ---------------------------------------------------------------------------
// attach_pipelines
// ---------------------------------------------------------------------------

#[tokio::test]
async fn nothing_available_yields_no_stream() {
    let ctx = context().await;
    let f = factory(MockConfigManager::new(), MockSourceProvider::new());

    let agg = attach_pipelines(&SourceKind::ALL, &f, &AnalyzerRegistry::standard(), &ctx).await;

    assert!(!agg.has_any());
    assert!(agg.kinds().is_empty());
    assert!(agg.into_stream().is_none());
}

#[tokio::test]
async fn only_available_kinds_are_aggregated() {
    let ctx = context().await;
    let f = factory(
        MockConfigManager::enabled(&[SourceKind::Dns, SourceKind::Dhcp, SourceKind::Ssh]),
        MockSourceProvider::new()
            .with_records(SourceKind::Dns, records(1))
            .with_records(SourceKind::Dhcp, records(1)),
    );

    let agg = attach_pipelines(&SourceKind::ALL, &f, &AnalyzerRegistry::standard(), &ctx).await;

    let expected: BTreeSet<SourceKind> = [SourceKind::Dns, SourceKind::Dhcp].into_iter().collect();
    assert_eq!(agg.kinds(), expected);
}

#[tokio::test]
async fn kinds_without_analyzer_are_skipped() {
    let ctx = context().await;
    let f = factory(
        MockConfigManager::enabled(&[SourceKind::Dns, SourceKind::Tls]),
        MockSourceProvider::new()
            .with_records(SourceKind::Dns, records(1))
            .with_records(SourceKind::Tls, records(1)),
    );
    let analyzers = AnalyzerRegistry::new().with(SourceKind::Tls, envelope());

    let agg = attach_pipelines(&SourceKind::ALL, &f, &analyzers, &ctx).await;

    assert_eq!(agg.kinds(), BTreeSet::from([SourceKind::Tls]));
}
