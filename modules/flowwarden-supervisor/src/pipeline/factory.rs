use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use flowwarden_common::SourceKind;

use crate::analyzer::Analyzer;
use crate::config_manager::ConfigManager;
use crate::context::ExecutionContext;
use crate::features::TransformContextProvider;
use crate::pipeline::binding::PipelineBinding;
use crate::sources::SourceProvider;

/// Upper bound on each configuration lookup made while building a binding.
pub const CONFIG_LOOKUP_TIMEOUT: Duration = Duration::from_secs(10);

/// Builds pipeline bindings from the configured collaborators.
#[derive(Clone)]
pub struct PipelineFactory {
    sources: Arc<dyn SourceProvider>,
    transforms: Arc<dyn TransformContextProvider>,
    configs: Arc<dyn ConfigManager>,
    lookup_timeout: Duration,
}

impl PipelineFactory {
    pub fn new(
        sources: Arc<dyn SourceProvider>,
        transforms: Arc<dyn TransformContextProvider>,
        configs: Arc<dyn ConfigManager>,
    ) -> Self {
        Self {
            sources,
            transforms,
            configs,
            lookup_timeout: CONFIG_LOOKUP_TIMEOUT,
        }
    }

    pub fn with_lookup_timeout(mut self, timeout: Duration) -> Self {
        self.lookup_timeout = timeout;
        self
    }

    /// Bind `kind` to `analyzer`, or `None` if the kind has no currently
    /// valid configuration. Unavailability is expected and never an error.
    pub async fn create_pipeline(
        &self,
        kind: SourceKind,
        analyzer: Arc<dyn Analyzer>,
        context: &ExecutionContext,
    ) -> Option<PipelineBinding> {
        let config = self
            .bounded(kind, "source config", self.configs.source_config(kind))
            .await??;
        if !config.enabled {
            debug!(kind = %kind, "Source disabled in configuration");
            return None;
        }

        let transform = self
            .bounded(
                kind,
                "transform context",
                self.transforms.transform_context(kind, &config),
            )
            .await?;
        if !transform.is_enabled() {
            debug!(kind = %kind, tenant = config.tenant.as_str(), "Source disabled by feature flag");
            return None;
        }

        let source = self
            .bounded(kind, "source", self.sources.open(kind, &config))
            .await??;

        info!(
            kind = %kind,
            tenant = config.tenant.as_str(),
            analyzer = analyzer.name(),
            resume_offset = context.offset(kind),
            "Pipeline bound"
        );

        Some(PipelineBinding::new(kind, analyzer, source, transform))
    }

    /// Run one lookup under the timeout. Errors and timeouts are logged and
    /// collapse to `None`.
    async fn bounded<T, F>(&self, kind: SourceKind, what: &str, lookup: F) -> Option<T>
    where
        F: Future<Output = anyhow::Result<T>>,
    {
        match tokio::time::timeout(self.lookup_timeout, lookup).await {
            Ok(Ok(value)) => Some(value),
            Ok(Err(e)) => {
                warn!(kind = %kind, error = %e, "Failed to look up {what}, treating source as unavailable");
                None
            }
            Err(_) => {
                warn!(
                    kind = %kind,
                    timeout_ms = self.lookup_timeout.as_millis() as u64,
                    "Timed out looking up {what}, treating source as unavailable"
                );
                None
            }
        }
    }
}
