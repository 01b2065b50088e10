//! Per-tenant tuning data handed to analyzers at pipeline construction.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;
use reqwest::StatusCode;
use tracing::debug;

use flowwarden_common::{Settings, SourceKind};

use crate::config_manager::SourceConfig;

const FEATURE_REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Everything an analyzer needs besides the record itself.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TransformContext {
    pub tenant: String,
    pub features: BTreeMap<String, serde_json::Value>,
    pub model_path: Option<PathBuf>,
    pub blob_url: Option<String>,
}

impl TransformContext {
    pub fn new(tenant: impl Into<String>) -> Self {
        Self {
            tenant: tenant.into(),
            ..Default::default()
        }
    }

    pub fn with_feature(mut self, name: impl Into<String>, value: serde_json::Value) -> Self {
        self.features.insert(name.into(), value);
        self
    }

    /// A kind is enabled unless the feature service says `enabled: false`.
    pub fn is_enabled(&self) -> bool {
        self.features
            .get("enabled")
            .and_then(|v| v.as_bool())
            .unwrap_or(true)
    }
}

#[async_trait]
pub trait TransformContextProvider: Send + Sync {
    async fn transform_context(
        &self,
        kind: SourceKind,
        config: &SourceConfig,
    ) -> Result<TransformContext>;
}

// ---------------------------------------------------------------------------
// Feature service
// ---------------------------------------------------------------------------

/// HTTP client for the feature service.
#[derive(Clone)]
pub struct FeatureClient {
    base_url: String,
    http: reqwest::Client,
}

impl FeatureClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(FEATURE_REQUEST_TIMEOUT)
            .build()?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http,
        })
    }

    fn features_url(&self, tenant: &str, kind: SourceKind) -> String {
        format!("{}/tenants/{}/features/{}", self.base_url, tenant, kind)
    }

    /// Feature values for a tenant and kind. A 404 means the tenant has no
    /// overrides and yields an empty map.
    pub async fn features(
        &self,
        tenant: &str,
        kind: SourceKind,
    ) -> Result<BTreeMap<String, serde_json::Value>> {
        let url = self.features_url(tenant, kind);
        let resp = self.http.get(&url).send().await?;

        let status = resp.status();
        if status == StatusCode::NOT_FOUND {
            debug!(tenant, kind = %kind, "No feature overrides");
            return Ok(BTreeMap::new());
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            bail!("feature service returned {status} for {url}: {body}");
        }

        Ok(resp.json().await?)
    }
}

/// Builds transform contexts from the feature service plus local model and
/// blob locations.
pub struct FeatureServiceProvider {
    client: FeatureClient,
    model_dir: PathBuf,
    blob_url: Option<String>,
}

impl FeatureServiceProvider {
    pub fn new(client: FeatureClient, model_dir: PathBuf, blob_url: Option<String>) -> Self {
        Self {
            client,
            model_dir,
            blob_url,
        }
    }

    pub fn from_settings(settings: &Settings) -> Result<Self> {
        Ok(Self::new(
            FeatureClient::new(&settings.feature_service_url)?,
            settings.model_dir.clone(),
            settings.blob_storage_url.clone(),
        ))
    }
}

#[async_trait]
impl TransformContextProvider for FeatureServiceProvider {
    async fn transform_context(
        &self,
        kind: SourceKind,
        config: &SourceConfig,
    ) -> Result<TransformContext> {
        let features = self.client.features(&config.tenant, kind).await?;
        Ok(TransformContext {
            tenant: config.tenant.clone(),
            features,
            model_path: Some(self.model_dir.join(kind.as_str())),
            blob_url: self
                .blob_url
                .as_ref()
                .map(|base| format!("{}/{}", base.trim_end_matches('/'), kind)),
        })
    }
}
