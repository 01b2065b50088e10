use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;

use flowwarden_common::SourceKind;

/// Tenant/site configuration for one source kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceConfig {
    pub kind: SourceKind,
    pub tenant: String,
    pub enabled: bool,
    /// Source-specific settings, opaque to the supervisor.
    #[serde(default)]
    pub settings: serde_json::Value,
}

impl SourceConfig {
    pub fn new(kind: SourceKind, tenant: impl Into<String>) -> Self {
        Self {
            kind,
            tenant: tenant.into(),
            enabled: true,
            settings: serde_json::Value::Null,
        }
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    pub fn with_settings(mut self, settings: serde_json::Value) -> Self {
        self.settings = settings;
        self
    }

    /// A string setting, if present.
    pub fn setting_str(&self, key: &str) -> Option<&str> {
        self.settings.get(key).and_then(|v| v.as_str())
    }
}

/// Persistent store of per-kind source configuration.
#[async_trait]
pub trait ConfigManager: Send + Sync {
    /// `Ok(None)` when nothing is configured for `kind`.
    async fn source_config(&self, kind: SourceKind) -> Result<Option<SourceConfig>>;
}

/// Reads source configuration from the `source_configs` table.
#[derive(Clone)]
pub struct PgConfigManager {
    pool: PgPool,
}

impl PgConfigManager {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Insert or replace the configuration for a kind.
    pub async fn upsert(&self, config: &SourceConfig) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO source_configs (kind, tenant, enabled, settings, updated_at)
            VALUES ($1, $2, $3, $4, now())
            ON CONFLICT (kind) DO UPDATE
              SET tenant = EXCLUDED.tenant,
                  enabled = EXCLUDED.enabled,
                  settings = EXCLUDED.settings,
                  updated_at = now()
            "#,
        )
        .bind(config.kind.as_str())
        .bind(&config.tenant)
        .bind(config.enabled)
        .bind(&config.settings)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl ConfigManager for PgConfigManager {
    async fn source_config(&self, kind: SourceKind) -> Result<Option<SourceConfig>> {
        let row = sqlx::query_as::<_, (String, bool, serde_json::Value)>(
            "SELECT tenant, enabled, settings FROM source_configs WHERE kind = $1",
        )
        .bind(kind.as_str())
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|(tenant, enabled, settings)| SourceConfig {
            kind,
            tenant,
            enabled,
            settings,
        }))
    }
}
