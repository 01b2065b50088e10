//! Stream sources and the provider that opens them per source kind.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tracing::debug;

use flowwarden_common::{RawRecord, SourceKind};

use crate::config_manager::SourceConfig;

/// A live handle to one source's records.
#[async_trait]
pub trait StreamSource: Send {
    /// Records with an offset strictly greater than `after`, oldest first,
    /// at most `limit` of them.
    async fn pull(&mut self, after: i64, limit: usize) -> Result<Vec<RawRecord>>;
}

/// Opens sources for configured kinds.
#[async_trait]
pub trait SourceProvider: Send + Sync {
    /// `Ok(None)` when the source is not currently available.
    async fn open(
        &self,
        kind: SourceKind,
        config: &SourceConfig,
    ) -> Result<Option<Box<dyn StreamSource>>>;
}

// ---------------------------------------------------------------------------
// Postgres inbox
// ---------------------------------------------------------------------------

/// Opens sources backed by the `inbox` table that upstream collectors write
/// into. A kind is available when its stream is registered and active in
/// `inbox_streams`.
#[derive(Clone)]
pub struct InboxSourceProvider {
    pool: PgPool,
}

impl InboxSourceProvider {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Stream name for a kind: the `stream` setting, or the kind's name.
    pub fn stream_name(kind: SourceKind, config: &SourceConfig) -> String {
        config
            .setting_str("stream")
            .map(str::to_string)
            .unwrap_or_else(|| kind.as_str().to_string())
    }
}

#[async_trait]
impl SourceProvider for InboxSourceProvider {
    async fn open(
        &self,
        kind: SourceKind,
        config: &SourceConfig,
    ) -> Result<Option<Box<dyn StreamSource>>> {
        let stream = Self::stream_name(kind, config);

        let active = sqlx::query_as::<_, (bool,)>(
            "SELECT active FROM inbox_streams WHERE name = $1",
        )
        .bind(&stream)
        .fetch_optional(&self.pool)
        .await?
        .map(|(active,)| active)
        .unwrap_or(false);

        if !active {
            debug!(kind = %kind, stream = stream.as_str(), "Inbox stream not active");
            return Ok(None);
        }

        Ok(Some(Box::new(InboxSource {
            pool: self.pool.clone(),
            stream,
        })))
    }
}

pub struct InboxSource {
    pool: PgPool,
    stream: String,
}

#[async_trait]
impl StreamSource for InboxSource {
    async fn pull(&mut self, after: i64, limit: usize) -> Result<Vec<RawRecord>> {
        let rows = sqlx::query_as::<_, (i64, DateTime<Utc>, serde_json::Value)>(
            r#"
            SELECT seq, received_at, payload
            FROM inbox
            WHERE stream = $1 AND seq > $2
            ORDER BY seq ASC
            LIMIT $3
            "#,
        )
        .bind(&self.stream)
        .bind(after)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(offset, received_at, payload)| RawRecord {
                offset,
                received_at,
                payload,
            })
            .collect())
    }
}
