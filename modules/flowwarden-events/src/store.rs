//! EventStore: append-only table of analyzed events backed by Postgres.
//!
//! Each batch is written in one transaction so a crash mid-batch never leaves
//! half a batch behind. Event ids are unique, so a replayed batch inserts
//! nothing new.

use anyhow::Result;
use async_trait::async_trait;
use sqlx::PgPool;
use tracing::{debug, warn};

use flowwarden_common::RecordBatch;

use crate::sink::EventSink;

/// Postgres-backed durable event sink.
#[derive(Clone)]
pub struct EventStore {
    pool: PgPool,
}

impl EventStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create the events table if it does not exist. Idempotent.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS analyzed_events (
                seq           BIGSERIAL    PRIMARY KEY,
                ts            TIMESTAMPTZ  NOT NULL DEFAULT now(),
                id            UUID         NOT NULL UNIQUE,
                batch_seq     BIGINT       NOT NULL,
                kind          TEXT         NOT NULL,
                tenant        TEXT         NOT NULL,
                event_type    TEXT         NOT NULL,
                observed_at   TIMESTAMPTZ  NOT NULL,
                source_offset BIGINT       NOT NULL,
                payload       JSONB        NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS analyzed_events_kind_idx ON analyzed_events (kind, source_offset)",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Append every event of a batch in a single transaction.
    pub async fn append_batch(&self, batch: &RecordBatch) -> Result<u64> {
        if batch.is_empty() {
            return Ok(0);
        }

        let mut tx = self.pool.begin().await?;
        let mut inserted = 0u64;

        for event in &batch.events {
            let result = sqlx::query(
                r#"
                INSERT INTO analyzed_events
                    (id, batch_seq, kind, tenant, event_type, observed_at, source_offset, payload)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                ON CONFLICT (id) DO NOTHING
                "#,
            )
            .bind(event.id)
            .bind(batch.batch_seq as i64)
            .bind(event.kind.as_str())
            .bind(&event.tenant)
            .bind(&event.event_type)
            .bind(event.observed_at)
            .bind(event.source_offset)
            .bind(&event.payload)
            .execute(&mut *tx)
            .await?;

            inserted += result.rows_affected();
        }

        tx.commit().await?;

        // Best-effort PG NOTIFY for downstream readers.
        notify_batch(&self.pool, batch.batch_seq).await;

        Ok(inserted)
    }
}

#[async_trait]
impl EventSink for EventStore {
    async fn persist(&self, batch: &RecordBatch) -> Result<()> {
        let inserted = self.append_batch(batch).await?;
        debug!(batch_seq = batch.batch_seq, inserted, "Persisted batch");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// PG NOTIFY helpers
// ---------------------------------------------------------------------------

async fn notify_batch(pool: &PgPool, batch_seq: u64) {
    let result = sqlx::query("SELECT pg_notify('analyzed_events', $1::text)")
        .bind(batch_seq as i64)
        .execute(pool)
        .await;

    if let Err(e) = result {
        warn!(error = %e, batch_seq, "PG NOTIFY failed (non-fatal)");
    }
}
