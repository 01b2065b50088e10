use anyhow::Result;
use sqlx::PgPool;
use tracing::info;

/// Create the configuration and inbox tables if they do not exist. Idempotent.
pub async fn migrate(pool: &PgPool) -> Result<()> {
    let statements = [
        r#"
        CREATE TABLE IF NOT EXISTS source_configs (
            kind        TEXT         PRIMARY KEY,
            tenant      TEXT         NOT NULL,
            enabled     BOOLEAN      NOT NULL DEFAULT TRUE,
            settings    JSONB        NOT NULL DEFAULT 'null'::jsonb,
            updated_at  TIMESTAMPTZ  NOT NULL DEFAULT now()
        )
        "#,
        r#"
        CREATE TABLE IF NOT EXISTS inbox_streams (
            name    TEXT     PRIMARY KEY,
            active  BOOLEAN  NOT NULL DEFAULT TRUE
        )
        "#,
        r#"
        CREATE TABLE IF NOT EXISTS inbox (
            seq          BIGSERIAL    PRIMARY KEY,
            stream       TEXT         NOT NULL,
            received_at  TIMESTAMPTZ  NOT NULL DEFAULT now(),
            payload      JSONB        NOT NULL
        )
        "#,
        "CREATE INDEX IF NOT EXISTS inbox_stream_seq_idx ON inbox (stream, seq)",
    ];

    for statement in statements {
        sqlx::query(statement).execute(pool).await?;
    }

    info!("Supervisor schema up to date");
    Ok(())
}
