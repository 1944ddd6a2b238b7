use sqlx::PgPool;

/// Creates the `event` table and its supporting index if they don't already exist.
///
/// The schema name is a runtime setting (`PGEBUS_DATABASE__SCHEMA_NAME`), which a
/// static, compile-time migration file can't parameterize, so the DDL is assembled
/// and executed here instead of through a versioned migration chain.
pub async fn run(pool: &PgPool, schema: &str) -> Result<(), sqlx::Error> {
    let create_table = format!(
        r#"
        CREATE TABLE IF NOT EXISTS {schema}.event (
            id BIGSERIAL PRIMARY KEY,
            type TEXT NOT NULL,
            payload JSONB NOT NULL,
            source TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'pending',
            retry_count INT NOT NULL DEFAULT 0,
            last_error TEXT,
            run_at TIMESTAMPTZ,
            created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
            updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
        )
        "#,
        schema = schema
    );
    sqlx::query(&create_table).execute(pool).await?;

    let index = format!(
        r#"
        CREATE INDEX IF NOT EXISTS event_due_pending_idx
        ON {schema}.event (run_at, id)
        WHERE status = 'pending'
        "#,
        schema = schema
    );
    sqlx::query(&index).execute(pool).await?;

    let running_idx = format!(
        r#"
        CREATE INDEX IF NOT EXISTS event_running_updated_idx
        ON {schema}.event (updated_at)
        WHERE status = 'running'
        "#,
        schema = schema
    );
    sqlx::query(&running_idx).execute(pool).await?;

    Ok(())
}
