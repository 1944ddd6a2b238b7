use serde_json::Value as JsonValue;
use sqlx::postgres::Postgres;
use sqlx::types::time::OffsetDateTime;
use sqlx::Executor;

use crate::error::RepositoryError;
use crate::models::{Event, EventSource};

/// Inserts an event row and issues `NOTIFY <channel>, '<id>'` in the same transaction
/// as the insert, so the notification only fires on commit. The caller owns the
/// transaction boundary.
pub async fn publish_event<'e, E>(
    executor: E,
    schema_name: &str,
    event_type: &str,
    payload: JsonValue,
    source: EventSource,
    channel: &str,
    run_at: Option<OffsetDateTime>,
) -> Result<Event, RepositoryError>
where
    E: Executor<'e, Database = Postgres> + Copy,
{
    let now = OffsetDateTime::now_utc();

    let insert = format!(
        r#"
        INSERT INTO {schema}.event (type, payload, source, status, retry_count, run_at, created_at, updated_at)
        VALUES ($1, $2, $3, 'pending', 0, $4, $5, $5)
        RETURNING id, type, payload, source, status, retry_count, last_error,
                  run_at, created_at, updated_at
        "#,
        schema = schema_name
    );

    let event = sqlx::query_as::<_, Event>(&insert)
        .bind(event_type)
        .bind(&payload)
        .bind(source)
        .bind(run_at)
        .bind(now)
        .fetch_one(executor)
        .await?;

    // NOTIFY's payload is always the textual id, never event data: consumers reload the
    // full row by id instead of trusting whatever was in the channel payload.
    let notify = format!("NOTIFY {}, '{}'", channel, event.id);
    sqlx::query(&notify).execute(executor).await?;

    Ok(event)
}
