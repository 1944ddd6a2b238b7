use sqlx::postgres::Postgres;
use sqlx::types::time::OffsetDateTime;
use sqlx::Executor;

use crate::error::RepositoryError;
use crate::models::Event;

/// Stateless façade over the `event` table. Every operation takes a caller-supplied
/// executor (a transaction or a pool) so the consumer can compose repository calls
/// with dispatcher work in a single transaction.
#[derive(Clone, Default)]
pub struct EventRepository {
    schema: String,
}

impl EventRepository {
    pub fn new(schema_name: impl Into<String>) -> Self {
        Self {
            schema: schema_name.into(),
        }
    }

    fn table(&self) -> String {
        format!("{}.event", self.schema)
    }

    /// Atomically claims the oldest due `Pending` row, tie-broken `run_at ASC NULLS
    /// FIRST, id ASC`. Uses `FOR UPDATE SKIP LOCKED` so concurrent workers never
    /// collide on the same row.
    pub async fn claim_one<'e, E>(
        &self,
        executor: E,
        now: OffsetDateTime,
    ) -> Result<Option<Event>, RepositoryError>
    where
        E: Executor<'e, Database = Postgres>,
    {
        let query = format!(
            r#"
            UPDATE {table} SET status = 'running', updated_at = $1
            WHERE id = (
                SELECT id FROM {table}
                WHERE status = 'pending' AND (run_at IS NULL OR run_at <= $1)
                ORDER BY run_at ASC NULLS FIRST, id ASC
                FOR UPDATE SKIP LOCKED
                LIMIT 1
            )
            RETURNING id, type, payload, source, status, retry_count, last_error,
                      run_at, created_at, updated_at
            "#,
            table = self.table()
        );

        let event = sqlx::query_as::<_, Event>(&query)
            .bind(now)
            .fetch_optional(executor)
            .await?;

        Ok(event)
    }

    pub async fn get_by_id<'e, E>(
        &self,
        executor: E,
        id: i64,
    ) -> Result<Option<Event>, RepositoryError>
    where
        E: Executor<'e, Database = Postgres>,
    {
        let query = format!(
            r#"
            SELECT id, type, payload, source, status, retry_count, last_error,
                   run_at, created_at, updated_at
            FROM {table} WHERE id = $1
            "#,
            table = self.table()
        );

        let event = sqlx::query_as::<_, Event>(&query)
            .bind(id)
            .fetch_optional(executor)
            .await?;

        Ok(event)
    }

    /// Read-only scan used at startup to recover ids inserted while the listener
    /// was down. Must not mutate rows.
    pub async fn fetch_due_pending_ids<'e, E>(
        &self,
        executor: E,
        now: OffsetDateTime,
        limit: i64,
    ) -> Result<Vec<i64>, RepositoryError>
    where
        E: Executor<'e, Database = Postgres>,
    {
        let query = format!(
            r#"
            SELECT id FROM {table}
            WHERE status = 'pending' AND (run_at IS NULL OR run_at <= $1)
            ORDER BY run_at ASC NULLS FIRST, id ASC
            LIMIT $2
            "#,
            table = self.table()
        );

        let rows: Vec<(i64,)> = sqlx::query_as(&query)
            .bind(now)
            .bind(limit)
            .fetch_all(executor)
            .await?;

        Ok(rows.into_iter().map(|(id,)| id).collect())
    }

    /// `Running -> Done`. Fails with `InvalidTransition` if the row is not `Running`.
    pub async fn mark_done<'e, E>(&self, executor: E, id: i64) -> Result<(), RepositoryError>
    where
        E: Executor<'e, Database = Postgres>,
    {
        let query = format!(
            r#"
            UPDATE {table} SET status = 'done', updated_at = $2
            WHERE id = $1 AND status = 'running'
            RETURNING id
            "#,
            table = self.table()
        );

        let result = sqlx::query(&query)
            .bind(id)
            .bind(OffsetDateTime::now_utc())
            .execute(executor)
            .await?;

        if result.rows_affected() == 0 {
            return Err(transition_error(id));
        }
        Ok(())
    }

    /// `Running -> Pending`, increments `retry_count`, writes `last_error`, sets `run_at`.
    pub async fn mark_retry<'e, E>(
        &self,
        executor: E,
        id: i64,
        err: &str,
        next_run_at: OffsetDateTime,
    ) -> Result<(), RepositoryError>
    where
        E: Executor<'e, Database = Postgres>,
    {
        let query = format!(
            r#"
            UPDATE {table}
            SET status = 'pending', retry_count = retry_count + 1,
                last_error = $2, run_at = $3, updated_at = $4
            WHERE id = $1 AND status = 'running'
            RETURNING id
            "#,
            table = self.table()
        );

        let result = sqlx::query(&query)
            .bind(id)
            .bind(err)
            .bind(next_run_at)
            .bind(OffsetDateTime::now_utc())
            .execute(executor)
            .await?;

        if result.rows_affected() == 0 {
            return Err(transition_error(id));
        }
        Ok(())
    }

    /// `Running -> Failed`, terminal.
    pub async fn mark_failed<'e, E>(
        &self,
        executor: E,
        id: i64,
        err: &str,
    ) -> Result<(), RepositoryError>
    where
        E: Executor<'e, Database = Postgres>,
    {
        let query = format!(
            r#"
            UPDATE {table}
            SET status = 'failed', last_error = $2, updated_at = $3
            WHERE id = $1 AND status = 'running'
            RETURNING id
            "#,
            table = self.table()
        );

        let result = sqlx::query(&query)
            .bind(id)
            .bind(err)
            .bind(OffsetDateTime::now_utc())
            .execute(executor)
            .await?;

        if result.rows_affected() == 0 {
            return Err(transition_error(id));
        }
        Ok(())
    }

    /// Resets rows stuck in `Running` (orphaned by a crashed worker) back to `Pending`.
    /// Returns the number reset.
    pub async fn reap_stuck_running<'e, E>(
        &self,
        executor: E,
        older_than: time::Duration,
        now: OffsetDateTime,
    ) -> Result<i64, RepositoryError>
    where
        E: Executor<'e, Database = Postgres>,
    {
        let query = format!(
            r#"
            UPDATE {table}
            SET status = 'pending', run_at = $2, updated_at = $2
            WHERE status = 'running' AND updated_at < $1
            "#,
            table = self.table()
        );

        let result = sqlx::query(&query)
            .bind(now - older_than)
            .bind(now)
            .execute(executor)
            .await?;

        Ok(result.rows_affected() as i64)
    }
}

/// `InvalidTransition` is a programmer error: only reachable because the row either
/// doesn't exist or was already moved on by a concurrent finalize call.
fn transition_error(id: i64) -> RepositoryError {
    RepositoryError::InvalidTransition {
        id,
        expected: "running",
        found: "not-running-or-missing".to_string(),
    }
}
