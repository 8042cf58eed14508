use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use counselhub_core::models::task::{NewTask, RetentionPolicy, ScheduledTask, TaskSettlement, TaskStatus};
use eyre::Result;
use sqlx::types::Json;
use sqlx::{Executor, Postgres};
use uuid::Uuid;

use super::{PgStore, TaskStore};
use crate::models::DbScheduledTask;

const TASK_COLUMNS: &str = "id, task_type, idempotency_key, payload, run_at, status, attempts, max_attempts, base_delay_ms, max_delay_ms, recurrence, locked_until, last_error, created_at, updated_at, finished_at";

/// Inserts a task on any executor, so booking confirmation can enqueue
/// inside its own transaction
pub(crate) async fn insert_task_on<'e, E>(executor: E, task: &NewTask, now: DateTime<Utc>) -> Result<bool>
where
    E: Executor<'e, Database = Postgres>,
{
    let result = sqlx::query(
        r#"
        INSERT INTO scheduled_tasks
            (id, task_type, idempotency_key, payload, run_at, status, attempts,
             max_attempts, base_delay_ms, max_delay_ms, recurrence, created_at, updated_at)
        VALUES ($1, $2, $3, $4, $5, 'pending', 0, $6, $7, $8, $9, $10, $10)
        ON CONFLICT (idempotency_key) DO NOTHING
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(task.task_type.as_str())
    .bind(&task.idempotency_key)
    .bind(&task.payload)
    .bind(task.run_at)
    .bind(clamp_i32(task.retry.max_attempts))
    .bind(clamp_i64(task.retry.base_delay_ms))
    .bind(clamp_i64(task.retry.max_delay_ms))
    .bind(task.recurrence.map(Json))
    .bind(now)
    .execute(executor)
    .await?;

    Ok(result.rows_affected() == 1)
}

pub(crate) async fn cancel_task_on<'e, E>(executor: E, idempotency_key: &str, now: DateTime<Utc>) -> Result<bool>
where
    E: Executor<'e, Database = Postgres>,
{
    let result = sqlx::query(
        r#"
        UPDATE scheduled_tasks
        SET status = $3, finished_at = $2, updated_at = $2, locked_until = NULL
        WHERE idempotency_key = $1 AND status = ANY($4)
        "#,
    )
    .bind(idempotency_key)
    .bind(now)
    .bind(TaskStatus::Cancelled.as_str())
    .bind(status_names(TaskStatus::Cancelled))
    .execute(executor)
    .await?;

    Ok(result.rows_affected() == 1)
}

#[async_trait]
impl TaskStore for PgStore {
    async fn insert_task(&self, task: &NewTask, now: DateTime<Utc>) -> Result<bool> {
        insert_task_on(self.pool(), task, now).await
    }

    async fn upsert_recurring(&self, task: &NewTask, now: DateTime<Utc>) -> Result<bool> {
        // A running instance keeps its lease; it re-arms from the stored recurrence
        let inserted = sqlx::query_scalar::<_, bool>(
            r#"
            INSERT INTO scheduled_tasks
                (id, task_type, idempotency_key, payload, run_at, status, attempts,
                 max_attempts, base_delay_ms, max_delay_ms, recurrence, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, 'pending', 0, $6, $7, $8, $9, $10, $10)
            ON CONFLICT (idempotency_key) DO UPDATE SET
                payload = EXCLUDED.payload,
                max_attempts = EXCLUDED.max_attempts,
                base_delay_ms = EXCLUDED.base_delay_ms,
                max_delay_ms = EXCLUDED.max_delay_ms,
                recurrence = EXCLUDED.recurrence,
                run_at = CASE WHEN scheduled_tasks.status = 'running'
                              THEN scheduled_tasks.run_at ELSE EXCLUDED.run_at END,
                status = CASE WHEN scheduled_tasks.status = 'running'
                              THEN 'running' ELSE 'pending' END,
                attempts = CASE WHEN scheduled_tasks.status = 'running'
                                THEN scheduled_tasks.attempts ELSE 0 END,
                finished_at = NULL,
                updated_at = EXCLUDED.updated_at
            RETURNING (xmax = 0) AS inserted
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(task.task_type.as_str())
        .bind(&task.idempotency_key)
        .bind(&task.payload)
        .bind(task.run_at)
        .bind(clamp_i32(task.retry.max_attempts))
        .bind(clamp_i64(task.retry.base_delay_ms))
        .bind(clamp_i64(task.retry.max_delay_ms))
        .bind(task.recurrence.map(Json))
        .bind(now)
        .fetch_one(self.pool())
        .await?;

        Ok(inserted)
    }

    async fn cancel_task(&self, idempotency_key: &str, now: DateTime<Utc>) -> Result<bool> {
        cancel_task_on(self.pool(), idempotency_key, now).await
    }

    async fn get_task(&self, idempotency_key: &str) -> Result<Option<ScheduledTask>> {
        let row = sqlx::query_as::<_, DbScheduledTask>(&format!(
            "SELECT {TASK_COLUMNS} FROM scheduled_tasks WHERE idempotency_key = $1"
        ))
        .bind(idempotency_key)
        .fetch_optional(self.pool())
        .await?;

        row.map(ScheduledTask::try_from).transpose()
    }

    async fn claim_due(&self, now: DateTime<Utc>, limit: u32, lease: Duration) -> Result<Vec<ScheduledTask>> {
        // SKIP LOCKED lets several workers poll the same table without
        // handing one task to two of them
        let rows = sqlx::query_as::<_, DbScheduledTask>(&format!(
            r#"
            UPDATE scheduled_tasks
            SET status = $4, attempts = attempts + 1, locked_until = $2, updated_at = $1
            WHERE id IN (
                SELECT id FROM scheduled_tasks
                WHERE status = ANY($5) AND run_at <= $1
                ORDER BY run_at ASC
                LIMIT $3
                FOR UPDATE SKIP LOCKED
            )
            RETURNING {TASK_COLUMNS}
            "#
        ))
        .bind(now)
        .bind(now + lease)
        .bind(i64::from(limit))
        .bind(TaskStatus::Running.as_str())
        .bind(status_names(TaskStatus::Running))
        .fetch_all(self.pool())
        .await?;

        let mut tasks = rows
            .into_iter()
            .map(ScheduledTask::try_from)
            .collect::<Result<Vec<_>>>()?;
        tasks.sort_by_key(|task| task.run_at);
        Ok(tasks)
    }

    async fn settle_task(
        &self,
        task_id: Uuid,
        attempt: u32,
        settlement: TaskSettlement,
        error: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        // Matching the attempt keeps a worker whose lease expired from
        // settling the claim another worker now holds
        let result = match settlement {
            TaskSettlement::Completed | TaskSettlement::Failed => {
                let status = if settlement == TaskSettlement::Completed {
                    TaskStatus::Completed
                } else {
                    TaskStatus::Failed
                };
                sqlx::query(
                    r#"
                    UPDATE scheduled_tasks
                    SET status = $2, finished_at = $3, updated_at = $3,
                        locked_until = NULL, last_error = $4
                    WHERE id = $1 AND status = 'running' AND attempts = $5
                    "#,
                )
                .bind(task_id)
                .bind(status.as_str())
                .bind(now)
                .bind(error)
                .bind(clamp_i32(attempt))
                .execute(self.pool())
                .await?
            }
            TaskSettlement::Retry { next_run_at } => {
                sqlx::query(
                    r#"
                    UPDATE scheduled_tasks
                    SET status = 'pending', run_at = $2, updated_at = $3,
                        locked_until = NULL, last_error = $4
                    WHERE id = $1 AND status = 'running' AND attempts = $5
                    "#,
                )
                .bind(task_id)
                .bind(next_run_at)
                .bind(now)
                .bind(error)
                .bind(clamp_i32(attempt))
                .execute(self.pool())
                .await?
            }
            TaskSettlement::Rearmed { next_run_at } => {
                sqlx::query(
                    r#"
                    UPDATE scheduled_tasks
                    SET status = 'pending', run_at = $2, attempts = 0, updated_at = $3,
                        locked_until = NULL, last_error = $4
                    WHERE id = $1 AND status = 'running' AND attempts = $5
                    "#,
                )
                .bind(task_id)
                .bind(next_run_at)
                .bind(now)
                .bind(error)
                .bind(clamp_i32(attempt))
                .execute(self.pool())
                .await?
            }
        };

        if result.rows_affected() == 0 {
            tracing::warn!(%task_id, attempt, ?settlement, "settled a task that was no longer running");
        }
        Ok(())
    }

    async fn requeue_stalled(&self, now: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE scheduled_tasks
            SET status = CASE WHEN attempts >= max_attempts THEN 'failed' ELSE 'pending' END,
                finished_at = CASE WHEN attempts >= max_attempts THEN $1 ELSE NULL END,
                locked_until = NULL,
                last_error = COALESCE(last_error, 'lease expired'),
                updated_at = $1
            WHERE status = 'running' AND locked_until < $1
            "#,
        )
        .bind(now)
        .execute(self.pool())
        .await?;

        Ok(result.rows_affected())
    }

    async fn prune_finished(&self, retention: &RetentionPolicy, now: DateTime<Utc>) -> Result<u64> {
        let mut tx = self.pool().begin().await?;

        let expired = sqlx::query(
            r#"
            DELETE FROM scheduled_tasks
            WHERE status IN ('completed', 'cancelled') AND finished_at < $1
            "#,
        )
        .bind(now - retention.finished_ttl)
        .execute(&mut *tx)
        .await?;

        let failed = sqlx::query(
            r#"
            DELETE FROM scheduled_tasks
            WHERE status = 'failed' AND id NOT IN (
                SELECT id FROM scheduled_tasks
                WHERE status = 'failed'
                ORDER BY finished_at DESC NULLS LAST
                LIMIT $1
            )
            "#,
        )
        .bind(i64::from(retention.keep_failed))
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(expired.rows_affected() + failed.rows_affected())
    }
}

fn status_names(next: TaskStatus) -> Vec<&'static str> {
    TaskStatus::sources(next).iter().map(TaskStatus::as_str).collect()
}

fn clamp_i32(value: u32) -> i32 {
    i32::try_from(value).unwrap_or(i32::MAX)
}

fn clamp_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}
