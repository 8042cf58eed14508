use async_trait::async_trait;
use chrono::{DateTime, Utc};
use counselhub_core::models::slot::{GeneratedSlot, SlotAction, SlotCandidate, SlotMutation, SlotStatus};
use counselhub_core::slot_plan::SlotPlanner;
use eyre::Result;
use sqlx::{Acquire, Executor, Postgres, Transaction};
use uuid::Uuid;

use super::availability::rules_on;
use super::{PgStore, SlotRebuild, SlotRepository};
use crate::models::DbSlot;

const SLOT_COLUMNS: &str = "id, counselor_id, start_time, end_time, base_price, total_price, status, booking_id, client_id, created_at, updated_at";

#[async_trait]
impl SlotRepository for PgStore {
    async fn rebuild_slots(
        &self,
        counselor_id: Uuid,
        planner: &SlotPlanner<'_>,
        now: DateTime<Utc>,
    ) -> Result<SlotRebuild> {
        let mut tx = self.pool().begin().await?;

        // Held until commit; a second rebuild of the same counselor waits here
        sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1))")
            .bind(counselor_id.to_string())
            .execute(&mut *tx)
            .await?;

        let rules = rules_on(&mut *tx, counselor_id).await?;

        let removed = sqlx::query(
            r#"
            DELETE FROM generated_slots
            WHERE counselor_id = $1 AND status <> $2
            "#,
        )
        .bind(counselor_id)
        .bind(SlotStatus::Booked.as_str())
        .execute(&mut *tx)
        .await?
        .rows_affected();

        let retained = sqlx::query_as::<_, (DateTime<Utc>, DateTime<Utc>)>(
            r#"
            SELECT start_time, end_time
            FROM generated_slots
            WHERE counselor_id = $1
            "#,
        )
        .bind(counselor_id)
        .fetch_all(&mut *tx)
        .await?;

        let plan = planner.plan(counselor_id, &rules, &retained, now);
        let mut rebuild = SlotRebuild {
            removed,
            skipped: plan.skipped,
            ..SlotRebuild::default()
        };

        for candidate in &plan.candidates {
            // One savepoint per slot so a failed insert does not abort the rest
            let mut savepoint = tx.begin().await?;
            match insert_slot_on(&mut *savepoint, candidate, now).await {
                Ok(inserted) => {
                    savepoint.commit().await?;
                    if inserted.is_some() {
                        rebuild.created += 1;
                    }
                }
                Err(e) => {
                    savepoint.rollback().await?;
                    rebuild.failed += 1;
                    tracing::error!(
                        %counselor_id,
                        start = %candidate.start_time.to_rfc3339(),
                        "failed to insert slot: {:?}",
                        e
                    );
                }
            }
        }

        tx.commit().await?;
        Ok(rebuild)
    }

    async fn insert_slot(&self, candidate: &SlotCandidate, now: DateTime<Utc>) -> Result<Option<GeneratedSlot>> {
        insert_slot_on(self.pool(), candidate, now).await
    }

    async fn get_slot(&self, slot_id: Uuid) -> Result<Option<GeneratedSlot>> {
        let row = sqlx::query_as::<_, DbSlot>(&format!(
            "SELECT {SLOT_COLUMNS} FROM generated_slots WHERE id = $1"
        ))
        .bind(slot_id)
        .fetch_optional(self.pool())
        .await?;

        row.map(GeneratedSlot::try_from).transpose()
    }

    async fn slots_for_counselor(
        &self,
        counselor_id: Uuid,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> Result<Vec<GeneratedSlot>> {
        let rows = sqlx::query_as::<_, DbSlot>(&format!(
            r#"
            SELECT {SLOT_COLUMNS}
            FROM generated_slots
            WHERE counselor_id = $1
              AND ($2::timestamptz IS NULL OR start_time >= $2)
              AND ($3::timestamptz IS NULL OR start_time < $3)
            ORDER BY start_time ASC
            "#
        ))
        .bind(counselor_id)
        .bind(from)
        .bind(to)
        .fetch_all(self.pool())
        .await?;

        rows.into_iter().map(GeneratedSlot::try_from).collect()
    }

    async fn apply_day_action(
        &self,
        counselor_id: Uuid,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        action: SlotAction,
        now: DateTime<Utc>,
    ) -> Result<SlotMutation> {
        let mut tx = self.pool().begin().await?;

        // Lock the whole day so a concurrent booking waits for this decision
        let rows = sqlx::query_as::<_, (Uuid, String)>(
            r#"
            SELECT id, status
            FROM generated_slots
            WHERE counselor_id = $1 AND start_time >= $2 AND start_time < $3
            FOR UPDATE
            "#,
        )
        .bind(counselor_id)
        .bind(from)
        .bind(to)
        .fetch_all(&mut *tx)
        .await?;

        if rows.is_empty() {
            return Ok(SlotMutation::NotFound);
        }

        let booked: Vec<Uuid> = rows
            .iter()
            .filter(|(_, status)| status == SlotStatus::Booked.as_str())
            .map(|(id, _)| *id)
            .collect();
        if !booked.is_empty() {
            return Ok(SlotMutation::BookedConflict { booked });
        }

        let ids: Vec<Uuid> = rows.into_iter().map(|(id, _)| id).collect();
        let affected = write_action(&mut tx, &ids, action, now).await?;
        tx.commit().await?;

        Ok(SlotMutation::Applied { affected })
    }

    async fn apply_slot_action(
        &self,
        counselor_id: Uuid,
        slot_id: Uuid,
        action: SlotAction,
        now: DateTime<Utc>,
    ) -> Result<SlotMutation> {
        let mut tx = self.pool().begin().await?;

        let status = sqlx::query_scalar::<_, String>(
            r#"
            SELECT status
            FROM generated_slots
            WHERE id = $1 AND counselor_id = $2
            FOR UPDATE
            "#,
        )
        .bind(slot_id)
        .bind(counselor_id)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(status) = status else {
            return Ok(SlotMutation::NotFound);
        };
        let status: SlotStatus = status.parse()?;
        if status == SlotStatus::Booked {
            return Ok(SlotMutation::BookedConflict { booked: vec![slot_id] });
        }
        if let Some(target) = action.target_status() {
            if status != target && !status.can_transition_to(target) {
                return Ok(SlotMutation::IllegalTransition { from: status, to: target });
            }
        }

        let affected = write_action(&mut tx, &[slot_id], action, now).await?;
        tx.commit().await?;

        Ok(SlotMutation::Applied { affected })
    }

    async fn sweep_stale_slots(&self, before: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query(
            r#"
            DELETE FROM generated_slots
            WHERE end_time < $1 AND status <> $2 AND booking_id IS NULL
            "#,
        )
        .bind(before)
        .bind(SlotStatus::Booked.as_str())
        .execute(self.pool())
        .await?;

        Ok(result.rows_affected())
    }
}

async fn write_action(
    tx: &mut Transaction<'_, Postgres>,
    ids: &[Uuid],
    action: SlotAction,
    now: DateTime<Utc>,
) -> Result<u64> {
    // Only slots with an edge to the target move, which also keeps booked ones out
    let result = match action.target_status() {
        Some(status) => {
            let sources: Vec<&str> = SlotStatus::sources(status).iter().map(|s| s.as_str()).collect();
            sqlx::query(
                r#"
                UPDATE generated_slots
                SET status = $2, updated_at = $3
                WHERE id = ANY($1) AND status = ANY($4)
                "#,
            )
            .bind(ids)
            .bind(status.as_str())
            .bind(now)
            .bind(&sources)
            .execute(&mut **tx)
            .await?
        }
        None => {
            sqlx::query(
                r#"
                DELETE FROM generated_slots
                WHERE id = ANY($1) AND status <> $2
                "#,
            )
            .bind(ids)
            .bind(SlotStatus::Booked.as_str())
            .execute(&mut **tx)
            .await?
        }
    };

    Ok(result.rows_affected())
}

/// Inserts a slot unless the exact `(counselor, start, end)` already exists
async fn insert_slot_on<'e, E>(executor: E, candidate: &SlotCandidate, now: DateTime<Utc>) -> Result<Option<GeneratedSlot>>
where
    E: Executor<'e, Database = Postgres>,
{
    let row = sqlx::query_as::<_, DbSlot>(&format!(
        r#"
        INSERT INTO generated_slots (id, counselor_id, start_time, end_time, base_price, total_price, status, created_at, updated_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $8)
        ON CONFLICT (counselor_id, start_time, end_time) DO NOTHING
        RETURNING {SLOT_COLUMNS}
        "#
    ))
    .bind(Uuid::new_v4())
    .bind(candidate.counselor_id)
    .bind(candidate.start_time)
    .bind(candidate.end_time)
    .bind(candidate.base_price)
    .bind(candidate.total_price)
    .bind(SlotStatus::Available.as_str())
    .bind(now)
    .fetch_optional(executor)
    .await?;

    row.map(GeneratedSlot::try_from).transpose()
}
