use async_trait::async_trait;
use chrono::{DateTime, Utc};
use counselhub_core::models::availability::{AvailabilityRuleInput, RecurringAvailabilityRule};
use eyre::Result;
use sqlx::types::Json;
use sqlx::{Executor, Postgres};
use uuid::Uuid;

use super::{AvailabilityRepository, PgStore};
use crate::models::DbAvailabilityRule;

#[async_trait]
impl AvailabilityRepository for PgStore {
    async fn replace_rules(
        &self,
        counselor_id: Uuid,
        rules: &[AvailabilityRuleInput],
        now: DateTime<Utc>,
    ) -> Result<Vec<RecurringAvailabilityRule>> {
        let mut tx = self.pool().begin().await?;

        // Readers keep seeing the old set until commit
        sqlx::query(
            r#"
            DELETE FROM availability_rules
            WHERE counselor_id = $1
            "#,
        )
        .bind(counselor_id)
        .execute(&mut *tx)
        .await?;

        let mut stored = Vec::with_capacity(rules.len());
        for rule in rules {
            let row = sqlx::query_as::<_, DbAvailabilityRule>(
                r#"
                INSERT INTO availability_rules (id, counselor_id, day_of_week, is_available, time_ranges, price, updated_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                RETURNING id, counselor_id, day_of_week, is_available, time_ranges, price, updated_at
                "#,
            )
            .bind(Uuid::new_v4())
            .bind(counselor_id)
            .bind(rule.day_of_week.as_str())
            .bind(rule.is_available)
            .bind(Json(&rule.time_ranges))
            .bind(rule.price)
            .bind(now)
            .fetch_one(&mut *tx)
            .await?;
            stored.push(RecurringAvailabilityRule::try_from(row)?);
        }

        tx.commit().await?;
        tracing::debug!(%counselor_id, rules = stored.len(), "availability replaced");
        Ok(stored)
    }

    async fn rules_for_counselor(&self, counselor_id: Uuid) -> Result<Vec<RecurringAvailabilityRule>> {
        rules_on(self.pool(), counselor_id).await
    }

    async fn counselors_with_rules(&self) -> Result<Vec<Uuid>> {
        let ids = sqlx::query_scalar::<_, Uuid>(
            r#"
            SELECT DISTINCT counselor_id
            FROM availability_rules
            WHERE is_available
            "#,
        )
        .fetch_all(self.pool())
        .await?;

        Ok(ids)
    }
}

/// Reads a counselor's rules on any executor, so a slot rebuild can read
/// them inside its own transaction
pub(crate) async fn rules_on<'e, E>(executor: E, counselor_id: Uuid) -> Result<Vec<RecurringAvailabilityRule>>
where
    E: Executor<'e, Database = Postgres>,
{
    let rows = sqlx::query_as::<_, DbAvailabilityRule>(
        r#"
        SELECT id, counselor_id, day_of_week, is_available, time_ranges, price, updated_at
        FROM availability_rules
        WHERE counselor_id = $1
        "#,
    )
    .bind(counselor_id)
    .fetch_all(executor)
    .await?;

    rows.into_iter().map(RecurringAvailabilityRule::try_from).collect()
}
