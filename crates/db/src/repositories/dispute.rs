use async_trait::async_trait;
use counselhub_core::models::booking::{Booking, BookingStatus, PayoutStatus};
use counselhub_core::models::dispute::Dispute;
use eyre::Result;
use sqlx::types::Json;
use uuid::Uuid;

use super::booking::BOOKING_COLUMNS;
use super::task::cancel_task_on;
use super::{DisputeOutcome, DisputeRepository, PgStore};
use crate::models::{DbBooking, DbDispute};

#[async_trait]
impl DisputeRepository for PgStore {
    async fn dispute_for_booking(&self, booking_id: Uuid) -> Result<Option<Dispute>> {
        let row = sqlx::query_as::<_, DbDispute>(
            r#"
            SELECT id, booking_id, client_id, issue_type, description, evidence, status, raised_at, activity
            FROM disputes
            WHERE booking_id = $1
            "#,
        )
        .bind(booking_id)
        .fetch_optional(self.pool())
        .await?;

        row.map(Dispute::try_from).transpose()
    }

    async fn open_dispute(&self, dispute: &Dispute, auto_complete_key: &str) -> Result<DisputeOutcome> {
        let mut tx = self.pool().begin().await?;

        // Row lock serializes against auto-complete touching the same booking
        let current = sqlx::query_as::<_, (String, String)>(
            "SELECT status, payout_status FROM bookings WHERE id = $1 FOR UPDATE",
        )
        .bind(dispute.booking_id)
        .fetch_optional(&mut *tx)
        .await?;

        let Some((status, payout)) = current else {
            return Ok(DisputeOutcome::BookingNotFound);
        };
        let status: BookingStatus = status.parse()?;
        let payout: PayoutStatus = payout.parse()?;

        let existing = sqlx::query_scalar::<_, Uuid>("SELECT id FROM disputes WHERE booking_id = $1")
            .bind(dispute.booking_id)
            .fetch_optional(&mut *tx)
            .await?;
        if existing.is_some() || status == BookingStatus::Disputed {
            return Ok(DisputeOutcome::AlreadyDisputed);
        }
        if !BookingStatus::automated_sources(BookingStatus::Disputed).contains(&status)
            || !payout.can_transition_to(PayoutStatus::Held)
        {
            return Ok(DisputeOutcome::BookingNotDisputable(status));
        }

        let row = sqlx::query_as::<_, DbBooking>(&format!(
            r#"
            UPDATE bookings
            SET status = $3, payout_status = $4, disputed_at = $2, updated_at = $2
            WHERE id = $1
            RETURNING {BOOKING_COLUMNS}
            "#
        ))
        .bind(dispute.booking_id)
        .bind(dispute.raised_at)
        .bind(BookingStatus::Disputed.as_str())
        .bind(PayoutStatus::Held.as_str())
        .fetch_one(&mut *tx)
        .await?;

        let inserted = sqlx::query(
            r#"
            INSERT INTO disputes
                (id, booking_id, client_id, issue_type, description, evidence, status, raised_at, activity)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (booking_id) DO NOTHING
            "#,
        )
        .bind(dispute.id)
        .bind(dispute.booking_id)
        .bind(dispute.client_id)
        .bind(dispute.issue_type.as_str())
        .bind(&dispute.description)
        .bind(Json(&dispute.evidence))
        .bind(dispute.status.as_str())
        .bind(dispute.raised_at)
        .bind(Json(&dispute.activity))
        .execute(&mut *tx)
        .await?;

        if inserted.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(DisputeOutcome::AlreadyDisputed);
        }

        let auto_complete_cancelled = cancel_task_on(&mut *tx, auto_complete_key, dispute.raised_at).await?;

        tx.commit().await?;
        Ok(DisputeOutcome::Opened {
            booking: Booking::try_from(row)?,
            auto_complete_cancelled,
        })
    }
}
