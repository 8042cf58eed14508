use async_trait::async_trait;
use counselhub_core::models::booking::{Booking, BookingTransition};
use counselhub_core::models::session::{Session, SessionStatus};
use eyre::Result;
use uuid::Uuid;

use super::task::insert_task_on;
use super::{BookingRepository, ConfirmationBundle, ConfirmationOutcome, PgStore, TransitionOutcome};
use crate::models::{DbBooking, DbSession};

pub(crate) const BOOKING_COLUMNS: &str = "id, client_id, counselor_id, slot_id, status, amount, payment_id, dispute_window_open_at, auto_complete_at, completed_at, payout_amount, payout_release_on, payout_status, disputed_at, created_at, updated_at";

const SESSION_COLUMNS: &str =
    "id, booking_id, room_id, room_url, teardown_task_key, status, scheduled_start, scheduled_end, created_at";

#[async_trait]
impl BookingRepository for PgStore {
    async fn create_confirmed_booking(&self, bundle: &ConfirmationBundle) -> Result<ConfirmationOutcome> {
        let booking = &bundle.booking;
        let session = &bundle.session;
        let mut tx = self.pool().begin().await?;

        // The slot CAS decides which of two concurrent confirmations wins
        let claimed = sqlx::query(
            r#"
            UPDATE generated_slots
            SET status = 'booked', booking_id = $2, client_id = $3, updated_at = $4
            WHERE id = $1 AND status = 'available'
            "#,
        )
        .bind(booking.slot_id)
        .bind(booking.id)
        .bind(booking.client_id)
        .bind(booking.created_at)
        .execute(&mut *tx)
        .await?;

        if claimed.rows_affected() == 0 {
            let current = sqlx::query_scalar::<_, String>("SELECT status FROM generated_slots WHERE id = $1")
                .bind(booking.slot_id)
                .fetch_optional(&mut *tx)
                .await?;
            tx.rollback().await?;
            let current = current.map(|status| status.parse()).transpose()?;
            return Ok(ConfirmationOutcome::SlotUnavailable(current));
        }

        sqlx::query(
            r#"
            INSERT INTO bookings
                (id, client_id, counselor_id, slot_id, status, amount, payment_id,
                 dispute_window_open_at, auto_complete_at, completed_at,
                 payout_amount, payout_release_on, payout_status, disputed_at, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
            "#,
        )
        .bind(booking.id)
        .bind(booking.client_id)
        .bind(booking.counselor_id)
        .bind(booking.slot_id)
        .bind(booking.status.as_str())
        .bind(booking.amount)
        .bind(&booking.payment_id)
        .bind(booking.completion.dispute_window_open_at)
        .bind(booking.completion.auto_complete_at)
        .bind(booking.completion.completed_at)
        .bind(booking.payout.amount)
        .bind(booking.payout.release_on)
        .bind(booking.payout.status.as_str())
        .bind(booking.disputed_at)
        .bind(booking.created_at)
        .bind(booking.updated_at)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            INSERT INTO sessions
                (id, booking_id, room_id, room_url, teardown_task_key, status,
                 scheduled_start, scheduled_end, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(session.id)
        .bind(session.booking_id)
        .bind(&session.room_id)
        .bind(&session.room_url)
        .bind(&session.teardown_task_key)
        .bind(session.status.as_str())
        .bind(session.scheduled_start)
        .bind(session.scheduled_end)
        .bind(session.created_at)
        .execute(&mut *tx)
        .await?;

        for task in &bundle.tasks {
            if !insert_task_on(&mut *tx, task, booking.created_at).await? {
                tracing::warn!(key = %task.idempotency_key, "task already existed for new booking");
            }
        }

        tx.commit().await?;
        tracing::debug!(booking_id = %booking.id, slot_id = %booking.slot_id, "booking persisted");
        Ok(ConfirmationOutcome::Created)
    }

    async fn get_booking(&self, booking_id: Uuid) -> Result<Option<Booking>> {
        let row = sqlx::query_as::<_, DbBooking>(&format!("SELECT {BOOKING_COLUMNS} FROM bookings WHERE id = $1"))
            .bind(booking_id)
            .fetch_optional(self.pool())
            .await?;

        row.map(Booking::try_from).transpose()
    }

    async fn transition_booking(&self, transition: &BookingTransition) -> Result<TransitionOutcome> {
        let expected: Vec<&str> = transition.expected().iter().map(|status| status.as_str()).collect();
        let expected_payout: Vec<&str> = transition
            .expected_payout()
            .iter()
            .map(|status| status.as_str())
            .collect();

        let row = if expected.is_empty() {
            None
        } else {
            sqlx::query_as::<_, DbBooking>(&format!(
                r#"
                UPDATE bookings
                SET status = $2,
                    updated_at = $3,
                    payout_status = COALESCE($4, payout_status),
                    completed_at = CASE WHEN $2 = 'completed' THEN $3 ELSE completed_at END,
                    dispute_window_open_at = CASE WHEN $2 = 'dispute_window_open' THEN $3 ELSE dispute_window_open_at END,
                    disputed_at = CASE WHEN $2 = 'disputed' THEN $3 ELSE disputed_at END
                WHERE id = $1 AND status = ANY($5) AND payout_status = ANY($6)
                RETURNING {BOOKING_COLUMNS}
                "#
            ))
            .bind(transition.booking_id)
            .bind(transition.to.as_str())
            .bind(transition.at)
            .bind(transition.payout.map(|payout| payout.as_str()))
            .bind(&expected)
            .bind(&expected_payout)
            .fetch_optional(self.pool())
            .await?
        };

        if let Some(row) = row {
            return Ok(TransitionOutcome::Applied(Booking::try_from(row)?));
        }

        let current = sqlx::query_scalar::<_, String>("SELECT status FROM bookings WHERE id = $1")
            .bind(transition.booking_id)
            .fetch_optional(self.pool())
            .await?;

        Ok(match current {
            Some(status) => TransitionOutcome::Rejected(status.parse()?),
            None => TransitionOutcome::NotFound,
        })
    }

    async fn session_for_booking(&self, booking_id: Uuid) -> Result<Option<Session>> {
        let row = sqlx::query_as::<_, DbSession>(&format!(
            "SELECT {SESSION_COLUMNS} FROM sessions WHERE booking_id = $1"
        ))
        .bind(booking_id)
        .fetch_optional(self.pool())
        .await?;

        row.map(Session::try_from).transpose()
    }

    async fn end_session(&self, booking_id: Uuid) -> Result<Option<Session>> {
        let running: Vec<&str> = SessionStatus::sources(SessionStatus::Ended)
            .iter()
            .map(|status| status.as_str())
            .collect();
        let row = sqlx::query_as::<_, DbSession>(&format!(
            r#"
            UPDATE sessions
            SET status = $2
            WHERE booking_id = $1 AND status = ANY($3)
            RETURNING {SESSION_COLUMNS}
            "#
        ))
        .bind(booking_id)
        .bind(SessionStatus::Ended.as_str())
        .bind(&running)
        .fetch_optional(self.pool())
        .await?;

        row.map(Session::try_from).transpose()
    }
}
