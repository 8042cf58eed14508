//! Row types as stored in PostgreSQL and their conversion into domain types.
//!
//! Statuses are stored as text; a row holding an unknown status is reported
//! as an error instead of being coerced.

use chrono::{DateTime, Utc};
use counselhub_core::models::{
    availability::{RecurringAvailabilityRule, TimeRange},
    booking::{Booking, Completion, Payout},
    dispute::{ActivityEntry, Dispute, EvidenceItem},
    session::Session,
    slot::GeneratedSlot,
    task::{Recurrence, RetryPolicy, ScheduledTask},
};
use eyre::{Result, WrapErr};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use sqlx::types::{Json, JsonValue};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct DbAvailabilityRule {
    pub id: Uuid,
    pub counselor_id: Uuid,
    pub day_of_week: String,
    pub is_available: bool,
    pub time_ranges: Json<Vec<TimeRange>>,
    pub price: Decimal,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<DbAvailabilityRule> for RecurringAvailabilityRule {
    type Error = eyre::Report;

    fn try_from(row: DbAvailabilityRule) -> Result<Self> {
        Ok(Self {
            id: row.id,
            counselor_id: row.counselor_id,
            day_of_week: row.day_of_week.parse()?,
            is_available: row.is_available,
            time_ranges: row.time_ranges.0,
            price: row.price,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct DbSlot {
    pub id: Uuid,
    pub counselor_id: Uuid,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub base_price: Decimal,
    pub total_price: Decimal,
    pub status: String,
    pub booking_id: Option<Uuid>,
    pub client_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<DbSlot> for GeneratedSlot {
    type Error = eyre::Report;

    fn try_from(row: DbSlot) -> Result<Self> {
        Ok(Self {
            id: row.id,
            counselor_id: row.counselor_id,
            start_time: row.start_time,
            end_time: row.end_time,
            base_price: row.base_price,
            total_price: row.total_price,
            status: row
                .status
                .parse()
                .wrap_err_with(|| format!("slot {} has a corrupt status", row.id))?,
            booking_id: row.booking_id,
            client_id: row.client_id,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct DbBooking {
    pub id: Uuid,
    pub client_id: Uuid,
    pub counselor_id: Uuid,
    pub slot_id: Uuid,
    pub status: String,
    pub amount: Decimal,
    pub payment_id: String,
    pub dispute_window_open_at: Option<DateTime<Utc>>,
    pub auto_complete_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub payout_amount: Decimal,
    pub payout_release_on: DateTime<Utc>,
    pub payout_status: String,
    pub disputed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<DbBooking> for Booking {
    type Error = eyre::Report;

    fn try_from(row: DbBooking) -> Result<Self> {
        Ok(Self {
            id: row.id,
            client_id: row.client_id,
            counselor_id: row.counselor_id,
            slot_id: row.slot_id,
            status: row
                .status
                .parse()
                .wrap_err_with(|| format!("booking {} has a corrupt status", row.id))?,
            amount: row.amount,
            payment_id: row.payment_id,
            completion: Completion {
                dispute_window_open_at: row.dispute_window_open_at,
                auto_complete_at: row.auto_complete_at,
                completed_at: row.completed_at,
            },
            payout: Payout {
                amount: row.payout_amount,
                release_on: row.payout_release_on,
                status: row.payout_status.parse()?,
            },
            disputed_at: row.disputed_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct DbSession {
    pub id: Uuid,
    pub booking_id: Uuid,
    pub room_id: String,
    pub room_url: String,
    pub teardown_task_key: String,
    pub status: String,
    pub scheduled_start: DateTime<Utc>,
    pub scheduled_end: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl TryFrom<DbSession> for Session {
    type Error = eyre::Report;

    fn try_from(row: DbSession) -> Result<Self> {
        Ok(Self {
            id: row.id,
            booking_id: row.booking_id,
            room_id: row.room_id,
            room_url: row.room_url,
            teardown_task_key: row.teardown_task_key,
            status: row.status.parse()?,
            scheduled_start: row.scheduled_start,
            scheduled_end: row.scheduled_end,
            created_at: row.created_at,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct DbDispute {
    pub id: Uuid,
    pub booking_id: Uuid,
    pub client_id: Uuid,
    pub issue_type: String,
    pub description: String,
    pub evidence: Json<Vec<EvidenceItem>>,
    pub status: String,
    pub raised_at: DateTime<Utc>,
    pub activity: Json<Vec<ActivityEntry>>,
}

impl TryFrom<DbDispute> for Dispute {
    type Error = eyre::Report;

    fn try_from(row: DbDispute) -> Result<Self> {
        Ok(Self {
            id: row.id,
            booking_id: row.booking_id,
            client_id: row.client_id,
            issue_type: row.issue_type.parse()?,
            description: row.description,
            evidence: row.evidence.0,
            status: row.status.parse()?,
            raised_at: row.raised_at,
            activity: row.activity.0,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct DbScheduledTask {
    pub id: Uuid,
    pub task_type: String,
    pub idempotency_key: String,
    pub payload: JsonValue,
    pub run_at: DateTime<Utc>,
    pub status: String,
    pub attempts: i32,
    pub max_attempts: i32,
    pub base_delay_ms: i64,
    pub max_delay_ms: i64,
    pub recurrence: Option<Json<Recurrence>>,
    pub locked_until: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl TryFrom<DbScheduledTask> for ScheduledTask {
    type Error = eyre::Report;

    fn try_from(row: DbScheduledTask) -> Result<Self> {
        Ok(Self {
            id: row.id,
            task_type: row
                .task_type
                .parse()
                .wrap_err_with(|| format!("task {} has an unknown type", row.idempotency_key))?,
            idempotency_key: row.idempotency_key,
            payload: row.payload,
            run_at: row.run_at,
            status: row.status.parse()?,
            attempts: u32::try_from(row.attempts).unwrap_or(0),
            retry: RetryPolicy {
                max_attempts: u32::try_from(row.max_attempts).unwrap_or(1),
                base_delay_ms: u64::try_from(row.base_delay_ms).unwrap_or(0),
                max_delay_ms: u64::try_from(row.max_delay_ms).unwrap_or(0),
            },
            recurrence: row.recurrence.map(|json| json.0),
            locked_until: row.locked_until,
            last_error: row.last_error,
            created_at: row.created_at,
            updated_at: row.updated_at,
            finished_at: row.finished_at,
        })
    }
}
