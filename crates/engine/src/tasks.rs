//! # Task Handlers
//!
//! Worker-side handlers for every task type the engine schedules, plus the
//! daily maintenance registrations.
//!
//! Handlers are safe to run more than once: every write they do is a
//! compare-and-update or an idempotent delete, so a retried or re-delivered
//! task converges on the same state.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveTime;
use counselhub_core::models::booking::CompletionOutcome;
use counselhub_core::models::task::{NewTask, Recurrence, ScheduledTask, TaskType};
use counselhub_core::{CounselError, CounselResult};
use counselhub_scheduler::{HandlerRegistry, Scheduler, TaskError, TaskHandler, handler::decode_payload};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use crate::providers::{Notification, NotificationKind, Notifier};
use crate::{AvailabilityService, BookingService, Engine};

pub const MATERIALIZE_DAILY_KEY: &str = "materialize-slots-daily";
pub const SWEEP_DAILY_KEY: &str = "sweep-stale-slots-daily";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomTeardownPayload {
    pub booking_id: Uuid,
    pub room_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AutoCompletePayload {
    pub booking_id: Uuid,
}

/// Builds the outbox task for one notification, keyed per kind and booking
pub(crate) fn notification_task(
    scheduler: &Scheduler,
    kind: NotificationKind,
    recipient_id: Uuid,
    booking_id: Uuid,
    detail: Option<String>,
) -> CounselResult<NewTask> {
    let notification = Notification {
        kind,
        recipient_id,
        booking_id,
        detail,
    };
    let key = TaskType::SendNotification.key_for(format!("{}-{}", kind.as_str(), booking_id));
    scheduler.prepare_now(TaskType::SendNotification, notification, key)
}

/// Client-side mistakes will fail the same way on every attempt
fn classify(error: CounselError) -> TaskError {
    match error {
        CounselError::NotFound(_)
        | CounselError::Validation(_)
        | CounselError::Authorization(_)
        | CounselError::Authentication(_) => TaskError::permanent(error),
        _ => TaskError::retryable(error),
    }
}

struct RoomTeardownHandler {
    bookings: BookingService,
}

#[async_trait]
impl TaskHandler for RoomTeardownHandler {
    async fn handle(&self, task: &ScheduledTask) -> Result<(), TaskError> {
        let payload: RoomTeardownPayload = decode_payload(task)?;
        let status = self
            .bookings
            .close_session(payload.booking_id, &payload.room_id)
            .await
            .map_err(classify)?;
        debug!(booking_id = %payload.booking_id, %status, "room torn down");
        Ok(())
    }
}

struct AutoCompleteHandler {
    bookings: BookingService,
}

#[async_trait]
impl TaskHandler for AutoCompleteHandler {
    async fn handle(&self, task: &ScheduledTask) -> Result<(), TaskError> {
        let payload: AutoCompletePayload = decode_payload(task)?;
        match self.bookings.complete_booking(payload.booking_id).await.map_err(classify)? {
            CompletionOutcome::Completed => {}
            CompletionOutcome::Skipped(status) => {
                debug!(booking_id = %payload.booking_id, %status, "nothing to complete");
            }
        }
        Ok(())
    }
}

struct MaterializeSlotsHandler {
    availability: AvailabilityService,
}

#[async_trait]
impl TaskHandler for MaterializeSlotsHandler {
    async fn handle(&self, _task: &ScheduledTask) -> Result<(), TaskError> {
        let created = self.availability.materialize_all().await.map_err(classify)?;
        info!(created, "daily materialization finished");
        Ok(())
    }
}

struct SweepStaleSlotsHandler {
    availability: AvailabilityService,
}

#[async_trait]
impl TaskHandler for SweepStaleSlotsHandler {
    async fn handle(&self, _task: &ScheduledTask) -> Result<(), TaskError> {
        self.availability.sweep_stale_slots().await.map_err(classify)?;
        Ok(())
    }
}

struct SendNotificationHandler {
    notifier: Arc<dyn Notifier>,
}

#[async_trait]
impl TaskHandler for SendNotificationHandler {
    async fn handle(&self, task: &ScheduledTask) -> Result<(), TaskError> {
        let notification: Notification = decode_payload(task)?;
        self.notifier
            .deliver(&notification)
            .await
            .map_err(TaskError::retryable)
    }
}

pub(crate) fn registry(engine: &Engine, notifier: Arc<dyn Notifier>) -> HandlerRegistry {
    let mut registry = HandlerRegistry::new();
    registry
        .register(
            TaskType::RoomTeardown,
            Arc::new(RoomTeardownHandler {
                bookings: engine.bookings.clone(),
            }),
        )
        .register(
            TaskType::AutoCompleteBooking,
            Arc::new(AutoCompleteHandler {
                bookings: engine.bookings.clone(),
            }),
        )
        .register(
            TaskType::MaterializeSlots,
            Arc::new(MaterializeSlotsHandler {
                availability: engine.availability.clone(),
            }),
        )
        .register(
            TaskType::SweepStaleSlots,
            Arc::new(SweepStaleSlotsHandler {
                availability: engine.availability.clone(),
            }),
        )
        .register(TaskType::SendNotification, Arc::new(SendNotificationHandler { notifier }));
    registry
}

/// Registers the daily slot materialization (00:05) and stale-slot sweep
/// (00:15), both in service-local time. Safe to call on every start.
pub async fn register_maintenance(scheduler: &Scheduler) -> CounselResult<()> {
    scheduler
        .schedule_recurring(
            TaskType::MaterializeSlots,
            serde_json::json!({}),
            Recurrence::Daily { at: local_time(0, 5)? },
            MATERIALIZE_DAILY_KEY,
        )
        .await?;
    scheduler
        .schedule_recurring(
            TaskType::SweepStaleSlots,
            serde_json::json!({}),
            Recurrence::Daily { at: local_time(0, 15)? },
            SWEEP_DAILY_KEY,
        )
        .await?;
    Ok(())
}

fn local_time(hour: u32, minute: u32) -> CounselResult<NaiveTime> {
    NaiveTime::from_hms_opt(hour, minute, 0)
        .ok_or_else(|| CounselError::Internal(format!("invalid time {:02}:{:02}", hour, minute).into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_missing_records_are_not_retried() {
        assert_eq!(
            classify(CounselError::NotFound("Booking 1".to_string())),
            TaskError::Permanent("Resource not found: Booking 1".to_string())
        );
    }

    #[test]
    fn test_provider_failures_are_retried() {
        assert!(matches!(
            classify(CounselError::ExternalProvider("timeout".to_string())),
            TaskError::Retryable(_)
        ));
        assert!(matches!(
            classify(CounselError::Database(eyre::eyre!("connection reset"))),
            TaskError::Retryable(_)
        ));
    }
}
