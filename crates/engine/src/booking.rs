//! # Booking Lifecycle
//!
//! `confirmed → dispute_window_open → completed | disputed`
//!
//! Confirmation provisions the meeting room first and only then writes the
//! booking, its session, the slot claim, the delayed tasks and the outbox
//! notifications in a single store call. The two delayed tasks drive the
//! rest of the lifecycle:
//!
//! - `room-teardown` at slot end closes the session and opens the dispute window
//! - `auto-complete-booking` at slot end + grace completes the booking and
//!   releases the payout, unless a dispute got there first

use std::sync::Arc;

use counselhub_core::models::booking::{
    Booking, BookingConfirmation, BookingStatus, BookingTransition, Completion, CompletionOutcome,
    ConfirmBookingRequest, Payout, PayoutStatus,
};
use counselhub_core::models::dispute::ActorRole;
use counselhub_core::models::session::{Session, SessionStatus};
use counselhub_core::models::slot::SlotStatus;
use counselhub_core::models::task::TaskType;
use counselhub_core::{Clock, CounselError, CounselResult, MarketplacePolicy};
use counselhub_db::{ConfirmationBundle, ConfirmationOutcome, Store, TransitionOutcome};
use counselhub_scheduler::Scheduler;
use tracing::{info, warn};
use uuid::Uuid;

use crate::Actor;
use crate::providers::{MeetingRoomProvider, NotificationKind};
use crate::tasks::{AutoCompletePayload, RoomTeardownPayload, notification_task};

#[derive(Clone)]
pub struct BookingService {
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
    policy: Arc<MarketplacePolicy>,
    scheduler: Scheduler,
    rooms: Arc<dyn MeetingRoomProvider>,
}

impl BookingService {
    pub fn new(
        store: Arc<dyn Store>,
        clock: Arc<dyn Clock>,
        policy: Arc<MarketplacePolicy>,
        scheduler: Scheduler,
        rooms: Arc<dyn MeetingRoomProvider>,
    ) -> Self {
        Self {
            store,
            clock,
            policy,
            scheduler,
            rooms,
        }
    }

    /// Books a slot for the calling client after payment has been taken
    pub async fn confirm_booking(
        &self,
        actor: &Actor,
        request: ConfirmBookingRequest,
    ) -> CounselResult<BookingConfirmation> {
        actor.ensure_client()?;
        let client_id = actor.id;
        let now = self.clock.now();

        let slot = self
            .store
            .get_slot(request.slot_id)
            .await?
            .ok_or_else(|| CounselError::NotFound(format!("Slot {}", request.slot_id)))?;

        if slot.status != SlotStatus::Available {
            return Err(CounselError::Conflict(format!("Slot {} is {}", slot.id, slot.status)));
        }
        if slot.start_time <= now {
            return Err(CounselError::Validation(format!("Slot {} has already started", slot.id)));
        }
        if request.amount != slot.total_price {
            return Err(CounselError::Validation(format!(
                "Paid amount {} does not match slot price {}",
                request.amount, slot.total_price
            )));
        }
        if request.payment_id.trim().is_empty() {
            return Err(CounselError::Validation("paymentId is required".to_string()));
        }

        let booking_id = Uuid::new_v4();
        let room = self
            .rooms
            .create_room(booking_id, slot.start_time, slot.end_time)
            .await?;

        let auto_complete_at = slot.end_time + self.policy.auto_complete_grace;
        let teardown_key = TaskType::RoomTeardown.key_for(booking_id);

        let booking = Booking {
            id: booking_id,
            client_id,
            counselor_id: slot.counselor_id,
            slot_id: slot.id,
            status: BookingStatus::Confirmed,
            amount: request.amount,
            payment_id: request.payment_id,
            completion: Completion {
                dispute_window_open_at: None,
                auto_complete_at,
                completed_at: None,
            },
            payout: Payout {
                amount: self.policy.payout_amount(request.amount),
                release_on: auto_complete_at,
                status: PayoutStatus::Pending,
            },
            disputed_at: None,
            created_at: now,
            updated_at: now,
        };
        let session = Session {
            id: Uuid::new_v4(),
            booking_id,
            room_id: room.room_id.clone(),
            room_url: room.room_url,
            teardown_task_key: teardown_key.clone(),
            status: SessionStatus::Scheduled,
            scheduled_start: slot.start_time,
            scheduled_end: slot.end_time,
            created_at: now,
        };

        let tasks = vec![
            self.scheduler.prepare_once(
                TaskType::RoomTeardown,
                RoomTeardownPayload {
                    booking_id,
                    room_id: room.room_id.clone(),
                },
                slot.end_time,
                teardown_key,
            )?,
            self.scheduler.prepare_once(
                TaskType::AutoCompleteBooking,
                AutoCompletePayload { booking_id },
                auto_complete_at,
                TaskType::AutoCompleteBooking.key_for(booking_id),
            )?,
            notification_task(&self.scheduler, NotificationKind::BookingConfirmed, client_id, booking_id, None)?,
            notification_task(&self.scheduler, NotificationKind::Invoice, client_id, booking_id, None)?,
        ];

        let bundle = ConfirmationBundle {
            booking,
            session,
            tasks,
        };
        let outcome = match self.store.create_confirmed_booking(&bundle).await {
            Ok(outcome) => outcome,
            Err(e) => {
                self.release_room(&room.room_id).await;
                return Err(e.into());
            }
        };

        match outcome {
            ConfirmationOutcome::Created => {
                info!(%booking_id, slot_id = %slot.id, %client_id, "booking confirmed");
                Ok(BookingConfirmation {
                    booking_id,
                    session_id: bundle.session.id,
                })
            }
            ConfirmationOutcome::SlotUnavailable(current) => {
                self.release_room(&room.room_id).await;
                let current = current.map_or_else(|| "gone".to_string(), |status| status.to_string());
                Err(CounselError::Conflict(format!(
                    "Slot {} was taken while confirming (now {})",
                    slot.id, current
                )))
            }
        }
    }

    /// Ends the session after the slot and opens the dispute window.
    ///
    /// Returns the booking status after the call. Running it again is harmless.
    pub async fn close_session(&self, booking_id: Uuid, room_id: &str) -> CounselResult<BookingStatus> {
        self.rooms.delete_room(room_id).await?;

        if self.store.end_session(booking_id).await?.is_none() {
            info!(%booking_id, "session was already closed");
        }

        let transition = BookingTransition::new(booking_id, BookingStatus::DisputeWindowOpen, self.clock.now());
        match self.store.transition_booking(&transition).await? {
            TransitionOutcome::Applied(booking) => {
                info!(%booking_id, "dispute window open");
                Ok(booking.status)
            }
            TransitionOutcome::Rejected(current) => {
                info!(%booking_id, %current, "booking already moved on; window not reopened");
                Ok(current)
            }
            TransitionOutcome::NotFound => Err(CounselError::NotFound(format!("Booking {}", booking_id))),
        }
    }

    /// Completes the booking and releases the payout unless it was disputed
    pub async fn complete_booking(&self, booking_id: Uuid) -> CounselResult<CompletionOutcome> {
        let transition = BookingTransition::new(booking_id, BookingStatus::Completed, self.clock.now())
            .with_payout(PayoutStatus::Released);

        match self.store.transition_booking(&transition).await? {
            TransitionOutcome::Applied(_) => {
                info!(%booking_id, "booking completed, payout released");
                Ok(CompletionOutcome::Completed)
            }
            TransitionOutcome::Rejected(current) => {
                info!(%booking_id, %current, "auto-complete skipped");
                Ok(CompletionOutcome::Skipped(current))
            }
            TransitionOutcome::NotFound => Err(CounselError::NotFound(format!("Booking {}", booking_id))),
        }
    }

    /// Reads a booking as its client, its counselor, or an admin
    pub async fn get_booking(&self, actor: &Actor, booking_id: Uuid) -> CounselResult<Booking> {
        let booking = self
            .store
            .get_booking(booking_id)
            .await?
            .ok_or_else(|| CounselError::NotFound(format!("Booking {}", booking_id)))?;

        let allowed = match actor.role {
            ActorRole::Admin => true,
            ActorRole::Client => booking.client_id == actor.id,
            ActorRole::Counselor => booking.counselor_id == actor.id,
        };
        if !allowed {
            return Err(CounselError::Authorization(format!(
                "Booking {} belongs to someone else",
                booking_id
            )));
        }
        Ok(booking)
    }

    async fn release_room(&self, room_id: &str) {
        if let Err(e) = self.rooms.delete_room(room_id).await {
            warn!(%room_id, "failed to release meeting room: {}", e);
        }
    }
}
