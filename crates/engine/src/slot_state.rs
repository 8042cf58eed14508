use std::sync::Arc;

use chrono::NaiveDate;
use counselhub_core::models::slot::{SlotAction, SlotMutation, SlotStatusResponse};
use counselhub_core::{Clock, CounselError, CounselResult, ServiceCalendar};
use counselhub_db::Store;
use tracing::info;
use uuid::Uuid;

use crate::Actor;

/// Counselor-driven status changes on generated slots.
///
/// Never books a slot and never touches a booked one: if any slot in scope
/// is booked the whole request is refused and nothing is written.
#[derive(Clone)]
pub struct SlotStateService {
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
    calendar: ServiceCalendar,
}

impl SlotStateService {
    pub fn new(store: Arc<dyn Store>, clock: Arc<dyn Clock>, calendar: ServiceCalendar) -> Self {
        Self { store, clock, calendar }
    }

    /// Applies `action` to every slot starting on the local calendar `date`
    pub async fn set_day_status(
        &self,
        actor: &Actor,
        counselor_id: Uuid,
        date: NaiveDate,
        action: SlotAction,
    ) -> CounselResult<SlotStatusResponse> {
        actor.ensure_counselor(counselor_id)?;

        let (from, to) = self.calendar.day_window(date);
        let mutation = self
            .store
            .apply_day_action(counselor_id, from, to, action, self.clock.now())
            .await?;

        match mutation {
            SlotMutation::Applied { affected } => {
                info!(%counselor_id, %date, %action, affected, "day status changed");
                Ok(SlotStatusResponse { status: action, affected })
            }
            SlotMutation::BookedConflict { booked } => Err(CounselError::Conflict(format!(
                "{} has {} booked slot(s); no slots were changed",
                date,
                booked.len()
            ))),
            SlotMutation::IllegalTransition { from, to } => Err(CounselError::Conflict(format!(
                "A {} slot on {} cannot become {}",
                from, date, to
            ))),
            SlotMutation::NotFound => Err(CounselError::NotFound(format!("No slots on {}", date))),
        }
    }

    pub async fn set_slot_status(
        &self,
        actor: &Actor,
        counselor_id: Uuid,
        slot_id: Uuid,
        action: SlotAction,
    ) -> CounselResult<SlotStatusResponse> {
        actor.ensure_counselor(counselor_id)?;

        let mutation = self
            .store
            .apply_slot_action(counselor_id, slot_id, action, self.clock.now())
            .await?;

        match mutation {
            SlotMutation::Applied { affected } => {
                info!(%counselor_id, %slot_id, %action, "slot status changed");
                Ok(SlotStatusResponse { status: action, affected })
            }
            SlotMutation::BookedConflict { .. } => {
                Err(CounselError::Conflict(format!("Slot {} is booked", slot_id)))
            }
            SlotMutation::IllegalTransition { from, to } => Err(CounselError::Conflict(format!(
                "Slot {} is {} and cannot become {}",
                slot_id, from, to
            ))),
            SlotMutation::NotFound => Err(CounselError::NotFound(format!("Slot {}", slot_id))),
        }
    }
}
