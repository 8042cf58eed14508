use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SlotStatus {
    Available,
    Booked,
    Cancelled,
    Unavailable,
}

text_enum!(SlotStatus, "slot status" {
    Available => "available",
    Booked => "booked",
    Cancelled => "cancelled",
    Unavailable => "unavailable",
});

impl SlotStatus {
    /// Transition table for slots.
    ///
    /// `Booked` is only ever entered from `Available` and only by the booking
    /// path; a booked slot only leaves that state when its booking is cancelled.
    pub fn can_transition_to(self, next: SlotStatus) -> bool {
        use SlotStatus::*;
        matches!(
            (self, next),
            (Available, Unavailable)
                | (Unavailable, Available)
                | (Available, Booked)
                | (Available, Cancelled)
                | (Unavailable, Cancelled)
                | (Booked, Cancelled)
        )
    }

    /// Statuses a slot may be in for a move to `next` to be legal
    pub fn sources(next: SlotStatus) -> Vec<SlotStatus> {
        Self::ALL
            .iter()
            .copied()
            .filter(|status| status.can_transition_to(next))
            .collect()
    }
}

/// A concrete bookable interval for one counselor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeneratedSlot {
    pub id: Uuid,
    pub counselor_id: Uuid,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub base_price: Decimal,
    pub total_price: Decimal,
    pub status: SlotStatus,
    pub booking_id: Option<Uuid>,
    pub client_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl GeneratedSlot {
    /// Half-open interval intersection
    pub fn overlaps(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> bool {
        self.start_time < end && start < self.end_time
    }
}

/// Slot produced by the planner, not yet persisted
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotCandidate {
    pub counselor_id: Uuid,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub base_price: Decimal,
    pub total_price: Decimal,
}

/// Status a counselor may request for a day or a single slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SlotAction {
    Available,
    Unavailable,
    Delete,
}

text_enum!(SlotAction, "slot action" {
    Available => "available",
    Unavailable => "unavailable",
    Delete => "delete",
});

impl SlotAction {
    /// Target status, `None` for deletion
    pub fn target_status(self) -> Option<SlotStatus> {
        match self {
            SlotAction::Available => Some(SlotStatus::Available),
            SlotAction::Unavailable => Some(SlotStatus::Unavailable),
            SlotAction::Delete => None,
        }
    }
}

/// Result of a guarded status change, as reported by the store
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SlotMutation {
    /// `affected` counts slots that actually changed; slots already in the
    /// target status are left as they are
    Applied { affected: u64 },
    /// Nothing was written because these slots are booked
    BookedConflict { booked: Vec<Uuid> },
    /// The slot's status has no edge to the requested one
    IllegalTransition { from: SlotStatus, to: SlotStatus },
    NotFound,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SlotStatusRequest {
    pub status: SlotAction,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SlotStatusResponse {
    pub status: SlotAction,
    pub affected: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MaterializeResponse {
    pub total_slots_generated: usize,
}
