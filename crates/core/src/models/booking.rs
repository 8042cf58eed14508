use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BookingStatus {
    Confirmed,
    DisputeWindowOpen,
    Disputed,
    Completed,
    Cancelled,
}

text_enum!(BookingStatus, "booking status" {
    Confirmed => "confirmed",
    DisputeWindowOpen => "dispute_window_open",
    Disputed => "disputed",
    Completed => "completed",
    Cancelled => "cancelled",
});

impl BookingStatus {
    /// Transition table for bookings.
    ///
    /// `Disputed` only leaves through administrative resolution, which is
    /// outside this system but still a legal edge.
    pub fn can_transition_to(self, next: BookingStatus) -> bool {
        use BookingStatus::*;
        matches!(
            (self, next),
            (Confirmed, DisputeWindowOpen)
                | (Confirmed, Completed)
                | (Confirmed, Disputed)
                | (Confirmed, Cancelled)
                | (DisputeWindowOpen, Completed)
                | (DisputeWindowOpen, Disputed)
                | (Disputed, Completed)
                | (Disputed, Cancelled)
        )
    }

    /// Source states that may move to `next` through the automated paths.
    ///
    /// The edges come from [`can_transition_to`](Self::can_transition_to);
    /// `Disputed` is left out because only administrative resolution moves it.
    /// Stores use the result as the guard of their compare-and-update, so a
    /// status written concurrently by another path makes the update match
    /// nothing.
    pub fn automated_sources(next: BookingStatus) -> Vec<BookingStatus> {
        [BookingStatus::Confirmed, BookingStatus::DisputeWindowOpen]
            .into_iter()
            .filter(|status| status.can_transition_to(next))
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PayoutStatus {
    Pending,
    Held,
    Released,
    Cancelled,
}

text_enum!(PayoutStatus, "payout status" {
    Pending => "pending",
    Held => "held",
    Released => "released",
    Cancelled => "cancelled",
});

impl PayoutStatus {
    pub fn can_transition_to(self, next: PayoutStatus) -> bool {
        use PayoutStatus::*;
        matches!(
            (self, next),
            (Pending, Held)
                | (Pending, Released)
                | (Pending, Cancelled)
                | (Held, Released)
                | (Held, Cancelled)
        )
    }

    /// Payout statuses that may move to `next`
    pub fn sources(next: PayoutStatus) -> Vec<PayoutStatus> {
        Self::ALL
            .iter()
            .copied()
            .filter(|status| status.can_transition_to(next))
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Completion {
    pub dispute_window_open_at: Option<DateTime<Utc>>,
    pub auto_complete_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Payout {
    pub amount: Decimal,
    pub release_on: DateTime<Utc>,
    pub status: PayoutStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Booking {
    pub id: Uuid,
    pub client_id: Uuid,
    pub counselor_id: Uuid,
    pub slot_id: Uuid,
    pub status: BookingStatus,
    pub amount: Decimal,
    pub payment_id: String,
    pub completion: Completion,
    pub payout: Payout,
    pub disputed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Compare-and-update request against a booking row
#[derive(Debug, Clone, PartialEq)]
pub struct BookingTransition {
    pub booking_id: Uuid,
    pub to: BookingStatus,
    pub payout: Option<PayoutStatus>,
    pub at: DateTime<Utc>,
}

impl BookingTransition {
    pub fn new(booking_id: Uuid, to: BookingStatus, at: DateTime<Utc>) -> Self {
        Self {
            booking_id,
            to,
            payout: None,
            at,
        }
    }

    pub fn with_payout(mut self, payout: PayoutStatus) -> Self {
        self.payout = Some(payout);
        self
    }

    /// States the stored row must be in for the update to apply
    pub fn expected(&self) -> Vec<BookingStatus> {
        BookingStatus::automated_sources(self.to)
    }

    /// Payout statuses the stored row must be in; any when the payout is untouched
    pub fn expected_payout(&self) -> Vec<PayoutStatus> {
        match self.payout {
            Some(next) => PayoutStatus::sources(next),
            None => PayoutStatus::ALL.to_vec(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmBookingRequest {
    pub slot_id: Uuid,
    pub payment_id: String,
    pub amount: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookingConfirmation {
    pub booking_id: Uuid,
    pub session_id: Uuid,
}

/// What the auto-complete path did with a booking
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionOutcome {
    Completed,
    /// Booking was not in a completable state; carries what it was instead
    Skipped(BookingStatus),
}
