use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Scheduled,
    Active,
    Ended,
    Cancelled,
}

text_enum!(SessionStatus, "session status" {
    Scheduled => "scheduled",
    Active => "active",
    Ended => "ended",
    Cancelled => "cancelled",
});

impl SessionStatus {
    pub fn can_transition_to(self, next: SessionStatus) -> bool {
        use SessionStatus::*;
        matches!(
            (self, next),
            (Scheduled, Active) | (Scheduled, Ended) | (Active, Ended) | (Scheduled, Cancelled)
        )
    }

    pub fn sources(next: SessionStatus) -> Vec<SessionStatus> {
        Self::ALL
            .iter()
            .copied()
            .filter(|status| status.can_transition_to(next))
            .collect()
    }
}

/// Video session attached to a booking
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: Uuid,
    pub booking_id: Uuid,
    pub room_id: String,
    pub room_url: String,
    pub teardown_task_key: String,
    pub status: SessionStatus,
    pub scheduled_start: DateTime<Utc>,
    pub scheduled_end: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}
