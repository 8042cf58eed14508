use chrono::{DateTime, Duration, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::calendar::ServiceCalendar;
use crate::models::availability::hhmm;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TaskType {
    RoomTeardown,
    AutoCompleteBooking,
    MaterializeSlots,
    SweepStaleSlots,
    SendNotification,
}

text_enum!(TaskType, "task type" {
    RoomTeardown => "room-teardown",
    AutoCompleteBooking => "auto-complete-booking",
    MaterializeSlots => "materialize-slots",
    SweepStaleSlots => "sweep-stale-slots",
    SendNotification => "send-notification",
});

impl TaskType {
    /// Idempotency key of the task owned by `entity`, e.g. `room-teardown-<booking id>`
    pub fn key_for(self, entity: impl std::fmt::Display) -> String {
        format!("{}-{}", self.as_str(), entity)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

text_enum!(TaskStatus, "task status" {
    Pending => "pending",
    Running => "running",
    Completed => "completed",
    Failed => "failed",
    Cancelled => "cancelled",
});

impl TaskStatus {
    pub fn can_transition_to(self, next: TaskStatus) -> bool {
        use TaskStatus::*;
        matches!(
            (self, next),
            (Pending, Running)
                | (Pending, Cancelled)
                | (Running, Completed)
                | (Running, Failed)
                // retry, stalled lease, or a recurring task re-arming
                | (Running, Pending)
                | (Failed, Pending)
                | (Cancelled, Pending)
        )
    }

    /// Statuses a task may be in for a move to `next` to be legal
    pub fn sources(next: TaskStatus) -> Vec<TaskStatus> {
        Self::ALL
            .iter()
            .copied()
            .filter(|status| status.can_transition_to(next))
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay_ms: 2_000,
            max_delay_ms: 10 * 60 * 1_000,
        }
    }
}

/// When a recurring task runs again
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Recurrence {
    /// Every day at a local time of the service timezone
    Daily {
        #[serde(with = "hhmm")]
        at: NaiveTime,
    },
    Interval { seconds: u64 },
}

impl Recurrence {
    pub fn next_after(&self, after: DateTime<Utc>, calendar: &ServiceCalendar) -> DateTime<Utc> {
        match self {
            Recurrence::Daily { at } => calendar.next_daily_run(after, *at),
            Recurrence::Interval { seconds } => {
                after + Duration::seconds(i64::try_from(*seconds).unwrap_or(86_400).max(1))
            }
        }
    }
}

/// Task as handed to the store for insertion
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewTask {
    pub task_type: TaskType,
    pub idempotency_key: String,
    pub payload: serde_json::Value,
    pub run_at: DateTime<Utc>,
    pub retry: RetryPolicy,
    pub recurrence: Option<Recurrence>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduledTask {
    pub id: Uuid,
    pub task_type: TaskType,
    pub idempotency_key: String,
    pub payload: serde_json::Value,
    pub run_at: DateTime<Utc>,
    pub status: TaskStatus,
    pub attempts: u32,
    pub retry: RetryPolicy,
    pub recurrence: Option<Recurrence>,
    pub locked_until: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl ScheduledTask {
    pub fn attempts_exhausted(&self) -> bool {
        self.attempts >= self.retry.max_attempts
    }
}

/// How long finished task records are kept
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionPolicy {
    /// Completed and cancelled records older than this are deleted
    pub finished_ttl: Duration,
    /// Only the newest failed records are kept
    pub keep_failed: u32,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            finished_ttl: Duration::hours(24),
            keep_failed: 100,
        }
    }
}

/// Result of handing a claimed task back to the store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskSettlement {
    Completed,
    Rearmed { next_run_at: DateTime<Utc> },
    Retry { next_run_at: DateTime<Utc> },
    Failed,
}
