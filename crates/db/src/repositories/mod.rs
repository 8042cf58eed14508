//! # Repositories
//!
//! Storage seams of the marketplace. Each trait covers one aggregate; the
//! services only ever talk to these traits, so the same engine code runs
//! against [`PgStore`] in production and [`crate::memory::MemoryStore`] in
//! tests.
//!
//! Every status change is a compare-and-update: the caller states which
//! prior statuses it expects and the store reports what it actually found.

pub mod availability;
pub mod booking;
pub mod dispute;
pub mod slot;
pub mod task;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use counselhub_core::models::{
    availability::{AvailabilityRuleInput, RecurringAvailabilityRule},
    booking::{Booking, BookingStatus, BookingTransition},
    dispute::Dispute,
    session::Session,
    slot::{GeneratedSlot, SlotAction, SlotCandidate, SlotMutation, SlotStatus},
    task::{NewTask, RetentionPolicy, ScheduledTask, TaskSettlement},
};
use counselhub_core::slot_plan::{SkippedRange, SlotPlanner};
use eyre::Result;
use sqlx::PgPool;
use uuid::Uuid;

#[async_trait]
pub trait AvailabilityRepository: Send + Sync {
    /// Replaces the whole rule set of a counselor in one transaction
    async fn replace_rules(
        &self,
        counselor_id: Uuid,
        rules: &[AvailabilityRuleInput],
        now: DateTime<Utc>,
    ) -> Result<Vec<RecurringAvailabilityRule>>;

    async fn rules_for_counselor(&self, counselor_id: Uuid) -> Result<Vec<RecurringAvailabilityRule>>;

    async fn counselors_with_rules(&self) -> Result<Vec<Uuid>>;
}

/// What one slot rebuild did to a counselor's calendar
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SlotRebuild {
    /// Unbooked slots deleted before planning
    pub removed: u64,
    pub created: u64,
    pub skipped: Vec<SkippedRange>,
    /// Candidates whose insert errored; the rest of the rebuild still commits
    pub failed: u64,
}

#[async_trait]
pub trait SlotRepository: Send + Sync {
    /// Replaces every unbooked slot of the counselor with a fresh plan.
    ///
    /// Reading the rules, deleting, planning against the surviving booked
    /// slots and inserting happen as one unit; two rebuilds of the same
    /// counselor never interleave.
    async fn rebuild_slots(
        &self,
        counselor_id: Uuid,
        planner: &SlotPlanner<'_>,
        now: DateTime<Utc>,
    ) -> Result<SlotRebuild>;

    /// Inserts a slot unless the exact `(counselor, start, end)` already exists
    async fn insert_slot(&self, candidate: &SlotCandidate, now: DateTime<Utc>) -> Result<Option<GeneratedSlot>>;

    async fn get_slot(&self, slot_id: Uuid) -> Result<Option<GeneratedSlot>>;

    /// Slots of a counselor starting in `[from, to)`, ordered by start time
    async fn slots_for_counselor(
        &self,
        counselor_id: Uuid,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> Result<Vec<GeneratedSlot>>;

    /// Applies `action` to every slot starting in `[from, to)`, or to none of
    /// them if any is booked
    async fn apply_day_action(
        &self,
        counselor_id: Uuid,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        action: SlotAction,
        now: DateTime<Utc>,
    ) -> Result<SlotMutation>;

    async fn apply_slot_action(
        &self,
        counselor_id: Uuid,
        slot_id: Uuid,
        action: SlotAction,
        now: DateTime<Utc>,
    ) -> Result<SlotMutation>;

    /// Removes unbooked slots that ended before `before`
    async fn sweep_stale_slots(&self, before: DateTime<Utc>) -> Result<u64>;
}

/// Everything written when a booking is confirmed
#[derive(Debug, Clone)]
pub struct ConfirmationBundle {
    pub booking: Booking,
    pub session: Session,
    /// Delayed work and outbox notifications, persisted with the booking
    pub tasks: Vec<NewTask>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ConfirmationOutcome {
    Created,
    /// The slot was not `available` at write time; nothing was written
    SlotUnavailable(Option<SlotStatus>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum TransitionOutcome {
    Applied(Booking),
    /// The booking was in a state the transition does not start from
    Rejected(BookingStatus),
    NotFound,
}

#[async_trait]
pub trait BookingRepository: Send + Sync {
    async fn create_confirmed_booking(&self, bundle: &ConfirmationBundle) -> Result<ConfirmationOutcome>;

    async fn get_booking(&self, booking_id: Uuid) -> Result<Option<Booking>>;

    async fn transition_booking(&self, transition: &BookingTransition) -> Result<TransitionOutcome>;

    async fn session_for_booking(&self, booking_id: Uuid) -> Result<Option<Session>>;

    /// Moves a scheduled or active session to `ended`; `None` if it was not running
    async fn end_session(&self, booking_id: Uuid) -> Result<Option<Session>>;
}

#[derive(Debug, Clone, PartialEq)]
pub enum DisputeOutcome {
    Opened {
        booking: Booking,
        /// False when the auto-complete task had already left `pending`
        auto_complete_cancelled: bool,
    },
    AlreadyDisputed,
    BookingNotDisputable(BookingStatus),
    BookingNotFound,
}

#[async_trait]
pub trait DisputeRepository: Send + Sync {
    async fn dispute_for_booking(&self, booking_id: Uuid) -> Result<Option<Dispute>>;

    /// Records the dispute, moves the booking to `disputed` with payout held,
    /// and cancels the pending auto-complete task, all or nothing
    async fn open_dispute(&self, dispute: &Dispute, auto_complete_key: &str) -> Result<DisputeOutcome>;
}

#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Inserts a task; `false` if the idempotency key already exists
    async fn insert_task(&self, task: &NewTask, now: DateTime<Utc>) -> Result<bool>;

    /// Inserts or updates a recurring task in place; `true` when newly created
    async fn upsert_recurring(&self, task: &NewTask, now: DateTime<Utc>) -> Result<bool>;

    /// Cancels a pending task; `false` if no pending task has that key
    async fn cancel_task(&self, idempotency_key: &str, now: DateTime<Utc>) -> Result<bool>;

    async fn get_task(&self, idempotency_key: &str) -> Result<Option<ScheduledTask>>;

    /// Leases up to `limit` due tasks, marking them running until `now + lease`
    async fn claim_due(&self, now: DateTime<Utc>, limit: u32, lease: Duration) -> Result<Vec<ScheduledTask>>;

    /// Records the outcome of claim number `attempt`; a settlement from an
    /// older claim whose lease was already taken over is ignored
    async fn settle_task(
        &self,
        task_id: Uuid,
        attempt: u32,
        settlement: TaskSettlement,
        error: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<()>;

    /// Releases running tasks whose lease expired; returns how many
    async fn requeue_stalled(&self, now: DateTime<Utc>) -> Result<u64>;

    async fn prune_finished(&self, retention: &RetentionPolicy, now: DateTime<Utc>) -> Result<u64>;
}

/// Every repository at once, as the engine services need them
pub trait Store:
    AvailabilityRepository + SlotRepository + BookingRepository + DisputeRepository + TaskStore
{
}

impl<T> Store for T where
    T: AvailabilityRepository + SlotRepository + BookingRepository + DisputeRepository + TaskStore
{
}

/// PostgreSQL-backed store
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}
