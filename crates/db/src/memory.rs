//! In-process store with the same compare-and-update semantics as
//! [`PgStore`](crate::PgStore).
//!
//! A single async mutex over the whole state stands in for row locks and
//! transactions: every trait method holds it for its full duration, so each
//! call is atomic with respect to every other call.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use counselhub_core::models::{
    availability::{AvailabilityRuleInput, RecurringAvailabilityRule},
    booking::{Booking, BookingStatus, BookingTransition, PayoutStatus},
    dispute::Dispute,
    session::{Session, SessionStatus},
    slot::{GeneratedSlot, SlotAction, SlotCandidate, SlotMutation, SlotStatus},
    task::{NewTask, RetentionPolicy, ScheduledTask, TaskSettlement, TaskStatus},
};
use counselhub_core::slot_plan::SlotPlanner;
use eyre::Result;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::repositories::{
    AvailabilityRepository, BookingRepository, ConfirmationBundle, ConfirmationOutcome, DisputeOutcome,
    DisputeRepository, SlotRebuild, SlotRepository, TaskStore, TransitionOutcome,
};

#[derive(Debug, Default)]
struct State {
    rules: HashMap<Uuid, Vec<RecurringAvailabilityRule>>,
    slots: HashMap<Uuid, GeneratedSlot>,
    bookings: HashMap<Uuid, Booking>,
    /// Keyed by booking id
    sessions: HashMap<Uuid, Session>,
    /// Keyed by booking id
    disputes: HashMap<Uuid, Dispute>,
    /// Keyed by idempotency key
    tasks: HashMap<String, ScheduledTask>,
}

impl State {
    fn insert_task(&mut self, task: &NewTask, now: DateTime<Utc>) -> bool {
        if self.tasks.contains_key(&task.idempotency_key) {
            return false;
        }
        self.tasks.insert(task.idempotency_key.clone(), scheduled_from(task, now));
        true
    }

    fn cancel_task(&mut self, idempotency_key: &str, now: DateTime<Utc>) -> bool {
        match self.tasks.get_mut(idempotency_key) {
            Some(task) if task.status.can_transition_to(TaskStatus::Cancelled) => {
                task.status = TaskStatus::Cancelled;
                task.finished_at = Some(now);
                task.updated_at = now;
                task.locked_until = None;
                true
            }
            _ => false,
        }
    }

    fn insert_slot(&mut self, candidate: &SlotCandidate, now: DateTime<Utc>) -> Option<GeneratedSlot> {
        let duplicate = self.slots.values().any(|slot| {
            slot.counselor_id == candidate.counselor_id
                && slot.start_time == candidate.start_time
                && slot.end_time == candidate.end_time
        });
        if duplicate {
            return None;
        }

        let slot = GeneratedSlot {
            id: Uuid::new_v4(),
            counselor_id: candidate.counselor_id,
            start_time: candidate.start_time,
            end_time: candidate.end_time,
            base_price: candidate.base_price,
            total_price: candidate.total_price,
            status: SlotStatus::Available,
            booking_id: None,
            client_id: None,
            created_at: now,
            updated_at: now,
        };
        self.slots.insert(slot.id, slot.clone());
        Some(slot)
    }
}

fn scheduled_from(task: &NewTask, now: DateTime<Utc>) -> ScheduledTask {
    ScheduledTask {
        id: Uuid::new_v4(),
        task_type: task.task_type,
        idempotency_key: task.idempotency_key.clone(),
        payload: task.payload.clone(),
        run_at: task.run_at,
        status: TaskStatus::Pending,
        attempts: 0,
        retry: task.retry,
        recurrence: task.recurrence,
        locked_until: None,
        last_error: None,
        created_at: now,
        updated_at: now,
        finished_at: None,
    }
}

/// Moves the slot to the action's target status if the edge exists;
/// `true` when the slot changed
fn apply_action(slot: &mut GeneratedSlot, action: SlotAction, now: DateTime<Utc>) -> bool {
    match action.target_status() {
        Some(status) if slot.status.can_transition_to(status) => {
            slot.status = status;
            slot.updated_at = now;
            true
        }
        _ => false,
    }
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every task currently stored, in no particular order
    pub async fn tasks(&self) -> Vec<ScheduledTask> {
        self.state.lock().await.tasks.values().cloned().collect()
    }
}

#[async_trait]
impl AvailabilityRepository for MemoryStore {
    async fn replace_rules(
        &self,
        counselor_id: Uuid,
        rules: &[AvailabilityRuleInput],
        now: DateTime<Utc>,
    ) -> Result<Vec<RecurringAvailabilityRule>> {
        let stored: Vec<RecurringAvailabilityRule> = rules
            .iter()
            .map(|rule| RecurringAvailabilityRule {
                id: Uuid::new_v4(),
                counselor_id,
                day_of_week: rule.day_of_week,
                is_available: rule.is_available,
                time_ranges: rule.time_ranges.clone(),
                price: rule.price,
                updated_at: now,
            })
            .collect();

        self.state.lock().await.rules.insert(counselor_id, stored.clone());
        Ok(stored)
    }

    async fn rules_for_counselor(&self, counselor_id: Uuid) -> Result<Vec<RecurringAvailabilityRule>> {
        let state = self.state.lock().await;
        Ok(state.rules.get(&counselor_id).cloned().unwrap_or_default())
    }

    async fn counselors_with_rules(&self) -> Result<Vec<Uuid>> {
        let state = self.state.lock().await;
        let mut ids: Vec<Uuid> = state
            .rules
            .iter()
            .filter(|(_, rules)| rules.iter().any(|rule| rule.is_available))
            .map(|(id, _)| *id)
            .collect();
        ids.sort();
        Ok(ids)
    }
}

#[async_trait]
impl SlotRepository for MemoryStore {
    async fn rebuild_slots(
        &self,
        counselor_id: Uuid,
        planner: &SlotPlanner<'_>,
        now: DateTime<Utc>,
    ) -> Result<SlotRebuild> {
        let mut state = self.state.lock().await;
        let rules = state.rules.get(&counselor_id).cloned().unwrap_or_default();

        let before = state.slots.len();
        state
            .slots
            .retain(|_, slot| slot.counselor_id != counselor_id || slot.status == SlotStatus::Booked);
        let removed = (before - state.slots.len()) as u64;

        let retained: Vec<(DateTime<Utc>, DateTime<Utc>)> = state
            .slots
            .values()
            .filter(|slot| slot.counselor_id == counselor_id)
            .map(|slot| (slot.start_time, slot.end_time))
            .collect();

        let plan = planner.plan(counselor_id, &rules, &retained, now);
        let mut created = 0;
        for candidate in &plan.candidates {
            if state.insert_slot(candidate, now).is_some() {
                created += 1;
            }
        }

        Ok(SlotRebuild {
            removed,
            created,
            skipped: plan.skipped,
            failed: 0,
        })
    }

    async fn insert_slot(&self, candidate: &SlotCandidate, now: DateTime<Utc>) -> Result<Option<GeneratedSlot>> {
        Ok(self.state.lock().await.insert_slot(candidate, now))
    }

    async fn get_slot(&self, slot_id: Uuid) -> Result<Option<GeneratedSlot>> {
        Ok(self.state.lock().await.slots.get(&slot_id).cloned())
    }

    async fn slots_for_counselor(
        &self,
        counselor_id: Uuid,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> Result<Vec<GeneratedSlot>> {
        let state = self.state.lock().await;
        let mut slots: Vec<GeneratedSlot> = state
            .slots
            .values()
            .filter(|slot| slot.counselor_id == counselor_id)
            .filter(|slot| from.is_none_or(|from| slot.start_time >= from))
            .filter(|slot| to.is_none_or(|to| slot.start_time < to))
            .cloned()
            .collect();
        slots.sort_by_key(|slot| slot.start_time);
        Ok(slots)
    }

    async fn apply_day_action(
        &self,
        counselor_id: Uuid,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        action: SlotAction,
        now: DateTime<Utc>,
    ) -> Result<SlotMutation> {
        let mut state = self.state.lock().await;
        let ids: Vec<Uuid> = state
            .slots
            .values()
            .filter(|slot| slot.counselor_id == counselor_id && slot.start_time >= from && slot.start_time < to)
            .map(|slot| slot.id)
            .collect();

        if ids.is_empty() {
            return Ok(SlotMutation::NotFound);
        }

        let mut booked: Vec<Uuid> = ids
            .iter()
            .filter(|id| state.slots.get(*id).is_some_and(|slot| slot.status == SlotStatus::Booked))
            .copied()
            .collect();
        if !booked.is_empty() {
            booked.sort();
            return Ok(SlotMutation::BookedConflict { booked });
        }

        let mut affected = 0;
        for id in ids {
            if action == SlotAction::Delete {
                state.slots.remove(&id);
                affected += 1;
            } else if let Some(slot) = state.slots.get_mut(&id) {
                if apply_action(slot, action, now) {
                    affected += 1;
                }
            }
        }
        Ok(SlotMutation::Applied { affected })
    }

    async fn apply_slot_action(
        &self,
        counselor_id: Uuid,
        slot_id: Uuid,
        action: SlotAction,
        now: DateTime<Utc>,
    ) -> Result<SlotMutation> {
        let mut state = self.state.lock().await;
        let Some(slot) = state
            .slots
            .get_mut(&slot_id)
            .filter(|slot| slot.counselor_id == counselor_id)
        else {
            return Ok(SlotMutation::NotFound);
        };

        if slot.status == SlotStatus::Booked {
            return Ok(SlotMutation::BookedConflict { booked: vec![slot_id] });
        }
        if let Some(target) = action.target_status() {
            if slot.status != target && !slot.status.can_transition_to(target) {
                return Ok(SlotMutation::IllegalTransition {
                    from: slot.status,
                    to: target,
                });
            }
        }

        if action == SlotAction::Delete {
            state.slots.remove(&slot_id);
            return Ok(SlotMutation::Applied { affected: 1 });
        }

        let affected = u64::from(apply_action(slot, action, now));
        Ok(SlotMutation::Applied { affected })
    }

    async fn sweep_stale_slots(&self, before: DateTime<Utc>) -> Result<u64> {
        let mut state = self.state.lock().await;
        let count = state.slots.len();
        state.slots.retain(|_, slot| {
            slot.end_time >= before || slot.status == SlotStatus::Booked || slot.booking_id.is_some()
        });
        Ok((count - state.slots.len()) as u64)
    }
}

#[async_trait]
impl BookingRepository for MemoryStore {
    async fn create_confirmed_booking(&self, bundle: &ConfirmationBundle) -> Result<ConfirmationOutcome> {
        let booking = &bundle.booking;
        let mut state = self.state.lock().await;

        match state.slots.get_mut(&booking.slot_id) {
            Some(slot) if slot.status == SlotStatus::Available => {
                slot.status = SlotStatus::Booked;
                slot.booking_id = Some(booking.id);
                slot.client_id = Some(booking.client_id);
                slot.updated_at = booking.created_at;
            }
            Some(slot) => return Ok(ConfirmationOutcome::SlotUnavailable(Some(slot.status))),
            None => return Ok(ConfirmationOutcome::SlotUnavailable(None)),
        }

        state.bookings.insert(booking.id, booking.clone());
        state.sessions.insert(booking.id, bundle.session.clone());
        for task in &bundle.tasks {
            state.insert_task(task, booking.created_at);
        }
        Ok(ConfirmationOutcome::Created)
    }

    async fn get_booking(&self, booking_id: Uuid) -> Result<Option<Booking>> {
        Ok(self.state.lock().await.bookings.get(&booking_id).cloned())
    }

    async fn transition_booking(&self, transition: &BookingTransition) -> Result<TransitionOutcome> {
        let mut state = self.state.lock().await;
        let Some(booking) = state.bookings.get_mut(&transition.booking_id) else {
            return Ok(TransitionOutcome::NotFound);
        };

        if !transition.expected().contains(&booking.status)
            || !transition.expected_payout().contains(&booking.payout.status)
        {
            return Ok(TransitionOutcome::Rejected(booking.status));
        }

        booking.status = transition.to;
        booking.updated_at = transition.at;
        if let Some(payout) = transition.payout {
            booking.payout.status = payout;
        }
        match transition.to {
            BookingStatus::Completed => booking.completion.completed_at = Some(transition.at),
            BookingStatus::DisputeWindowOpen => booking.completion.dispute_window_open_at = Some(transition.at),
            BookingStatus::Disputed => booking.disputed_at = Some(transition.at),
            BookingStatus::Confirmed | BookingStatus::Cancelled => {}
        }
        Ok(TransitionOutcome::Applied(booking.clone()))
    }

    async fn session_for_booking(&self, booking_id: Uuid) -> Result<Option<Session>> {
        Ok(self.state.lock().await.sessions.get(&booking_id).cloned())
    }

    async fn end_session(&self, booking_id: Uuid) -> Result<Option<Session>> {
        let mut state = self.state.lock().await;
        match state.sessions.get_mut(&booking_id) {
            Some(session) if session.status.can_transition_to(SessionStatus::Ended) => {
                session.status = SessionStatus::Ended;
                Ok(Some(session.clone()))
            }
            _ => Ok(None),
        }
    }
}

#[async_trait]
impl DisputeRepository for MemoryStore {
    async fn dispute_for_booking(&self, booking_id: Uuid) -> Result<Option<Dispute>> {
        Ok(self.state.lock().await.disputes.get(&booking_id).cloned())
    }

    async fn open_dispute(&self, dispute: &Dispute, auto_complete_key: &str) -> Result<DisputeOutcome> {
        let mut state = self.state.lock().await;
        let Some((status, payout)) = state
            .bookings
            .get(&dispute.booking_id)
            .map(|booking| (booking.status, booking.payout.status))
        else {
            return Ok(DisputeOutcome::BookingNotFound);
        };

        if state.disputes.contains_key(&dispute.booking_id) || status == BookingStatus::Disputed {
            return Ok(DisputeOutcome::AlreadyDisputed);
        }
        if !BookingStatus::automated_sources(BookingStatus::Disputed).contains(&status)
            || !payout.can_transition_to(PayoutStatus::Held)
        {
            return Ok(DisputeOutcome::BookingNotDisputable(status));
        }

        let booking = match state.bookings.get_mut(&dispute.booking_id) {
            Some(booking) => {
                booking.status = BookingStatus::Disputed;
                booking.payout.status = PayoutStatus::Held;
                booking.disputed_at = Some(dispute.raised_at);
                booking.updated_at = dispute.raised_at;
                booking.clone()
            }
            None => return Ok(DisputeOutcome::BookingNotFound),
        };

        state.disputes.insert(dispute.booking_id, dispute.clone());
        let auto_complete_cancelled = state.cancel_task(auto_complete_key, dispute.raised_at);

        Ok(DisputeOutcome::Opened {
            booking,
            auto_complete_cancelled,
        })
    }
}

#[async_trait]
impl TaskStore for MemoryStore {
    async fn insert_task(&self, task: &NewTask, now: DateTime<Utc>) -> Result<bool> {
        Ok(self.state.lock().await.insert_task(task, now))
    }

    async fn upsert_recurring(&self, task: &NewTask, now: DateTime<Utc>) -> Result<bool> {
        let mut state = self.state.lock().await;
        match state.tasks.get_mut(&task.idempotency_key) {
            Some(existing) => {
                existing.payload = task.payload.clone();
                existing.retry = task.retry;
                existing.recurrence = task.recurrence;
                existing.finished_at = None;
                existing.updated_at = now;
                if existing.status != TaskStatus::Running {
                    existing.run_at = task.run_at;
                    existing.status = TaskStatus::Pending;
                    existing.attempts = 0;
                }
                Ok(false)
            }
            None => {
                state
                    .tasks
                    .insert(task.idempotency_key.clone(), scheduled_from(task, now));
                Ok(true)
            }
        }
    }

    async fn cancel_task(&self, idempotency_key: &str, now: DateTime<Utc>) -> Result<bool> {
        Ok(self.state.lock().await.cancel_task(idempotency_key, now))
    }

    async fn get_task(&self, idempotency_key: &str) -> Result<Option<ScheduledTask>> {
        Ok(self.state.lock().await.tasks.get(idempotency_key).cloned())
    }

    async fn claim_due(&self, now: DateTime<Utc>, limit: u32, lease: Duration) -> Result<Vec<ScheduledTask>> {
        let mut state = self.state.lock().await;
        let mut due: Vec<(DateTime<Utc>, String)> = state
            .tasks
            .values()
            .filter(|task| task.status.can_transition_to(TaskStatus::Running) && task.run_at <= now)
            .map(|task| (task.run_at, task.idempotency_key.clone()))
            .collect();
        due.sort();
        due.truncate(limit as usize);

        let mut claimed = Vec::with_capacity(due.len());
        for (_, key) in due {
            if let Some(task) = state.tasks.get_mut(&key) {
                task.status = TaskStatus::Running;
                task.attempts += 1;
                task.locked_until = Some(now + lease);
                task.updated_at = now;
                claimed.push(task.clone());
            }
        }
        Ok(claimed)
    }

    async fn settle_task(
        &self,
        task_id: Uuid,
        attempt: u32,
        settlement: TaskSettlement,
        error: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let mut state = self.state.lock().await;
        let Some(task) = state
            .tasks
            .values_mut()
            .find(|task| task.id == task_id && task.attempts == attempt && task.status == TaskStatus::Running)
        else {
            tracing::warn!(%task_id, attempt, ?settlement, "settled a task that was no longer running");
            return Ok(());
        };

        task.locked_until = None;
        task.updated_at = now;
        task.last_error = error;
        match settlement {
            TaskSettlement::Completed => {
                task.status = TaskStatus::Completed;
                task.finished_at = Some(now);
            }
            TaskSettlement::Failed => {
                task.status = TaskStatus::Failed;
                task.finished_at = Some(now);
            }
            TaskSettlement::Retry { next_run_at } => {
                task.status = TaskStatus::Pending;
                task.run_at = next_run_at;
            }
            TaskSettlement::Rearmed { next_run_at } => {
                task.status = TaskStatus::Pending;
                task.run_at = next_run_at;
                task.attempts = 0;
            }
        }
        Ok(())
    }

    async fn requeue_stalled(&self, now: DateTime<Utc>) -> Result<u64> {
        let mut state = self.state.lock().await;
        let mut count = 0;
        for task in state.tasks.values_mut() {
            let expired = task.status == TaskStatus::Running && task.locked_until.is_some_and(|until| until < now);
            if !expired {
                continue;
            }
            if task.attempts_exhausted() {
                task.status = TaskStatus::Failed;
                task.finished_at = Some(now);
            } else {
                task.status = TaskStatus::Pending;
            }
            task.locked_until = None;
            task.last_error.get_or_insert_with(|| "lease expired".to_string());
            task.updated_at = now;
            count += 1;
        }
        Ok(count)
    }

    async fn prune_finished(&self, retention: &RetentionPolicy, now: DateTime<Utc>) -> Result<u64> {
        let mut state = self.state.lock().await;
        let cutoff = now - retention.finished_ttl;
        let before = state.tasks.len();

        state.tasks.retain(|_, task| {
            let expired = matches!(task.status, TaskStatus::Completed | TaskStatus::Cancelled)
                && task.finished_at.is_some_and(|at| at < cutoff);
            !expired
        });

        let mut failed: Vec<(Option<DateTime<Utc>>, String)> = state
            .tasks
            .values()
            .filter(|task| task.status == TaskStatus::Failed)
            .map(|task| (task.finished_at, task.idempotency_key.clone()))
            .collect();
        // Newest first
        failed.sort_by(|a, b| b.0.cmp(&a.0));
        for (_, key) in failed.into_iter().skip(retention.keep_failed as usize) {
            state.tasks.remove(&key);
        }

        Ok((before - state.tasks.len()) as u64)
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use rust_decimal::Decimal;

    use super::*;

    fn at(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 10, hour, 0, 0).unwrap()
    }

    async fn store_with_slots(counselor_id: Uuid, hours: &[u32]) -> (MemoryStore, Vec<GeneratedSlot>) {
        let store = MemoryStore::new();
        let mut slots = Vec::new();
        for hour in hours {
            let candidate = SlotCandidate {
                counselor_id,
                start_time: at(*hour),
                end_time: at(*hour) + Duration::minutes(45),
                base_price: Decimal::new(500, 0),
                total_price: Decimal::new(575, 0),
            };
            slots.push(store.insert_slot(&candidate, at(8)).await.unwrap().unwrap());
        }
        (store, slots)
    }

    #[tokio::test]
    async fn test_cancelled_slot_cannot_be_reopened() {
        let counselor = Uuid::new_v4();
        let (store, slots) = store_with_slots(counselor, &[10, 11]).await;
        if let Some(slot) = store.state.lock().await.slots.get_mut(&slots[0].id) {
            slot.status = SlotStatus::Cancelled;
        }

        let outcome = store
            .apply_slot_action(counselor, slots[0].id, SlotAction::Available, at(9))
            .await
            .unwrap();

        assert_eq!(
            outcome,
            SlotMutation::IllegalTransition {
                from: SlotStatus::Cancelled,
                to: SlotStatus::Available,
            }
        );
        let stored = store.get_slot(slots[0].id).await.unwrap().unwrap();
        assert_eq!(stored.status, SlotStatus::Cancelled);
    }

    #[tokio::test]
    async fn test_day_action_skips_slots_without_an_edge() {
        let counselor = Uuid::new_v4();
        let (store, slots) = store_with_slots(counselor, &[10, 11]).await;
        if let Some(slot) = store.state.lock().await.slots.get_mut(&slots[0].id) {
            slot.status = SlotStatus::Cancelled;
        }

        let outcome = store
            .apply_day_action(counselor, at(0), at(23), SlotAction::Unavailable, at(9))
            .await
            .unwrap();

        assert_eq!(outcome, SlotMutation::Applied { affected: 1 });
        assert_eq!(
            store.get_slot(slots[0].id).await.unwrap().unwrap().status,
            SlotStatus::Cancelled
        );
        assert_eq!(
            store.get_slot(slots[1].id).await.unwrap().unwrap().status,
            SlotStatus::Unavailable
        );
    }
}
