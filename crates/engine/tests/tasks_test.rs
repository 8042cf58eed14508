mod common;

use std::sync::Arc;

use chrono::Duration;
use common::{Harness, hm, ist, working_evidence, working_rooms};
use counselhub_core::models::booking::{BookingStatus, PayoutStatus};
use counselhub_core::models::session::SessionStatus;
use counselhub_core::models::task::{TaskStatus, TaskType};
use counselhub_db::{BookingRepository, MemoryStore, TaskStore};
use counselhub_engine::providers::NotificationKind;
use counselhub_engine::tasks::{MATERIALIZE_DAILY_KEY, SWEEP_DAILY_KEY, register_maintenance};
use counselhub_scheduler::{WorkerConfig, WorkerPool};
use pretty_assertions::assert_eq;

fn worker(harness: &Harness) -> WorkerPool {
    let store: Arc<MemoryStore> = harness.store.clone();
    WorkerPool::new(
        store,
        harness.engine.task_registry(),
        harness.clock.clone(),
        common::kolkata(),
        WorkerConfig {
            concurrency: 8,
            ..WorkerConfig::default()
        },
    )
}

#[test_log::test(tokio::test)]
async fn test_outbox_notifications_are_delivered() {
    let harness = Harness::new(working_rooms(), working_evidence());
    let (booking_id, _) = harness.booked().await;

    let report = worker(&harness).run_once().await.unwrap();

    assert_eq!(report.claimed, 2);
    assert_eq!(report.completed, 2);
    let delivered = harness.notifier.delivered.lock().unwrap().clone();
    let mut kinds: Vec<_> = delivered.iter().map(|n| n.kind.as_str()).collect();
    kinds.sort();
    assert_eq!(kinds, vec![NotificationKind::BookingConfirmed.as_str(), NotificationKind::Invoice.as_str()]);
    assert!(delivered.iter().all(|n| n.booking_id == booking_id && n.recipient_id == harness.client.id));
}

#[tokio::test]
async fn test_lifecycle_runs_to_completion() {
    let harness = Harness::new(working_rooms(), working_evidence());
    let (booking_id, slot) = harness.booked().await;
    let pool = worker(&harness);
    pool.run_once().await.unwrap();

    harness.clock.set(slot.end_time + Duration::seconds(1));
    let report = pool.run_once().await.unwrap();
    assert_eq!(report.completed, 1);
    let booking = harness.store.get_booking(booking_id).await.unwrap().unwrap();
    assert_eq!(booking.status, BookingStatus::DisputeWindowOpen);
    let session = harness.store.session_for_booking(booking_id).await.unwrap().unwrap();
    assert_eq!(session.status, SessionStatus::Ended);

    harness.clock.set(booking.completion.auto_complete_at + Duration::seconds(1));
    let report = pool.run_once().await.unwrap();
    assert_eq!(report.completed, 1);
    let booking = harness.store.get_booking(booking_id).await.unwrap().unwrap();
    assert_eq!(booking.status, BookingStatus::Completed);
    assert_eq!(booking.payout.status, PayoutStatus::Released);
}

#[tokio::test]
async fn test_maintenance_registration_is_idempotent() {
    let harness = Harness::new(working_rooms(), working_evidence());

    register_maintenance(&harness.engine.scheduler).await.unwrap();
    register_maintenance(&harness.engine.scheduler).await.unwrap();

    let tasks = harness.store.tasks().await;
    assert_eq!(tasks.len(), 2);
    let materialize = harness.store.get_task(MATERIALIZE_DAILY_KEY).await.unwrap().unwrap();
    assert_eq!(materialize.task_type, TaskType::MaterializeSlots);
    assert_eq!(materialize.run_at, ist(2026, 3, 2, 0, 5));
    let sweep = harness.store.get_task(SWEEP_DAILY_KEY).await.unwrap().unwrap();
    assert_eq!(sweep.run_at, ist(2026, 3, 2, 0, 15));
}

#[tokio::test]
async fn test_daily_materialization_rolls_the_horizon() {
    let harness = Harness::new(working_rooms(), working_evidence());
    harness.monday(&[(hm(9, 0), hm(10, 0))]).await;
    register_maintenance(&harness.engine.scheduler).await.unwrap();
    let pool = worker(&harness);

    // A week later the first Monday has passed and the next one is in range
    harness.clock.set(ist(2026, 3, 8, 0, 5));
    let report = pool.run_once().await.unwrap();

    assert_eq!(report.rearmed, 2);
    let starts: Vec<_> = harness.slots().await.iter().map(|s| s.start_time).collect();
    assert_eq!(starts, vec![ist(2026, 3, 9, 9, 0)]);
    let materialize = harness.store.get_task(MATERIALIZE_DAILY_KEY).await.unwrap().unwrap();
    assert_eq!(materialize.status, TaskStatus::Pending);
    assert_eq!(materialize.run_at, ist(2026, 3, 9, 0, 5));
}
