use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use counselhub_core::models::task::{
    NewTask, Recurrence, RetryPolicy, ScheduledTask, TaskStatus, TaskType,
};
use counselhub_core::{ManualClock, ServiceCalendar};
use counselhub_db::{MemoryStore, TaskStore};
use counselhub_db::mock::MockTaskStore;
use counselhub_scheduler::{HandlerRegistry, TaskError, TaskHandler, WorkerConfig, WorkerPool};
use pretty_assertions::assert_eq;
use serde_json::json;

/// Fails a fixed number of times, then succeeds
struct FlakyHandler {
    failures: u32,
    permanent: bool,
    calls: AtomicU32,
}

impl FlakyHandler {
    fn new(failures: u32) -> Arc<Self> {
        Arc::new(Self {
            failures,
            permanent: false,
            calls: AtomicU32::new(0),
        })
    }

    fn permanent() -> Arc<Self> {
        Arc::new(Self {
            failures: u32::MAX,
            permanent: true,
            calls: AtomicU32::new(0),
        })
    }
}

#[async_trait]
impl TaskHandler for FlakyHandler {
    async fn handle(&self, _task: &ScheduledTask) -> Result<(), TaskError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.failures {
            if self.permanent {
                return Err(TaskError::permanent("payload refers to nothing"));
            }
            return Err(TaskError::retryable("provider unavailable"));
        }
        Ok(())
    }
}

fn start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 10, 9, 0, 0).unwrap()
}

fn task(task_type: TaskType, key: &str, max_attempts: u32) -> NewTask {
    NewTask {
        task_type,
        idempotency_key: key.to_string(),
        payload: json!({}),
        run_at: start(),
        retry: RetryPolicy {
            max_attempts,
            base_delay_ms: 1_000,
            max_delay_ms: 10_000,
        },
        recurrence: None,
    }
}

fn pool(store: Arc<MemoryStore>, clock: Arc<ManualClock>, registry: HandlerRegistry) -> WorkerPool {
    let config = WorkerConfig {
        concurrency: 2,
        lock_timeout: Duration::seconds(60),
        ..WorkerConfig::default()
    };
    WorkerPool::new(store, registry, clock, ServiceCalendar::new(chrono_tz::UTC), config)
}

#[test_log::test(tokio::test)]
async fn test_successful_task_completes() {
    let store = Arc::new(MemoryStore::new());
    let clock = Arc::new(ManualClock::new(start()));
    let handler = FlakyHandler::new(0);
    let mut registry = HandlerRegistry::new();
    registry.register(TaskType::RoomTeardown, handler.clone());
    store.insert_task(&task(TaskType::RoomTeardown, "room-teardown-1", 5), start()).await.unwrap();

    let report = pool(store.clone(), clock, registry).run_once().await.unwrap();

    assert_eq!(report.claimed, 1);
    assert_eq!(report.completed, 1);
    assert_eq!(handler.calls.load(Ordering::SeqCst), 1);
    let stored = store.get_task("room-teardown-1").await.unwrap().unwrap();
    assert_eq!(stored.status, TaskStatus::Completed);
    assert!(stored.finished_at.is_some());
}

#[test_log::test(tokio::test)]
async fn test_retryable_failure_backs_off_then_succeeds() {
    let store = Arc::new(MemoryStore::new());
    let clock = Arc::new(ManualClock::new(start()));
    let handler = FlakyHandler::new(1);
    let mut registry = HandlerRegistry::new();
    registry.register(TaskType::RoomTeardown, handler.clone());
    store.insert_task(&task(TaskType::RoomTeardown, "room-teardown-1", 5), start()).await.unwrap();
    let pool = pool(store.clone(), clock.clone(), registry);

    let first = pool.run_once().await.unwrap();
    assert_eq!(first.retried, 1);

    let pending = store.get_task("room-teardown-1").await.unwrap().unwrap();
    assert_eq!(pending.status, TaskStatus::Pending);
    assert!(pending.run_at > start());
    assert!(pending.run_at <= start() + Duration::seconds(1));
    assert_eq!(pending.last_error.as_deref(), Some("provider unavailable"));

    // Not due yet at the same instant
    assert_eq!(pool.run_once().await.unwrap().claimed, 0);

    clock.advance(Duration::seconds(2));
    let second = pool.run_once().await.unwrap();
    assert_eq!(second.completed, 1);
    assert_eq!(handler.calls.load(Ordering::SeqCst), 2);
}

#[test_log::test(tokio::test)]
async fn test_retries_exhaust_into_failed() {
    let store = Arc::new(MemoryStore::new());
    let clock = Arc::new(ManualClock::new(start()));
    let mut registry = HandlerRegistry::new();
    registry.register(TaskType::RoomTeardown, FlakyHandler::new(u32::MAX));
    store.insert_task(&task(TaskType::RoomTeardown, "room-teardown-1", 3), start()).await.unwrap();
    let pool = pool(store.clone(), clock.clone(), registry);

    for _ in 0..3 {
        pool.run_once().await.unwrap();
        clock.advance(Duration::seconds(30));
    }

    let stored = store.get_task("room-teardown-1").await.unwrap().unwrap();
    assert_eq!(stored.status, TaskStatus::Failed);
    assert_eq!(stored.attempts, 3);
    assert_eq!(pool.run_once().await.unwrap().claimed, 0);
}

#[test_log::test(tokio::test)]
async fn test_permanent_failure_parks_immediately() {
    let store = Arc::new(MemoryStore::new());
    let clock = Arc::new(ManualClock::new(start()));
    let mut registry = HandlerRegistry::new();
    registry.register(TaskType::AutoCompleteBooking, FlakyHandler::permanent());
    store
        .insert_task(&task(TaskType::AutoCompleteBooking, "auto-complete-booking-1", 5), start())
        .await
        .unwrap();

    let report = pool(store.clone(), clock, registry).run_once().await.unwrap();

    assert_eq!(report.failed, 1);
    let stored = store.get_task("auto-complete-booking-1").await.unwrap().unwrap();
    assert_eq!(stored.status, TaskStatus::Failed);
    assert_eq!(stored.attempts, 1);
}

#[test_log::test(tokio::test)]
async fn test_unknown_task_type_is_parked() {
    let store = Arc::new(MemoryStore::new());
    let clock = Arc::new(ManualClock::new(start()));
    store
        .insert_task(&task(TaskType::SendNotification, "send-notification-1", 5), start())
        .await
        .unwrap();

    let report = pool(store.clone(), clock, HandlerRegistry::new()).run_once().await.unwrap();

    assert_eq!(report.failed, 1);
    let stored = store.get_task("send-notification-1").await.unwrap().unwrap();
    assert_eq!(stored.status, TaskStatus::Failed);
    assert!(stored.last_error.unwrap().contains("no handler registered"));
}

#[test_log::test(tokio::test)]
async fn test_recurring_task_rearms() {
    let store = Arc::new(MemoryStore::new());
    let clock = Arc::new(ManualClock::new(start()));
    let handler = FlakyHandler::new(0);
    let mut registry = HandlerRegistry::new();
    registry.register(TaskType::SweepStaleSlots, handler.clone());
    let mut sweep = task(TaskType::SweepStaleSlots, "sweep-stale-slots-daily", 5);
    sweep.recurrence = Some(Recurrence::Interval { seconds: 3600 });
    store.upsert_recurring(&sweep, start()).await.unwrap();
    let pool = pool(store.clone(), clock.clone(), registry);

    let report = pool.run_once().await.unwrap();

    assert_eq!(report.rearmed, 1);
    let stored = store.get_task("sweep-stale-slots-daily").await.unwrap().unwrap();
    assert_eq!(stored.status, TaskStatus::Pending);
    assert_eq!(stored.run_at, start() + Duration::hours(1));
    assert_eq!(stored.attempts, 0);

    clock.advance(Duration::hours(1));
    pool.run_once().await.unwrap();
    assert_eq!(handler.calls.load(Ordering::SeqCst), 2);
}

#[test_log::test(tokio::test)]
async fn test_expired_lease_is_requeued() {
    let store = Arc::new(MemoryStore::new());
    let clock = Arc::new(ManualClock::new(start()));
    let handler = FlakyHandler::new(0);
    let mut registry = HandlerRegistry::new();
    registry.register(TaskType::RoomTeardown, handler.clone());
    store.insert_task(&task(TaskType::RoomTeardown, "room-teardown-1", 5), start()).await.unwrap();

    // A worker that died after claiming
    store.claim_due(start(), 1, Duration::seconds(60)).await.unwrap();
    let pool = pool(store.clone(), clock.clone(), registry);
    assert_eq!(pool.run_once().await.unwrap().claimed, 0);

    clock.advance(Duration::seconds(61));
    let report = pool.run_once().await.unwrap();

    assert_eq!(report.requeued, 1);
    assert_eq!(report.completed, 1);
    assert_eq!(handler.calls.load(Ordering::SeqCst), 1);
}

#[test_log::test(tokio::test)]
async fn test_claim_respects_concurrency() {
    let store = Arc::new(MemoryStore::new());
    let clock = Arc::new(ManualClock::new(start()));
    let mut registry = HandlerRegistry::new();
    registry.register(TaskType::SendNotification, FlakyHandler::new(0));
    for n in 0..5 {
        store
            .insert_task(&task(TaskType::SendNotification, &format!("send-notification-{n}"), 5), start())
            .await
            .unwrap();
    }
    let pool = pool(store.clone(), clock, registry);

    assert_eq!(pool.run_once().await.unwrap().claimed, 2);
    assert_eq!(pool.run_once().await.unwrap().claimed, 2);
    assert_eq!(pool.run_once().await.unwrap().claimed, 1);
}

#[tokio::test]
async fn test_claim_failure_is_reported() {
    let mut store = MockTaskStore::new();
    store.expect_requeue_stalled().returning(|_| Ok(0));
    store
        .expect_claim_due()
        .returning(|_, _, _| Err(eyre::eyre!("database unavailable")));
    let clock = Arc::new(ManualClock::new(start()));
    let pool = WorkerPool::new(
        Arc::new(store),
        HandlerRegistry::new(),
        clock,
        ServiceCalendar::new(chrono_tz::UTC),
        WorkerConfig::default(),
    );

    let error = pool.run_once().await.unwrap_err();

    assert!(error.to_string().contains("database unavailable"));
}

#[tokio::test]
async fn test_run_stops_on_shutdown() {
    let store = Arc::new(MemoryStore::new());
    let clock = Arc::new(ManualClock::new(start()));
    let pool = pool(store, clock, HandlerRegistry::new());
    let (tx, rx) = tokio::sync::watch::channel(false);

    let running = tokio::spawn(async move { pool.run(rx).await });
    tx.send(true).unwrap();

    let stopped = tokio::time::timeout(std::time::Duration::from_secs(5), running).await;
    assert!(stopped.unwrap().unwrap().is_ok());
}
