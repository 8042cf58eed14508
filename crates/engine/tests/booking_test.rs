mod common;

use std::sync::Arc;

use chrono::Duration;
use common::{Harness, MockRooms, hm, pay_for, working_evidence, working_rooms};
use counselhub_core::CounselError;
use counselhub_core::models::booking::{BookingStatus, CompletionOutcome, PayoutStatus};
use counselhub_core::models::dispute::ActorRole;
use counselhub_core::models::session::SessionStatus;
use counselhub_core::models::slot::{SlotAction, SlotStatus};
use counselhub_core::models::task::{TaskStatus, TaskType};
use counselhub_db::{BookingRepository, MemoryStore, SlotRepository};
use counselhub_engine::Actor;
use counselhub_engine::providers::{MeetingRoom, ProviderError};
use pretty_assertions::assert_eq;
use rust_decimal::Decimal;
use uuid::Uuid;

#[test_log::test(tokio::test)]
async fn test_confirmation_writes_booking_session_and_tasks() {
    let harness = Harness::new(working_rooms(), working_evidence());
    let (booking_id, slot) = harness.booked().await;

    let booking = harness.store.get_booking(booking_id).await.unwrap().unwrap();
    assert_eq!(booking.status, BookingStatus::Confirmed);
    assert_eq!(booking.client_id, harness.client.id);
    assert_eq!(booking.amount, Decimal::new(575, 0));
    assert_eq!(booking.payout.amount, Decimal::new(48875, 2));
    assert_eq!(booking.payout.status, PayoutStatus::Pending);
    assert_eq!(booking.completion.auto_complete_at, slot.end_time + Duration::hours(24));
    assert_eq!(booking.payout.release_on, booking.completion.auto_complete_at);

    let session = harness.store.session_for_booking(booking_id).await.unwrap().unwrap();
    assert_eq!(session.status, SessionStatus::Scheduled);
    assert_eq!(session.room_id, format!("room-{}", booking_id));
    assert_eq!(session.teardown_task_key, TaskType::RoomTeardown.key_for(booking_id));

    let slot = harness.store.get_slot(slot.id).await.unwrap().unwrap();
    assert_eq!(slot.status, SlotStatus::Booked);
    assert_eq!(slot.client_id, Some(harness.client.id));

    let mut tasks = harness.store.tasks().await;
    tasks.sort_by_key(|task| task.run_at);
    assert_eq!(tasks.len(), 4);
    assert!(tasks.iter().all(|task| task.status == TaskStatus::Pending));
    let teardown = tasks.iter().find(|t| t.task_type == TaskType::RoomTeardown).unwrap();
    assert_eq!(teardown.run_at, slot.end_time);
    let complete = tasks.iter().find(|t| t.task_type == TaskType::AutoCompleteBooking).unwrap();
    assert_eq!(complete.run_at, booking.completion.auto_complete_at);
    let notifications = tasks.iter().filter(|t| t.task_type == TaskType::SendNotification).count();
    assert_eq!(notifications, 2);
}

#[tokio::test]
async fn test_wrong_amount_is_rejected() {
    let harness = Harness::new(working_rooms(), working_evidence());
    harness.monday(&[(hm(9, 0), hm(10, 0))]).await;
    let slot = harness.slots().await.remove(0);
    let mut request = pay_for(&slot);
    request.amount = Decimal::new(500, 0);

    let result = harness.engine.bookings.confirm_booking(&harness.client, request).await;

    assert!(matches!(result, Err(CounselError::Validation(_))));
    assert!(harness.store.tasks().await.is_empty());
}

#[tokio::test]
async fn test_counselor_cannot_book() {
    let harness = Harness::new(working_rooms(), working_evidence());
    harness.monday(&[(hm(9, 0), hm(10, 0))]).await;
    let slot = harness.slots().await.remove(0);

    let result = harness
        .engine
        .bookings
        .confirm_booking(&harness.counselor, pay_for(&slot))
        .await;

    assert!(matches!(result, Err(CounselError::Authorization(_))));
}

#[tokio::test]
async fn test_second_confirmation_conflicts() {
    let harness = Harness::new(working_rooms(), working_evidence());
    let (_, slot) = harness.booked().await;
    let other = Actor::new(Uuid::new_v4(), ActorRole::Client);

    let result = harness.engine.bookings.confirm_booking(&other, pay_for(&slot)).await;

    assert!(matches!(result, Err(CounselError::Conflict(_))));
    assert_eq!(harness.store.tasks().await.len(), 4);
}

#[tokio::test]
async fn test_started_slot_cannot_be_booked() {
    let harness = Harness::new(working_rooms(), working_evidence());
    harness.monday(&[(hm(9, 0), hm(10, 0))]).await;
    let slot = harness.slots().await.remove(0);
    harness.clock.set(slot.start_time);

    let result = harness.engine.bookings.confirm_booking(&harness.client, pay_for(&slot)).await;

    assert!(matches!(result, Err(CounselError::Validation(_))));
}

#[tokio::test]
async fn test_room_failure_writes_nothing() {
    let mut rooms = MockRooms::new();
    rooms
        .expect_create_room()
        .times(1)
        .returning(|_, _, _| Err(ProviderError::Unavailable("connection refused".to_string())));
    rooms.expect_delete_room().never();
    let harness = Harness::new(rooms, working_evidence());
    harness.monday(&[(hm(9, 0), hm(10, 0))]).await;
    let slot = harness.slots().await.remove(0);

    let result = harness.engine.bookings.confirm_booking(&harness.client, pay_for(&slot)).await;

    assert!(matches!(result, Err(CounselError::ExternalProvider(_))));
    let slot = harness.store.get_slot(slot.id).await.unwrap().unwrap();
    assert_eq!(slot.status, SlotStatus::Available);
    assert_eq!(slot.booking_id, None);
    assert!(harness.store.tasks().await.is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_slot_taken_during_room_creation_releases_room() {
    // The counselor closes the slot while the room is being provisioned
    let store_slot: Arc<std::sync::Mutex<Option<(Arc<MemoryStore>, Uuid, Uuid)>>> =
        Arc::new(std::sync::Mutex::new(None));
    let interference = store_slot.clone();

    let mut rooms = MockRooms::new();
    rooms.expect_create_room().times(1).returning(move |booking_id, _, _| {
        if let Some((store, counselor_id, slot_id)) = interference.lock().unwrap().clone() {
            tokio::task::block_in_place(|| {
                tokio::runtime::Handle::current()
                    .block_on(store.apply_slot_action(
                        counselor_id,
                        slot_id,
                        SlotAction::Unavailable,
                        chrono::Utc::now(),
                    ))
                    .unwrap();
            });
        }
        Ok(MeetingRoom {
            room_id: format!("room-{}", booking_id),
            room_url: "https://meet.example/r".to_string(),
        })
    });
    rooms
        .expect_delete_room()
        .withf(|room_id| room_id.starts_with("room-"))
        .times(1)
        .returning(|_| Ok(()));

    let harness = Harness::new(rooms, working_evidence());
    harness.monday(&[(hm(9, 0), hm(10, 0))]).await;
    let slot = harness.slots().await.remove(0);
    *store_slot.lock().unwrap() = Some((harness.store.clone(), harness.counselor.id, slot.id));

    let result = harness.engine.bookings.confirm_booking(&harness.client, pay_for(&slot)).await;

    assert!(matches!(result, Err(CounselError::Conflict(_))));
    let slot = harness.store.get_slot(slot.id).await.unwrap().unwrap();
    assert_eq!(slot.status, SlotStatus::Unavailable);
    assert!(harness.store.tasks().await.is_empty());
}

#[tokio::test]
async fn test_close_session_opens_dispute_window_once() {
    let harness = Harness::new(working_rooms(), working_evidence());
    let (booking_id, slot) = harness.booked().await;
    harness.clock.set(slot.end_time);
    let room_id = format!("room-{}", booking_id);

    let first = harness.engine.bookings.close_session(booking_id, &room_id).await.unwrap();
    let second = harness.engine.bookings.close_session(booking_id, &room_id).await.unwrap();

    assert_eq!(first, BookingStatus::DisputeWindowOpen);
    assert_eq!(second, BookingStatus::DisputeWindowOpen);
    let booking = harness.store.get_booking(booking_id).await.unwrap().unwrap();
    assert_eq!(booking.completion.dispute_window_open_at, Some(slot.end_time));
    let session = harness.store.session_for_booking(booking_id).await.unwrap().unwrap();
    assert_eq!(session.status, SessionStatus::Ended);
}

#[tokio::test]
async fn test_complete_booking_releases_payout() {
    let harness = Harness::new(working_rooms(), working_evidence());
    let (booking_id, _) = harness.booked().await;

    let first = harness.engine.bookings.complete_booking(booking_id).await.unwrap();
    let second = harness.engine.bookings.complete_booking(booking_id).await.unwrap();

    assert_eq!(first, CompletionOutcome::Completed);
    assert_eq!(second, CompletionOutcome::Skipped(BookingStatus::Completed));
    let booking = harness.store.get_booking(booking_id).await.unwrap().unwrap();
    assert_eq!(booking.payout.status, PayoutStatus::Released);
    assert!(booking.completion.completed_at.is_some());
}

#[tokio::test]
async fn test_booking_is_private_to_its_parties() {
    let harness = Harness::new(working_rooms(), working_evidence());
    let (booking_id, _) = harness.booked().await;
    let stranger = Actor::new(Uuid::new_v4(), ActorRole::Client);
    let admin = Actor::new(Uuid::new_v4(), ActorRole::Admin);

    assert!(harness.engine.bookings.get_booking(&harness.client, booking_id).await.is_ok());
    assert!(harness.engine.bookings.get_booking(&harness.counselor, booking_id).await.is_ok());
    assert!(harness.engine.bookings.get_booking(&admin, booking_id).await.is_ok());
    assert!(matches!(
        harness.engine.bookings.get_booking(&stranger, booking_id).await,
        Err(CounselError::Authorization(_))
    ));
}
