mod common;

use chrono::Duration;
use common::{Harness, MockEvidence, working_evidence, working_rooms};
use counselhub_core::CounselError;
use counselhub_core::models::booking::{BookingStatus, CompletionOutcome, PayoutStatus};
use counselhub_core::models::dispute::{ActorRole, DisputeStatus, EvidenceItem, IssueType, RequestMetadata};
use counselhub_core::models::task::{TaskStatus, TaskType};
use counselhub_db::{BookingRepository, DisputeRepository, TaskStore};
use counselhub_engine::providers::{EvidenceUpload, ProviderError};
use counselhub_engine::{Actor, RaiseDispute};
use pretty_assertions::assert_eq;
use rstest::rstest;
use tokio_test::assert_ok;
use uuid::Uuid;

fn upload(name: &str) -> EvidenceUpload {
    EvidenceUpload {
        file_name: name.to_string(),
        content_type: "image/png".to_string(),
        bytes: vec![0x89, 0x50, 0x4e, 0x47],
    }
}

fn dispute(booking_id: Uuid, evidence: Vec<EvidenceUpload>) -> RaiseDispute {
    RaiseDispute {
        booking_id,
        issue_type: IssueType::CounselorNoShow,
        description: "The counselor never joined the session room.".to_string(),
        evidence,
        metadata: RequestMetadata {
            ip_address: Some("203.0.113.7".to_string()),
            user_agent: Some("integration-test".to_string()),
        },
    }
}

#[test_log::test(tokio::test)]
async fn test_dispute_holds_payout_and_cancels_auto_complete() {
    let harness = Harness::new(working_rooms(), working_evidence());
    let (booking_id, slot) = harness.booked().await;
    harness.clock.set(slot.end_time + Duration::hours(1));

    let receipt = harness
        .engine
        .disputes
        .raise_dispute(&harness.client, dispute(booking_id, vec![upload("screen.png")]))
        .await
        .unwrap();

    assert_eq!(receipt.dispute_status, DisputeStatus::UnderReview);
    assert_eq!(receipt.disputed_at, slot.end_time + Duration::hours(1));

    let booking = harness.store.get_booking(booking_id).await.unwrap().unwrap();
    assert_eq!(booking.status, BookingStatus::Disputed);
    assert_eq!(booking.payout.status, PayoutStatus::Held);

    let stored = harness.store.dispute_for_booking(booking_id).await.unwrap().unwrap();
    assert_eq!(stored.evidence.len(), 1);
    assert_eq!(stored.activity.len(), 1);
    assert_eq!(stored.activity[0].network.ip_address.as_deref(), Some("203.0.113.7"));

    let auto_complete = harness
        .store
        .get_task(&TaskType::AutoCompleteBooking.key_for(booking_id))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(auto_complete.status, TaskStatus::Cancelled);

    let notice = harness
        .store
        .get_task(&TaskType::SendNotification.key_for(format!("dispute_raised-{}", booking_id)))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(notice.payload["recipientId"], serde_json::json!(harness.counselor.id));
}

#[rstest]
#[case(-1, true)]
#[case(0, false)]
#[case(1, false)]
#[tokio::test]
async fn test_dispute_window_boundary(#[case] offset_seconds: i64, #[case] accepted: bool) {
    let harness = Harness::new(working_rooms(), working_evidence());
    let (booking_id, _) = harness.booked().await;
    let booking = harness.store.get_booking(booking_id).await.unwrap().unwrap();
    harness
        .clock
        .set(booking.completion.auto_complete_at + Duration::seconds(offset_seconds));

    let result = harness
        .engine
        .disputes
        .raise_dispute(&harness.client, dispute(booking_id, vec![]))
        .await;

    if accepted {
        assert!(result.is_ok());
    } else {
        assert!(matches!(result, Err(CounselError::DisputeWindowClosed(_))));
    }
}

#[tokio::test]
async fn test_second_dispute_conflicts() {
    let harness = Harness::new(working_rooms(), working_evidence());
    let (booking_id, _) = harness.booked().await;
    harness
        .engine
        .disputes
        .raise_dispute(&harness.client, dispute(booking_id, vec![]))
        .await
        .unwrap();

    let result = harness
        .engine
        .disputes
        .raise_dispute(&harness.client, dispute(booking_id, vec![]))
        .await;

    assert!(matches!(result, Err(CounselError::Conflict(_))));
}

#[tokio::test]
async fn test_only_the_client_may_dispute() {
    let harness = Harness::new(working_rooms(), working_evidence());
    let (booking_id, _) = harness.booked().await;
    let stranger = Actor::new(Uuid::new_v4(), ActorRole::Client);

    let result = harness
        .engine
        .disputes
        .raise_dispute(&stranger, dispute(booking_id, vec![]))
        .await;

    assert!(matches!(result, Err(CounselError::Authorization(_))));
}

#[tokio::test]
async fn test_unknown_booking_is_not_found() {
    let harness = Harness::new(working_rooms(), working_evidence());

    let result = harness
        .engine
        .disputes
        .raise_dispute(&harness.client, dispute(Uuid::new_v4(), vec![]))
        .await;

    assert!(matches!(result, Err(CounselError::NotFound(_))));
}

#[rstest]
#[case("too short", 0)]
#[case("The counselor never joined the session room.", 6)]
#[tokio::test]
async fn test_invalid_dispute_is_rejected_before_upload(#[case] description: &str, #[case] files: usize) {
    let mut evidence = MockEvidence::new();
    evidence.expect_store().never();
    let harness = Harness::new(working_rooms(), evidence);
    let (booking_id, _) = harness.booked().await;
    let mut request = dispute(booking_id, (0..files).map(|i| upload(&format!("{}.png", i))).collect());
    request.description = description.to_string();

    let result = harness.engine.disputes.raise_dispute(&harness.client, request).await;

    assert!(matches!(result, Err(CounselError::Validation(_))));
    assert!(harness.store.dispute_for_booking(booking_id).await.unwrap().is_none());
}

#[tokio::test]
async fn test_failed_upload_leaves_booking_untouched() {
    let mut evidence = MockEvidence::new();
    evidence
        .expect_store()
        .times(1)
        .returning(|_, _| Err(ProviderError::Unavailable("disk full".to_string())));
    let harness = Harness::new(working_rooms(), evidence);
    let (booking_id, _) = harness.booked().await;

    let result = harness
        .engine
        .disputes
        .raise_dispute(&harness.client, dispute(booking_id, vec![upload("a.png"), upload("b.png")]))
        .await;

    assert!(matches!(result, Err(CounselError::ExternalProvider(_))));
    let booking = harness.store.get_booking(booking_id).await.unwrap().unwrap();
    assert_eq!(booking.status, BookingStatus::Confirmed);
    assert!(harness.store.dispute_for_booking(booking_id).await.unwrap().is_none());
}

#[tokio::test]
async fn test_auto_complete_after_dispute_is_skipped() {
    let harness = Harness::new(working_rooms(), working_evidence());
    let (booking_id, _) = harness.booked().await;
    harness
        .engine
        .disputes
        .raise_dispute(&harness.client, dispute(booking_id, vec![]))
        .await
        .unwrap();

    let outcome = assert_ok!(harness.engine.bookings.complete_booking(booking_id).await);

    assert_eq!(outcome, CompletionOutcome::Skipped(BookingStatus::Disputed));
    let booking = harness.store.get_booking(booking_id).await.unwrap().unwrap();
    assert_eq!(booking.payout.status, PayoutStatus::Held);
    assert_eq!(booking.completion.completed_at, None);
}

#[tokio::test]
async fn test_dispute_after_completion_conflicts() {
    let harness = Harness::new(working_rooms(), working_evidence());
    let (booking_id, _) = harness.booked().await;
    harness.engine.bookings.complete_booking(booking_id).await.unwrap();

    let result = harness
        .engine
        .disputes
        .raise_dispute(&harness.client, dispute(booking_id, vec![]))
        .await;

    assert!(matches!(result, Err(CounselError::Conflict(_))));
    let booking = harness.store.get_booking(booking_id).await.unwrap().unwrap();
    assert_eq!(booking.status, BookingStatus::Completed);
    assert_eq!(booking.payout.status, PayoutStatus::Released);
}

fn stored(booking_id: Uuid, upload: &EvidenceUpload) -> EvidenceItem {
    EvidenceItem {
        url: format!("https://files.example/{}/{}", booking_id, upload.file_name),
        file_name: upload.file_name.clone(),
        content_type: upload.content_type.clone(),
    }
}

#[tokio::test]
async fn test_partial_upload_discards_stored_files() {
    let mut evidence = MockEvidence::new();
    evidence
        .expect_store()
        .withf(|_, upload| upload.file_name == "a.png")
        .times(1)
        .returning(|booking_id, upload| Ok(stored(booking_id, upload)));
    evidence
        .expect_store()
        .withf(|_, upload| upload.file_name == "b.png")
        .times(1)
        .returning(|_, _| Err(ProviderError::Unavailable("disk full".to_string())));
    evidence
        .expect_discard()
        .withf(|item| item.file_name == "a.png")
        .times(1)
        .returning(|_| Ok(()));
    let harness = Harness::new(working_rooms(), evidence);
    let (booking_id, _) = harness.booked().await;

    let result = harness
        .engine
        .disputes
        .raise_dispute(&harness.client, dispute(booking_id, vec![upload("a.png"), upload("b.png")]))
        .await;

    assert!(matches!(result, Err(CounselError::ExternalProvider(_))));
    assert!(harness.store.dispute_for_booking(booking_id).await.unwrap().is_none());
}

#[tokio::test]
async fn test_refused_dispute_discards_uploaded_evidence() {
    let mut evidence = MockEvidence::new();
    evidence
        .expect_store()
        .times(2)
        .returning(|booking_id, upload| Ok(stored(booking_id, upload)));
    evidence.expect_discard().times(2).returning(|_| Ok(()));
    let harness = Harness::new(working_rooms(), evidence);
    let (booking_id, _) = harness.booked().await;
    harness.engine.bookings.complete_booking(booking_id).await.unwrap();

    let result = harness
        .engine
        .disputes
        .raise_dispute(&harness.client, dispute(booking_id, vec![upload("a.png"), upload("b.png")]))
        .await;

    assert!(matches!(result, Err(CounselError::Conflict(_))));
}

#[tokio::test]
async fn test_failed_discard_keeps_the_original_error() {
    let mut evidence = MockEvidence::new();
    evidence
        .expect_store()
        .returning(|booking_id, upload| Ok(stored(booking_id, upload)));
    evidence
        .expect_discard()
        .times(1)
        .returning(|_| Err(ProviderError::Unavailable("bucket offline".to_string())));
    let harness = Harness::new(working_rooms(), evidence);
    let (booking_id, _) = harness.booked().await;
    harness.engine.bookings.complete_booking(booking_id).await.unwrap();

    let result = harness
        .engine
        .disputes
        .raise_dispute(&harness.client, dispute(booking_id, vec![upload("a.png")]))
        .await;

    assert!(matches!(result, Err(CounselError::Conflict(_))));
}
