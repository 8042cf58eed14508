
use axum::http::StatusCode;
use axum_test::multipart::{MultipartForm, Part};
use chrono::Duration;
use counselhub_core::models::booking::{Booking, BookingStatus};
use counselhub_db::BookingRepository;
use pretty_assertions::assert_eq;
use serde_json::{Value, json};
use test_utils::{FakeRooms, TestContext, as_actor};
use uuid::Uuid;

fn dispute_form() -> MultipartForm {
    MultipartForm::new()
        .add_text("issueType", "technical_issue")
        .add_text("description", "Video froze for most of the session and never recovered.")
        .add_part(
            "evidence",
            Part::bytes(vec![0x89, 0x50, 0x4e, 0x47])
                .file_name("freeze.png")
                .mime_type("image/png"),
        )
}

#[test_log::test(tokio::test)]
async fn test_booking_flow() {
    let ctx = TestContext::new();
    let booking_id = ctx.book_monday().await;

    let response = as_actor(
        ctx.server.get(&format!("/api/bookings/{}", booking_id)),
        ctx.client_id,
        "client",
    )
    .await;

    response.assert_status_ok();
    let booking: Booking = response.json();
    assert_eq!(booking.status, BookingStatus::Confirmed);
    assert_eq!(booking.client_id, ctx.client_id);
}

#[tokio::test]
async fn test_double_booking_conflicts() {
    let ctx = TestContext::new();
    ctx.book_monday().await;
    let slots: Vec<Value> = ctx
        .server
        .get(&format!("/api/counselors/{}/slots", ctx.counselor_id))
        .await
        .json();

    let response = as_actor(ctx.server.post("/api/bookings"), Uuid::new_v4(), "client")
        .json(&json!({ "slotId": slots[0]["id"], "paymentId": "pay_456", "amount": "575" }))
        .await;

    response.assert_status(StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_unknown_slot_is_not_found() {
    let ctx = TestContext::new();

    let response = as_actor(ctx.server.post("/api/bookings"), ctx.client_id, "client")
        .json(&json!({ "slotId": Uuid::new_v4(), "paymentId": "pay_1", "amount": "575" }))
        .await;

    response.assert_status(StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_room_provider_failure_is_bad_gateway() {
    let ctx = TestContext::with_rooms(FakeRooms { fail: true });
    let slot_id = ctx.publish_monday().await;

    let response = as_actor(ctx.server.post("/api/bookings"), ctx.client_id, "client")
        .json(&json!({ "slotId": slot_id, "paymentId": "pay_1", "amount": "575" }))
        .await;

    response.assert_status(StatusCode::BAD_GATEWAY);
}

#[tokio::test]
async fn test_stranger_cannot_read_booking() {
    let ctx = TestContext::new();
    let booking_id = ctx.book_monday().await;

    let response = as_actor(
        ctx.server.get(&format!("/api/bookings/{}", booking_id)),
        Uuid::new_v4(),
        "client",
    )
    .await;

    response.assert_status(StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_dispute_is_accepted_once() {
    let ctx = TestContext::new();
    let booking_id = ctx.book_monday().await;
    let path = format!("/api/bookings/{}/disputes", booking_id);

    let first = as_actor(ctx.server.post(&path), ctx.client_id, "client")
        .multipart(dispute_form())
        .await;
    let second = as_actor(ctx.server.post(&path), ctx.client_id, "client")
        .multipart(dispute_form())
        .await;

    first.assert_status(StatusCode::CREATED);
    let receipt: Value = first.json();
    assert_eq!(receipt["disputeStatus"], "under_review");
    second.assert_status(StatusCode::CONFLICT);

    let booking = ctx.store.get_booking(booking_id).await.unwrap().unwrap();
    assert_eq!(booking.status, BookingStatus::Disputed);
}

#[tokio::test]
async fn test_late_dispute_is_unprocessable() {
    let ctx = TestContext::new();
    let booking_id = ctx.book_monday().await;
    let booking = ctx.store.get_booking(booking_id).await.unwrap().unwrap();
    ctx.clock.set(booking.completion.auto_complete_at + Duration::seconds(1));

    let response = as_actor(
        ctx.server.post(&format!("/api/bookings/{}/disputes", booking_id)),
        ctx.client_id,
        "client",
    )
    .multipart(dispute_form())
    .await;

    response.assert_status(StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn test_dispute_without_issue_type_is_bad_request() {
    let ctx = TestContext::new();
    let booking_id = ctx.book_monday().await;
    let form = MultipartForm::new().add_text("description", "Video froze for most of the session.");

    let response = as_actor(
        ctx.server.post(&format!("/api/bookings/{}/disputes", booking_id)),
        ctx.client_id,
        "client",
    )
    .multipart(form)
    .await;

    response.assert_status(StatusCode::BAD_REQUEST);
}
