use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use counselhub_core::models::booking::{Booking, BookingConfirmation, ConfirmBookingRequest};
use uuid::Uuid;

use crate::{
    ApiState,
    middleware::{auth::CurrentActor, error_handling::AppError},
};

/// `POST /api/bookings`
///
/// Called once the payment provider has captured the payment.
pub async fn confirm_booking(
    State(state): State<Arc<ApiState>>,
    CurrentActor(actor): CurrentActor,
    Json(request): Json<ConfirmBookingRequest>,
) -> Result<(StatusCode, Json<BookingConfirmation>), AppError> {
    let confirmation = state.engine.bookings.confirm_booking(&actor, request).await?;
    Ok((StatusCode::CREATED, Json(confirmation)))
}

/// `GET /api/bookings/:id`
pub async fn get_booking(
    State(state): State<Arc<ApiState>>,
    CurrentActor(actor): CurrentActor,
    Path(booking_id): Path<Uuid>,
) -> Result<Json<Booking>, AppError> {
    let booking = state.engine.bookings.get_booking(&actor, booking_id).await?;
    Ok(Json(booking))
}
