//! # Availability Handlers
//!
//! Weekly rules, slot materialization, slot listing and counselor-driven
//! slot status changes. Every write goes through the counselor's own
//! authorization check in the engine.

use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, Query, State},
};
use chrono::{DateTime, NaiveDate, Utc};
use counselhub_core::models::availability::{AvailabilityResponse, ReplaceAvailabilityRequest};
use counselhub_core::models::slot::{GeneratedSlot, MaterializeResponse, SlotStatusRequest, SlotStatusResponse};
use serde::Deserialize;
use uuid::Uuid;

use crate::{
    ApiState,
    middleware::{auth::CurrentActor, error_handling::AppError},
};

/// Optional `[from, to)` bounds on slot start times
#[derive(Debug, Default, Deserialize)]
pub struct SlotQuery {
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

/// `GET /api/counselors/:id/availability`
pub async fn get_availability(
    State(state): State<Arc<ApiState>>,
    Path(counselor_id): Path<Uuid>,
) -> Result<Json<AvailabilityResponse>, AppError> {
    let availability = state.engine.availability.get_availability(counselor_id).await?;
    Ok(Json(availability))
}

/// `PUT /api/counselors/:id/availability`
///
/// Replaces the full weekly rule set and rebuilds the counselor's slots.
pub async fn replace_availability(
    State(state): State<Arc<ApiState>>,
    CurrentActor(actor): CurrentActor,
    Path(counselor_id): Path<Uuid>,
    Json(request): Json<ReplaceAvailabilityRequest>,
) -> Result<Json<AvailabilityResponse>, AppError> {
    let availability = state
        .engine
        .availability
        .replace_availability(&actor, counselor_id, request)
        .await?;
    Ok(Json(availability))
}

/// `POST /api/counselors/:id/slots/materialize`
pub async fn materialize_slots(
    State(state): State<Arc<ApiState>>,
    CurrentActor(actor): CurrentActor,
    Path(counselor_id): Path<Uuid>,
) -> Result<Json<MaterializeResponse>, AppError> {
    let total_slots_generated = state.engine.availability.materialize_for(&actor, counselor_id).await?;
    Ok(Json(MaterializeResponse { total_slots_generated }))
}

/// `GET /api/counselors/:id/slots?from&to`
pub async fn list_slots(
    State(state): State<Arc<ApiState>>,
    Path(counselor_id): Path<Uuid>,
    Query(query): Query<SlotQuery>,
) -> Result<Json<Vec<GeneratedSlot>>, AppError> {
    let slots = state
        .engine
        .availability
        .list_slots(counselor_id, query.from, query.to)
        .await?;
    Ok(Json(slots))
}

/// `PUT /api/counselors/:id/days/:date/status`
pub async fn set_day_status(
    State(state): State<Arc<ApiState>>,
    CurrentActor(actor): CurrentActor,
    Path((counselor_id, date)): Path<(Uuid, NaiveDate)>,
    Json(request): Json<SlotStatusRequest>,
) -> Result<Json<SlotStatusResponse>, AppError> {
    let response = state
        .engine
        .slots
        .set_day_status(&actor, counselor_id, date, request.status)
        .await?;
    Ok(Json(response))
}

/// `PUT /api/counselors/:id/slots/:slot_id/status`
pub async fn set_slot_status(
    State(state): State<Arc<ApiState>>,
    CurrentActor(actor): CurrentActor,
    Path((counselor_id, slot_id)): Path<(Uuid, Uuid)>,
    Json(request): Json<SlotStatusRequest>,
) -> Result<Json<SlotStatusResponse>, AppError> {
    let response = state
        .engine
        .slots
        .set_slot_status(&actor, counselor_id, slot_id, request.status)
        .await?;
    Ok(Json(response))
}
