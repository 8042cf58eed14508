use axum::{
    Router,
    routing::{get, post, put},
};
use std::sync::Arc;

use crate::{ApiState, handlers};

pub fn routes() -> Router<Arc<ApiState>> {
    Router::new()
        .route(
            "/api/counselors/:id/availability",
            get(handlers::availability::get_availability).put(handlers::availability::replace_availability),
        )
        .route(
            "/api/counselors/:id/slots/materialize",
            post(handlers::availability::materialize_slots),
        )
        .route("/api/counselors/:id/slots", get(handlers::availability::list_slots))
        .route(
            "/api/counselors/:id/days/:date/status",
            put(handlers::availability::set_day_status),
        )
        .route(
            "/api/counselors/:id/slots/:slot_id/status",
            put(handlers::availability::set_slot_status),
        )
}
