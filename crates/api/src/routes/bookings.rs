use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::{get, post},
};
use std::sync::Arc;

use crate::{ApiState, handlers};

/// Five evidence files plus form fields
const DISPUTE_BODY_LIMIT: usize = 25 * 1024 * 1024;

pub fn routes() -> Router<Arc<ApiState>> {
    Router::new()
        .route("/api/bookings", post(handlers::bookings::confirm_booking))
        .route("/api/bookings/:id", get(handlers::bookings::get_booking))
        .route(
            "/api/bookings/:id/disputes",
            post(handlers::disputes::raise_dispute).layer(DefaultBodyLimit::max(DISPUTE_BODY_LIMIT)),
        )
}
