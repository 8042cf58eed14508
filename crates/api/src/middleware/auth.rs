//! # Actor Extraction
//!
//! Identity is verified upstream; the gateway forwards the caller as two
//! headers. `CurrentActor` reads them for any handler that needs a caller
//! and rejects the request with 401 when they are missing or malformed.

use async_trait::async_trait;
use axum::extract::FromRequestParts;
use axum::http::HeaderName;
use axum::http::request::Parts;
use counselhub_core::CounselError;
use counselhub_core::models::dispute::ActorRole;
use counselhub_engine::Actor;
use uuid::Uuid;

use super::error_handling::AppError;

pub const ACTOR_ID_HEADER: HeaderName = HeaderName::from_static("x-actor-id");
pub const ACTOR_ROLE_HEADER: HeaderName = HeaderName::from_static("x-actor-role");

/// The authenticated caller of the current request
#[derive(Debug, Clone, Copy)]
pub struct CurrentActor(pub Actor);

#[async_trait]
impl<S> FromRequestParts<S> for CurrentActor
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let id = header(parts, &ACTOR_ID_HEADER)?;
        let id = Uuid::parse_str(id)
            .map_err(|_| CounselError::Authentication(format!("{} is not a valid id", ACTOR_ID_HEADER)))?;

        let role = header(parts, &ACTOR_ROLE_HEADER)?;
        let role = role
            .parse::<ActorRole>()
            .map_err(|e| CounselError::Authentication(e.to_string()))?;

        Ok(CurrentActor(Actor::new(id, role)))
    }
}

fn header<'a>(parts: &'a Parts, name: &HeaderName) -> Result<&'a str, AppError> {
    parts
        .headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .ok_or_else(|| AppError(CounselError::Authentication(format!("Missing {} header", name))))
}
