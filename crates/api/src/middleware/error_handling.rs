//! # Error Handling Middleware
//!
//! Maps domain errors to HTTP status codes and a JSON `{ "error": message }`
//! body, so every endpoint reports failures the same way.

use axum::{
    BoxError, Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use counselhub_core::errors::CounselError;
use serde_json::json;
use tracing::error;

/// Application error wrapper that provides HTTP status code mapping
///
/// # Example
///
/// ```
/// use axum::Json;
/// use counselhub_api::middleware::error_handling::AppError;
/// use counselhub_core::errors::CounselError;
///
/// async fn handler(name: Option<String>) -> Result<Json<String>, AppError> {
///     let name = name.ok_or_else(|| CounselError::Validation("name is required".to_string()))?;
///     Ok(Json(name))
/// }
/// # fn main() {}
/// ```
#[derive(Debug)]
pub struct AppError(pub CounselError);

impl AppError {
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            CounselError::Validation(_) => StatusCode::BAD_REQUEST,
            CounselError::Conflict(_) => StatusCode::CONFLICT,
            CounselError::NotFound(_) => StatusCode::NOT_FOUND,
            CounselError::DisputeWindowClosed(_) => StatusCode::UNPROCESSABLE_ENTITY,
            CounselError::ExternalProvider(_) => StatusCode::BAD_GATEWAY,
            CounselError::Authentication(_) => StatusCode::UNAUTHORIZED,
            CounselError::Authorization(_) => StatusCode::FORBIDDEN,
            CounselError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
            CounselError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!("request failed: {:?}", self.0);
        }

        let body = Json(json!({ "error": self.0.to_string() }));
        (status, body).into_response()
    }
}

/// Allows `?` on `CounselResult` inside handlers
impl From<CounselError> for AppError {
    fn from(err: CounselError) -> Self {
        AppError(err)
    }
}

/// Wraps infrastructure errors as database failures
impl From<eyre::Report> for AppError {
    fn from(err: eyre::Report) -> Self {
        AppError(CounselError::Database(err))
    }
}

/// Maps a CounselError to an HTTP response
pub fn map_error(err: CounselError) -> Response {
    AppError(err).into_response()
}

/// Turns a layer failure (usually the request timeout) into a response
pub async fn handle_timeout(err: BoxError) -> Response {
    if err.is::<tower::timeout::error::Elapsed>() {
        (StatusCode::REQUEST_TIMEOUT, Json(json!({ "error": "Request timed out" }))).into_response()
    } else {
        map_error(CounselError::Internal(err))
    }
}
