//! # Dispute Handlers
//!
//! Disputes arrive as `multipart/form-data` so evidence files can travel
//! with the form fields:
//!
//! - `issueType`: one of the snake_case issue types (required)
//! - `description`: free text (required)
//! - `evidence`: a file part, repeated once per file

use std::sync::Arc;

use axum::{
    Json,
    extract::{Multipart, Path, State},
    http::{HeaderMap, StatusCode, header},
};
use counselhub_core::CounselError;
use counselhub_core::models::dispute::{DisputeReceipt, IssueType, RequestMetadata};
use counselhub_engine::RaiseDispute;
use counselhub_engine::providers::EvidenceUpload;
use uuid::Uuid;

use crate::{
    ApiState,
    middleware::{auth::CurrentActor, error_handling::AppError},
};

/// `POST /api/bookings/:id/disputes`
pub async fn raise_dispute(
    State(state): State<Arc<ApiState>>,
    CurrentActor(actor): CurrentActor,
    Path(booking_id): Path<Uuid>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<DisputeReceipt>), AppError> {
    let mut issue_type = None;
    let mut description = None;
    let mut evidence = Vec::new();

    while let Some(field) = multipart.next_field().await.map_err(invalid_form)? {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "issueType" => {
                let raw = field.text().await.map_err(invalid_form)?;
                let parsed = raw
                    .trim()
                    .parse::<IssueType>()
                    .map_err(|e| CounselError::Validation(e.to_string()))?;
                issue_type = Some(parsed);
            }
            "description" => description = Some(field.text().await.map_err(invalid_form)?),
            "evidence" => {
                let file_name = field.file_name().unwrap_or("evidence").to_string();
                let content_type = field
                    .content_type()
                    .unwrap_or("application/octet-stream")
                    .to_string();
                let bytes = field.bytes().await.map_err(invalid_form)?;
                evidence.push(EvidenceUpload {
                    file_name,
                    content_type,
                    bytes: bytes.to_vec(),
                });
            }
            _ => {}
        }
    }

    let request = RaiseDispute {
        booking_id,
        issue_type: issue_type.ok_or_else(|| CounselError::Validation("issueType is required".to_string()))?,
        description: description.ok_or_else(|| CounselError::Validation("description is required".to_string()))?,
        evidence,
        metadata: request_metadata(&headers),
    };

    let receipt = state.engine.disputes.raise_dispute(&actor, request).await?;
    Ok((StatusCode::CREATED, Json(receipt)))
}

/// Client address as reported by the proxy chain, plus the user agent
fn request_metadata(headers: &HeaderMap) -> RequestMetadata {
    let text = |name: &str| {
        headers
            .get(name)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string)
    };
    RequestMetadata {
        ip_address: text("x-forwarded-for")
            .and_then(|chain| chain.split(',').next().map(|ip| ip.trim().to_string()))
            .or_else(|| text("x-real-ip")),
        user_agent: text(header::USER_AGENT.as_str()),
    }
}

fn invalid_form(error: axum::extract::multipart::MultipartError) -> AppError {
    AppError(CounselError::Validation(format!("Invalid dispute form: {}", error)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_metadata_takes_first_forwarded_address() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_static("203.0.113.7, 10.0.0.1"));
        headers.insert(header::USER_AGENT, HeaderValue::from_static("curl/8.0"));

        let metadata = request_metadata(&headers);

        assert_eq!(metadata.ip_address.as_deref(), Some("203.0.113.7"));
        assert_eq!(metadata.user_agent.as_deref(), Some("curl/8.0"));
    }
}
