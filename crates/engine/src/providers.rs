//! # External Providers
//!
//! Seams to the services CounselHub does not own: the video meeting-room
//! provider, file storage for dispute evidence, and notification delivery.
//! Engine services only see the traits; binaries wire the implementations
//! below and tests substitute doubles.

use std::path::PathBuf;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use counselhub_core::CounselError;
use counselhub_core::models::dispute::EvidenceItem;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("provider unreachable: {0}")]
    Unavailable(String),

    #[error("provider rejected the request with status {status}: {message}")]
    Rejected { status: u16, message: String },

    #[error("storage failure: {0}")]
    Io(#[from] std::io::Error),
}

impl From<reqwest::Error> for ProviderError {
    fn from(error: reqwest::Error) -> Self {
        match error.status() {
            Some(status) => ProviderError::Rejected {
                status: status.as_u16(),
                message: error.to_string(),
            },
            None => ProviderError::Unavailable(error.to_string()),
        }
    }
}

impl From<ProviderError> for CounselError {
    fn from(error: ProviderError) -> Self {
        CounselError::ExternalProvider(error.to_string())
    }
}

/// A provisioned video room
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MeetingRoom {
    pub room_id: String,
    pub room_url: String,
}

#[async_trait]
pub trait MeetingRoomProvider: Send + Sync {
    async fn create_room(
        &self,
        booking_id: Uuid,
        starts_at: DateTime<Utc>,
        ends_at: DateTime<Utc>,
    ) -> Result<MeetingRoom, ProviderError>;

    /// Deleting a room that no longer exists succeeds
    async fn delete_room(&self, room_id: &str) -> Result<(), ProviderError>;
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateRoomRequest {
    name: String,
    not_before: DateTime<Utc>,
    expires_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateRoomResponse {
    id: String,
    url: String,
}

/// Meeting-room provider reached over its REST API with a bearer token
#[derive(Debug, Clone)]
pub struct HttpMeetingRooms {
    base_url: String,
    api_key: String,
    client: reqwest::Client,
}

impl HttpMeetingRooms {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl MeetingRoomProvider for HttpMeetingRooms {
    async fn create_room(
        &self,
        booking_id: Uuid,
        starts_at: DateTime<Utc>,
        ends_at: DateTime<Utc>,
    ) -> Result<MeetingRoom, ProviderError> {
        let request = CreateRoomRequest {
            name: format!("session-{}", booking_id),
            not_before: starts_at,
            expires_at: ends_at,
        };

        let response = self
            .client
            .post(format!("{}/rooms", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response.text().await.unwrap_or_default();
            return Err(ProviderError::Rejected { status, message });
        }

        let room: CreateRoomResponse = response.json().await?;
        debug!(%booking_id, room_id = %room.id, "meeting room created");
        Ok(MeetingRoom {
            room_id: room.id,
            room_url: room.url,
        })
    }

    async fn delete_room(&self, room_id: &str) -> Result<(), ProviderError> {
        let response = self
            .client
            .delete(format!("{}/rooms/{}", self.base_url, room_id))
            .bearer_auth(&self.api_key)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() || status == reqwest::StatusCode::NOT_FOUND {
            return Ok(());
        }
        let message = response.text().await.unwrap_or_default();
        Err(ProviderError::Rejected {
            status: status.as_u16(),
            message,
        })
    }
}

/// An uploaded evidence file, before storage
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvidenceUpload {
    pub file_name: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

#[async_trait]
pub trait EvidenceStorage: Send + Sync {
    /// Stores one file for the booking and returns where it can be fetched
    async fn store(&self, booking_id: Uuid, upload: &EvidenceUpload) -> Result<EvidenceItem, ProviderError>;

    /// Removes a file returned by [`store`](Self::store) that ended up
    /// attached to nothing; a file that is already gone is not an error
    async fn discard(&self, item: &EvidenceItem) -> Result<(), ProviderError>;
}

/// Evidence written to a local directory served under a public URL
#[derive(Debug, Clone)]
pub struct FsEvidenceStorage {
    root: PathBuf,
    public_url: String,
}

impl FsEvidenceStorage {
    pub fn new(root: impl Into<PathBuf>, public_url: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            public_url: public_url.into().trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl EvidenceStorage for FsEvidenceStorage {
    async fn store(&self, booking_id: Uuid, upload: &EvidenceUpload) -> Result<EvidenceItem, ProviderError> {
        let directory = self.root.join(booking_id.to_string());
        tokio::fs::create_dir_all(&directory).await?;

        // Never trust the client's path components
        let stored_name = format!("{}-{}", Uuid::new_v4(), sanitize_file_name(&upload.file_name));
        tokio::fs::write(directory.join(&stored_name), &upload.bytes).await?;

        Ok(EvidenceItem {
            url: format!("{}/{}/{}", self.public_url, booking_id, stored_name),
            file_name: upload.file_name.clone(),
            content_type: upload.content_type.clone(),
        })
    }

    async fn discard(&self, item: &EvidenceItem) -> Result<(), ProviderError> {
        let path = self.path_of(&item.url).ok_or_else(|| ProviderError::Rejected {
            status: 400,
            message: format!("{} was not stored here", item.url),
        })?;

        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

impl FsEvidenceStorage {
    /// Maps a URL handed out by `store` back to its file
    fn path_of(&self, url: &str) -> Option<PathBuf> {
        let relative = url.strip_prefix(&self.public_url)?.strip_prefix('/')?;
        let (booking_id, stored_name) = relative.split_once('/')?;
        let booking_id: Uuid = booking_id.parse().ok()?;
        if stored_name.is_empty() || sanitize_file_name(stored_name) != stored_name {
            return None;
        }
        Some(self.root.join(booking_id.to_string()).join(stored_name))
    }
}

fn sanitize_file_name(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or(name);
    let cleaned: String = base
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') { c } else { '_' })
        .collect();
    let cleaned = cleaned.trim_start_matches('.');
    if cleaned.is_empty() {
        "evidence".to_string()
    } else {
        cleaned.to_string()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    BookingConfirmed,
    Invoice,
    DisputeRaised,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationKind::BookingConfirmed => "booking_confirmed",
            NotificationKind::Invoice => "invoice",
            NotificationKind::DisputeRaised => "dispute_raised",
        }
    }
}

/// Outbox message carried as the payload of a `send-notification` task
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub kind: NotificationKind,
    pub recipient_id: Uuid,
    pub booking_id: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn deliver(&self, notification: &Notification) -> Result<(), ProviderError>;
}

/// Notifier that records deliveries in the log
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn deliver(&self, notification: &Notification) -> Result<(), ProviderError> {
        info!(
            kind = ?notification.kind,
            recipient_id = %notification.recipient_id,
            booking_id = %notification.booking_id,
            "notification delivered"
        );
        Ok(())
    }
}
