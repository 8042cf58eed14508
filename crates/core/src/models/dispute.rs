use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisputeStatus {
    UnderReview,
    Resolved,
    Rejected,
}

text_enum!(DisputeStatus, "dispute status" {
    UnderReview => "under_review",
    Resolved => "resolved",
    Rejected => "rejected",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueType {
    CounselorNoShow,
    TechnicalIssue,
    InappropriateConduct,
    QualityConcern,
    Billing,
    Other,
}

text_enum!(IssueType, "issue type" {
    CounselorNoShow => "counselor_no_show",
    TechnicalIssue => "technical_issue",
    InappropriateConduct => "inappropriate_conduct",
    QualityConcern => "quality_concern",
    Billing => "billing",
    Other => "other",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActorRole {
    Client,
    Counselor,
    Admin,
}

text_enum!(ActorRole, "actor role" {
    Client => "client",
    Counselor => "counselor",
    Admin => "admin",
});

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvidenceItem {
    pub url: String,
    pub file_name: String,
    pub content_type: String,
}

/// Network metadata of the request that performed an action
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestMetadata {
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityEntry {
    pub action: String,
    pub actor_id: Uuid,
    pub actor_role: ActorRole,
    pub at: DateTime<Utc>,
    #[serde(flatten)]
    pub network: RequestMetadata,
    pub note: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Dispute {
    pub id: Uuid,
    pub booking_id: Uuid,
    pub client_id: Uuid,
    pub issue_type: IssueType,
    pub description: String,
    pub evidence: Vec<EvidenceItem>,
    pub status: DisputeStatus,
    pub raised_at: DateTime<Utc>,
    pub activity: Vec<ActivityEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DisputeReceipt {
    pub dispute_id: Uuid,
    pub dispute_status: DisputeStatus,
    pub disputed_at: DateTime<Utc>,
}
