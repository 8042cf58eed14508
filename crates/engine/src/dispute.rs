//! # Disputes
//!
//! A client may dispute a booking until its auto-complete time. Opening a
//! dispute holds the payout and cancels the pending auto-complete task in
//! the same store transaction, so a completed booking can never turn
//! disputed and a disputed booking can never be completed.

use std::sync::Arc;

use counselhub_core::models::dispute::{
    ActivityEntry, Dispute, DisputeReceipt, DisputeStatus, EvidenceItem, IssueType, RequestMetadata,
};
use counselhub_core::models::task::TaskType;
use counselhub_core::{Clock, CounselError, CounselResult, MarketplacePolicy};
use counselhub_db::{DisputeOutcome, Store};
use counselhub_scheduler::Scheduler;
use tracing::{info, warn};
use uuid::Uuid;

use crate::Actor;
use crate::providers::{EvidenceStorage, EvidenceUpload, NotificationKind};
use crate::tasks::notification_task;

/// A dispute as submitted by the client
#[derive(Debug, Clone)]
pub struct RaiseDispute {
    pub booking_id: Uuid,
    pub issue_type: IssueType,
    pub description: String,
    pub evidence: Vec<EvidenceUpload>,
    pub metadata: RequestMetadata,
}

#[derive(Clone)]
pub struct DisputeService {
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
    policy: Arc<MarketplacePolicy>,
    scheduler: Scheduler,
    evidence: Arc<dyn EvidenceStorage>,
}

impl DisputeService {
    pub fn new(
        store: Arc<dyn Store>,
        clock: Arc<dyn Clock>,
        policy: Arc<MarketplacePolicy>,
        scheduler: Scheduler,
        evidence: Arc<dyn EvidenceStorage>,
    ) -> Self {
        Self {
            store,
            clock,
            policy,
            scheduler,
            evidence,
        }
    }

    pub async fn raise_dispute(&self, actor: &Actor, request: RaiseDispute) -> CounselResult<DisputeReceipt> {
        let booking_id = request.booking_id;
        let booking = self
            .store
            .get_booking(booking_id)
            .await?
            .ok_or_else(|| CounselError::NotFound(format!("Booking {}", booking_id)))?;

        if booking.client_id != actor.id {
            return Err(CounselError::Authorization(format!(
                "Only the client of booking {} may dispute it",
                booking_id
            )));
        }
        if self.store.dispute_for_booking(booking_id).await?.is_some() {
            return Err(CounselError::Conflict(format!("Booking {} is already disputed", booking_id)));
        }

        let now = self.clock.now();
        if now >= booking.completion.auto_complete_at {
            return Err(CounselError::DisputeWindowClosed(format!(
                "Disputes for booking {} closed at {}",
                booking_id,
                booking.completion.auto_complete_at.to_rfc3339()
            )));
        }

        self.validate(&request)?;

        // Uploads happen before any write; files of a dispute that is not
        // opened are discarded again
        let mut evidence = Vec::with_capacity(request.evidence.len());
        for upload in &request.evidence {
            match self.evidence.store(booking_id, upload).await {
                Ok(item) => evidence.push(item),
                Err(e) => {
                    self.discard_evidence(booking_id, &evidence).await;
                    return Err(e.into());
                }
            }
        }

        let dispute = Dispute {
            id: Uuid::new_v4(),
            booking_id,
            client_id: actor.id,
            issue_type: request.issue_type,
            description: request.description,
            evidence,
            status: DisputeStatus::UnderReview,
            raised_at: now,
            activity: vec![ActivityEntry {
                action: "dispute_raised".to_string(),
                actor_id: actor.id,
                actor_role: actor.role,
                at: now,
                network: request.metadata,
                note: None,
            }],
        };

        let auto_complete_key = TaskType::AutoCompleteBooking.key_for(booking_id);
        let opened: CounselResult<()> = match self.store.open_dispute(&dispute, &auto_complete_key).await {
            Ok(DisputeOutcome::Opened {
                auto_complete_cancelled,
                ..
            }) => {
                if !auto_complete_cancelled {
                    warn!(%booking_id, "auto-complete task was not pending when the dispute opened");
                }
                info!(%booking_id, dispute_id = %dispute.id, issue = %dispute.issue_type, "dispute opened");
                Ok(())
            }
            Ok(DisputeOutcome::AlreadyDisputed) => Err(CounselError::Conflict(format!(
                "Booking {} is already disputed",
                booking_id
            ))),
            Ok(DisputeOutcome::BookingNotDisputable(status)) => Err(CounselError::Conflict(format!(
                "Booking {} is {} and can no longer be disputed",
                booking_id, status
            ))),
            Ok(DisputeOutcome::BookingNotFound) => Err(CounselError::NotFound(format!("Booking {}", booking_id))),
            Err(e) => Err(e.into()),
        };
        if let Err(e) = opened {
            self.discard_evidence(booking_id, &dispute.evidence).await;
            return Err(e);
        }

        let notification = notification_task(
            &self.scheduler,
            NotificationKind::DisputeRaised,
            booking.counselor_id,
            booking_id,
            Some(dispute.issue_type.to_string()),
        )?;
        if let Err(e) = self.store.insert_task(&notification, now).await {
            warn!(%booking_id, "failed to enqueue dispute notification: {}", e);
        }

        Ok(DisputeReceipt {
            dispute_id: dispute.id,
            dispute_status: dispute.status,
            disputed_at: now,
        })
    }

    /// Best effort; a file that cannot be removed is only logged
    async fn discard_evidence(&self, booking_id: Uuid, items: &[EvidenceItem]) {
        for item in items {
            if let Err(e) = self.evidence.discard(item).await {
                warn!(%booking_id, url = %item.url, "failed to discard evidence: {}", e);
            }
        }
    }

    fn validate(&self, request: &RaiseDispute) -> CounselResult<()> {
        let length = request.description.trim().chars().count();
        if length < self.policy.dispute_description_min || length > self.policy.dispute_description_max {
            return Err(CounselError::Validation(format!(
                "Description must be between {} and {} characters, got {}",
                self.policy.dispute_description_min, self.policy.dispute_description_max, length
            )));
        }
        if request.evidence.len() > self.policy.dispute_max_evidence {
            return Err(CounselError::Validation(format!(
                "At most {} evidence files are accepted, got {}",
                self.policy.dispute_max_evidence,
                request.evidence.len()
            )));
        }
        Ok(())
    }
}
