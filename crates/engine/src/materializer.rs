//! # Slot Materializer
//!
//! Owns counselor availability. Replacing the weekly rules and
//! materializing slots are one user-facing action: the new rules are
//! stored, then every unbooked slot of the counselor is rebuilt from them.
//!
//! Materialization is a full rebuild, so running it twice over the same
//! rules and clock yields the same slot set. Booked slots survive every
//! rebuild and block any candidate overlapping them.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use counselhub_core::models::availability::{
    AvailabilityResponse, ReplaceAvailabilityRequest, validate_rules,
};
use counselhub_core::models::slot::GeneratedSlot;
use counselhub_core::slot_plan::SlotPlanner;
use counselhub_core::{Clock, CounselError, CounselResult, MarketplacePolicy, ServiceCalendar};
use counselhub_db::Store;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::Actor;

#[derive(Clone)]
pub struct AvailabilityService {
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
    calendar: ServiceCalendar,
    policy: Arc<MarketplacePolicy>,
}

impl AvailabilityService {
    pub fn new(
        store: Arc<dyn Store>,
        clock: Arc<dyn Clock>,
        calendar: ServiceCalendar,
        policy: Arc<MarketplacePolicy>,
    ) -> Self {
        Self {
            store,
            clock,
            calendar,
            policy,
        }
    }

    /// Validates and stores a full weekly rule set, then rebuilds the slots
    pub async fn replace_availability(
        &self,
        actor: &Actor,
        counselor_id: Uuid,
        request: ReplaceAvailabilityRequest,
    ) -> CounselResult<AvailabilityResponse> {
        actor.ensure_counselor(counselor_id)?;

        let mut rules = request.rules;
        validate_rules(&mut rules)?;

        let stored = self
            .store
            .replace_rules(counselor_id, &rules, self.clock.now())
            .await?;
        info!(%counselor_id, rules = stored.len(), "availability replaced");

        let total = self.materialize(counselor_id).await?;
        Ok(AvailabilityResponse {
            counselor_id,
            rules: stored,
            total_slots_generated: Some(total),
        })
    }

    pub async fn get_availability(&self, counselor_id: Uuid) -> CounselResult<AvailabilityResponse> {
        let rules = self.store.rules_for_counselor(counselor_id).await?;
        Ok(AvailabilityResponse {
            counselor_id,
            rules,
            total_slots_generated: None,
        })
    }

    /// On-demand rebuild requested by the counselor
    pub async fn materialize_for(&self, actor: &Actor, counselor_id: Uuid) -> CounselResult<usize> {
        actor.ensure_counselor(counselor_id)?;
        self.materialize(counselor_id).await
    }

    /// Rebuilds every unbooked slot of one counselor; returns how many were created
    pub async fn materialize(&self, counselor_id: Uuid) -> CounselResult<usize> {
        let planner = SlotPlanner::new(&self.calendar, &self.policy);
        let rebuild = self
            .store
            .rebuild_slots(counselor_id, &planner, self.clock.now())
            .await?;

        for skipped in &rebuild.skipped {
            warn!(
                %counselor_id,
                date = %skipped.date,
                "skipped availability range: {}",
                skipped.reason
            );
        }
        if rebuild.failed > 0 {
            error!(%counselor_id, failed = rebuild.failed, "some slots could not be inserted");
        }

        info!(
            %counselor_id,
            removed = rebuild.removed,
            created = rebuild.created,
            skipped = rebuild.skipped.len(),
            "slots materialized"
        );
        Ok(rebuild.created as usize)
    }

    /// Rebuilds slots for every counselor with rules, tolerating per-counselor failures
    pub async fn materialize_all(&self) -> CounselResult<usize> {
        let counselors = self.store.counselors_with_rules().await?;
        let mut total = 0;
        let mut failures = 0;

        for counselor_id in counselors {
            match self.materialize(counselor_id).await {
                Ok(created) => total += created,
                Err(e) => {
                    failures += 1;
                    error!(%counselor_id, "materialization failed: {}", e);
                }
            }
        }

        if failures > 0 && total == 0 {
            return Err(CounselError::Internal(
                format!("materialization failed for {} counselors", failures).into(),
            ));
        }
        Ok(total)
    }

    /// Deletes unbooked slots that have already ended
    pub async fn sweep_stale_slots(&self) -> CounselResult<u64> {
        let removed = self.store.sweep_stale_slots(self.clock.now()).await?;
        if removed > 0 {
            info!(removed, "stale slots swept");
        }
        Ok(removed)
    }

    pub async fn list_slots(
        &self,
        counselor_id: Uuid,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> CounselResult<Vec<GeneratedSlot>> {
        if let (Some(from), Some(to)) = (from, to) {
            if to <= from {
                return Err(CounselError::Validation("`to` must be after `from`".to_string()));
            }
        }
        Ok(self.store.slots_for_counselor(counselor_id, from, to).await?)
    }
}
