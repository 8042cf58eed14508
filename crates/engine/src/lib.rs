//! # CounselHub Engine
//!
//! Marketplace services, shared by the API server and the worker:
//!
//! - [`AvailabilityService`]: weekly rules and slot materialization
//! - [`SlotStateService`]: counselor-driven slot status changes
//! - [`BookingService`]: confirmation, session teardown, auto-completion
//! - [`DisputeService`]: disputes raised by clients
//!
//! Services hold the storage and provider seams behind `Arc<dyn ...>` and
//! read time from an injected [`Clock`].

pub mod booking;
pub mod config;
pub mod dispute;
pub mod materializer;
pub mod providers;
pub mod slot_state;
pub mod tasks;

use std::sync::Arc;

use counselhub_core::models::dispute::ActorRole;
use counselhub_core::{Clock, CounselError, CounselResult, MarketplacePolicy, ServiceCalendar};
use counselhub_db::Store;
use counselhub_scheduler::{HandlerRegistry, Scheduler};
use uuid::Uuid;

pub use booking::BookingService;
pub use config::EngineConfig;
pub use dispute::{DisputeService, RaiseDispute};
pub use materializer::AvailabilityService;
pub use providers::{EvidenceStorage, MeetingRoomProvider, Notifier, ProviderError};
pub use slot_state::SlotStateService;

/// The authenticated caller of an operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Actor {
    pub id: Uuid,
    pub role: ActorRole,
}

impl Actor {
    pub fn new(id: Uuid, role: ActorRole) -> Self {
        Self { id, role }
    }

    /// Counselor-owned resources may be changed by that counselor or an admin
    pub fn ensure_counselor(&self, counselor_id: Uuid) -> CounselResult<()> {
        match self.role {
            ActorRole::Admin => Ok(()),
            ActorRole::Counselor if self.id == counselor_id => Ok(()),
            _ => Err(CounselError::Authorization(format!(
                "Actor {} may not manage counselor {}",
                self.id, counselor_id
            ))),
        }
    }

    pub fn ensure_client(&self) -> CounselResult<()> {
        if self.role == ActorRole::Client {
            Ok(())
        } else {
            Err(CounselError::Authorization("Only clients may do this".to_string()))
        }
    }
}

/// External services the engine talks to
#[derive(Clone)]
pub struct Providers {
    pub rooms: Arc<dyn MeetingRoomProvider>,
    pub evidence: Arc<dyn EvidenceStorage>,
    pub notifier: Arc<dyn Notifier>,
}

/// Every service wired to one store, clock and provider set
#[derive(Clone)]
pub struct Engine {
    pub availability: AvailabilityService,
    pub slots: SlotStateService,
    pub bookings: BookingService,
    pub disputes: DisputeService,
    pub scheduler: Scheduler,
    notifier: Arc<dyn Notifier>,
}

impl Engine {
    pub fn new<S: Store + 'static>(
        store: Arc<S>,
        clock: Arc<dyn Clock>,
        calendar: ServiceCalendar,
        policy: MarketplacePolicy,
        providers: Providers,
    ) -> Self {
        let scheduler = Scheduler::new(store.clone(), clock.clone(), calendar);
        let policy = Arc::new(policy);
        let store: Arc<dyn Store> = store;

        Self {
            availability: AvailabilityService::new(store.clone(), clock.clone(), calendar, policy.clone()),
            slots: SlotStateService::new(store.clone(), clock.clone(), calendar),
            bookings: BookingService::new(
                store.clone(),
                clock.clone(),
                policy.clone(),
                scheduler.clone(),
                providers.rooms.clone(),
            ),
            disputes: DisputeService::new(store, clock, policy, scheduler.clone(), providers.evidence.clone()),
            scheduler,
            notifier: providers.notifier,
        }
    }

    /// Handlers for every task type the engine enqueues
    pub fn task_registry(&self) -> HandlerRegistry {
        tasks::registry(self, self.notifier.clone())
    }
}
