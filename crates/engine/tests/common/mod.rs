#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use counselhub_core::models::availability::{
    AvailabilityRuleInput, DayOfWeek, ReplaceAvailabilityRequest, TimeRange,
};
use counselhub_core::models::booking::ConfirmBookingRequest;
use counselhub_core::models::dispute::{ActorRole, EvidenceItem};
use counselhub_core::models::slot::GeneratedSlot;
use counselhub_core::{ManualClock, MarketplacePolicy, ServiceCalendar};
use counselhub_db::{MemoryStore, SlotRepository};
use counselhub_engine::providers::{
    EvidenceStorage, EvidenceUpload, MeetingRoom, MeetingRoomProvider, Notification, Notifier,
    ProviderError,
};
use counselhub_engine::{Actor, Engine, Providers};
use mockall::mock;
use rust_decimal::Decimal;
use uuid::Uuid;

mock! {
    pub Rooms {}

    #[async_trait]
    impl MeetingRoomProvider for Rooms {
        async fn create_room(
            &self,
            booking_id: Uuid,
            starts_at: DateTime<Utc>,
            ends_at: DateTime<Utc>,
        ) -> Result<MeetingRoom, ProviderError>;

        async fn delete_room(&self, room_id: &str) -> Result<(), ProviderError>;
    }
}

mock! {
    pub Evidence {}

    #[async_trait]
    impl EvidenceStorage for Evidence {
        async fn store(&self, booking_id: Uuid, upload: &EvidenceUpload) -> Result<EvidenceItem, ProviderError>;

        async fn discard(&self, item: &EvidenceItem) -> Result<(), ProviderError>;
    }
}

/// Keeps every delivered notification for inspection
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    pub delivered: Mutex<Vec<Notification>>,
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn deliver(&self, notification: &Notification) -> Result<(), ProviderError> {
        self.delivered.lock().unwrap().push(notification.clone());
        Ok(())
    }
}

pub fn hm(h: u32, m: u32) -> NaiveTime {
    NaiveTime::from_hms_opt(h, m, 0).unwrap()
}

pub fn kolkata() -> ServiceCalendar {
    ServiceCalendar::from_name("Asia/Kolkata").unwrap()
}

/// Local Kolkata wall-clock time as UTC
pub fn ist(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
    kolkata()
        .local_to_utc(NaiveDate::from_ymd_opt(y, mo, d).unwrap(), hm(h, mi))
        .unwrap()
}

/// Sunday 2026-03-01 10:00 IST, the day before the Monday under test
pub fn sunday_morning() -> DateTime<Utc> {
    ist(2026, 3, 1, 10, 0)
}

/// Rooms that always provision and tear down successfully
pub fn working_rooms() -> MockRooms {
    let mut rooms = MockRooms::new();
    rooms.expect_create_room().returning(|booking_id, _, _| {
        Ok(MeetingRoom {
            room_id: format!("room-{}", booking_id),
            room_url: format!("https://meet.example/room-{}", booking_id),
        })
    });
    rooms.expect_delete_room().returning(|_| Ok(()));
    rooms
}

pub fn working_evidence() -> MockEvidence {
    let mut evidence = MockEvidence::new();
    evidence.expect_store().returning(|booking_id, upload| {
        Ok(EvidenceItem {
            url: format!("https://files.example/{}/{}", booking_id, upload.file_name),
            file_name: upload.file_name.clone(),
            content_type: upload.content_type.clone(),
        })
    });
    evidence.expect_discard().returning(|_| Ok(()));
    evidence
}

pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub clock: Arc<ManualClock>,
    pub notifier: Arc<RecordingNotifier>,
    pub engine: Engine,
    pub counselor: Actor,
    pub client: Actor,
}

impl Harness {
    pub fn new(rooms: MockRooms, evidence: MockEvidence) -> Self {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::new(sunday_morning()));
        let notifier = Arc::new(RecordingNotifier::default());
        let policy = MarketplacePolicy {
            horizon_days: 7,
            ..MarketplacePolicy::default()
        };
        let engine = Engine::new(
            store.clone(),
            clock.clone(),
            kolkata(),
            policy,
            Providers {
                rooms: Arc::new(rooms),
                evidence: Arc::new(evidence),
                notifier: notifier.clone(),
            },
        );

        Self {
            store,
            clock,
            notifier,
            engine,
            counselor: Actor::new(Uuid::new_v4(), ActorRole::Counselor),
            client: Actor::new(Uuid::new_v4(), ActorRole::Client),
        }
    }

    /// Replaces the counselor's rules with Monday-only ranges priced at 500
    pub async fn monday(&self, ranges: &[(NaiveTime, NaiveTime)]) -> usize {
        let request = ReplaceAvailabilityRequest {
            rules: vec![AvailabilityRuleInput {
                day_of_week: DayOfWeek::Monday,
                is_available: true,
                time_ranges: ranges.iter().map(|(s, e)| TimeRange::new(*s, *e)).collect(),
                price: Decimal::new(500, 0),
            }],
        };
        self.engine
            .availability
            .replace_availability(&self.counselor, self.counselor.id, request)
            .await
            .unwrap()
            .total_slots_generated
            .unwrap()
    }

    pub async fn slots(&self) -> Vec<GeneratedSlot> {
        self.store
            .slots_for_counselor(self.counselor.id, None, None)
            .await
            .unwrap()
    }

    /// Publishes Monday 09:00-10:00 and books its only slot as the client
    pub async fn booked(&self) -> (Uuid, GeneratedSlot) {
        self.monday(&[(hm(9, 0), hm(10, 0))]).await;
        let slot = self.slots().await.remove(0);
        let confirmation = self
            .engine
            .bookings
            .confirm_booking(&self.client, pay_for(&slot))
            .await
            .unwrap();
        (confirmation.booking_id, slot)
    }
}

pub fn pay_for(slot: &GeneratedSlot) -> ConfirmBookingRequest {
    ConfirmBookingRequest {
        slot_id: slot.id,
        payment_id: "pay_123".to_string(),
        amount: slot.total_price,
    }
}
