//! # CounselHub Core
//!
//! Domain types shared by every CounselHub crate: the entities of the
//! marketplace, their status state machines, calendar arithmetic in the
//! service timezone, marketplace policy and the pure slot planner.
//!
//! Nothing in this crate performs I/O. Storage lives in `counselhub-db`,
//! orchestration in `counselhub-engine`.

/// Timezone-aware calendar helpers and the injectable clock
pub mod calendar;
/// Error taxonomy used across the request and task paths
pub mod errors;
/// Entities and their status enums
pub mod models;
/// Tunable marketplace rules (slot length, fees, dispute limits)
pub mod policy;
/// Pure expansion of weekly templates into dated slot candidates
pub mod slot_plan;

pub use calendar::{Clock, ManualClock, ServiceCalendar, SystemClock};
pub use errors::{CounselError, CounselResult};
pub use policy::MarketplacePolicy;
