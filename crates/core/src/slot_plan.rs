//! # Slot Planning
//!
//! Expands a counselor's weekly availability rules into concrete UTC slot
//! candidates over the rolling horizon. The planner is pure: the caller
//! supplies "now", the calendar, and the slots that survive the rebuild
//! (booked ones), and persists whatever comes out.
//!
//! ## Algorithm
//!
//! 1. Walk every local date from today through `horizon_days - 1`
//! 2. Pick the rule for that weekday, skipping days marked unavailable
//! 3. Convert each range to absolute UTC bounds in the service timezone
//! 4. Today only: drop elapsed windows, and when the window is already running
//!    start no earlier than `now + generation_buffer`
//! 5. Step through the window in whole slot durations; a trailing remainder
//!    shorter than one slot produces nothing
//! 6. Drop exact duplicates and anything overlapping a retained slot
//!
//! A range that cannot be converted (a wall-clock time inside a DST gap) is
//! reported as skipped and the rest of the plan is still produced.

use std::collections::HashSet;

use chrono::{DateTime, Duration, NaiveDate, Timelike, Utc};
use uuid::Uuid;

use crate::calendar::ServiceCalendar;
use crate::models::availability::{DayOfWeek, RecurringAvailabilityRule, TimeRange};
use crate::models::slot::SlotCandidate;
use crate::policy::MarketplacePolicy;

/// A range the planner could not expand, with the reason
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedRange {
    pub date: NaiveDate,
    pub range: TimeRange,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SlotPlan {
    pub candidates: Vec<SlotCandidate>,
    pub skipped: Vec<SkippedRange>,
}

pub struct SlotPlanner<'a> {
    calendar: &'a ServiceCalendar,
    policy: &'a MarketplacePolicy,
}

impl<'a> SlotPlanner<'a> {
    pub fn new(calendar: &'a ServiceCalendar, policy: &'a MarketplacePolicy) -> Self {
        Self { calendar, policy }
    }

    /// Plans every slot for one counselor.
    ///
    /// `retained` are the `[start, end)` intervals of slots that stay in
    /// storage across the rebuild; no candidate may touch them.
    pub fn plan(
        &self,
        counselor_id: Uuid,
        rules: &[RecurringAvailabilityRule],
        retained: &[(DateTime<Utc>, DateTime<Utc>)],
        now: DateTime<Utc>,
    ) -> SlotPlan {
        let mut plan = SlotPlan::default();
        let mut seen = HashSet::new();
        let today = self.calendar.today(now);

        for offset in 0..self.policy.horizon_days {
            let Some(date) = today.checked_add_signed(Duration::days(i64::from(offset))) else {
                break;
            };
            let day = DayOfWeek::from(self.calendar.weekday(date));
            let Some(rule) = rules
                .iter()
                .find(|rule| rule.day_of_week == day && rule.counselor_id == counselor_id)
            else {
                continue;
            };
            if !rule.is_available {
                continue;
            }

            for range in &rule.time_ranges {
                match self.window(date, range, date == today, now) {
                    Ok(Some((start, end))) => {
                        for (slot_start, slot_end) in self.steps(start, end) {
                            if !seen.insert((slot_start, slot_end)) {
                                continue;
                            }
                            if retained.iter().any(|(s, e)| *s < slot_end && slot_start < *e) {
                                continue;
                            }
                            plan.candidates.push(SlotCandidate {
                                counselor_id,
                                start_time: slot_start,
                                end_time: slot_end,
                                base_price: rule.price,
                                total_price: self.policy.total_price(rule.price),
                            });
                        }
                    }
                    Ok(None) => {}
                    Err(reason) => plan.skipped.push(SkippedRange {
                        date,
                        range: *range,
                        reason,
                    }),
                }
            }
        }

        plan.candidates.sort_by_key(|candidate| candidate.start_time);
        plan
    }

    /// Absolute bounds of one range on one date, `None` when nothing fits
    fn window(
        &self,
        date: NaiveDate,
        range: &TimeRange,
        is_today: bool,
        now: DateTime<Utc>,
    ) -> Result<Option<(DateTime<Utc>, DateTime<Utc>)>, String> {
        let start = self
            .calendar
            .local_to_utc(date, range.start_time)
            .ok_or_else(|| format!("start {} does not exist on {}", range.start_time.format("%H:%M"), date))?;
        let end = self
            .calendar
            .local_to_utc(date, range.end_time)
            .ok_or_else(|| format!("end {} does not exist on {}", range.end_time.format("%H:%M"), date))?;

        if end <= start {
            return Err(format!("window on {} collapses after timezone conversion", date));
        }

        let mut effective_start = start;
        if is_today {
            if end <= now {
                return Ok(None);
            }
            if now >= start {
                effective_start = effective_start.max(ceil_minute(now + self.policy.generation_buffer));
            }
        }

        if end - effective_start < self.policy.slot_duration {
            return Ok(None);
        }
        Ok(Some((effective_start, end)))
    }

    fn steps(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Vec<(DateTime<Utc>, DateTime<Utc>)> {
        let step = self.policy.slot_duration;
        let mut slots = Vec::new();
        let mut cursor = start;
        while cursor + step <= end {
            slots.push((cursor, cursor + step));
            cursor += step;
        }
        slots
    }
}

/// Rounds up to the next whole minute
fn ceil_minute(instant: DateTime<Utc>) -> DateTime<Utc> {
    let truncated = instant
        .with_second(0)
        .and_then(|t| t.with_nanosecond(0))
        .unwrap_or(instant);
    if truncated < instant {
        truncated + Duration::minutes(1)
    } else {
        truncated
    }
}
