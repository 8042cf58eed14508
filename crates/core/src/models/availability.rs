use chrono::{DateTime, NaiveTime, Utc, Weekday};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::{CounselError, CounselResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DayOfWeek {
    Monday,
    Tuesday,
    Wednesday,
    Thursday,
    Friday,
    Saturday,
    Sunday,
}

text_enum!(DayOfWeek, "day of week" {
    Monday => "monday",
    Tuesday => "tuesday",
    Wednesday => "wednesday",
    Thursday => "thursday",
    Friday => "friday",
    Saturday => "saturday",
    Sunday => "sunday",
});

impl From<Weekday> for DayOfWeek {
    fn from(day: Weekday) -> Self {
        match day {
            Weekday::Mon => Self::Monday,
            Weekday::Tue => Self::Tuesday,
            Weekday::Wed => Self::Wednesday,
            Weekday::Thu => Self::Thursday,
            Weekday::Fri => Self::Friday,
            Weekday::Sat => Self::Saturday,
            Weekday::Sun => Self::Sunday,
        }
    }
}

/// A local wall-clock interval within one day, serialized as `HH:MM`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeRange {
    #[serde(with = "hhmm")]
    pub start_time: NaiveTime,
    #[serde(with = "hhmm")]
    pub end_time: NaiveTime,
}

impl TimeRange {
    pub fn new(start_time: NaiveTime, end_time: NaiveTime) -> Self {
        Self { start_time, end_time }
    }

    pub fn overlaps(&self, other: &TimeRange) -> bool {
        self.start_time < other.end_time && other.start_time < self.end_time
    }
}

/// Weekly template from which slots are materialized
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecurringAvailabilityRule {
    pub id: Uuid,
    pub counselor_id: Uuid,
    pub day_of_week: DayOfWeek,
    pub is_available: bool,
    pub time_ranges: Vec<TimeRange>,
    pub price: Decimal,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AvailabilityRuleInput {
    pub day_of_week: DayOfWeek,
    #[serde(default = "default_true")]
    pub is_available: bool,
    #[serde(default)]
    pub time_ranges: Vec<TimeRange>,
    pub price: Decimal,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplaceAvailabilityRequest {
    pub rules: Vec<AvailabilityRuleInput>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AvailabilityResponse {
    pub counselor_id: Uuid,
    pub rules: Vec<RecurringAvailabilityRule>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_slots_generated: Option<usize>,
}

/// Checks a full replacement rule set before it is written.
///
/// Ranges are sorted in place so that stored rules are always ordered.
pub fn validate_rules(rules: &mut [AvailabilityRuleInput]) -> CounselResult<()> {
    let mut seen = Vec::with_capacity(rules.len());
    for rule in rules.iter_mut() {
        if seen.contains(&rule.day_of_week) {
            return Err(CounselError::Validation(format!(
                "More than one rule for {}",
                rule.day_of_week
            )));
        }
        seen.push(rule.day_of_week);

        if rule.price.is_sign_negative() {
            return Err(CounselError::Validation(format!(
                "Price for {} cannot be negative",
                rule.day_of_week
            )));
        }

        if rule.is_available && rule.time_ranges.is_empty() {
            return Err(CounselError::Validation(format!(
                "{} is marked available but has no time ranges",
                rule.day_of_week
            )));
        }

        rule.time_ranges.sort_by_key(|range| range.start_time);
        for range in &rule.time_ranges {
            if range.end_time <= range.start_time {
                return Err(CounselError::Validation(format!(
                    "Range {}-{} on {} must end after it starts",
                    range.start_time.format("%H:%M"),
                    range.end_time.format("%H:%M"),
                    rule.day_of_week
                )));
            }
        }
        for pair in rule.time_ranges.windows(2) {
            if pair[0].overlaps(&pair[1]) || pair[0] == pair[1] {
                return Err(CounselError::Validation(format!(
                    "Ranges {}-{} and {}-{} on {} overlap",
                    pair[0].start_time.format("%H:%M"),
                    pair[0].end_time.format("%H:%M"),
                    pair[1].start_time.format("%H:%M"),
                    pair[1].end_time.format("%H:%M"),
                    rule.day_of_week
                )));
            }
        }
    }
    Ok(())
}

/// `HH:MM` (seconds optional on input) for wall-clock times
pub mod hhmm {
    use chrono::NaiveTime;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(time: &NaiveTime, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&time.format("%H:%M").to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<NaiveTime, D::Error> {
        let raw = String::deserialize(deserializer)?;
        parse(&raw).map_err(serde::de::Error::custom)
    }

    pub fn parse(raw: &str) -> Result<NaiveTime, String> {
        NaiveTime::parse_from_str(raw, "%H:%M")
            .or_else(|_| NaiveTime::parse_from_str(raw, "%H:%M:%S"))
            .map_err(|_| format!("invalid time '{}', expected HH:MM", raw))
    }
}
