//! # Calendar Utilities
//!
//! All wall-clock arithmetic happens here. Availability templates are written
//! in local time of the service timezone, slots are stored in UTC, and every
//! conversion between the two goes through [`ServiceCalendar`].
//!
//! "Now" is never read from the system directly by the services; they hold a
//! [`Clock`] so that horizon and boundary behavior can be pinned in tests.

use std::fmt;
use std::sync::{PoisonError, RwLock};

use chrono::{DateTime, Duration, LocalResult, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc, Weekday, Datelike};
use chrono_tz::Tz;

/// Source of the current instant
pub trait Clock: Send + Sync + fmt::Debug {
    fn now(&self) -> DateTime<Utc>;
}

/// Clock backed by the operating system
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock that only moves when told to
#[derive(Debug)]
pub struct ManualClock {
    now: RwLock<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self { now: RwLock::new(now) }
    }

    pub fn set(&self, now: DateTime<Utc>) {
        *self.now.write().unwrap_or_else(PoisonError::into_inner) = now;
    }

    pub fn advance(&self, by: Duration) {
        let mut guard = self.now.write().unwrap_or_else(PoisonError::into_inner);
        *guard += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.read().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Calendar bound to the timezone the marketplace operates in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServiceCalendar {
    tz: Tz,
}

impl ServiceCalendar {
    pub fn new(tz: Tz) -> Self {
        Self { tz }
    }

    /// Parses an IANA timezone name such as `Asia/Kolkata`
    pub fn from_name(name: &str) -> eyre::Result<Self> {
        let tz = name
            .parse::<Tz>()
            .map_err(|e| eyre::eyre!("Unknown timezone '{}': {}", name, e))?;
        Ok(Self::new(tz))
    }

    pub fn timezone(&self) -> Tz {
        self.tz
    }

    /// Local calendar date of the given instant
    pub fn today(&self, now: DateTime<Utc>) -> NaiveDate {
        now.with_timezone(&self.tz).date_naive()
    }

    pub fn weekday(&self, date: NaiveDate) -> Weekday {
        date.weekday()
    }

    /// Converts a local wall-clock time on `date` to UTC.
    ///
    /// Ambiguous times (the repeated hour when clocks fall back) resolve to the
    /// earlier instant. Times that do not exist (inside a spring-forward gap)
    /// return `None`.
    pub fn local_to_utc(&self, date: NaiveDate, time: NaiveTime) -> Option<DateTime<Utc>> {
        resolve(self.tz.from_local_datetime(&date.and_time(time)))
    }

    /// UTC bounds `[start, end)` of one local calendar day.
    ///
    /// Days are not always 24 hours long; both bounds come from local midnight.
    pub fn day_window(&self, date: NaiveDate) -> (DateTime<Utc>, DateTime<Utc>) {
        let start = self.first_instant_at_or_after(date.and_time(NaiveTime::MIN));
        let next = date.succ_opt().unwrap_or(date);
        let end = self.first_instant_at_or_after(next.and_time(NaiveTime::MIN));
        (start, end)
    }

    /// Next instant strictly after `after` at which the local clock reads `at`
    pub fn next_daily_run(&self, after: DateTime<Utc>, at: NaiveTime) -> DateTime<Utc> {
        let mut date = self.today(after);
        loop {
            let candidate = self.first_instant_at_or_after(date.and_time(at));
            if candidate > after {
                return candidate;
            }
            date = match date.succ_opt() {
                Some(next) => next,
                None => return candidate,
            };
        }
    }

    /// Maps a local time to UTC, sliding forward past a DST gap when needed
    fn first_instant_at_or_after(&self, local: NaiveDateTime) -> DateTime<Utc> {
        let mut shifted = local;
        for _ in 0..8 {
            if let Some(instant) = resolve(self.tz.from_local_datetime(&shifted)) {
                return instant;
            }
            shifted += Duration::minutes(15);
        }
        // No real zone has a gap longer than two hours
        Utc.from_utc_datetime(&local)
    }
}

fn resolve(result: LocalResult<DateTime<Tz>>) -> Option<DateTime<Utc>> {
    match result {
        LocalResult::Single(dt) => Some(dt.with_timezone(&Utc)),
        LocalResult::Ambiguous(earliest, _) => Some(earliest.with_timezone(&Utc)),
        LocalResult::None => None,
    }
}
