//! Calendar-day ranges and daily time-of-day windows.

use chrono::{DateTime, LocalResult, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Timelike, Utc};

use crate::error::TransformError;

/// Inclusive range of calendar days.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DayRange {
    first: NaiveDate,
    last: NaiveDate,
}

impl DayRange {
    pub fn new(first: NaiveDate, last: NaiveDate) -> Result<Self, TransformError> {
        if first > last {
            return Err(TransformError::InvalidDayRange { first, last });
        }
        Ok(Self { first, last })
    }

    pub fn single(day: NaiveDate) -> Self {
        Self {
            first: day,
            last: day,
        }
    }

    pub fn first(&self) -> NaiveDate {
        self.first
    }

    pub fn last(&self) -> NaiveDate {
        self.last
    }

    pub fn contains(&self, day: NaiveDate) -> bool {
        self.first <= day && day <= self.last
    }

    pub fn days(&self) -> impl Iterator<Item = NaiveDate> {
        let last = self.last;
        self.first.iter_days().take_while(move |d| *d <= last)
    }
}

/// Time-of-day window `[from, to)` applied to every day of a range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DailyWindow {
    from: NaiveTime,
    to: NaiveTime,
}

impl DailyWindow {
    pub fn new(from: NaiveTime, to: NaiveTime) -> Result<Self, TransformError> {
        if from >= to {
            return Err(TransformError::InvalidWindow { from, to });
        }
        Ok(Self { from, to })
    }

    pub fn from(&self) -> NaiveTime {
        self.from
    }

    pub fn to(&self) -> NaiveTime {
        self.to
    }

    /// The window anchored to `day` in `tz`, as UTC instants.
    pub fn on<Tz: TimeZone>(&self, day: NaiveDate, tz: &Tz) -> (DateTime<Utc>, DateTime<Utc>) {
        (
            local_instant(tz, day.and_time(self.from)),
            local_instant(tz, day.and_time(self.to)),
        )
    }

    /// Window bounds as minutes since midnight.
    pub(crate) fn minutes(&self) -> (i64, i64) {
        (minute_of_day(self.from), minute_of_day(self.to))
    }
}

/// Map a wall-clock time in `tz` to an instant. Ambiguous times take the
/// earlier instant; times skipped by a DST jump are read as UTC offsets of
/// the surrounding hour.
pub(crate) fn local_instant<Tz: TimeZone>(tz: &Tz, naive: NaiveDateTime) -> DateTime<Utc> {
    match tz.from_local_datetime(&naive) {
        LocalResult::Single(dt) | LocalResult::Ambiguous(dt, _) => dt.with_timezone(&Utc),
        LocalResult::None => {
            let shifted = naive + chrono::Duration::hours(1);
            match tz.from_local_datetime(&shifted) {
                LocalResult::Single(dt) | LocalResult::Ambiguous(dt, _) => dt.with_timezone(&Utc),
                LocalResult::None => Utc.from_utc_datetime(&naive),
            }
        }
    }
}

pub(crate) fn minute_of_day(t: NaiveTime) -> i64 {
    i64::from(t.hour()) * 60 + i64::from(t.minute())
}
