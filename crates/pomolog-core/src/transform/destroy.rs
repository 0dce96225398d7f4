//! Range selection for bulk deletion.

use chrono::{DateTime, TimeZone, Utc};

use super::window::{minute_of_day, DailyWindow, DayRange};
use crate::session::Session;

/// Sessions whose local start day is in `days` and whose time-of-day
/// interval strictly overlaps `window` (hour:minute precision). Touching a
/// window edge is not an overlap. Open sessions extend to their planned end.
///
/// Nothing is mutated; the caller deletes the returned sessions.
pub fn destroy_sessions<Tz: TimeZone>(
    existing: &[Session],
    days: DayRange,
    window: DailyWindow,
    tz: &Tz,
) -> Vec<Session> {
    let (window_start, window_end) = window.minutes();
    existing
        .iter()
        .filter(|s| {
            let start = s.start_time.with_timezone(tz);
            if !days.contains(start.date_naive()) {
                return false;
            }
            let (from, to) = minutes_span(s.start_time, s.effective_end(), tz);
            from < window_end && to > window_start
        })
        .cloned()
        .collect()
}

/// Start and end as minutes since the local midnight of the start day.
fn minutes_span<Tz: TimeZone>(start: DateTime<Utc>, end: DateTime<Utc>, tz: &Tz) -> (i64, i64) {
    let start = start.with_timezone(tz);
    let end = end.with_timezone(tz);
    let day_offset = (end.date_naive() - start.date_naive()).num_days();
    (
        minute_of_day(start.time()),
        day_offset * 24 * 60 + minute_of_day(end.time()),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, NaiveDate, NaiveTime};

    fn at(d: u32, h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 9, d, h, m, 0).unwrap()
    }

    fn closed(desc: &str, start: DateTime<Utc>, minutes: i64) -> Session {
        Session::manual(desc, start, start + Duration::minutes(minutes), None, None)
    }

    fn nine_to_ten() -> DailyWindow {
        DailyWindow::new(
            NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
            NaiveTime::from_hms_opt(10, 0, 0).unwrap(),
        )
        .unwrap()
    }

    #[test]
    fn selects_overlaps_only_within_day_range() {
        let d = NaiveDate::from_ymd_opt(2024, 9, 10).unwrap();
        let existing = [
            closed("overlap", at(10, 8, 30), 60),
            closed("touching", at(10, 10, 0), 60),
            closed("next day", at(11, 9, 0), 60),
        ];
        let picked = destroy_sessions(&existing, DayRange::single(d), nine_to_ten(), &Utc);
        let names: Vec<_> = picked.iter().map(|s| s.description.as_str()).collect();
        assert_eq!(names, vec!["overlap"]);
    }

    #[test]
    fn open_session_uses_planned_end() {
        let d = NaiveDate::from_ymd_opt(2024, 9, 10).unwrap();
        let open = Session::started("00001".into(), "open", at(10, 8, 50), 20 * 60, None, None);
        let picked = destroy_sessions(&[open], DayRange::single(d), nine_to_ten(), &Utc);
        assert_eq!(picked.len(), 1);
    }

    #[test]
    fn seconds_are_ignored() {
        let d = NaiveDate::from_ymd_opt(2024, 9, 10).unwrap();
        // 08:30:00 - 09:00:45 truncates to 08:30 - 09:00 and only touches.
        let start = at(10, 8, 30);
        let s = Session::manual("edge", start, start + Duration::seconds(30 * 60 + 45), None, None);
        assert!(destroy_sessions(&[s], DayRange::single(d), nine_to_ten(), &Utc).is_empty());
    }
}
