//! Gap filling: synthesize filler sessions for untracked parts of a window.

use chrono::{DateTime, TimeZone, Utc};

use super::window::{DailyWindow, DayRange};
use super::TransformOutcome;
use crate::session::Session;

/// For every day of `days`, cover each stretch of `window` not occupied by an
/// existing session with a new filler session tagged `project`/`customer`.
///
/// Existing sessions are never shortened, removed or overlapped. An open
/// session occupies time up to its planned end. Running this on its own
/// output inserts nothing.
pub fn inject_sessions<Tz: TimeZone>(
    existing: &[Session],
    days: DayRange,
    window: DailyWindow,
    project: Option<&str>,
    customer: Option<&str>,
    tz: &Tz,
) -> TransformOutcome {
    let mut inserted = Vec::new();

    for day in days.days() {
        let (window_start, window_end) = window.on(day, tz);

        // Anything overlapping the window blocks it, including sessions that
        // started the evening before.
        let mut blocking: Vec<&Session> = existing
            .iter()
            .filter(|s| s.start_time < window_end && s.effective_end() > window_start)
            .collect();
        blocking.sort_by_key(|s| s.start_time);

        let mut cursor = window_start;
        for session in blocking {
            if session.start_time > cursor {
                push_filler(&mut inserted, cursor, session.start_time.min(window_end), project, customer, tz);
            }
            cursor = cursor.max(session.effective_end());
            if cursor >= window_end {
                break;
            }
        }
        if cursor < window_end {
            push_filler(&mut inserted, cursor, window_end, project, customer, tz);
        }
    }

    let inserted_ids = inserted.iter().map(|s| s.id.clone()).collect();
    let mut sessions: Vec<Session> = existing.iter().cloned().chain(inserted).collect();
    sessions.sort_by(|a, b| a.start_time.cmp(&b.start_time).then_with(|| a.id.cmp(&b.id)));
    TransformOutcome {
        sessions,
        removed: Vec::new(),
        inserted: inserted_ids,
    }
}

fn push_filler<Tz: TimeZone>(
    out: &mut Vec<Session>,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    project: Option<&str>,
    customer: Option<&str>,
    tz: &Tz,
) {
    if start >= end {
        return;
    }
    let description = format!(
        "Untracked {} - {}",
        start.with_timezone(tz).naive_local().format("%H:%M"),
        end.with_timezone(tz).naive_local().format("%H:%M")
    );
    out.push(Session::manual(
        description,
        start,
        end,
        customer.map(str::to_owned),
        project.map(str::to_owned),
    ));
}
