//! Session list to mirror document text.

use std::collections::BTreeMap;

use chrono::{NaiveDate, TimeZone};

use crate::session::{Session, SessionState};

pub const TITLE: &str = "# Pomodoro Sessions";
pub const RUNNING: &str = "(running)";
pub const PAUSED: &str = "(paused)";

/// Render the document: one `## <date> (<weekday>)` heading per local day,
/// most recent day first, sessions in start order under each heading.
///
/// Every line ends with an `[#id]` tag so edits can be matched back to the
/// session they came from.
pub fn render_document<Tz: TimeZone>(sessions: &[Session], tz: &Tz) -> String {
    let mut days: BTreeMap<NaiveDate, Vec<&Session>> = BTreeMap::new();
    for session in sessions {
        let day = session.start_time.with_timezone(tz).date_naive();
        days.entry(day).or_default().push(session);
    }

    let mut out = String::from(TITLE);
    out.push('\n');
    for (day, mut entries) in days.into_iter().rev() {
        entries.sort_by(|a, b| a.start_time.cmp(&b.start_time).then_with(|| a.id.cmp(&b.id)));
        out.push('\n');
        out.push_str(&format!("## {} ({})\n\n", day.format("%Y-%m-%d"), day.format("%A")));
        for session in entries {
            out.push_str(&render_line(session, tz));
            out.push('\n');
        }
    }
    out
}

pub fn render_line<Tz: TimeZone>(session: &Session, tz: &Tz) -> String {
    let start = session.start_time.with_timezone(tz).naive_local();
    let end = match (session.session_state, session.end_time) {
        (SessionState::Paused, _) => PAUSED.to_string(),
        (_, Some(end)) => end.with_timezone(tz).naive_local().format("%H:%M").to_string(),
        (_, None) => RUNNING.to_string(),
    };
    format!(
        "- {} - {}: {} [#{}]",
        start.format("%H:%M"),
        end,
        single_line(&session.description),
        session.id
    )
}

fn single_line(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::engine_id;
    use chrono::{Duration, Utc};
    use indoc::indoc;

    fn session(seq: u64, desc: &str, d: u32, h: u32, m: u32, minutes: Option<i64>) -> Session {
        let start = Utc.with_ymd_and_hms(2026, 3, d, h, m, 0).unwrap();
        let mut s = Session::started(engine_id(seq), desc, start, 1500, None, None);
        if let Some(minutes) = minutes {
            s.close(SessionState::Completed, start + Duration::minutes(minutes));
        }
        s
    }

    #[test]
    fn groups_by_day_descending() {
        let mut paused = session(3, "Review", 3, 14, 0, Some(10));
        paused.session_state = SessionState::Paused;
        let sessions = vec![
            session(1, "Plan", 2, 9, 0, Some(25)),
            session(4, "Email", 3, 15, 0, None),
            paused,
            session(2, "Write\nreport", 2, 10, 5, Some(25)),
        ];

        assert_eq!(
            render_document(&sessions, &Utc),
            indoc! {"
                # Pomodoro Sessions

                ## 2026-03-03 (Tuesday)

                - 14:00 - (paused): Review [#00003]
                - 15:00 - (running): Email [#00004]

                ## 2026-03-02 (Monday)

                - 09:00 - 09:25: Plan [#00001]
                - 10:05 - 10:30: Write report [#00002]
            "}
        );
    }

    #[test]
    fn empty_store_renders_title_only() {
        assert_eq!(render_document(&[], &Utc), "# Pomodoro Sessions\n");
    }
}
