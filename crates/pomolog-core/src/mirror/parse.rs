//! Mirror document text back to session entries.
//!
//! The parser is line oriented and forgiving: anything it does not recognise
//! is counted and skipped. Only a document that yields nothing at all is an
//! error.

use std::sync::LazyLock;

use chrono::{DateTime, Duration, NaiveDate, NaiveTime, TimeZone, Utc};
use regex::Regex;

use super::render::TITLE;
use crate::error::MirrorError;
use crate::session::SessionState;
use crate::transform::local_instant;

static DAY_HEADING: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^##\s+(\d{4}-\d{2}-\d{2})\b").expect("valid day heading pattern"));

static SESSION_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^\s*[-*]\s+(?P<start>\d{1,2}:\d{2})\s*-\s*(?:(?P<end>\d{1,2}:\d{2})|\((?P<status>(?i:running|paused))\))\s*:\s?(?P<desc>.*?)\s*(?:\[#(?P<id>[^\]\s]+)\])?\s*$",
    )
    .expect("valid session line pattern")
});

/// One session line recovered from the document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MirrorEntry {
    /// Id from the trailing `[#id]` tag, if the line still has one.
    pub id: Option<String>,
    pub description: String,
    pub start: DateTime<Utc>,
    /// `None` for running and paused lines.
    pub end: Option<DateTime<Utc>>,
    pub state: SessionState,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedDocument {
    pub entries: Vec<MirrorEntry>,
    /// Lines that were neither blank, a heading, nor a session.
    pub skipped: usize,
}

/// Parse a mirror document whose wall-clock times are in `tz`.
///
/// A document with zero sessions is accepted only when it still carries the
/// title heading, i.e. it is recognisably a mirror whose sessions were all
/// removed. Anything else without a single session is
/// [`MirrorError::Corrupted`].
pub fn parse_document<Tz: TimeZone>(text: &str, tz: &Tz) -> Result<ParsedDocument, MirrorError> {
    let mut doc = ParsedDocument::default();
    let mut day: Option<NaiveDate> = None;
    let mut has_title = false;

    for line in text.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        if let Some(caps) = DAY_HEADING.captures(trimmed) {
            day = NaiveDate::parse_from_str(&caps[1], "%Y-%m-%d").ok();
            if day.is_none() {
                doc.skipped += 1;
            }
            continue;
        }
        if trimmed.starts_with('#') {
            has_title |= trimmed == TITLE;
            continue;
        }
        match day.and_then(|d| parse_line(trimmed, d, tz)) {
            Some(entry) => doc.entries.push(entry),
            None => doc.skipped += 1,
        }
    }

    if doc.entries.is_empty() && !has_title {
        return Err(MirrorError::Corrupted {
            skipped: doc.skipped,
        });
    }
    Ok(doc)
}

fn parse_line<Tz: TimeZone>(line: &str, day: NaiveDate, tz: &Tz) -> Option<MirrorEntry> {
    let caps = SESSION_LINE.captures(line)?;
    let start_time = clock(&caps["start"])?;
    let start = local_instant(tz, day.and_time(start_time));

    let (end, state) = match (caps.name("end"), caps.name("status")) {
        (Some(end), _) => {
            let mut end = local_instant(tz, day.and_time(clock(end.as_str())?));
            // An end before the start wraps past midnight.
            if end < start {
                end += Duration::days(1);
            }
            (Some(end), SessionState::Completed)
        }
        (None, Some(status)) if status.as_str().eq_ignore_ascii_case("paused") => {
            (None, SessionState::Paused)
        }
        (None, Some(_)) => (None, SessionState::Started),
        (None, None) => return None,
    };

    Some(MirrorEntry {
        id: caps.name("id").map(|m| m.as_str().to_string()),
        description: caps["desc"].trim().to_string(),
        start,
        end,
        state,
    })
}

fn clock(raw: &str) -> Option<NaiveTime> {
    let (h, m) = raw.split_once(':')?;
    NaiveTime::from_hms_opt(h.parse().ok()?, m.parse().ok()?, 0)
}
