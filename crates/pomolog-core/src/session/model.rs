//! The session record and its identifiers.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Prefix of ids issued for sessions that did not come from the timer.
pub const MANUAL_ID_PREFIX: &str = "manual-";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Started,
    Paused,
    Completed,
}

/// One recorded work interval.
///
/// `end_time == None` means the session is still open. The actual duration is
/// always derived from the two timestamps and never stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: String,
    #[serde(default)]
    pub description: String,
    #[serde(with = "iso8601")]
    pub start_time: DateTime<Utc>,
    #[serde(default, with = "iso8601::option")]
    pub end_time: Option<DateTime<Utc>>,
    /// Target length in seconds.
    pub planned_duration: i64,
    #[serde(default)]
    pub customer: Option<String>,
    #[serde(default)]
    pub project: Option<String>,
    pub session_state: SessionState,
    #[serde(default)]
    pub is_manually_created: bool,
    #[serde(default)]
    pub is_edited: bool,
}

impl Session {
    /// A freshly opened timer session.
    pub fn started(
        id: String,
        description: impl Into<String>,
        start_time: DateTime<Utc>,
        planned_duration: i64,
        customer: Option<String>,
        project: Option<String>,
    ) -> Self {
        Self {
            id,
            description: description.into(),
            start_time,
            end_time: None,
            planned_duration,
            customer,
            project,
            session_state: SessionState::Started,
            is_manually_created: false,
            is_edited: false,
        }
    }

    /// A completed session entered by hand, with a namespaced id.
    pub fn manual(
        description: impl Into<String>,
        start_time: DateTime<Utc>,
        end_time: DateTime<Utc>,
        customer: Option<String>,
        project: Option<String>,
    ) -> Self {
        Self {
            id: manual_id(),
            description: description.into(),
            start_time,
            end_time: Some(end_time),
            planned_duration: (end_time - start_time).num_seconds().max(0),
            customer,
            project,
            session_state: SessionState::Completed,
            is_manually_created: true,
            is_edited: false,
        }
    }

    /// The session currently counting down: started and not yet closed.
    pub fn is_active(&self) -> bool {
        self.session_state == SessionState::Started && self.end_time.is_none()
    }

    pub fn actual_duration(&self) -> Option<Duration> {
        self.end_time.map(|end| end - self.start_time)
    }

    pub fn planned(&self) -> Duration {
        Duration::seconds(self.planned_duration)
    }

    /// End used for interval arithmetic: the recorded end, or the planned end
    /// for an open session.
    pub fn effective_end(&self) -> DateTime<Utc> {
        self.end_time
            .unwrap_or_else(|| self.start_time + self.planned())
    }

    pub fn mark_edited(&mut self) {
        self.is_edited = true;
    }

    /// Close the session at `at`, clamped so the end never precedes the start.
    pub(crate) fn close(&mut self, state: SessionState, at: DateTime<Utc>) {
        self.end_time = Some(at.max(self.start_time));
        self.session_state = state;
    }
}

/// Engine-issued id for sequence number `seq`.
pub fn engine_id(seq: u64) -> String {
    format!("{seq:05}")
}

/// Sequence number of an engine-issued id, `None` for manual ids.
pub fn engine_seq(id: &str) -> Option<u64> {
    if id.is_empty() || !id.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    id.parse().ok()
}

pub fn manual_id() -> String {
    format!("{MANUAL_ID_PREFIX}{}", uuid::Uuid::new_v4())
}

/// ISO-8601 timestamps that always carry fractional seconds.
mod iso8601 {
    use chrono::{DateTime, SecondsFormat, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(dt: &DateTime<Utc>, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&dt.to_rfc3339_opts(SecondsFormat::Millis, true))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(d)?;
        parse(&raw).map_err(serde::de::Error::custom)
    }

    fn parse(raw: &str) -> Result<DateTime<Utc>, String> {
        DateTime::parse_from_rfc3339(raw)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| format!("invalid timestamp '{raw}': {e}"))
    }

    pub mod option {
        use super::*;

        pub fn serialize<S: Serializer>(
            dt: &Option<DateTime<Utc>>,
            s: S,
        ) -> Result<S::Ok, S::Error> {
            match dt {
                Some(dt) => s.serialize_some(&dt.to_rfc3339_opts(SecondsFormat::Millis, true)),
                None => s.serialize_none(),
            }
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(
            d: D,
        ) -> Result<Option<DateTime<Utc>>, D::Error> {
            match Option::<String>::deserialize(d)? {
                Some(raw) => parse(&raw).map(Some).map_err(serde::de::Error::custom),
                None => Ok(None),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn engine_ids_are_zero_padded_and_reversible() {
        assert_eq!(engine_id(42), "00042");
        assert_eq!(engine_seq("00042"), Some(42));
        assert_eq!(engine_seq(&manual_id()), None);
        assert_eq!(engine_seq(""), None);
    }

    #[test]
    fn json_timestamps_carry_milliseconds() {
        let start = Utc.with_ymd_and_hms(2024, 3, 4, 9, 0, 0).unwrap();
        let session = Session::manual("Write report", start, start + Duration::minutes(25), None, None);
        let json = serde_json::to_value(&session).unwrap();
        assert_eq!(json["startTime"], "2024-03-04T09:00:00.000Z");
        assert_eq!(json["endTime"], "2024-03-04T09:25:00.000Z");
        assert_eq!(json["sessionState"], "completed");
        assert_eq!(json["isManuallyCreated"], true);

        let back: Session = serde_json::from_value(json).unwrap();
        assert_eq!(back, session);
    }

    #[test]
    fn malformed_timestamp_is_a_decode_error() {
        let raw = r#"{"id":"00001","description":"x","startTime":"yesterday",
                     "plannedDuration":1500,"sessionState":"completed"}"#;
        let err = serde_json::from_str::<Session>(raw).unwrap_err();
        assert!(err.to_string().contains("invalid timestamp"));
    }

    #[test]
    fn close_never_moves_end_before_start() {
        let start = Utc.with_ymd_and_hms(2024, 3, 4, 9, 0, 0).unwrap();
        let mut session = Session::started(engine_id(1), "x", start, 1500, None, None);
        assert!(session.is_active());
        session.close(SessionState::Completed, start - Duration::seconds(5));
        assert_eq!(session.end_time, Some(start));
        assert!(!session.is_active());
        assert_eq!(session.actual_duration(), Some(Duration::zero()));
    }
}
