//! Round-and-flatten: snap every session onto a fixed time grid.
//!
//! Each closed session is stretched to exactly cover the bucket its start
//! falls in. When several sessions land in the same bucket they are ordered by
//! their original start and the second-earliest survives, carrying every
//! conflicting description joined with `" + "`. The rest are reported as
//! removed. Open sessions are passed through untouched.

use std::collections::BTreeMap;

use chrono::{DateTime, TimeZone, Utc};

use super::TransformOutcome;
use crate::error::TransformError;
use crate::session::Session;

const DESCRIPTION_JOINER: &str = " + ";

pub fn round_and_flatten(
    sessions: &[Session],
    bucket_secs: i64,
) -> Result<TransformOutcome, TransformError> {
    if bucket_secs <= 0 {
        return Err(TransformError::InvalidBucket(bucket_secs));
    }
    if sessions.is_empty() {
        return Err(TransformError::EmptySelection("no sessions to round".into()));
    }

    let mut out = Vec::with_capacity(sessions.len());
    let mut buckets: BTreeMap<i64, Vec<(DateTime<Utc>, Session)>> = BTreeMap::new();

    for session in sessions {
        if session.end_time.is_none() {
            out.push(session.clone());
            continue;
        }
        let key = bucket_start(session.start_time, bucket_secs);
        let start = epoch(key);
        let end = epoch(key + bucket_secs);

        let mut expanded = session.clone();
        if expanded.start_time != start || expanded.end_time != Some(end) {
            expanded.start_time = start;
            expanded.end_time = Some(end);
            expanded.mark_edited();
        }
        buckets
            .entry(key)
            .or_default()
            .push((session.start_time, expanded));
    }

    let mut removed = Vec::new();
    for (_, mut group) in buckets {
        if group.len() == 1 {
            out.extend(group.into_iter().map(|(_, s)| s));
            continue;
        }
        group.sort_by(|(a_start, a), (b_start, b)| a_start.cmp(b_start).then_with(|| a.id.cmp(&b.id)));
        let description = group
            .iter()
            .map(|(_, s)| s.description.as_str())
            .collect::<Vec<_>>()
            .join(DESCRIPTION_JOINER);

        let mut keeper = group.remove(1).1;
        keeper.description = description;
        keeper.mark_edited();
        removed.extend(group.into_iter().map(|(_, s)| s.id));
        out.push(keeper);
    }

    out.sort_by(|a, b| a.start_time.cmp(&b.start_time).then_with(|| a.id.cmp(&b.id)));
    Ok(TransformOutcome {
        sessions: out,
        removed,
        inserted: Vec::new(),
    })
}

/// `floor(start / bucket) * bucket` in epoch seconds.
fn bucket_start(start: DateTime<Utc>, bucket_secs: i64) -> i64 {
    start.timestamp().div_euclid(bucket_secs) * bucket_secs
}

fn epoch(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(secs, 0).single().unwrap_or(DateTime::<Utc>::MIN_UTC)
}
