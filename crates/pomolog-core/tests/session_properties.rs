//! Property tests over timer transitions and bulk transforms.
//!
//! These drive the public API only: engine + store for the lifecycle
//! properties, the pure transform functions for the rest.

use chrono::{DateTime, Duration, NaiveDate, NaiveTime, TimeZone, Utc};
use pomolog_core::session::{Session, SessionState, SessionStore};
use pomolog_core::transform::{
    destroy_sessions, inject_sessions, round_and_flatten, DailyWindow, DayRange,
};
use pomolog_core::TimerEngine;
use proptest::prelude::*;

// ============================================================================
// Helpers
// ============================================================================

fn base() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 6, 1, 8, 0, 0).unwrap()
}

fn hm(h: u32, m: u32) -> NaiveTime {
    NaiveTime::from_hms_opt(h, m, 0).unwrap()
}

fn closed(desc: &str, start: DateTime<Utc>, minutes: i64) -> Session {
    Session::manual(desc, start, start + Duration::minutes(minutes), None, None)
}

#[derive(Debug, Clone)]
enum Op {
    Start,
    Pause,
    Reset,
    /// Advance the clock by this many seconds and tick.
    Tick(i64),
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => Just(Op::Start),
        2 => Just(Op::Pause),
        1 => Just(Op::Reset),
        3 => (1i64..900).prop_map(Op::Tick),
    ]
}

// ============================================================================
// Timer lifecycle
// ============================================================================

proptest! {
    #[test]
    fn test_at_most_one_active_session(ops in prop::collection::vec(op(), 1..60)) {
        let mut store = SessionStore::new();
        let mut engine = TimerEngine::new(25 * 60);
        let mut now = base();

        for op in ops {
            match op {
                Op::Start => {
                    let previous = store.active().map(|s| s.id.clone());
                    if engine.start_at(&mut store, "work", None, None, now).is_some() {
                        if let Some(id) = previous {
                            let prev = store.get(&id).unwrap();
                            prop_assert_eq!(prev.session_state, SessionState::Completed);
                            prop_assert!(prev.end_time.is_some());
                        }
                    }
                }
                Op::Pause => {
                    engine.pause_at(&mut store, now);
                }
                Op::Reset => {
                    engine.reset_at(&mut store, now);
                }
                Op::Tick(secs) => {
                    now += Duration::seconds(secs);
                    engine.tick_at(&mut store, now);
                }
            }
            prop_assert!(store.active_count() <= 1);
            for s in store.iter() {
                if let Some(end) = s.end_time {
                    prop_assert!(end >= s.start_time);
                }
            }
        }
    }

    #[test]
    fn test_inject_never_overlaps_and_is_idempotent(
        spans in prop::collection::vec((0i64..600, 1i64..120), 0..8),
    ) {
        let existing: Vec<Session> = spans
            .iter()
            .map(|(offset, len)| closed("x", base() + Duration::minutes(*offset), *len))
            .collect();
        let day = NaiveDate::from_ymd_opt(2026, 6, 1).unwrap();
        let window = DailyWindow::new(hm(9, 0), hm(17, 0)).unwrap();

        let first = inject_sessions(&existing, DayRange::single(day), window, None, None, &Utc);
        for filler in first.sessions.iter().filter(|s| first.inserted.contains(&s.id)) {
            for s in &existing {
                prop_assert!(
                    filler.effective_end() <= s.start_time || filler.start_time >= s.effective_end(),
                    "filler {:?} overlaps {:?}", filler, s
                );
            }
        }

        let second = inject_sessions(&first.sessions, DayRange::single(day), window, None, None, &Utc);
        prop_assert_eq!(second.inserted_count(), 0);
    }
}

#[test]
fn test_pause_then_start_completes_paused_session() {
    let mut store = SessionStore::new();
    let mut engine = TimerEngine::new(1500);
    engine.start_at(&mut store, "one", None, None, base());
    engine.pause_at(&mut store, base() + Duration::minutes(5));
    engine.start_at(&mut store, "two", None, None, base() + Duration::minutes(7));

    let all = store.snapshot();
    assert_eq!(all[0].session_state, SessionState::Completed);
    assert_eq!(all[0].end_time, Some(base() + Duration::minutes(5)));
    assert!(all[1].is_active());
    // The countdown carries over the five minutes already worked.
    assert_eq!(
        engine.time_remaining_at(base() + Duration::minutes(7)),
        Duration::minutes(20)
    );
}

// ============================================================================
// Round and flatten
// ============================================================================

#[test]
fn test_round_is_identity_on_aligned_sessions() {
    let input = vec![
        closed("a", base(), 30),
        closed("b", base() + Duration::minutes(30), 30),
        closed("c", base() + Duration::minutes(90), 30),
    ];
    let out = round_and_flatten(&input, 1800).unwrap();
    assert_eq!(out.removed_count(), 0);
    assert_eq!(out.sessions, input);
}

#[test]
fn test_round_keeps_second_of_two() {
    let first = closed("first", base() + Duration::minutes(2), 5);
    let second = closed("second", base() + Duration::minutes(12), 5);
    let out = round_and_flatten(&[second.clone(), first.clone()], 1800).unwrap();

    assert_eq!(out.removed_count(), 1);
    assert_eq!(out.removed, vec![first.id]);
    assert_eq!(out.sessions.len(), 1);
    assert_eq!(out.sessions[0].id, second.id);
    assert_eq!(out.sessions[0].description, "first + second");
    assert_eq!(out.sessions[0].start_time, base());
    assert_eq!(out.sessions[0].end_time, Some(base() + Duration::minutes(30)));
}

// ============================================================================
// Destroy
// ============================================================================

#[test]
fn test_destroy_window_boundaries() {
    let d = NaiveDate::from_ymd_opt(2026, 6, 1).unwrap();
    let at = |day: u32, h: u32, m: u32| Utc.with_ymd_and_hms(2026, 6, day, h, m, 0).unwrap();
    let overlapping = closed("overlap", at(1, 8, 30), 60);
    let touching = closed("touching", at(1, 10, 0), 60);
    let next_day = closed("next day", at(2, 9, 0), 60);

    let picked = destroy_sessions(
        &[overlapping.clone(), touching, next_day],
        DayRange::new(d, d).unwrap(),
        DailyWindow::new(hm(9, 0), hm(10, 0)).unwrap(),
        &Utc,
    );
    assert_eq!(picked, vec![overlapping]);
}
