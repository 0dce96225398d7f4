//! Timer engine implementation.
//!
//! The timer engine is a wall-clock-based state machine. It does not own a
//! thread; something must call `tick()` periodically (see
//! [`Ticker`](super::Ticker)). Every transition is applied to the
//! [`SessionStore`] it is handed, and the engine is the only code path that
//! opens or closes a `started` session.
//!
//! ## State Transitions
//!
//! ```text
//! Idle -> Running -> Paused -> Running -> ... -> Idle
//!           |  tick reaches 0 / reset             ^
//!           +-------------------------------------+
//! ```
//!
//! Resuming from `Paused` never reopens the paused record: it is marked
//! completed at its pause point and a fresh session is opened.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::events::Event;
use crate::session::{Session, SessionState, SessionStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimerState {
    Idle,
    Running,
    Paused,
}

/// Core timer engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimerEngine {
    state: TimerState,
    /// Target length of one countdown, in seconds.
    session_length_secs: i64,
    /// Milliseconds counted in earlier running windows of this countdown.
    elapsed_ms: i64,
    /// Start of the current running window.
    #[serde(default)]
    running_since: Option<DateTime<Utc>>,
    /// Session the engine opened last (active while running, paused while paused).
    #[serde(default)]
    session_id: Option<String>,
}

impl TimerEngine {
    /// Create an idle engine whose countdown is `session_length_secs` long.
    pub fn new(session_length_secs: i64) -> Self {
        Self {
            state: TimerState::Idle,
            session_length_secs: session_length_secs.max(1),
            elapsed_ms: 0,
            running_since: None,
            session_id: None,
        }
    }

    // ── Queries ──────────────────────────────────────────────────────

    pub fn state(&self) -> TimerState {
        self.state
    }

    pub fn session_length_secs(&self) -> i64 {
        self.session_length_secs
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    /// `max(0, sessionLength - elapsed)` as of `now`.
    pub fn time_remaining_at(&self, now: DateTime<Utc>) -> Duration {
        let total = self.session_length_secs * 1000;
        let remaining = total - self.elapsed_at(now);
        Duration::milliseconds(remaining.max(0))
    }

    pub fn time_remaining(&self) -> Duration {
        self.time_remaining_at(Utc::now())
    }

    // ── Commands ─────────────────────────────────────────────────────

    /// Change the countdown length. Takes effect on the next start from idle.
    pub fn set_session_length(&mut self, secs: i64) {
        self.session_length_secs = secs.max(1);
    }

    /// Open a new session and start counting down.
    ///
    /// Valid from `Idle` and `Paused`; returns `None` while already running.
    pub fn start_at(
        &mut self,
        store: &mut SessionStore,
        description: &str,
        customer: Option<String>,
        project: Option<String>,
        now: DateTime<Utc>,
    ) -> Option<Event> {
        match self.state {
            TimerState::Running => return None,
            TimerState::Paused => {
                // Close the paused record at its pause point; the countdown
                // carries on from where it was.
                if let Some(paused) = self.session_id.as_deref().and_then(|id| store.get_mut(id)) {
                    let at = paused.end_time.unwrap_or(now);
                    paused.close(SessionState::Completed, at);
                }
            }
            TimerState::Idle => {
                self.elapsed_ms = 0;
            }
        }
        close_stray_active(store, None, now, StrayEnd::Now);

        let id = store.next_engine_id();
        let session = Session::started(
            id.clone(),
            description,
            now,
            self.session_length_secs,
            customer,
            project,
        );
        // A freshly issued id cannot collide, and `now` is both start and end bound.
        if let Err(e) = store.open(session.clone()) {
            warn!("could not open session {id}: {e}");
            return None;
        }

        self.state = TimerState::Running;
        self.running_since = Some(now);
        self.session_id = Some(id.clone());
        info!(session = %id, "timer started");
        Some(Event::SessionStarted { session, at: now })
    }

    /// Stop counting and close the active session as `paused`.
    pub fn pause_at(&mut self, store: &mut SessionStore, now: DateTime<Utc>) -> Option<Event> {
        if self.state != TimerState::Running {
            return None;
        }
        self.flush_elapsed(now);
        self.state = TimerState::Paused;

        let session = self
            .session_id
            .as_deref()
            .and_then(|id| store.get_mut(id))
            .filter(|s| s.is_active())?;
        session.close(SessionState::Paused, now);
        debug!(session = %session.id, "timer paused");
        Some(Event::SessionPaused {
            session: session.clone(),
            at: now,
        })
    }

    /// Advance the countdown. Returns the completion event when it reaches 0.
    pub fn tick_at(&mut self, store: &mut SessionStore, now: DateTime<Utc>) -> Option<Event> {
        if self.state != TimerState::Running {
            return None;
        }
        if self.time_remaining_at(now) > Duration::zero() {
            return None;
        }
        self.complete(store, now)
    }

    /// Force the engine back to idle, closing whatever it had open.
    ///
    /// Idempotent: resetting an idle engine, or one whose session is already
    /// closed, changes nothing further.
    pub fn reset_at(&mut self, store: &mut SessionStore, now: DateTime<Utc>) -> Option<Event> {
        if self.state == TimerState::Idle {
            return None;
        }
        let closed = self
            .session_id
            .as_deref()
            .and_then(|id| store.get_mut(id))
            .and_then(|s| match s.session_state {
                SessionState::Completed => None,
                _ => {
                    let at = s.end_time.unwrap_or(now);
                    s.close(SessionState::Completed, at);
                    Some(s.clone())
                }
            });
        close_stray_active(store, None, now, StrayEnd::Now);
        self.to_idle();
        info!("timer reset");
        Some(Event::TimerReset { closed, at: now })
    }

    /// Re-align the engine with a store whose contents were replaced wholesale
    /// (e.g. from the mirror document).
    ///
    /// If the engine's session vanished or was closed externally the engine
    /// returns to idle. Any `started` session the engine does not own is
    /// closed at its planned end (or `now`, whichever is earlier).
    pub fn adopt_store(&mut self, store: &mut SessionStore, now: DateTime<Utc>) {
        let owned = self.session_id.as_deref().and_then(|id| store.get(id)).cloned();
        match (self.state, owned) {
            (TimerState::Running, Some(s)) if s.is_active() => {}
            (TimerState::Paused, Some(s)) if s.session_state == SessionState::Paused => {}
            (TimerState::Idle, _) => {}
            _ => {
                debug!("engine session changed externally; returning to idle");
                self.to_idle();
            }
        }
        let keep = match self.state {
            TimerState::Running => self.session_id.clone(),
            _ => None,
        };
        close_stray_active(store, keep.as_deref(), now, StrayEnd::PlannedEnd);
    }

    // ── Internal ─────────────────────────────────────────────────────

    fn complete(&mut self, store: &mut SessionStore, now: DateTime<Utc>) -> Option<Event> {
        let session = self
            .session_id
            .as_deref()
            .and_then(|id| store.get_mut(id))
            .filter(|s| s.is_active())
            .map(|s| {
                s.close(SessionState::Completed, now);
                s.clone()
            });
        self.to_idle();
        let session = session?;
        info!(session = %session.id, "session completed");
        Some(Event::SessionCompleted { session, at: now })
    }

    fn to_idle(&mut self) {
        self.state = TimerState::Idle;
        self.elapsed_ms = 0;
        self.running_since = None;
        self.session_id = None;
    }

    fn elapsed_at(&self, now: DateTime<Utc>) -> i64 {
        let running = self
            .running_since
            .map(|since| (now - since).num_milliseconds().max(0))
            .unwrap_or(0);
        self.elapsed_ms + running
    }

    fn flush_elapsed(&mut self, now: DateTime<Utc>) {
        self.elapsed_ms = self.elapsed_at(now);
        self.running_since = None;
    }
}

/// Where a stray active session gets its end time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StrayEnd {
    Now,
    /// The planned end when that is already past. For stores left behind by
    /// a process that never closed its session.
    PlannedEnd,
}

/// Close every active session except `keep`.
fn close_stray_active(
    store: &mut SessionStore,
    keep: Option<&str>,
    now: DateTime<Utc>,
    end: StrayEnd,
) {
    for session in store.iter_mut() {
        if session.is_active() && Some(session.id.as_str()) != keep {
            let at = match end {
                StrayEnd::Now => now,
                StrayEnd::PlannedEnd => session.effective_end().min(now),
            };
            warn!(session = %session.id, "closing stray active session");
            session.close(SessionState::Completed, at);
        }
    }
}
