//! The serialized main context.
//!
//! A [`Tracker`] owns the session store and the timer engine and is the only
//! thing that mutates them. Every mutation is followed by a coalesced
//! background save and a [`Event::StoreChanged`] broadcast. Callers that
//! share a tracker between tasks wrap it in a mutex (see
//! [`TrackerService`](crate::TrackerService)); holding `&mut Tracker` is what
//! serializes mutations.

use std::time::Instant;

use chrono::{DateTime, TimeZone, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::error::{CoreError, MirrorError, Result, TransformError, ValidationError};
use crate::events::{Event, EventBus};
use crate::mirror::{reconcile, MirrorSynchronizer, ParsedDocument};
use crate::session::{Session, SessionStore};
use crate::storage::{Backups, CanonicalStore, CoreSettings, PersistenceCoordinator};
use crate::timer::{TimerEngine, TimerState};
use crate::transform::TransformOutcome;

/// Field changes for [`Tracker::edit`]. `None` leaves a field alone; the
/// nested options of `customer`/`project` allow clearing them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionPatch {
    pub description: Option<String>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub planned_duration: Option<i64>,
    pub customer: Option<Option<String>>,
    pub project: Option<Option<String>>,
}

impl SessionPatch {
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }

    fn touches_times(&self) -> bool {
        self.start_time.is_some() || self.end_time.is_some()
    }
}

pub struct Tracker {
    store: SessionStore,
    engine: TimerEngine,
    persistence: PersistenceCoordinator,
    events: EventBus,
    /// Token of the armed completion tick, if any.
    tick_token: Option<CancellationToken>,
}

impl Tracker {
    /// Load the canonical store and line the engine up with it.
    ///
    /// A `started` session the engine does not own (left over from a crash)
    /// is closed during load.
    pub fn load(
        persistence: PersistenceCoordinator,
        mut engine: TimerEngine,
        events: EventBus,
    ) -> Result<Self> {
        let mut store = SessionStore::from_sessions(persistence.load()?);
        let before = store.snapshot();
        engine.adopt_store(&mut store, Utc::now());

        let tracker = Self {
            store,
            engine,
            persistence,
            events,
            tick_token: None,
        };
        if tracker.store.snapshot() != before {
            info!("closed sessions left open by a previous run");
            tracker.persistence.save_async(tracker.store.snapshot(), false);
        }
        Ok(tracker)
    }

    /// [`load`](Self::load) with the files and timings from `settings`.
    pub fn open(settings: &CoreSettings, events: EventBus) -> Result<Self> {
        let persistence = PersistenceCoordinator::new(
            CanonicalStore::new(settings.canonical_path.clone()),
            Backups::new(settings.canonical_path.clone(), settings.backup_retention),
        );
        Self::load(persistence, TimerEngine::new(settings.session_length_secs), events)
    }

    // ── Queries ──────────────────────────────────────────────────────

    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    pub fn engine(&self) -> &TimerEngine {
        &self.engine
    }

    pub fn state(&self) -> TimerState {
        self.engine.state()
    }

    pub fn sessions(&self) -> Vec<Session> {
        self.store.snapshot()
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn persistence(&self) -> &PersistenceCoordinator {
        &self.persistence
    }

    // ── Timer ────────────────────────────────────────────────────────

    /// Start a session. An active session is completed first.
    pub fn start_at(
        &mut self,
        description: &str,
        customer: Option<String>,
        project: Option<String>,
        now: DateTime<Utc>,
    ) -> Option<Event> {
        let event = self
            .engine
            .start_at(&mut self.store, description, customer, project, now)?;
        self.emit(event.clone());
        self.commit(false, now);
        Some(event)
    }

    pub fn pause_at(&mut self, now: DateTime<Utc>) -> Option<Event> {
        self.disarm_tick();
        let event = self.engine.pause_at(&mut self.store, now)?;
        self.emit(event.clone());
        self.commit(false, now);
        Some(event)
    }

    /// Return to idle, closing whatever the engine had open. Safe to call at
    /// any time, including while a completion tick is in flight.
    pub fn reset_at(&mut self, now: DateTime<Utc>) -> Option<Event> {
        self.disarm_tick();
        let event = self.engine.reset_at(&mut self.store, now)?;
        self.emit(event.clone());
        self.commit(false, now);
        Some(event)
    }

    /// Completion check for an armed tick. Does nothing once `token` has been
    /// cancelled, so a tick that raced a pause or reset has no effect.
    pub fn tick_at(&mut self, token: &CancellationToken, now: DateTime<Utc>) -> Option<Event> {
        if token.is_cancelled() {
            return None;
        }
        self.poll_at(now)
    }

    /// Completion check without a tick token, for callers that poll.
    pub fn poll_at(&mut self, now: DateTime<Utc>) -> Option<Event> {
        let event = self.engine.tick_at(&mut self.store, now)?;
        self.disarm_tick();
        self.emit(event.clone());
        self.commit(false, now);
        Some(event)
    }

    /// New cancellation token for a completion ticker. Any previously armed
    /// token is cancelled.
    pub fn arm_tick(&mut self) -> CancellationToken {
        self.disarm_tick();
        let token = CancellationToken::new();
        self.tick_token = Some(token.clone());
        token
    }

    pub fn disarm_tick(&mut self) {
        if let Some(token) = self.tick_token.take() {
            token.cancel();
        }
    }

    pub fn set_session_length(&mut self, secs: i64) {
        self.engine.set_session_length(secs);
    }

    // ── Manual edits ─────────────────────────────────────────────────

    pub fn add_manual(
        &mut self,
        description: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        customer: Option<String>,
        project: Option<String>,
    ) -> Result<Session> {
        if end < start {
            return Err(ValidationError::InvalidTimeRange { start, end }.into());
        }
        let session = Session::manual(description, start, end, customer, project);
        self.store.insert(session.clone())?;
        debug!(session = %session.id, "manual session added");
        self.commit(false, Utc::now());
        Ok(session)
    }

    /// Change fields of an existing session. The active session's times
    /// belong to the engine and cannot be edited.
    pub fn edit(&mut self, id: &str, patch: SessionPatch) -> Result<Session> {
        let current = self
            .store
            .get(id)
            .ok_or_else(|| ValidationError::NotFound(id.to_string()))?;
        if current.is_active() && patch.touches_times() {
            return Err(ValidationError::ActiveSession(id.to_string()).into());
        }
        if patch.is_empty() {
            return Ok(current.clone());
        }

        let mut next = current.clone();
        if let Some(description) = patch.description {
            next.description = description;
        }
        if let Some(start) = patch.start_time {
            next.start_time = start;
        }
        if let Some(end) = patch.end_time {
            next.end_time = Some(end);
        }
        if let Some(planned) = patch.planned_duration {
            if planned <= 0 {
                return Err(ValidationError::InvalidValue {
                    field: "planned_duration".into(),
                    message: "must be positive".into(),
                }
                .into());
            }
            next.planned_duration = planned;
        }
        if let Some(customer) = patch.customer {
            next.customer = customer;
        }
        if let Some(project) = patch.project {
            next.project = project;
        }
        next.mark_edited();

        self.store.upsert(next.clone())?;
        self.commit(true, Utc::now());
        Ok(next)
    }

    pub fn delete(&mut self, id: &str) -> Result<Session> {
        let removed = self
            .store
            .remove(id)
            .ok_or_else(|| ValidationError::NotFound(id.to_string()))?;
        self.realign(Utc::now());
        self.commit(true, Utc::now());
        Ok(removed)
    }

    /// Delete every listed id that exists. Returns the number removed.
    pub fn delete_many<'a>(&mut self, ids: impl IntoIterator<Item = &'a str>) -> usize {
        let removed = self.store.remove_many(ids).len();
        if removed > 0 {
            self.realign(Utc::now());
            self.commit(true, Utc::now());
        }
        removed
    }

    // ── Transforms ───────────────────────────────────────────────────

    /// Apply a transform result in one step: drop its removed ids, then
    /// upsert its sessions. Either everything applies or nothing does.
    pub fn apply_transform(&mut self, outcome: &TransformOutcome) -> Result<()> {
        if outcome.is_noop(&self.store.snapshot()) {
            debug!("transform changes nothing");
            return Ok(());
        }
        let mut next = self.store.clone();
        next.remove_many(outcome.removed.iter().map(String::as_str));
        for session in &outcome.sessions {
            next.upsert(session.clone())?;
        }
        self.store = next;
        info!(
            removed = outcome.removed_count(),
            inserted = outcome.inserted_count(),
            "transform applied"
        );
        self.realign(Utc::now());
        self.commit(true, Utc::now());
        Ok(())
    }

    /// Delete a destroy selection. An empty selection is rejected.
    pub fn destroy(&mut self, selection: &[Session]) -> Result<usize> {
        if selection.is_empty() {
            return Err(TransformError::EmptySelection("no sessions match the range".into()).into());
        }
        Ok(self.delete_many(selection.iter().map(|s| s.id.as_str())))
    }

    // ── Mirror ───────────────────────────────────────────────────────

    pub fn render_mirror<Tz: TimeZone>(
        &self,
        mirror: &mut MirrorSynchronizer<Tz>,
    ) -> Result<bool, MirrorError> {
        mirror.render(&self.store.snapshot())
    }

    pub fn refresh_mirror<Tz: TimeZone>(
        &self,
        mirror: &mut MirrorSynchronizer<Tz>,
        now: Instant,
    ) -> Result<bool, MirrorError> {
        mirror.refresh_at(&self.store.snapshot(), now)
    }

    /// Replace the store with a parsed mirror document when it differs.
    ///
    /// Whole-list replacement: changes made since the document was last
    /// rendered are lost. The replaced list is backed up first.
    pub fn reconcile_mirror(&mut self, doc: &ParsedDocument, now: DateTime<Utc>) -> bool {
        let current = self.store.snapshot();
        let Some(next) = reconcile(&current, doc, self.engine.session_length_secs()) else {
            debug!("mirror matches store");
            return false;
        };
        info!(before = current.len(), after = next.len(), "store replaced from mirror");
        self.store.replace_all(next);
        self.realign(now);
        self.commit(true, now);
        true
    }

    /// Block until queued saves are on disk and report a failed one.
    pub fn flush(&self) -> Result<()> {
        self.persistence.flush();
        match self.persistence.last_error() {
            Some(message) => Err(CoreError::Storage(
                crate::error::StorageError::BackgroundSave(message),
            )),
            None => Ok(()),
        }
    }

    // ── Internal ─────────────────────────────────────────────────────

    fn realign(&mut self, now: DateTime<Utc>) {
        self.engine.adopt_store(&mut self.store, now);
        if self.engine.state() != TimerState::Running {
            self.disarm_tick();
        }
    }

    fn emit(&self, event: Event) {
        self.events.publish(event);
    }

    fn commit(&self, backup: bool, now: DateTime<Utc>) {
        let sessions = self.store.snapshot();
        self.persistence.save_async(sessions.clone(), backup);
        self.events.publish(Event::StoreChanged { sessions, at: now });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mirror::parse_document;
    use crate::session::SessionState;
    use chrono::Duration;
    use tempfile::TempDir;

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 5, 4, h, m, 0).unwrap()
    }

    fn tracker(dir: &TempDir) -> Tracker {
        let path = dir.path().join("sessions.json");
        let persistence =
            PersistenceCoordinator::new(CanonicalStore::new(path.clone()), Backups::new(path, 5));
        Tracker::load(persistence, TimerEngine::new(1500), EventBus::new()).unwrap()
    }

    #[test]
    fn start_while_active_completes_previous() {
        let dir = TempDir::new().unwrap();
        let mut t = tracker(&dir);
        t.start_at("one", None, None, at(9, 0));
        t.pause_at(at(9, 10));
        t.start_at("two", None, None, at(9, 15));

        let sessions = t.sessions();
        assert_eq!(sessions.len(), 2);
        assert_eq!(sessions[0].session_state, SessionState::Completed);
        assert_eq!(sessions[0].end_time, Some(at(9, 10)));
        assert!(sessions[1].is_active());
        assert_eq!(t.store().active_count(), 1);
    }

    #[test]
    fn cancelled_tick_has_no_effect() {
        let dir = TempDir::new().unwrap();
        let mut t = tracker(&dir);
        t.start_at("focus", None, None, at(9, 0));
        let token = t.arm_tick();
        t.reset_at(at(9, 5));
        assert!(token.is_cancelled());

        // A tick that was already waiting runs after the reset.
        assert!(t.tick_at(&token, at(9, 30)).is_none());
        let s = &t.sessions()[0];
        assert_eq!(s.session_state, SessionState::Completed);
        assert_eq!(s.end_time, Some(at(9, 5)));
    }

    #[test]
    fn tick_completes_and_disarms() {
        let dir = TempDir::new().unwrap();
        let mut t = tracker(&dir);
        let mut rx = t.events().subscribe();
        t.start_at("focus", None, None, at(9, 0));
        let token = t.arm_tick();

        assert!(t.tick_at(&token, at(9, 10)).is_none());
        let done = t.tick_at(&token, at(9, 25)).unwrap();
        assert!(matches!(done, Event::SessionCompleted { .. }));
        assert!(token.is_cancelled());
        assert_eq!(t.state(), TimerState::Idle);

        assert!(matches!(rx.try_recv().unwrap(), Event::SessionStarted { .. }));
        assert!(matches!(rx.try_recv().unwrap(), Event::StoreChanged { .. }));
        assert!(matches!(rx.try_recv().unwrap(), Event::SessionCompleted { .. }));
    }

    #[test]
    fn edits_are_validated_and_persisted() {
        let dir = TempDir::new().unwrap();
        let mut t = tracker(&dir);
        let s = t.add_manual("Call", at(10, 0), at(10, 30), None, None).unwrap();
        assert!(t.add_manual("Bad", at(11, 0), at(10, 0), None, None).is_err());

        let edited = t
            .edit(
                &s.id,
                SessionPatch {
                    description: Some("Client call".into()),
                    customer: Some(Some("acme".into())),
                    ..Default::default()
                },
            )
            .unwrap();
        assert!(edited.is_edited);
        assert_eq!(edited.customer.as_deref(), Some("acme"));

        let inverted = SessionPatch {
            end_time: Some(at(9, 0)),
            ..Default::default()
        };
        assert!(t.edit(&s.id, inverted).is_err());
        assert_eq!(t.store().get(&s.id).unwrap().end_time, Some(at(10, 30)));

        t.flush().unwrap();
        let saved = CanonicalStore::new(dir.path().join("sessions.json")).load().unwrap();
        assert_eq!(saved[0].description, "Client call");
    }

    #[test]
    fn active_session_times_are_engine_only() {
        let dir = TempDir::new().unwrap();
        let mut t = tracker(&dir);
        t.start_at("focus", None, None, at(9, 0));
        let id = t.engine().session_id().unwrap().to_string();
        let patch = SessionPatch {
            end_time: Some(at(9, 5)),
            ..Default::default()
        };
        assert!(matches!(
            t.edit(&id, patch),
            Err(CoreError::Validation(ValidationError::ActiveSession(_)))
        ));
    }

    #[test]
    fn deleting_the_running_session_idles_the_engine() {
        let dir = TempDir::new().unwrap();
        let mut t = tracker(&dir);
        t.start_at("focus", None, None, at(9, 0));
        let token = t.arm_tick();
        let id = t.engine().session_id().unwrap().to_string();

        t.delete(&id).unwrap();
        assert_eq!(t.state(), TimerState::Idle);
        assert!(token.is_cancelled());
        assert!(t.delete(&id).is_err());
    }

    #[test]
    fn destroy_rejects_empty_selection() {
        let dir = TempDir::new().unwrap();
        let mut t = tracker(&dir);
        assert!(matches!(
            t.destroy(&[]),
            Err(CoreError::Transform(TransformError::EmptySelection(_)))
        ));
    }

    #[test]
    fn apply_transform_is_all_or_nothing() {
        let dir = TempDir::new().unwrap();
        let mut t = tracker(&dir);
        let a = t.add_manual("a", at(9, 0), at(9, 10), None, None).unwrap();
        let mut bad = a.clone();
        bad.end_time = Some(at(8, 0));
        let outcome = TransformOutcome {
            sessions: vec![bad],
            removed: vec![],
            inserted: vec![],
        };
        assert!(t.apply_transform(&outcome).is_err());
        assert_eq!(t.sessions(), vec![a]);
    }

    #[test]
    fn mirror_reconcile_replaces_and_realigns() {
        let dir = TempDir::new().unwrap();
        let mut t = tracker(&dir);
        t.start_at("focus", None, None, at(9, 0));
        let doc = parse_document(
            "# Pomodoro Sessions\n\n## 2026-05-04 (Monday)\n\n- 09:00 - 09:20: focus [#00001]\n",
            &Utc,
        )
        .unwrap();

        assert!(t.reconcile_mirror(&doc, at(9, 21)));
        assert_eq!(t.state(), TimerState::Idle);
        let s = &t.sessions()[0];
        assert_eq!(s.end_time, Some(at(9, 20)));
        assert!(s.is_edited);
        assert!(!t.reconcile_mirror(&doc, at(9, 22)));
    }

    #[test]
    fn load_closes_orphaned_active_session() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("sessions.json");
        let orphan = Session::started("00007".into(), "crash", at(8, 0), 1500, None, None);
        CanonicalStore::new(path.clone()).save(&[orphan]).unwrap();

        let t = tracker(&dir);
        assert_eq!(t.store().active_count(), 0);
        let s = &t.sessions()[0];
        assert_eq!(s.end_time, Some(at(8, 0) + Duration::seconds(1500)));
    }
}
