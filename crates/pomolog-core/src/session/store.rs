//! In-memory session collection.
//!
//! The store is the single source of truth for the running process. It is
//! owned by the [`Tracker`](crate::Tracker); background workers only ever see
//! snapshots of it.

use std::collections::HashSet;

use super::model::{engine_id, engine_seq, Session};
use crate::error::ValidationError;

#[derive(Debug, Clone, Default)]
pub struct SessionStore {
    sessions: Vec<Session>,
    /// Last engine sequence number handed out. Only ever grows.
    last_seq: u64,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a store from previously persisted sessions.
    ///
    /// The engine sequence resumes above the highest numeric id present.
    pub fn from_sessions(sessions: Vec<Session>) -> Self {
        let mut store = Self::default();
        store.replace_all(sessions);
        store
    }

    // ── Queries ──────────────────────────────────────────────────────

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Session> {
        self.sessions.iter()
    }

    pub fn get(&self, id: &str) -> Option<&Session> {
        self.sessions.iter().find(|s| s.id == id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.get(id).is_some()
    }

    /// The session that is `started` with no end, if any.
    pub fn active(&self) -> Option<&Session> {
        self.sessions.iter().find(|s| s.is_active())
    }

    /// Number of active sessions. Zero or one whenever the store is observed
    /// through the tracker.
    pub fn active_count(&self) -> usize {
        self.sessions.iter().filter(|s| s.is_active()).count()
    }

    /// Owned copy ordered by start time.
    pub fn snapshot(&self) -> Vec<Session> {
        let mut out = self.sessions.clone();
        out.sort_by(|a, b| a.start_time.cmp(&b.start_time).then_with(|| a.id.cmp(&b.id)));
        out
    }

    // ── Mutations ────────────────────────────────────────────────────

    /// Insert a closed or paused session.
    ///
    /// Active sessions are opened only by the timer engine through
    /// [`open`](Self::open).
    pub fn insert(&mut self, session: Session) -> Result<(), ValidationError> {
        if session.is_active() {
            return Err(ValidationError::ActiveSession(session.id));
        }
        self.insert_checked(session)
    }

    pub(crate) fn open(&mut self, session: Session) -> Result<(), ValidationError> {
        self.insert_checked(session)
    }

    /// Replace the session with the same id, or insert it.
    pub fn upsert(&mut self, session: Session) -> Result<(), ValidationError> {
        check_range(&session)?;
        match self.sessions.iter_mut().find(|s| s.id == session.id) {
            Some(existing) => *existing = session,
            None => {
                self.note_id(&session.id);
                self.sessions.push(session);
            }
        }
        Ok(())
    }

    pub fn remove(&mut self, id: &str) -> Option<Session> {
        let idx = self.sessions.iter().position(|s| s.id == id)?;
        Some(self.sessions.remove(idx))
    }

    pub fn remove_many<'a>(&mut self, ids: impl IntoIterator<Item = &'a str>) -> Vec<Session> {
        let ids: HashSet<&str> = ids.into_iter().collect();
        self.remove_where(|s| ids.contains(s.id.as_str()))
    }

    pub fn remove_where(&mut self, mut pred: impl FnMut(&Session) -> bool) -> Vec<Session> {
        let mut removed = Vec::new();
        self.sessions.retain(|s| {
            if pred(s) {
                removed.push(s.clone());
                false
            } else {
                true
            }
        });
        removed
    }

    /// Replace the whole collection. Duplicate ids keep their first entry.
    pub fn replace_all(&mut self, sessions: Vec<Session>) {
        let mut seen = HashSet::new();
        self.sessions = sessions
            .into_iter()
            .filter(|s| seen.insert(s.id.clone()))
            .collect();
        let max = self.sessions.iter().filter_map(|s| engine_seq(&s.id)).max();
        if let Some(max) = max {
            self.last_seq = self.last_seq.max(max);
        }
    }

    pub(crate) fn get_mut(&mut self, id: &str) -> Option<&mut Session> {
        self.sessions.iter_mut().find(|s| s.id == id)
    }

    pub(crate) fn iter_mut(&mut self) -> impl Iterator<Item = &mut Session> {
        self.sessions.iter_mut()
    }

    pub(crate) fn next_engine_id(&mut self) -> String {
        loop {
            self.last_seq += 1;
            let id = engine_id(self.last_seq);
            if !self.contains(&id) {
                return id;
            }
        }
    }

    fn insert_checked(&mut self, session: Session) -> Result<(), ValidationError> {
        check_range(&session)?;
        if self.contains(&session.id) {
            return Err(ValidationError::InvalidValue {
                field: "id".into(),
                message: format!("duplicate session id {}", session.id),
            });
        }
        self.note_id(&session.id);
        self.sessions.push(session);
        Ok(())
    }

    fn note_id(&mut self, id: &str) {
        if let Some(seq) = engine_seq(id) {
            self.last_seq = self.last_seq.max(seq);
        }
    }
}

fn check_range(session: &Session) -> Result<(), ValidationError> {
    match session.end_time {
        Some(end) if end < session.start_time => Err(ValidationError::InvalidTimeRange {
            start: session.start_time,
            end,
        }),
        _ => Ok(()),
    }
}
