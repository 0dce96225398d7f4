//! Keeps the mirror document and the session list in step.

use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime};

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use super::parse::{parse_document, MirrorEntry, ParsedDocument};
use super::render::render_document;
use crate::error::MirrorError;
use crate::session::{manual_id, Session, SessionState};
use crate::storage::{write_atomic, CoreSettings};

const DEFAULT_OPEN_LAPSE: Duration = Duration::from_secs(300);
const DEFAULT_SETTLE: Duration = Duration::from_millis(750);

/// What is on disk compared to what was last rendered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DocumentState {
    /// No document yet.
    Missing,
    /// Our own last render, still within the settle window.
    OwnWrite,
    /// Same text as our last render, possibly from an earlier process.
    Unchanged,
    /// Someone else changed it; carries the new text.
    External(String),
}

/// Record of the last render, kept beside the document so a later process
/// still recognises its own output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RenderStamp {
    sha256: String,
    written_at: DateTime<Utc>,
}

impl RenderStamp {
    fn read(path: &Path) -> Option<Self> {
        let raw = match fs::read(path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return None,
            Err(e) => {
                warn!(path = %path.display(), "cannot read mirror stamp: {e}");
                return None;
            }
        };
        serde_json::from_slice(&raw)
            .map_err(|e| warn!(path = %path.display(), "ignoring unreadable mirror stamp: {e}"))
            .ok()
    }
}

fn digest(text: &str) -> String {
    hex::encode(Sha256::digest(text.as_bytes()))
}

/// `dir/.sessions.md.stamp` for `dir/sessions.md`.
fn stamp_path(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!(".{name}.stamp"))
}

/// Mirror document writer and external-edit detector.
///
/// Holds no sessions itself: callers pass a snapshot to [`render`](Self::render)
/// and hand parsed documents to [`reconcile`]. The digest of the last render
/// is persisted in a stamp file next to the document.
#[derive(Debug)]
pub struct MirrorSynchronizer<Tz: TimeZone> {
    path: PathBuf,
    tz: Tz,
    open_lapse: Duration,
    settle: Duration,
    open_until: Option<Instant>,
    last_self_write: Option<SystemTime>,
    last_digest: Option<String>,
}

impl<Tz: TimeZone> MirrorSynchronizer<Tz> {
    pub fn new(path: impl Into<PathBuf>, tz: Tz) -> Self {
        let path = path.into();
        let stamp = RenderStamp::read(&stamp_path(&path));
        Self {
            tz,
            open_lapse: DEFAULT_OPEN_LAPSE,
            settle: DEFAULT_SETTLE,
            open_until: None,
            last_self_write: stamp.as_ref().map(|s| SystemTime::from(s.written_at)),
            last_digest: stamp.map(|s| s.sha256),
            path,
        }
    }

    pub fn from_settings(settings: &CoreSettings, tz: Tz) -> Self {
        Self::new(settings.mirror_path.clone(), tz).with_timings(settings.mirror_open_lapse, settings.settle_delay)
    }

    pub fn with_timings(mut self, open_lapse: Duration, settle: Duration) -> Self {
        self.open_lapse = open_lapse;
        self.settle = settle;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn settle_delay(&self) -> Duration {
        self.settle
    }

    // ── Open / closed ────────────────────────────────────────────────

    /// The document is being viewed; keep it fresh until the lapse expires.
    /// Calling this again extends the window.
    pub fn mark_open_at(&mut self, now: Instant) {
        self.open_until = Some(now + self.open_lapse);
    }

    pub fn mark_open(&mut self) {
        self.mark_open_at(Instant::now());
    }

    pub fn mark_closed(&mut self) {
        self.open_until = None;
    }

    pub fn is_open_at(&self, now: Instant) -> bool {
        self.open_until.is_some_and(|until| now < until)
    }

    pub fn is_open(&self) -> bool {
        self.is_open_at(Instant::now())
    }

    // ── Writing ──────────────────────────────────────────────────────

    /// Write the document for `sessions`. Returns `false` when the file on
    /// disk already holds exactly this text.
    pub fn render(&mut self, sessions: &[Session]) -> Result<bool, MirrorError> {
        let text = render_document(sessions, &self.tz);
        let sha256 = digest(&text);
        if self.last_digest.as_deref() == Some(sha256.as_str())
            && matches!(self.state()?, DocumentState::OwnWrite | DocumentState::Unchanged)
        {
            return Ok(false);
        }
        write_atomic(&self.path, text.as_bytes()).map_err(|source| self.io_error(source))?;
        let written = fs::metadata(&self.path)
            .and_then(|m| m.modified())
            .unwrap_or_else(|_| SystemTime::now());
        self.last_self_write = Some(written);
        self.last_digest = Some(sha256.clone());
        self.write_stamp(RenderStamp {
            sha256,
            written_at: written.into(),
        });
        debug!(path = %self.path.display(), sessions = sessions.len(), "mirror rendered");
        Ok(true)
    }

    /// Re-render a document that still holds our last render. A missing
    /// document or one with unreconciled edits is left alone.
    pub fn follow(&mut self, sessions: &[Session]) -> Result<bool, MirrorError> {
        match self.state()? {
            DocumentState::OwnWrite | DocumentState::Unchanged => self.render(sessions),
            DocumentState::Missing => Ok(false),
            DocumentState::External(_) => {
                warn!(path = %self.path.display(), "mirror has unreconciled edits; not re-rendering");
                Ok(false)
            }
        }
    }

    fn write_stamp(&self, stamp: RenderStamp) {
        let path = stamp_path(&self.path);
        let written = serde_json::to_vec(&stamp)
            .map_err(io::Error::other)
            .and_then(|json| write_atomic(&path, &json));
        // Without the stamp a later process treats this render as an edit.
        if let Err(e) = written {
            warn!(path = %path.display(), "cannot write mirror stamp: {e}");
        }
    }

    /// Periodic refresh: render only while open, and never over an external
    /// edit that has not been reconciled yet.
    pub fn refresh_at(&mut self, sessions: &[Session], now: Instant) -> Result<bool, MirrorError> {
        if !self.is_open_at(now) {
            if self.open_until.take().is_some() {
                info!("mirror document open state lapsed");
            }
            return Ok(false);
        }
        if let DocumentState::External(_) = self.state()? {
            debug!("mirror has a pending external edit; skipping refresh");
            return Ok(false);
        }
        self.render(sessions)
    }

    // ── Reading ──────────────────────────────────────────────────────

    /// Whether a write at `modified` falls inside our own settle window.
    pub fn is_own_write(&self, modified: SystemTime) -> bool {
        self.last_self_write
            .is_some_and(|written| modified <= written + self.settle)
    }

    /// Classify the document on disk against our last render.
    pub fn state(&self) -> Result<DocumentState, MirrorError> {
        let meta = match fs::metadata(&self.path) {
            Ok(meta) => meta,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(DocumentState::Missing),
            Err(e) => return Err(self.io_error(e)),
        };
        let text = self.read()?;
        if self.last_digest.as_deref() != Some(digest(&text).as_str()) {
            return Ok(DocumentState::External(text));
        }
        let own = meta.modified().is_ok_and(|m| self.is_own_write(m));
        Ok(if own {
            DocumentState::OwnWrite
        } else {
            DocumentState::Unchanged
        })
    }

    pub fn parse(&self, text: &str) -> Result<ParsedDocument, MirrorError> {
        parse_document(text, &self.tz)
    }

    fn read(&self) -> Result<String, MirrorError> {
        fs::read_to_string(&self.path).map_err(|source| self.io_error(source))
    }

    fn io_error(&self, source: io::Error) -> MirrorError {
        MirrorError::Io {
            path: self.path.clone(),
            source,
        }
    }
}

// ── Reconciliation ──────────────────────────────────────────────────

/// Fold a parsed document back into a session list.
///
/// Returns `None` when the document says the same thing as `current`,
/// otherwise the full replacement list. Tagged lines keep the fields the
/// document does not show (customer, project, planned duration, seconds) from
/// the session with that id; untagged lines become new manual sessions with
/// `default_planned_secs` as their target when they are still open.
pub fn reconcile(
    current: &[Session],
    doc: &ParsedDocument,
    default_planned_secs: i64,
) -> Option<Vec<Session>> {
    let mut claimed = HashSet::new();
    let mut candidate = Vec::with_capacity(doc.entries.len());
    for entry in &doc.entries {
        // Only the first line carrying a tag may claim it.
        let tag = entry
            .id
            .as_deref()
            .filter(|id| claimed.insert(id.to_string()));
        let session = match tag {
            Some(id) => match current.iter().find(|s| s.id == id) {
                Some(prior) => carry_over(prior, entry),
                None => fresh(entry, Some(id), default_planned_secs),
            },
            None => fresh(entry, None, default_planned_secs),
        };
        candidate.push(session);
    }

    if structurally_equal(current, &candidate) {
        return None;
    }
    candidate.sort_by(|a, b| a.start_time.cmp(&b.start_time).then_with(|| a.id.cmp(&b.id)));
    Some(candidate)
}

/// Equality at the resolution of the document: ids, start and end to the
/// minute, status and description. Paused and running sessions compare
/// without an end.
pub fn structurally_equal(a: &[Session], b: &[Session]) -> bool {
    let mut ka: Vec<_> = a.iter().map(key).collect();
    let mut kb: Vec<_> = b.iter().map(key).collect();
    ka.sort();
    kb.sort();
    ka == kb
}

type Key = (String, i64, Option<i64>, u8, String);

fn key(s: &Session) -> Key {
    let end = match s.session_state {
        SessionState::Completed => s.end_time.map(minute),
        _ => None,
    };
    let state = match s.session_state {
        SessionState::Started if s.end_time.is_some() => 2,
        SessionState::Started => 0,
        SessionState::Paused => 1,
        SessionState::Completed => 2,
    };
    (s.id.clone(), minute(s.start_time), end, state, normalize(&s.description))
}

fn carry_over(prior: &Session, entry: &MirrorEntry) -> Session {
    let mut s = prior.clone();
    let mut changed = false;

    if minute(prior.start_time) != minute(entry.start) {
        s.start_time = entry.start;
        changed = true;
    }
    match entry.state {
        SessionState::Completed => {
            if prior.end_time.map(minute) != entry.end.map(minute) {
                s.end_time = entry.end;
                changed = true;
            }
        }
        SessionState::Paused => {}
        SessionState::Started => s.end_time = None,
    }
    if let Some(end) = s.end_time {
        s.end_time = Some(end.max(s.start_time));
    }
    if prior.session_state != entry.state {
        s.session_state = entry.state;
        changed = true;
    }
    if normalize(&prior.description) != normalize(&entry.description) {
        s.description = entry.description.clone();
        changed = true;
    }
    if changed {
        s.mark_edited();
    }
    s
}

fn fresh(entry: &MirrorEntry, tag: Option<&str>, default_planned_secs: i64) -> Session {
    let id = tag.map(str::to_string).unwrap_or_else(manual_id);
    let planned = entry
        .end
        .map(|end| (end - entry.start).num_seconds().max(0))
        .unwrap_or(default_planned_secs);
    Session {
        id,
        description: entry.description.clone(),
        start_time: entry.start,
        end_time: entry.end,
        planned_duration: planned,
        customer: None,
        project: None,
        session_state: entry.state,
        is_manually_created: true,
        is_edited: false,
    }
}

fn minute(t: DateTime<Utc>) -> i64 {
    t.timestamp().div_euclid(60)
}

fn normalize(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
