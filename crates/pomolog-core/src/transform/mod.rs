//! Bulk maintenance transforms over a session list.
//!
//! All of these are pure: they read a slice of sessions and describe the
//! result. Applying it (deleting, inserting, persisting) is the tracker's job.

mod destroy;
mod inject;
mod round;
mod window;

pub use destroy::destroy_sessions;
pub use inject::inject_sessions;
pub use round::round_and_flatten;
pub use window::{DailyWindow, DayRange};
pub(crate) use window::local_instant;

use crate::session::Session;

/// Result of a transform.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TransformOutcome {
    /// Resulting sessions, ordered by start time.
    pub sessions: Vec<Session>,
    /// Ids of input sessions that are absent from `sessions`.
    pub removed: Vec<String>,
    /// Ids of sessions in `sessions` that did not exist before.
    pub inserted: Vec<String>,
}

impl TransformOutcome {
    pub fn removed_count(&self) -> usize {
        self.removed.len()
    }

    pub fn inserted_count(&self) -> usize {
        self.inserted.len()
    }

    pub fn is_noop(&self, input: &[Session]) -> bool {
        self.removed.is_empty()
            && self.inserted.is_empty()
            && self.sessions.len() == input.len()
            && self.sessions.iter().all(|s| input.contains(s))
    }
}
