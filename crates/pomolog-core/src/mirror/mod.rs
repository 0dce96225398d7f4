//! Human-readable mirror of the session store.
//!
//! The mirror document is a Markdown file grouped by day that people may edit
//! by hand. [`MirrorSynchronizer`] writes it and notices external edits;
//! [`reconcile`] folds an edited document back into a session list.

mod parse;
mod render;
mod sync;
mod watch;

pub use parse::{parse_document, MirrorEntry, ParsedDocument};
pub use render::{render_document, render_line};
pub use sync::{reconcile, structurally_equal, DocumentState, MirrorSynchronizer};
pub use watch::{ChangeEvent, NotifyWatch, PollWatch, Watch, WatchStream};
