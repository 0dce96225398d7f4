//! # pomolog core library
//!
//! Session tracking for a Pomodoro-style work timer. The CLI in
//! `pomolog-cli` is a thin layer over this crate.
//!
//! ## Architecture
//!
//! - **Timer Engine**: a wall-clock state machine; the caller drives
//!   completion with `tick()` or a [`Ticker`]
//! - **Session Store**: the in-memory session list with at most one active
//!   session
//! - **Storage**: atomic JSON canonical store, timestamped backups, coalesced
//!   background saves and TOML configuration
//! - **Mirror**: a Markdown rendering of the store that can be edited by hand
//!   and reconciled back
//! - **Transforms**: pure bulk operations (round, inject, destroy)
//!
//! ## Key Components
//!
//! - [`Tracker`]: the serialized owner of store and engine
//! - [`TrackerService`]: async host running the ticker and mirror tasks
//! - [`PersistenceCoordinator`]: canonical file I/O off the caller's thread
//! - [`MirrorSynchronizer`]: mirror document writer and edit detector
//! - [`Config`]: application configuration management

pub mod error;
pub mod events;
pub mod mirror;
pub mod service;
pub mod session;
pub mod storage;
pub mod timer;
pub mod tracker;
pub mod transform;

pub use error::{
    ConfigError, CoreError, MirrorError, StorageError, TransformError, ValidationError,
};
pub use events::{Event, EventBus};
pub use mirror::{MirrorSynchronizer, NotifyWatch, PollWatch, Watch};
pub use service::TrackerService;
pub use session::{Session, SessionState, SessionStore};
pub use storage::{Config, CoreSettings, PersistenceCoordinator};
pub use timer::{Ticker, TimerEngine, TimerState};
pub use tracker::{SessionPatch, Tracker};
pub use transform::{DailyWindow, DayRange, TransformOutcome};
