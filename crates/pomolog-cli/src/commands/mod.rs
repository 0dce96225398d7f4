pub mod config;
pub mod mirror;
pub mod session;
pub mod timer;
pub mod transform;

use std::error::Error;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};
use pomolog_core::storage::{data_dir, write_atomic, Backups, CanonicalStore};
use pomolog_core::{
    Config, CoreSettings, DailyWindow, DayRange, EventBus, MirrorSynchronizer,
    PersistenceCoordinator, Session, TimerEngine, Tracker,
};
use tracing::{debug, warn};

pub type CliResult<T = ()> = Result<T, Box<dyn Error>>;

const ENGINE_FILE: &str = "timer.json";

/// Everything one CLI invocation needs: settings and a loaded tracker.
pub struct Context {
    pub settings: CoreSettings,
    pub tracker: Tracker,
    engine_path: PathBuf,
}

impl Context {
    pub fn open() -> CliResult<Self> {
        let dir = data_dir()?;
        let config = Config::load_from(&dir.join("config.toml"))?;
        let settings = config.snapshot_in(&dir);
        let engine_path = dir.join(ENGINE_FILE);

        let mut engine = load_engine(&engine_path, settings.session_length_secs);
        engine.set_session_length(settings.session_length_secs);
        let persistence = PersistenceCoordinator::new(
            CanonicalStore::new(settings.canonical_path.clone()),
            Backups::new(settings.canonical_path.clone(), settings.backup_retention),
        );
        let tracker = Tracker::load(persistence, engine, EventBus::new())?;
        Ok(Self {
            settings,
            tracker,
            engine_path,
        })
    }

    pub fn mirror(&self) -> MirrorSynchronizer<Local> {
        MirrorSynchronizer::from_settings(&self.settings, Local)
    }

    /// Wait for pending saves, bring a mirror we rendered earlier up to date
    /// and persist the engine for the next invocation.
    pub fn finish(self) -> CliResult {
        self.tracker.flush()?;
        follow_mirror(&self.settings, &self.tracker.sessions());
        save_engine(&self.engine_path, self.tracker.engine())
    }

    /// Split into parts for commands that hand the tracker to a service.
    pub fn into_parts(self) -> (CoreSettings, Tracker, PathBuf) {
        (self.settings, self.tracker, self.engine_path)
    }
}

fn load_engine(path: &Path, session_length_secs: i64) -> TimerEngine {
    let json = match std::fs::read_to_string(path) {
        Ok(json) => json,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return TimerEngine::new(session_length_secs)
        }
        Err(e) => {
            warn!(path = %path.display(), "cannot read timer state, starting idle: {e}");
            return TimerEngine::new(session_length_secs);
        }
    };
    serde_json::from_str(&json).unwrap_or_else(|e| {
        warn!(path = %path.display(), "cannot decode timer state, starting idle: {e}");
        TimerEngine::new(session_length_secs)
    })
}

pub fn save_engine(path: &Path, engine: &TimerEngine) -> CliResult {
    let json = serde_json::to_string_pretty(engine)?;
    write_atomic(path, json.as_bytes())?;
    Ok(())
}

/// Re-render the mirror when it still holds our last render. The store is
/// already saved, so a failure here only warns.
pub fn follow_mirror(settings: &CoreSettings, sessions: &[Session]) {
    let mut mirror = MirrorSynchronizer::from_settings(settings, Local);
    match mirror.follow(sessions) {
        Ok(true) => debug!(path = %mirror.path().display(), "mirror re-rendered"),
        Ok(false) => {}
        Err(e) => warn!("cannot update mirror: {e}"),
    }
}

// ── Argument parsing ─────────────────────────────────────────────────

/// `YYYY-MM-DD HH:MM` (local), `HH:MM` (local, today) or RFC 3339.
pub fn parse_datetime(raw: &str) -> CliResult<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Ok(dt.with_timezone(&Utc));
    }
    let naive = NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M")
        .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M"))
        .or_else(|_| {
            NaiveTime::parse_from_str(raw, "%H:%M")
                .map(|t| Local::now().date_naive().and_time(t))
        })
        .map_err(|_| format!("invalid date/time '{raw}' (expected YYYY-MM-DD HH:MM)"))?;
    Local
        .from_local_datetime(&naive)
        .earliest()
        .map(|dt| dt.with_timezone(&Utc))
        .ok_or_else(|| format!("'{raw}' does not exist in the local time zone").into())
}

pub fn parse_date(raw: &str) -> CliResult<NaiveDate> {
    if raw == "today" {
        return Ok(Local::now().date_naive());
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .map_err(|_| format!("invalid date '{raw}' (expected YYYY-MM-DD)").into())
}

pub fn parse_days(from: &str, to: Option<&str>) -> CliResult<DayRange> {
    let first = parse_date(from)?;
    let last = to.map(parse_date).transpose()?.unwrap_or(first);
    Ok(DayRange::new(first, last)?)
}

/// `HH:MM-HH:MM`.
pub fn parse_window(raw: &str) -> CliResult<DailyWindow> {
    let (from, to) = raw
        .split_once('-')
        .ok_or_else(|| format!("invalid window '{raw}' (expected HH:MM-HH:MM)"))?;
    let time = |s: &str| {
        NaiveTime::parse_from_str(s.trim(), "%H:%M")
            .map_err(|_| format!("invalid time '{s}' in window '{raw}'"))
    };
    Ok(DailyWindow::new(time(from)?, time(to)?)?)
}

pub fn print_json<T: serde::Serialize>(value: &T) -> CliResult {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Run `fut` on a fresh multi-threaded runtime.
pub fn block_on<F: std::future::Future>(fut: F) -> CliResult<F::Output> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    Ok(runtime.block_on(fut))
}
