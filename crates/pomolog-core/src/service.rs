//! Long-running host for a [`Tracker`].
//!
//! The service shares one tracker between the caller, the completion ticker
//! and the mirror tasks. Everything that touches the store goes through the
//! tracker mutex; file reads and parsing for reconciliation happen before the
//! lock is taken.

use std::ops::ControlFlow;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use chrono::{TimeZone, Utc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::MirrorError;
use crate::events::Event;
use crate::mirror::{DocumentState, MirrorSynchronizer, Watch};
use crate::timer::Ticker;
use crate::tracker::Tracker;

const DEFAULT_TICK_PERIOD: Duration = Duration::from_secs(1);

pub struct TrackerService<Tz: TimeZone> {
    tracker: Arc<Mutex<Tracker>>,
    mirror: Arc<Mutex<MirrorSynchronizer<Tz>>>,
    refresh_interval: Duration,
    tick_period: Duration,
    ticker: Option<Ticker>,
    mirror_tasks: Option<MirrorTasks>,
}

struct MirrorTasks {
    token: CancellationToken,
    refresh: JoinHandle<()>,
    watch: Option<JoinHandle<()>>,
}

impl<Tz> TrackerService<Tz>
where
    Tz: TimeZone + Send + 'static,
{
    pub fn new(tracker: Tracker, mirror: MirrorSynchronizer<Tz>, refresh_interval: Duration) -> Self {
        Self {
            tracker: Arc::new(Mutex::new(tracker)),
            mirror: Arc::new(Mutex::new(mirror)),
            refresh_interval,
            tick_period: DEFAULT_TICK_PERIOD,
            ticker: None,
            mirror_tasks: None,
        }
    }

    pub fn with_tick_period(mut self, period: Duration) -> Self {
        self.tick_period = period;
        self
    }

    /// Shared handle to the tracker. Do not hold the guard across an await.
    pub fn tracker(&self) -> Arc<Mutex<Tracker>> {
        Arc::clone(&self.tracker)
    }

    pub fn with_tracker<R>(&self, f: impl FnOnce(&mut Tracker) -> R) -> R {
        f(&mut lock(&self.tracker))
    }

    // ── Timer ────────────────────────────────────────────────────────

    /// Start a session and arm the completion ticker. Must run inside a
    /// tokio runtime.
    pub fn start(
        &mut self,
        description: &str,
        customer: Option<String>,
        project: Option<String>,
    ) -> Option<Event> {
        let (event, token) = {
            let mut tracker = lock(&self.tracker);
            let event = tracker.start_at(description, customer, project, Utc::now())?;
            (event, tracker.arm_tick())
        };

        let tracker = Arc::clone(&self.tracker);
        self.ticker = Some(Ticker::spawn(self.tick_period, token, move |token| {
            let mut tracker = lock(&tracker);
            match tracker.tick_at(token, Utc::now()) {
                Some(_) => ControlFlow::Break(()),
                None => ControlFlow::Continue(()),
            }
        }));
        Some(event)
    }

    pub fn pause(&mut self) -> Option<Event> {
        let event = lock(&self.tracker).pause_at(Utc::now());
        self.ticker = None;
        event
    }

    pub fn reset(&mut self) -> Option<Event> {
        let event = lock(&self.tracker).reset_at(Utc::now());
        self.ticker = None;
        event
    }

    // ── Mirror ───────────────────────────────────────────────────────

    /// Mark the mirror open, render it now and keep it fresh until closed or
    /// the open state lapses. External edits seen by `watch` are reconciled
    /// into the store.
    pub fn open_mirror<W: Watch + 'static>(&mut self, watch: Option<W>) -> Result<(), MirrorError> {
        let path = {
            let snapshot = lock(&self.tracker).sessions();
            let mut mirror = lock(&self.mirror);
            mirror.mark_open();
            mirror.render(&snapshot)?;
            mirror.path().to_path_buf()
        };
        if self.mirror_tasks.is_some() {
            return Ok(());
        }

        let token = CancellationToken::new();
        let refresh = tokio::spawn(refresh_loop(
            Arc::clone(&self.tracker),
            Arc::clone(&self.mirror),
            self.refresh_interval,
            token.clone(),
        ));
        let watch = match watch {
            Some(watch) => {
                let stream = watch.watch(&path)?;
                Some(tokio::spawn(watch_loop(
                    Arc::clone(&self.tracker),
                    Arc::clone(&self.mirror),
                    stream,
                    token.clone(),
                )))
            }
            None => None,
        };
        info!(path = %path.display(), "mirror opened");
        self.mirror_tasks = Some(MirrorTasks {
            token,
            refresh,
            watch,
        });
        Ok(())
    }

    /// Stop refreshing and watching. A reconciliation that already started
    /// runs to completion.
    pub async fn close_mirror(&mut self) {
        lock(&self.mirror).mark_closed();
        if let Some(tasks) = self.mirror_tasks.take() {
            tasks.token.cancel();
            let _ = tasks.refresh.await;
            if let Some(watch) = tasks.watch {
                let _ = watch.await;
            }
            info!("mirror closed");
        }
    }

    /// Reconcile the mirror now instead of waiting for a watch event.
    pub fn reconcile_mirror(&self) -> bool {
        reconcile_once(&self.tracker, &self.mirror)
    }

    /// Stop all background work and wait for pending saves.
    pub async fn shutdown(mut self) {
        if let Some(ticker) = self.ticker.take() {
            ticker.shutdown().await;
        }
        self.close_mirror().await;
        let persistence = lock(&self.tracker).persistence().clone();
        if tokio::task::spawn_blocking(move || persistence.flush()).await.is_err() {
            warn!("flush task failed during shutdown");
        }
        debug!("tracker service stopped");
    }
}

async fn refresh_loop<Tz: TimeZone + Send + 'static>(
    tracker: Arc<Mutex<Tracker>>,
    mirror: Arc<Mutex<MirrorSynchronizer<Tz>>>,
    interval: Duration,
    token: CancellationToken,
) {
    let mut ticks = tokio::time::interval(interval);
    ticks.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    ticks.tick().await;
    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = ticks.tick() => {}
        }
        let snapshot = lock(&tracker).sessions();
        if let Err(e) = lock(&mirror).refresh_at(&snapshot, Instant::now()) {
            warn!("mirror refresh failed: {e}");
        }
    }
}

async fn watch_loop<Tz: TimeZone + Send + 'static>(
    tracker: Arc<Mutex<Tracker>>,
    mirror: Arc<Mutex<MirrorSynchronizer<Tz>>>,
    mut stream: crate::mirror::WatchStream,
    token: CancellationToken,
) {
    let settle = lock(&mirror).settle_delay();
    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            event = stream.next() => {
                if event.is_none() {
                    break;
                }
            }
        }
        // Let a multi-step save finish, then fold the burst into one pass.
        tokio::time::sleep(settle).await;
        let coalesced = stream.drain();
        if coalesced > 0 {
            debug!(coalesced, "mirror change events coalesced");
        }
        reconcile_once(&tracker, &mirror);
    }
}

/// One reconciliation pass. Returns whether the store changed.
fn reconcile_once<Tz: TimeZone>(
    tracker: &Mutex<Tracker>,
    mirror: &Mutex<MirrorSynchronizer<Tz>>,
) -> bool {
    let parsed = {
        let mirror = lock(mirror);
        match mirror.state() {
            Ok(DocumentState::External(text)) => mirror.parse(&text),
            Ok(_) => return false,
            Err(e) => {
                warn!("mirror unreadable: {e}");
                return false;
            }
        }
    };
    let doc = match parsed {
        Ok(doc) => doc,
        Err(e) => {
            warn!("mirror edit not applied: {e}");
            return false;
        }
    };
    if doc.skipped > 0 {
        warn!(skipped = doc.skipped, "mirror lines not understood were dropped");
    }

    let (changed, snapshot) = {
        let mut tracker = lock(tracker);
        let changed = tracker.reconcile_mirror(&doc, Utc::now());
        (changed, tracker.sessions())
    };
    // Write back the normalized document so new lines get their tags.
    if let Err(e) = lock(mirror).render(&snapshot) {
        warn!("mirror re-render failed: {e}");
    }
    changed
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
