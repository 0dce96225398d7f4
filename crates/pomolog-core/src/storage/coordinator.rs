//! Background persistence with a single coalescing slot.
//!
//! At most one background save runs at a time. Requests that arrive while it
//! runs overwrite each other in the slot, so the queue never grows: the worker
//! always writes the most recent snapshot it finds, then exits once the slot is
//! empty.

use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;

use tracing::{debug, error, warn};

use super::backup::Backups;
use super::canonical::CanonicalStore;
use crate::error::StorageError;
use crate::session::Session;

struct SaveRequest {
    sessions: Vec<Session>,
    /// Copy the current file to a backup before overwriting it.
    backup: bool,
}

#[derive(Default)]
struct SaveSlot {
    pending: Option<SaveRequest>,
    running: bool,
    worker: Option<JoinHandle<()>>,
}

struct Inner {
    store: CanonicalStore,
    backups: Backups,
    slot: Mutex<SaveSlot>,
    last_error: Mutex<Option<String>>,
}

#[derive(Clone)]
pub struct PersistenceCoordinator {
    inner: Arc<Inner>,
}

impl PersistenceCoordinator {
    pub fn new(store: CanonicalStore, backups: Backups) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                backups,
                slot: Mutex::new(SaveSlot::default()),
                last_error: Mutex::new(None),
            }),
        }
    }

    pub fn path(&self) -> PathBuf {
        self.inner.store.path().to_path_buf()
    }

    pub fn load(&self) -> Result<Vec<Session>, StorageError> {
        self.inner.store.load()
    }

    /// Write `sessions` now, on the caller's thread.
    ///
    /// Waits for queued background saves first so an older snapshot cannot
    /// land on top of this one.
    pub fn save(&self, sessions: &[Session]) -> Result<(), StorageError> {
        self.flush();
        self.inner.store.save(sessions)
    }

    /// Copy the current canonical file to a fresh backup now.
    pub fn backup(&self) -> Result<Option<PathBuf>, StorageError> {
        self.flush();
        self.inner.backups.create()
    }

    /// Queue `sessions` for a background write and return immediately.
    ///
    /// If a save is already queued its snapshot is replaced by this one;
    /// backup requests are merged so a pending backup is never dropped.
    pub fn save_async(&self, sessions: Vec<Session>, backup: bool) {
        let mut slot = self.inner.lock_slot();
        let backup = backup || slot.pending.as_ref().is_some_and(|p| p.backup);
        if slot.pending.is_some() {
            debug!("coalescing pending save");
        }
        slot.pending = Some(SaveRequest { sessions, backup });
        if slot.running {
            return;
        }
        slot.running = true;

        let inner = Arc::clone(&self.inner);
        match std::thread::Builder::new()
            .name("pomolog-save".into())
            .spawn(move || inner.drain())
        {
            Ok(handle) => slot.worker = Some(handle),
            Err(e) => {
                warn!("could not spawn save worker, saving inline: {e}");
                drop(slot);
                self.inner.drain();
            }
        }
    }

    /// Block until every save queued before this call has been written.
    pub fn flush(&self) {
        loop {
            let worker = self.inner.lock_slot().worker.take();
            match worker {
                Some(handle) => {
                    if handle.join().is_err() {
                        error!("save worker panicked");
                    }
                }
                None => break,
            }
        }
    }

    /// True while nothing is queued or being written.
    pub fn is_idle(&self) -> bool {
        let slot = self.inner.lock_slot();
        !slot.running && slot.pending.is_none()
    }

    /// Message of the most recent failed background save, cleared by the next
    /// successful one.
    pub fn last_error(&self) -> Option<String> {
        self.inner
            .last_error
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl Inner {
    fn lock_slot(&self) -> MutexGuard<'_, SaveSlot> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn drain(&self) {
        loop {
            let request = {
                let mut slot = self.lock_slot();
                match slot.pending.take() {
                    Some(request) => request,
                    None => {
                        slot.running = false;
                        return;
                    }
                }
            };
            self.write(request);
        }
    }

    fn write(&self, request: SaveRequest) {
        if request.backup {
            if let Err(e) = self.backups.create() {
                warn!("{e}");
            }
        }
        let outcome = self.store.save(&request.sessions);
        let mut last_error = self.last_error.lock().unwrap_or_else(PoisonError::into_inner);
        match outcome {
            Ok(()) => *last_error = None,
            Err(e) => {
                error!("background save failed: {e}");
                *last_error = Some(e.to_string());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};
    use tempfile::TempDir;

    fn session(n: i64) -> Session {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 9, 0, 0).unwrap() + Duration::hours(n);
        let mut session =
            Session::manual(format!("s{n}"), start, start + Duration::minutes(25), None, None);
        session.id = format!("manual-{n}");
        session
    }

    fn coordinator(dir: &TempDir, retention: usize) -> PersistenceCoordinator {
        let path = dir.path().join("sessions.json");
        PersistenceCoordinator::new(CanonicalStore::new(&path), Backups::new(&path, retention))
    }

    #[test]
    fn async_saves_coalesce_to_latest_snapshot() {
        let dir = TempDir::new().unwrap();
        let coord = coordinator(&dir, 0);
        let mut all = Vec::new();
        for n in 0..20 {
            all.push(session(n));
            coord.save_async(all.clone(), false);
        }
        coord.flush();
        assert!(coord.is_idle());
        assert_eq!(coord.load().unwrap(), all);
        assert!(coord.last_error().is_none());
    }

    #[test]
    fn backup_flag_survives_coalescing() {
        let dir = TempDir::new().unwrap();
        let coord = coordinator(&dir, 5);
        coord.save(&[session(0)]).unwrap();

        // Hold the slot so both requests coalesce before the worker sees them.
        {
            let mut slot = coord.inner.lock_slot();
            slot.running = true;
        }
        coord.save_async(vec![session(1)], true);
        coord.save_async(vec![session(2)], false);
        {
            let slot = coord.inner.lock_slot();
            assert!(slot.pending.as_ref().unwrap().backup);
        }
        coord.inner.drain();

        let backups = Backups::new(coord.path(), 5).list().unwrap();
        assert_eq!(backups.len(), 1);
        assert_eq!(coord.load().unwrap(), vec![session(2)]);
    }

    #[test]
    fn failed_background_save_is_reported() {
        let dir = TempDir::new().unwrap();
        // A directory where the file should be makes the rename fail.
        let path = dir.path().join("sessions.json");
        std::fs::create_dir(&path).unwrap();
        std::fs::write(path.join("keep"), b"x").unwrap();
        let coord = PersistenceCoordinator::new(CanonicalStore::new(&path), Backups::new(&path, 0));

        coord.save_async(vec![session(0)], false);
        coord.flush();
        assert!(coord.last_error().is_some());
    }
}
