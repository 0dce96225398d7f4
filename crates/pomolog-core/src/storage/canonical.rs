//! The canonical session file: one JSON array of sessions.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use tracing::debug;

use super::atomic::write_atomic_with;
use crate::error::StorageError;
use crate::session::Session;

#[derive(Debug, Clone)]
pub struct CanonicalStore {
    path: PathBuf,
}

impl CanonicalStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read every session from disk.
    ///
    /// A missing file is an empty store. Anything that cannot be decoded as a
    /// whole, including a single bad timestamp or an inverted time range,
    /// fails the entire load; nothing is partially returned.
    pub fn load(&self) -> Result<Vec<Session>, StorageError> {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "no canonical store yet");
                return Ok(Vec::new());
            }
            Err(source) => {
                return Err(StorageError::ReadFailed {
                    path: self.path.clone(),
                    source,
                })
            }
        };

        let sessions: Vec<Session> =
            serde_json::from_slice(&bytes).map_err(|e| self.corrupted(e.to_string()))?;

        if let Some(bad) = sessions
            .iter()
            .find(|s| s.end_time.is_some_and(|end| end < s.start_time))
        {
            return Err(self.corrupted(format!("session {} ends before it starts", bad.id)));
        }
        Ok(sessions)
    }

    /// Atomically replace the file with `sessions`.
    pub fn save(&self, sessions: &[Session]) -> Result<(), StorageError> {
        self.save_with(sessions, |tmp, dest| {
            tmp.persist(dest).map(|_| ()).map_err(|e| e.error)
        })
    }

    pub(crate) fn save_with<F>(&self, sessions: &[Session], commit: F) -> Result<(), StorageError>
    where
        F: FnOnce(NamedTempFile, &Path) -> io::Result<()>,
    {
        let json = serde_json::to_vec_pretty(sessions).map_err(|e| StorageError::WriteFailed {
            path: self.path.clone(),
            source: io::Error::new(io::ErrorKind::InvalidData, e),
        })?;
        write_atomic_with(&self.path, &json, commit).map_err(|source| StorageError::WriteFailed {
            path: self.path.clone(),
            source,
        })?;
        debug!(path = %self.path.display(), count = sessions.len(), "canonical store saved");
        Ok(())
    }

    fn corrupted(&self, message: String) -> StorageError {
        StorageError::Corrupted {
            path: self.path.clone(),
            message,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};
    use tempfile::TempDir;

    fn sample() -> Vec<Session> {
        let start = Utc.with_ymd_and_hms(2024, 2, 1, 8, 0, 0).unwrap();
        vec![
            Session::manual("one", start, start + Duration::minutes(25), None, None),
            Session::manual("two", start + Duration::hours(1), start + Duration::minutes(85), Some("acme".into()), None),
        ]
    }

    #[test]
    fn missing_file_loads_empty() {
        let dir = TempDir::new().unwrap();
        let store = CanonicalStore::new(dir.path().join("sessions.json"));
        assert!(store.load().unwrap().is_empty());
    }

    #[test]
    fn save_then_load() {
        let dir = TempDir::new().unwrap();
        let store = CanonicalStore::new(dir.path().join("sessions.json"));
        let sessions = sample();
        store.save(&sessions).unwrap();
        assert_eq!(store.load().unwrap(), sessions);
    }

    #[test]
    fn one_bad_date_fails_the_whole_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("sessions.json");
        let store = CanonicalStore::new(&path);
        store.save(&sample()).unwrap();

        let text = fs::read_to_string(&path).unwrap();
        let broken = text.replacen("2024-02-01T09:00:00.000Z", "2024-02-31T09:00:00.000Z", 1);
        assert_ne!(text, broken);
        fs::write(&path, broken).unwrap();

        assert!(matches!(store.load(), Err(StorageError::Corrupted { .. })));
    }

    #[test]
    fn inverted_range_is_corruption() {
        let dir = TempDir::new().unwrap();
        let store = CanonicalStore::new(dir.path().join("sessions.json"));
        let mut sessions = sample();
        sessions[0].end_time = Some(sessions[0].start_time - Duration::minutes(1));
        store.save(&sessions).unwrap();
        assert!(matches!(store.load(), Err(StorageError::Corrupted { .. })));
    }

    #[test]
    fn failed_rename_keeps_previous_file_byte_identical() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("sessions.json");
        let store = CanonicalStore::new(&path);
        store.save(&sample()).unwrap();
        let before = fs::read(&path).unwrap();

        let result = store.save_with(&sample()[..1], |_tmp, _dest| {
            Err(io::Error::new(io::ErrorKind::Other, "simulated crash"))
        });

        assert!(matches!(result, Err(StorageError::WriteFailed { .. })));
        assert_eq!(fs::read(&path).unwrap(), before);
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);
    }
}
