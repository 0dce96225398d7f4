//! Timestamped copies of the canonical file, capped at N most recent.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use chrono::Utc;
use tracing::{debug, warn};

use crate::error::StorageError;

#[derive(Debug, Clone)]
pub struct Backups {
    source: PathBuf,
    retention: usize,
}

impl Backups {
    /// Backups of `source` live beside it as `<name>.<timestamp>.bak`.
    /// A retention of 0 disables backups.
    pub fn new(source: impl Into<PathBuf>, retention: usize) -> Self {
        Self {
            source: source.into(),
            retention,
        }
    }

    pub fn retention(&self) -> usize {
        self.retention
    }

    /// Copy the current source file to a new backup and prune old ones.
    ///
    /// Returns `None` when there is nothing to back up yet or backups are
    /// disabled.
    pub fn create(&self) -> Result<Option<PathBuf>, StorageError> {
        if self.retention == 0 || !self.source.exists() {
            return Ok(None);
        }
        let target = self.next_name();
        fs::copy(&self.source, &target).map_err(|source| StorageError::BackupFailed {
            path: self.source.clone(),
            source,
        })?;
        debug!(backup = %target.display(), "backup created");

        if let Err(e) = self.prune() {
            warn!("pruning backups failed: {e}");
        }
        Ok(Some(target))
    }

    /// Existing backups, oldest first.
    pub fn list(&self) -> io::Result<Vec<PathBuf>> {
        let Some(dir) = self.dir() else {
            return Ok(Vec::new());
        };
        let prefix = format!("{}.", self.file_name());
        let mut found: Vec<(SystemTime, PathBuf)> = Vec::new();
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if !(name.starts_with(&prefix) && name.ends_with(".bak")) {
                continue;
            }
            let meta = entry.metadata()?;
            let created = meta
                .created()
                .or_else(|_| meta.modified())
                .unwrap_or(SystemTime::UNIX_EPOCH);
            found.push((created, entry.path()));
        }
        found.sort();
        Ok(found.into_iter().map(|(_, path)| path).collect())
    }

    fn prune(&self) -> io::Result<()> {
        let all = self.list()?;
        let excess = all.len().saturating_sub(self.retention);
        for old in &all[..excess] {
            fs::remove_file(old)?;
            debug!(backup = %old.display(), "old backup removed");
        }
        Ok(())
    }

    fn next_name(&self) -> PathBuf {
        let stamp = Utc::now().format("%Y%m%dT%H%M%S%.6fZ");
        let base = format!("{}.{stamp}", self.file_name());
        let dir = self.dir().unwrap_or_else(|| Path::new("."));
        let mut candidate = dir.join(format!("{base}.bak"));
        let mut n = 1;
        while candidate.exists() {
            candidate = dir.join(format!("{base}-{n}.bak"));
            n += 1;
        }
        candidate
    }

    fn dir(&self) -> Option<&Path> {
        match self.source.parent() {
            Some(p) if p.as_os_str().is_empty() => Some(Path::new(".")),
            other => other,
        }
    }

    fn file_name(&self) -> String {
        self.source
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "sessions.json".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn nothing_to_back_up_without_source() {
        let dir = TempDir::new().unwrap();
        let backups = Backups::new(dir.path().join("sessions.json"), 3);
        assert!(backups.create().unwrap().is_none());
    }

    #[test]
    fn backup_is_byte_identical_copy() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("sessions.json");
        fs::write(&source, b"[1,2,3]").unwrap();
        let backups = Backups::new(&source, 3);
        let copy = backups.create().unwrap().unwrap();
        assert_eq!(fs::read(copy).unwrap(), b"[1,2,3]");
    }

    #[test]
    fn keeps_only_the_most_recent() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("sessions.json");
        let backups = Backups::new(&source, 2);

        let mut made = Vec::new();
        for i in 0..4 {
            fs::write(&source, format!("[{i}]")).unwrap();
            made.push(backups.create().unwrap().unwrap());
            std::thread::sleep(std::time::Duration::from_millis(20));
        }

        let kept = backups.list().unwrap();
        assert_eq!(kept, made[2..].to_vec());
        assert_eq!(fs::read(&kept[1]).unwrap(), b"[3]");
    }

    #[test]
    fn zero_retention_disables_backups() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("sessions.json");
        fs::write(&source, b"[]").unwrap();
        assert!(Backups::new(&source, 0).create().unwrap().is_none());
    }
}
