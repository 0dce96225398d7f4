//! TOML-based application configuration.
//!
//! Stores:
//! - Default session length
//! - Canonical store location and backup retention
//! - Mirror document location and refresh timings
//!
//! Configuration is stored at `~/.config/pomolog/config.toml`. Relative paths
//! are resolved against the data directory.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::data_dir;
use crate::error::ConfigError;

/// Timer configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimerConfig {
    #[serde(default = "default_session_length_min")]
    pub session_length_min: u32,
}

/// Canonical store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_canonical_file")]
    pub canonical_file: String,
    #[serde(default = "default_backup_retention")]
    pub backup_retention: u32,
}

/// Mirror document configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MirrorConfig {
    #[serde(default = "default_mirror_path")]
    pub path: String,
    /// Re-render interval while the document is open.
    #[serde(default = "default_refresh_interval_secs")]
    pub refresh_interval_secs: u64,
    /// Inactivity after which the document counts as closed.
    #[serde(default = "default_open_lapse_secs")]
    pub open_lapse_secs: u64,
    /// Wait after a change notification before reconciling.
    #[serde(default = "default_settle_delay_ms")]
    pub settle_delay_ms: u64,
}

/// Application configuration.
///
/// Serialized to/from TOML at `~/.config/pomolog/config.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub timer: TimerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub mirror: MirrorConfig,
}

/// Read-only settings the core consumes for one operation.
#[derive(Debug, Clone)]
pub struct CoreSettings {
    pub session_length_secs: i64,
    pub canonical_path: PathBuf,
    pub backup_retention: usize,
    pub mirror_path: PathBuf,
    pub mirror_refresh: Duration,
    pub mirror_open_lapse: Duration,
    pub settle_delay: Duration,
}

// Default functions
fn default_session_length_min() -> u32 {
    25
}
fn default_canonical_file() -> String {
    "sessions.json".into()
}
fn default_backup_retention() -> u32 {
    10
}
fn default_mirror_path() -> String {
    "sessions.md".into()
}
fn default_refresh_interval_secs() -> u64 {
    2
}
fn default_open_lapse_secs() -> u64 {
    300
}
fn default_settle_delay_ms() -> u64 {
    750
}

impl Default for TimerConfig {
    fn default() -> Self {
        Self {
            session_length_min: default_session_length_min(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            canonical_file: default_canonical_file(),
            backup_retention: default_backup_retention(),
        }
    }
}

impl Default for MirrorConfig {
    fn default() -> Self {
        Self {
            path: default_mirror_path(),
            refresh_interval_secs: default_refresh_interval_secs(),
            open_lapse_secs: default_open_lapse_secs(),
            settle_delay_ms: default_settle_delay_ms(),
        }
    }
}

impl Config {
    fn get_json_value_by_path<'a>(
        root: &'a serde_json::Value,
        key: &str,
    ) -> Option<&'a serde_json::Value> {
        if key.is_empty() {
            return None;
        }

        let mut current = root;
        for part in key.split('.') {
            current = current.get(part)?;
        }
        Some(current)
    }

    fn set_json_value_by_path(
        root: &mut serde_json::Value,
        key: &str,
        value: &str,
    ) -> Result<(), ConfigError> {
        let unknown = || ConfigError::UnknownKey(key.to_string());
        let invalid = |message: String| ConfigError::InvalidValue {
            key: key.to_string(),
            message,
        };

        let (parent_path, leaf) = match key.rsplit_once('.') {
            Some((parent, leaf)) => (Some(parent), leaf),
            None => (None, key),
        };
        if leaf.is_empty() {
            return Err(unknown());
        }

        let mut current = root;
        if let Some(parent_path) = parent_path {
            for part in parent_path.split('.') {
                current = current.get_mut(part).ok_or_else(unknown)?;
            }
        }
        let obj = current.as_object_mut().ok_or_else(unknown)?;
        let existing = obj.get(leaf).ok_or_else(unknown)?;

        let new_value = match existing {
            serde_json::Value::Bool(_) => serde_json::Value::Bool(
                value
                    .parse::<bool>()
                    .map_err(|e| invalid(e.to_string()))?,
            ),
            serde_json::Value::Number(_) => {
                let n = value
                    .parse::<u64>()
                    .map_err(|_| invalid(format!("cannot parse '{value}' as a whole number")))?;
                serde_json::Value::Number(n.into())
            }
            serde_json::Value::Object(_) | serde_json::Value::Array(_) => {
                return Err(invalid("cannot set a whole section".into()))
            }
            _ => serde_json::Value::String(value.into()),
        };

        obj.insert(leaf.to_string(), new_value);
        Ok(())
    }

    pub fn path() -> Result<PathBuf, ConfigError> {
        Ok(data_dir()?.join("config.toml"))
    }

    /// Load from the data directory, writing defaults on first use.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file exists but cannot be parsed,
    /// or if the default config cannot be written to disk.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&Self::path()?)
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::read_to_string(path) {
            Ok(content) => toml::from_str(&content).map_err(|e| ConfigError::LoadFailed {
                path: path.to_path_buf(),
                message: e.to_string(),
            }),
            Err(_) => {
                let cfg = Self::default();
                cfg.save_to(path)?;
                Ok(cfg)
            }
        }
    }

    /// Persist to disk.
    ///
    /// # Errors
    ///
    /// Returns an error if the config cannot be serialized or written to disk.
    pub fn save(&self) -> Result<(), ConfigError> {
        self.save_to(&Self::path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        let failed = |message: String| ConfigError::SaveFailed {
            path: path.to_path_buf(),
            message,
        };
        let content = toml::to_string_pretty(self).map_err(|e| failed(e.to_string()))?;
        super::write_atomic(path, content.as_bytes()).map_err(|e| failed(e.to_string()))
    }

    /// Get a config value as string by dot-separated key.
    pub fn get(&self, key: &str) -> Option<String> {
        let json = serde_json::to_value(self).ok()?;
        let val = Self::get_json_value_by_path(&json, key)?;
        match val {
            serde_json::Value::String(s) => Some(s.clone()),
            other => Some(other.to_string()),
        }
    }

    /// Set a config value by key without saving.
    ///
    /// # Errors
    ///
    /// Returns an error if the key is unknown or the value cannot be parsed.
    pub fn set(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        let invalid = |message: String| ConfigError::InvalidValue {
            key: key.to_string(),
            message,
        };
        let mut json = serde_json::to_value(&*self).map_err(|e| invalid(e.to_string()))?;
        Self::set_json_value_by_path(&mut json, key, value)?;
        let updated: Config = serde_json::from_value(json).map_err(|e| invalid(e.to_string()))?;
        updated.validate()?;
        *self = updated;
        Ok(())
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.timer.session_length_min == 0 {
            return Err(ConfigError::InvalidValue {
                key: "timer.session_length_min".into(),
                message: "must be at least 1".into(),
            });
        }
        if self.mirror.refresh_interval_secs == 0 {
            return Err(ConfigError::InvalidValue {
                key: "mirror.refresh_interval_secs".into(),
                message: "must be at least 1".into(),
            });
        }
        Ok(())
    }

    /// Resolve paths against `dir` and freeze the values the core reads.
    pub fn snapshot_in(&self, dir: &Path) -> CoreSettings {
        let resolve = |p: &str| {
            let p = Path::new(p);
            if p.is_absolute() {
                p.to_path_buf()
            } else {
                dir.join(p)
            }
        };
        CoreSettings {
            session_length_secs: i64::from(self.timer.session_length_min.max(1)) * 60,
            canonical_path: resolve(&self.storage.canonical_file),
            backup_retention: self.storage.backup_retention as usize,
            mirror_path: resolve(&self.mirror.path),
            mirror_refresh: Duration::from_secs(self.mirror.refresh_interval_secs.max(1)),
            mirror_open_lapse: Duration::from_secs(self.mirror.open_lapse_secs),
            settle_delay: Duration::from_millis(self.mirror.settle_delay_ms),
        }
    }

    /// [`snapshot_in`](Self::snapshot_in) the default data directory.
    pub fn snapshot(&self) -> Result<CoreSettings, ConfigError> {
        Ok(self.snapshot_in(&data_dir()?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn default_config_roundtrip() {
        let cfg = Config::default();
        let toml_str = toml::to_string_pretty(&cfg).unwrap();
        let parsed: Config = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.timer.session_length_min, 25);
        assert_eq!(parsed.storage.backup_retention, 10);
        assert_eq!(parsed.mirror.refresh_interval_secs, 2);
    }

    #[test]
    fn partial_file_fills_defaults() {
        let parsed: Config = toml::from_str("[timer]\nsession_length_min = 50\n").unwrap();
        assert_eq!(parsed.timer.session_length_min, 50);
        assert_eq!(parsed.mirror.open_lapse_secs, 300);
        assert_eq!(parsed.storage.canonical_file, "sessions.json");
    }

    #[test]
    fn get_supports_dot_path_keys() {
        let cfg = Config::default();
        assert_eq!(cfg.get("timer.session_length_min").as_deref(), Some("25"));
        assert_eq!(cfg.get("mirror.path").as_deref(), Some("sessions.md"));
        assert!(cfg.get("mirror.missing_key").is_none());
    }

    #[test]
    fn set_updates_nested_number_and_string() {
        let mut cfg = Config::default();
        cfg.set("storage.backup_retention", "3").unwrap();
        cfg.set("mirror.path", "/tmp/log.md").unwrap();
        assert_eq!(cfg.storage.backup_retention, 3);
        assert_eq!(cfg.mirror.path, "/tmp/log.md");
    }

    #[test]
    fn set_rejects_unknown_keys_and_bad_values() {
        let mut cfg = Config::default();
        assert!(matches!(
            cfg.set("timer.nonexistent", "1"),
            Err(ConfigError::UnknownKey(_))
        ));
        assert!(matches!(
            cfg.set("timer.session_length_min", "soon"),
            Err(ConfigError::InvalidValue { .. })
        ));
        assert!(cfg.set("timer.session_length_min", "0").is_err());
        assert_eq!(cfg.timer.session_length_min, 25);
        assert!(cfg.set("timer", "1").is_err());
    }

    #[test]
    fn snapshot_resolves_relative_paths() {
        let mut cfg = Config::default();
        cfg.mirror.path = "/abs/mirror.md".into();
        let settings = cfg.snapshot_in(Path::new("/data"));
        assert_eq!(settings.canonical_path, PathBuf::from("/data/sessions.json"));
        assert_eq!(settings.mirror_path, PathBuf::from("/abs/mirror.md"));
        assert_eq!(settings.session_length_secs, 25 * 60);
        assert_eq!(settings.mirror_refresh, Duration::from_secs(2));
    }

    #[test]
    fn load_from_writes_defaults_on_first_use() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        let cfg = Config::load_from(&path).unwrap();
        assert_eq!(cfg.timer.session_length_min, 25);
        assert!(path.exists());
    }
}
