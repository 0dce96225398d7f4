mod atomic;
mod backup;
mod canonical;
mod config;
mod coordinator;

pub use backup::Backups;
pub use canonical::CanonicalStore;
pub use config::{Config, CoreSettings, MirrorConfig, StorageConfig, TimerConfig};
pub use coordinator::PersistenceCoordinator;

pub use atomic::write_atomic;

use std::path::PathBuf;

use crate::error::ConfigError;

/// Returns `~/.config/pomolog[-dev]/` based on POMOLOG_ENV.
///
/// Set POMOLOG_ENV=dev to use development data directory. POMOLOG_HOME, when
/// set, is used verbatim.
///
/// # Errors
/// Returns an error if creating the directory fails.
pub fn data_dir() -> Result<PathBuf, ConfigError> {
    let dir = match std::env::var_os("POMOLOG_HOME") {
        Some(home) => PathBuf::from(home),
        None => {
            let base_dir = dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".config");
            let env = std::env::var("POMOLOG_ENV").unwrap_or_else(|_| "production".to_string());
            if env == "dev" {
                base_dir.join("pomolog-dev")
            } else {
                base_dir.join("pomolog")
            }
        }
    };

    std::fs::create_dir_all(&dir)
        .map_err(|e| ConfigError::DataDir(format!("{}: {e}", dir.display())))?;
    Ok(dir)
}
