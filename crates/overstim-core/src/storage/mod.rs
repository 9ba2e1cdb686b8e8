//! Settings persistence.
//!
//! User settings live in a TOML file under the data directory. The
//! [`SettingsStore`] trait is the seam hosts depend on; tests swap in
//! [`MemorySettingsStore`].

mod settings;

pub use settings::{MemorySettingsStore, SettingsStore, TomlSettingsStore, UserSettings};

use std::path::PathBuf;

use crate::error::StorageError;

/// Environment variable selecting the data directory flavour.
pub const ENV_VAR: &str = "OVERSTIM_ENV";

/// Returns `~/.config/overstim[-dev]/` based on `OVERSTIM_ENV`.
///
/// Set `OVERSTIM_ENV=dev` to use the development data directory.
///
/// # Errors
/// Returns an error if creating the directory fails.
pub fn data_dir() -> Result<PathBuf, StorageError> {
    let base_dir = dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".config");

    let env = std::env::var(ENV_VAR).unwrap_or_else(|_| "production".to_string());

    let dir = if env == "dev" {
        base_dir.join("overstim-dev")
    } else {
        base_dir.join("overstim")
    };

    std::fs::create_dir_all(&dir)
        .map_err(|e| StorageError::DataDir(format!("{}: {e}", dir.display())))?;
    Ok(dir)
}
