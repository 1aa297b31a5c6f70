//! Cross-Platform Path Utilities
//!
//! Resolves the application directory (~/.insight-cascade/).

use std::path::{Path, PathBuf};

use crate::utils::error::{AppError, AppResult};

/// Get the user's home directory
pub fn home_dir() -> AppResult<PathBuf> {
    dirs::home_dir().ok_or_else(|| AppError::config("Could not determine home directory"))
}

/// Get the Insight Cascade directory (~/.insight-cascade/)
pub fn insight_cascade_dir() -> AppResult<PathBuf> {
    Ok(home_dir()?.join(".insight-cascade"))
}

/// Get the config file path (~/.insight-cascade/config.json)
pub fn config_path() -> AppResult<PathBuf> {
    Ok(insight_cascade_dir()?.join("config.json"))
}

/// Ensure a directory exists, creating it if necessary
pub fn ensure_dir(path: &Path) -> AppResult<()> {
    if !path.exists() {
        std::fs::create_dir_all(path)?;
    }
    Ok(())
}

/// Get the Insight Cascade directory, creating if it doesn't exist
pub fn ensure_insight_cascade_dir() -> AppResult<PathBuf> {
    let path = insight_cascade_dir()?;
    ensure_dir(&path)?;
    Ok(path)
}
