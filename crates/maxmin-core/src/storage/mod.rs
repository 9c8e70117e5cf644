mod config;
pub mod database;

pub use config::TrackerConfig;
pub use database::Database;

use std::path::PathBuf;

/// Returns `~/.config/maxmin[-dev]/` based on MAXMIN_ENV.
///
/// Set MAXMIN_ENV=dev to use development data directory.
///
/// # Errors
/// Returns an error if creating the directory fails.
pub fn data_dir() -> std::io::Result<PathBuf> {
    let base_dir = dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".config");

    let env = std::env::var("MAXMIN_ENV").unwrap_or_else(|_| "production".to_string());

    let dir = if env == "dev" {
        base_dir.join("maxmin-dev")
    } else {
        base_dir.join("maxmin")
    };

    std::fs::create_dir_all(&dir)?;
    Ok(dir)
}
