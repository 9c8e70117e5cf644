pub mod config;
pub mod forget;
pub mod periods;
pub mod run;
pub mod status;

use std::path::PathBuf;

use maxmin_core::{ConfigError, Database, DatabaseError, TrackerConfig};

/// File locations shared by every command.
pub struct Context {
    config: Option<PathBuf>,
    db: Option<PathBuf>,
}

impl Context {
    pub fn new(config: Option<PathBuf>, db: Option<PathBuf>) -> Self {
        Self { config, db }
    }

    pub fn config_path(&self) -> Result<PathBuf, ConfigError> {
        match &self.config {
            Some(path) => Ok(path.clone()),
            None => TrackerConfig::default_path(),
        }
    }

    pub fn load_config(&self) -> Result<TrackerConfig, ConfigError> {
        TrackerConfig::load(&self.config_path()?)
    }

    pub fn open_db(&self) -> Result<Database, DatabaseError> {
        match &self.db {
            Some(path) => Database::open_at(path),
            None => Database::open(),
        }
    }
}
