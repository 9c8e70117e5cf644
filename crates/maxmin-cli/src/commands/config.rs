use clap::Subcommand;
use maxmin_core::{ConfigError, Result, TrackerConfig};

use super::Context;

#[derive(Subcommand)]
pub enum ConfigAction {
    /// Get a config value
    Get {
        /// Config key (e.g. "offset_secs", "initials.daily.max")
        key: String,
    },
    /// Set a config value
    Set {
        /// Config key
        key: String,
        /// New value
        value: String,
    },
    /// List all config values
    List,
    /// Reset config to defaults
    Reset,
}

pub fn run(ctx: &Context, action: ConfigAction) -> Result<()> {
    let path = ctx.config_path()?;
    match action {
        ConfigAction::Get { key } => {
            let config = TrackerConfig::load(&path)?;
            let value = config.get(&key).ok_or(ConfigError::UnknownKey(key))?;
            println!("{value}");
        }
        ConfigAction::Set { key, value } => {
            let mut config = TrackerConfig::load(&path)?;
            config.set(&key, &value)?;
            config.save(&path)?;
            println!("ok");
        }
        ConfigAction::List => {
            let config = TrackerConfig::load(&path)?;
            let json = serde_json::to_string_pretty(&config)?;
            println!("{json}");
        }
        ConfigAction::Reset => {
            let config = TrackerConfig::default();
            config.save(&path)?;
            println!("config reset to defaults");
        }
    }
    Ok(())
}
