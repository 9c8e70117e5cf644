//! TOML-based tracker configuration.
//!
//! Stores the static engine setup:
//! - Tracked periods and requested outputs
//! - Reset offset for delayed/cumulative sources
//! - Watchdog interval and late-rollover grace
//! - Time zone for calendar boundaries
//! - Configured initial floor/ceiling per period
//!
//! Configuration is stored at `~/.config/maxmin/config.toml` unless an
//! explicit path is given.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::Duration;
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use super::data_dir;
use crate::error::ConfigError;
use crate::period::{OutputKind, PeriodKind};
use crate::tracker::{ConfiguredInitial, EngineSettings};

/// Tracker configuration.
///
/// Serialized to/from TOML.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackerConfig {
    #[serde(default = "default_periods")]
    pub periods: Vec<PeriodKind>,
    #[serde(default = "default_outputs")]
    pub outputs: Vec<OutputKind>,
    /// Seconds added after every boundary before the reset runs.
    #[serde(default)]
    pub offset_secs: u64,
    #[serde(default = "default_watchdog_interval")]
    pub watchdog_interval_secs: u64,
    #[serde(default = "default_late_reset_grace")]
    pub late_reset_grace_secs: u64,
    /// IANA zone name; the host zone when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_zone: Option<String>,
    /// Configured initial bounds keyed by period name.
    #[serde(default)]
    pub initials: BTreeMap<String, ConfiguredInitial>,
}

// Default functions
fn default_periods() -> Vec<PeriodKind> {
    vec![PeriodKind::Daily]
}
fn default_outputs() -> Vec<OutputKind> {
    vec![OutputKind::Max, OutputKind::Min]
}
fn default_watchdog_interval() -> u64 {
    300
}
fn default_late_reset_grace() -> u64 {
    300
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            periods: default_periods(),
            outputs: default_outputs(),
            offset_secs: 0,
            watchdog_interval_secs: default_watchdog_interval(),
            late_reset_grace_secs: default_late_reset_grace(),
            time_zone: None,
            initials: BTreeMap::new(),
        }
    }
}

impl TrackerConfig {
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

        let mut parts = key.split('.').peekable();
        if key.is_empty() {
            return Err(unknown());
        }

        let mut current = root;
        while let Some(part) = parts.next() {
            if parts.peek().is_none() {
                let obj = current.as_object_mut().ok_or_else(unknown)?;
                let existing = obj.get(part).ok_or_else(unknown)?;

                let new_value = match existing {
                    serde_json::Value::Bool(_) => serde_json::Value::Bool(
                        value.parse::<bool>().map_err(|e| invalid(e.to_string()))?,
                    ),
                    serde_json::Value::Number(_) => {
                        if let Ok(n) = value.parse::<u64>() {
                            serde_json::Value::Number(n.into())
                        } else if let Ok(n) = value.parse::<f64>() {
                            serde_json::Number::from_f64(n)
                                .map(serde_json::Value::Number)
                                .ok_or_else(|| invalid(format!("cannot parse '{value}' as number")))?
                        } else {
                            return Err(invalid(format!("cannot parse '{value}' as number")));
                        }
                    }
                    serde_json::Value::Object(_) | serde_json::Value::Array(_) => {
                        serde_json::from_str(value).map_err(|e| invalid(e.to_string()))?
                    }
                    _ => serde_json::Value::String(value.into()),
                };

                obj.insert(part.to_string(), new_value);
                return Ok(());
            }

            current = current.get_mut(part).ok_or_else(unknown)?;
        }

        Err(unknown())
    }

    /// Default location: `<data_dir>/config.toml`.
    ///
    /// # Errors
    ///
    /// Returns an error if the data directory cannot be created.
    pub fn default_path() -> Result<PathBuf, ConfigError> {
        let dir = data_dir().map_err(|e| ConfigError::LoadFailed {
            path: PathBuf::from("~/.config/maxmin"),
            message: e.to_string(),
        })?;
        Ok(dir.join("config.toml"))
    }

    /// Load from `path`, writing the default configuration there if the
    /// file does not exist yet.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed,
    /// or if the default config cannot be written.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            let cfg = Self::default();
            cfg.save(path)?;
            return Ok(cfg);
        }
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::LoadFailed {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        toml::from_str(&content).map_err(|e| ConfigError::ParseFailed(e.to_string()))
    }

    /// Load from `path`, returning default on error.
    /// This is a convenience method that never fails.
    pub fn load_or_default(path: &Path) -> Self {
        Self::load(path).unwrap_or_default()
    }

    /// Persist to `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the config cannot be serialized or written to disk.
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let save_failed = |message: String| ConfigError::SaveFailed {
            path: path.to_path_buf(),
            message,
        };
        let content = toml::to_string_pretty(self).map_err(|e| save_failed(e.to_string()))?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| save_failed(e.to_string()))?;
        }
        std::fs::write(path, content).map_err(|e| save_failed(e.to_string()))
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

    /// Set a config value by key. The result is validated before it
    /// replaces the current configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the key is unknown, the value cannot be parsed,
    /// or the resulting configuration is invalid.
    pub fn set(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        if let Some(path) = key.strip_prefix("initials.") {
            return self.set_initial(key, path, value);
        }
        let mut json =
            serde_json::to_value(&*self).map_err(|e| ConfigError::ParseFailed(e.to_string()))?;
        if key == "time_zone" {
            // Unset zones serialize as null, so treat the key as a string field.
            json["time_zone"] = serde_json::Value::String(String::new());
        }
        Self::set_json_value_by_path(&mut json, key, value)?;
        let updated: Self = serde_json::from_value(json).map_err(|e| ConfigError::InvalidValue {
            key: key.to_string(),
            message: e.to_string(),
        })?;
        updated.validate()?;
        *self = updated;
        Ok(())
    }

    /// Set one bound through `initials.<period>.<max|min>`, creating the
    /// period entry when needed. `none` clears the bound; an entry left
    /// without bounds is dropped.
    fn set_initial(&mut self, key: &str, path: &str, value: &str) -> Result<(), ConfigError> {
        let invalid = |message: String| ConfigError::InvalidValue {
            key: key.to_string(),
            message,
        };
        let (period, bound) = path
            .split_once('.')
            .ok_or_else(|| ConfigError::UnknownKey(key.to_string()))?;
        let kind = period.parse::<PeriodKind>().map_err(|e| invalid(e.to_string()))?;
        let bound_value = match value.trim() {
            "none" | "null" => None,
            text => match text.parse::<f64>() {
                Ok(n) if n.is_finite() => Some(n),
                _ => return Err(invalid(format!("cannot parse '{value}' as number"))),
            },
        };

        let mut updated = self.clone();
        // Fold spellings such as "all-time" into the canonical name.
        let aliases: Vec<String> = updated
            .initials
            .keys()
            .filter(|name| name.parse::<PeriodKind>().ok() == Some(kind))
            .cloned()
            .collect();
        let mut initial = ConfiguredInitial::default();
        for name in aliases {
            if let Some(existing) = updated.initials.remove(&name) {
                initial = existing;
            }
        }
        match bound {
            "max" => initial.floor_max = bound_value,
            "min" => initial.ceiling_min = bound_value,
            _ => return Err(ConfigError::UnknownKey(key.to_string())),
        }
        if !initial.is_empty() {
            updated.initials.insert(kind.as_str().to_string(), initial);
        }
        updated.validate()?;
        *self = updated;
        Ok(())
    }

    /// Parsed time zone, `None` for the host zone.
    ///
    /// # Errors
    ///
    /// Returns an error for names outside the IANA database.
    pub fn time_zone(&self) -> Result<Option<Tz>, ConfigError> {
        match self.time_zone.as_deref().map(str::trim) {
            None | Some("") => Ok(None),
            Some(name) => name.parse::<Tz>().map(Some).map_err(|e| ConfigError::InvalidValue {
                key: "time_zone".to_string(),
                message: e.to_string(),
            }),
        }
    }

    /// Configured initials keyed by parsed period.
    ///
    /// # Errors
    ///
    /// Returns an error for unknown period names.
    pub fn initials(&self) -> Result<BTreeMap<PeriodKind, ConfiguredInitial>, ConfigError> {
        self.initials
            .iter()
            .map(|(name, initial)| {
                let kind = name.parse::<PeriodKind>().map_err(|e| ConfigError::InvalidValue {
                    key: format!("initials.{name}"),
                    message: e.to_string(),
                })?;
                Ok((kind, *initial))
            })
            .collect()
    }

    /// Check the configuration for values the engine cannot run with.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` naming the offending key.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |key: &str, message: &str| ConfigError::InvalidValue {
            key: key.to_string(),
            message: message.to_string(),
        };
        if self.periods.is_empty() {
            return Err(invalid("periods", "at least one period is required"));
        }
        if self.outputs.is_empty() {
            return Err(invalid("outputs", "at least one output is required"));
        }
        if self.watchdog_interval_secs == 0 {
            return Err(invalid("watchdog_interval_secs", "must be greater than zero"));
        }
        self.time_zone()?;
        for (kind, initial) in self.initials()? {
            if let (Some(max), Some(min)) = (initial.floor_max, initial.ceiling_min) {
                if max < min {
                    return Err(invalid(
                        &format!("initials.{kind}"),
                        "initial max must not be below initial min",
                    ));
                }
            }
        }
        Ok(())
    }

    pub fn offset(&self) -> Duration {
        Duration::seconds(i64::try_from(self.offset_secs).unwrap_or(i64::MAX / 1000))
    }

    pub fn watchdog_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.watchdog_interval_secs)
    }

    /// Engine settings for this configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration does not validate.
    pub fn engine_settings(&self) -> Result<EngineSettings, ConfigError> {
        self.validate()?;
        let late_grace = i64::try_from(self.late_reset_grace_secs).unwrap_or(i64::MAX / 1000);
        Ok(EngineSettings {
            periods: self.periods.clone(),
            outputs: self.outputs.clone(),
            initials: self.initials()?,
            offset: self.offset(),
            late_reset_grace: Duration::seconds(late_grace),
        })
    }
}
