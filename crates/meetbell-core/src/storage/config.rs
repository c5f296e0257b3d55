//! TOML-based application configuration.
//!
//! Stores user preferences including:
//! - Alert stage offsets and snooze defaults
//! - Which calendar sources to sync and how often
//! - Event eligibility filters
//! - Rate-limit backoff tuning
//!
//! Configuration is stored at `~/.config/meetbell/config.toml`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::data_dir;
use crate::alert::AlertOffsets;
use crate::calendar::EligibilityFilter;
use crate::error::ConfigError;
use crate::sync::{PollingInterval, PollingSchedule};

/// Alert configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertConfig {
    /// Early reminder, minutes before start (0 = off).
    #[serde(default = "default_stage1_minutes")]
    pub stage1_minutes: u32,
    /// Urgent reminder, minutes before start (0 = off).
    #[serde(default = "default_stage2_minutes")]
    pub stage2_minutes: u32,
    #[serde(default = "default_snooze_minutes")]
    pub default_snooze_minutes: u32,
    /// Deliver stage-1 reminders passively while in a back-to-back meeting.
    #[serde(default = "default_true")]
    pub downgrade_back_to_back: bool,
}

/// Sync configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Enabled source ids.
    #[serde(default)]
    pub sources: Vec<String>,
    #[serde(default = "default_window_hours")]
    pub window_hours: u32,
    #[serde(default = "default_imminent_secs")]
    pub imminent_secs: u64,
    #[serde(default = "default_upcoming_secs")]
    pub upcoming_secs: u64,
    #[serde(default = "default_idle_secs")]
    pub idle_secs: u64,
    /// Delay before the single retry of a network/timeout failure.
    #[serde(default = "default_transient_retry_secs")]
    pub transient_retry_secs: u64,
    /// Directory read by the file event source (`<dir>/<source>.json`).
    #[serde(default)]
    pub events_dir: Option<PathBuf>,
}

/// Rate-limit backoff configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateLimitConfig {
    #[serde(default = "default_backoff_base_secs")]
    pub base_secs: u64,
    /// Exponent cap: the backoff stops doubling after this many hits.
    #[serde(default = "default_max_exponent")]
    pub max_exponent: u32,
    /// Jitter as a fraction of the backoff (0.2 = ±20%).
    #[serde(default = "default_jitter_ratio")]
    pub jitter_ratio: f64,
    /// Random seed for reproducible jitter (None = random)
    #[serde(default)]
    pub seed: Option<u64>,
}

/// Application configuration.
///
/// Serialized to/from TOML at `~/.config/meetbell/config.toml`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub alerts: AlertConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub filter: EligibilityFilter,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
}

// Default functions
fn default_stage1_minutes() -> u32 {
    5
}
fn default_stage2_minutes() -> u32 {
    1
}
fn default_snooze_minutes() -> u32 {
    2
}
fn default_true() -> bool {
    true
}
fn default_window_hours() -> u32 {
    24
}
fn default_imminent_secs() -> u64 {
    60
}
fn default_upcoming_secs() -> u64 {
    300
}
fn default_idle_secs() -> u64 {
    900
}
fn default_transient_retry_secs() -> u64 {
    5
}
fn default_backoff_base_secs() -> u64 {
    60
}
fn default_max_exponent() -> u32 {
    5
}
fn default_jitter_ratio() -> f64 {
    0.2
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            stage1_minutes: default_stage1_minutes(),
            stage2_minutes: default_stage2_minutes(),
            default_snooze_minutes: default_snooze_minutes(),
            downgrade_back_to_back: true,
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            sources: Vec::new(),
            window_hours: default_window_hours(),
            imminent_secs: default_imminent_secs(),
            upcoming_secs: default_upcoming_secs(),
            idle_secs: default_idle_secs(),
            transient_retry_secs: default_transient_retry_secs(),
            events_dir: None,
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            base_secs: default_backoff_base_secs(),
            max_exponent: default_max_exponent(),
            jitter_ratio: default_jitter_ratio(),
            seed: None,
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

        let mut parts = key.split('.').peekable();
        if parts.peek().is_none() {
            return Err(unknown());
        }

        let mut current = root;
        while let Some(part) = parts.next() {
            let is_leaf = parts.peek().is_none();
            if is_leaf {
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
                            let number = serde_json::Number::from_f64(n).ok_or_else(|| {
                                invalid(format!("cannot parse '{value}' as number"))
                            })?;
                            serde_json::Value::Number(number)
                        } else {
                            return Err(invalid(format!("cannot parse '{value}' as number")));
                        }
                    }
                    serde_json::Value::Object(_) | serde_json::Value::Array(_) => {
                        serde_json::from_str(value).map_err(|e| invalid(e.to_string()))?
                    }
                    // Unset optional: accept a JSON literal, else treat as text.
                    serde_json::Value::Null => serde_json::from_str(value)
                        .unwrap_or_else(|_| serde_json::Value::String(value.into())),
                    _ => serde_json::Value::String(value.into()),
                };

                obj.insert(part.to_string(), new_value);
                return Ok(());
            }

            current = current.get_mut(part).ok_or_else(unknown)?;
        }

        Err(unknown())
    }

    pub fn path() -> Result<PathBuf, ConfigError> {
        let dir = data_dir().map_err(|e| ConfigError::LoadFailed {
            path: PathBuf::from("~/.config/meetbell"),
            message: e.to_string(),
        })?;
        Ok(dir.join("config.toml"))
    }

    /// Load from the default location, writing defaults if the file is missing.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file exists but cannot be parsed,
    /// or if the default config cannot be written to disk.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::path()?;
        if !path.exists() {
            let cfg = Self::default();
            cfg.save_to(&path)?;
            return Ok(cfg);
        }
        Self::load_from(&path)
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::LoadFailed {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        let cfg: Config =
            toml::from_str(&content).map_err(|e| ConfigError::ParseFailed(e.to_string()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Persist to the default location.
    pub fn save(&self) -> Result<(), ConfigError> {
        self.save_to(&Self::path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        let save_failed = |message: String| ConfigError::SaveFailed {
            path: path.to_path_buf(),
            message,
        };
        let content = toml::to_string_pretty(self).map_err(|e| save_failed(e.to_string()))?;
        std::fs::write(path, content).map_err(|e| save_failed(e.to_string()))
    }

    /// Reject values the engines cannot work with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..1.0).contains(&self.rate_limit.jitter_ratio) {
            return Err(ConfigError::InvalidValue {
                key: "rate_limit.jitter_ratio".into(),
                message: "must be in [0, 1)".into(),
            });
        }
        if self.sync.window_hours == 0 {
            return Err(ConfigError::InvalidValue {
                key: "sync.window_hours".into(),
                message: "must be positive".into(),
            });
        }
        Ok(())
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
    pub fn set_value(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        let mut json =
            serde_json::to_value(&*self).map_err(|e| ConfigError::ParseFailed(e.to_string()))?;
        Self::set_json_value_by_path(&mut json, key, value)?;
        let updated: Config =
            serde_json::from_value(json).map_err(|e| ConfigError::InvalidValue {
                key: key.to_string(),
                message: e.to_string(),
            })?;
        updated.validate()?;
        *self = updated;
        Ok(())
    }

    /// Set a config value by key and save.
    pub fn set(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        self.set_value(key, value)?;
        self.save()
    }

    pub fn offsets(&self) -> AlertOffsets {
        AlertOffsets::new(self.alerts.stage1_minutes, self.alerts.stage2_minutes)
    }

    pub fn default_snooze(&self) -> chrono::Duration {
        chrono::Duration::minutes(i64::from(self.alerts.default_snooze_minutes))
    }

    pub fn fetch_window(&self) -> chrono::Duration {
        chrono::Duration::hours(i64::from(self.sync.window_hours))
    }

    pub fn transient_retry_delay(&self) -> Duration {
        Duration::from_secs(self.sync.transient_retry_secs)
    }

    pub fn polling_schedule(&self) -> PollingSchedule {
        PollingSchedule {
            imminent: Duration::from_secs(self.sync.imminent_secs),
            upcoming: Duration::from_secs(self.sync.upcoming_secs),
            idle: Duration::from_secs(self.sync.idle_secs),
        }
    }

    /// Base delay for one polling tier.
    pub fn polling_delay(&self, interval: PollingInterval) -> Duration {
        self.polling_schedule().delay(interval)
    }
}
