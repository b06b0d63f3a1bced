//! TOML-based application configuration.
//!
//! Stores user preferences including:
//! - Focus and break lengths, and the number of focus runs per cycle
//! - Foreground loop timing (tick interval, delay before entering a break)
//! - Session write retry behaviour
//!
//! Configuration is stored at `~/.config/cadence/config.toml`.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::data_dir;
use crate::error::ConfigError;
use crate::ledger::RetryPolicy;
use crate::settings::SettingsProvider;
use crate::timer::policy::{DEFAULT_BREAK_MIN, DEFAULT_FOCUS_MIN, DEFAULT_SESSIONS_BEFORE_LONG_BREAK};

/// Timer-specific configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimerConfig {
    /// Focus length in minutes.
    #[serde(default = "default_focus_duration")]
    pub focus_duration: u32,
    /// Short break length in minutes. Long breaks are always twice this.
    #[serde(default = "default_break_duration")]
    pub break_duration: u32,
    #[serde(default = "default_sessions_before_long_break")]
    pub sessions_before_long_break: u32,
    /// Pause between a finished focus run and entering its break.
    #[serde(default = "default_completion_delay_ms")]
    pub completion_delay_ms: u64,
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,
}

/// Session persistence configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_persist_retries")]
    pub persist_retries: u32,
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
}

/// Application configuration.
///
/// Serialized to/from TOML at `~/.config/cadence/config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub timer: TimerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

// Default functions
fn default_focus_duration() -> u32 {
    DEFAULT_FOCUS_MIN
}
fn default_break_duration() -> u32 {
    DEFAULT_BREAK_MIN
}
fn default_sessions_before_long_break() -> u32 {
    DEFAULT_SESSIONS_BEFORE_LONG_BREAK
}
fn default_completion_delay_ms() -> u64 {
    1500
}
fn default_tick_interval_ms() -> u64 {
    1000
}
fn default_persist_retries() -> u32 {
    3
}
fn default_retry_backoff_ms() -> u64 {
    250
}

impl Default for TimerConfig {
    fn default() -> Self {
        Self {
            focus_duration: default_focus_duration(),
            break_duration: default_break_duration(),
            sessions_before_long_break: default_sessions_before_long_break(),
            completion_delay_ms: default_completion_delay_ms(),
            tick_interval_ms: default_tick_interval_ms(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            persist_retries: default_persist_retries(),
            retry_backoff_ms: default_retry_backoff_ms(),
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
        let mut current = root;
        while let Some(part) = parts.next() {
            if parts.peek().is_some() {
                current = current.get_mut(part).ok_or_else(unknown)?;
                continue;
            }

            let obj = current.as_object_mut().ok_or_else(unknown)?;
            let existing = obj.get(part).ok_or_else(unknown)?;
            let new_value = match existing {
                serde_json::Value::Bool(_) => serde_json::Value::Bool(
                    value.parse::<bool>().map_err(|e| invalid(e.to_string()))?,
                ),
                serde_json::Value::Number(_) => value
                    .parse::<u64>()
                    .map(|n| serde_json::Value::Number(n.into()))
                    .map_err(|_| invalid(format!("cannot parse '{value}' as a whole number")))?,
                serde_json::Value::Object(_) | serde_json::Value::Array(_) => {
                    return Err(invalid("not a leaf key".into()));
                }
                _ => serde_json::Value::String(value.into()),
            };
            obj.insert(part.to_string(), new_value);
            return Ok(());
        }

        Err(unknown())
    }

    fn path() -> Result<PathBuf, ConfigError> {
        Ok(data_dir()?.join("config.toml"))
    }

    /// Load from disk or return default.
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
        let save_failed = |message: String| ConfigError::SaveFailed {
            path: path.to_path_buf(),
            message,
        };
        let content = toml::to_string_pretty(self).map_err(|e| save_failed(e.to_string()))?;
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

    /// Set a config value by key without saving.
    ///
    /// # Errors
    ///
    /// Returns an error if the key is unknown or the value cannot be parsed.
    pub fn update(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        let invalid = |message: String| ConfigError::InvalidValue {
            key: key.to_string(),
            message,
        };
        let mut json = serde_json::to_value(&*self).map_err(|e| invalid(e.to_string()))?;
        Self::set_json_value_by_path(&mut json, key, value)?;
        *self = serde_json::from_value(json).map_err(|e| invalid(e.to_string()))?;
        Ok(())
    }

    /// Set a config value by key and save. Returns error if key is unknown.
    ///
    /// # Errors
    ///
    /// Returns an error if the key is unknown, the value cannot be parsed,
    /// or the config cannot be saved.
    pub fn set(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        self.update(key, value)?;
        self.save()
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.timer.tick_interval_ms.max(1))
    }

    pub fn completion_delay(&self) -> Duration {
        Duration::from_millis(self.timer.completion_delay_ms)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            attempts: self.storage.persist_retries.max(1),
            backoff: Duration::from_millis(self.storage.retry_backoff_ms),
        }
    }
}

impl SettingsProvider for Config {
    fn focus_duration_min(&self) -> u32 {
        self.timer.focus_duration
    }

    fn break_duration_min(&self) -> u32 {
        self.timer.break_duration
    }

    fn sessions_before_long_break(&self) -> u32 {
        self.timer.sessions_before_long_break
    }
}
