//! TOML-based application configuration.
//!
//! Stores:
//! - Timing boundaries of the alarm lifecycle (fire buffer, upcoming
//!   notification lead, missed time-to-live)
//! - Defaults applied to newly created alarms
//! - The ringtone library used to resolve "random" ringtones
//! - Logging filter and daemon polling interval
//!
//! Configuration is stored at `~/.config/deskclock/config.toml`.

use std::path::PathBuf;

use chrono::Duration;
use serde::{Deserialize, Serialize};

use super::data_dir;
use crate::alarm::{Alarm, LibraryResolver, Timing};
use crate::error::{ConfigError, ValidationError};

/// Lifecycle time boundaries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimingConfig {
    #[serde(default = "default_fire_buffer_secs")]
    pub fire_buffer_secs: u32,
    #[serde(default = "default_upcoming_notification_minutes")]
    pub upcoming_notification_minutes: u32,
    #[serde(default = "default_missed_ttl_hours")]
    pub missed_ttl_hours: u32,
}

/// Values used for alarms created without explicit settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlarmDefaultsConfig {
    /// 0 disables snoozing.
    #[serde(default = "default_snooze_minutes")]
    pub snooze_minutes: u32,
    /// 0 means never auto-silence.
    #[serde(default = "default_auto_silence_minutes")]
    pub auto_silence_minutes: u32,
    #[serde(default)]
    pub missed_repeat_limit: u32,
    #[serde(default)]
    pub crescendo_secs: u32,
    #[serde(default)]
    pub volume: Option<u8>,
    #[serde(default = "default_true")]
    pub vibrate: bool,
}

/// Ringtone library configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RingtonesConfig {
    /// Concrete ringtone URIs a "random" ringtone is drawn from.
    #[serde(default)]
    pub library: Vec<String>,
    #[serde(default)]
    pub fallback: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_filter")]
    pub filter: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

/// Application configuration.
///
/// Serialized to/from TOML at `~/.config/deskclock/config.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub timing: TimingConfig,
    #[serde(default)]
    pub alarm_defaults: AlarmDefaultsConfig,
    #[serde(default)]
    pub ringtones: RingtonesConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub daemon: DaemonConfig,
}

fn default_fire_buffer_secs() -> u32 {
    15
}
fn default_upcoming_notification_minutes() -> u32 {
    120
}
fn default_missed_ttl_hours() -> u32 {
    12
}
fn default_snooze_minutes() -> u32 {
    10
}
fn default_auto_silence_minutes() -> u32 {
    10
}
fn default_true() -> bool {
    true
}
fn default_log_filter() -> String {
    "info".into()
}
fn default_poll_interval_ms() -> u64 {
    1000
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            fire_buffer_secs: default_fire_buffer_secs(),
            upcoming_notification_minutes: default_upcoming_notification_minutes(),
            missed_ttl_hours: default_missed_ttl_hours(),
        }
    }
}

impl Default for AlarmDefaultsConfig {
    fn default() -> Self {
        Self {
            snooze_minutes: default_snooze_minutes(),
            auto_silence_minutes: default_auto_silence_minutes(),
            missed_repeat_limit: 0,
            crescendo_secs: 0,
            volume: None,
            vibrate: true,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: default_log_filter(),
        }
    }
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
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
        if parts.peek().is_none() || key.is_empty() {
            return Err(unknown());
        }

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
                    value
                        .parse::<bool>()
                        .map_err(|e| invalid(format!("cannot parse '{value}' as bool: {e}")))?,
                ),
                // Clearing an optional number; required fields reject null on decode.
                serde_json::Value::Number(_) if value == "none" => serde_json::Value::Null,
                serde_json::Value::Number(_) => value
                    .parse::<u64>()
                    .map(|n| serde_json::Value::Number(n.into()))
                    .map_err(|_| invalid(format!("cannot parse '{value}' as number")))?,
                serde_json::Value::Object(_) | serde_json::Value::Array(_) => {
                    serde_json::from_str(value).map_err(|e| invalid(e.to_string()))?
                }
                // Optional fields serialize as null; accept numbers or strings.
                serde_json::Value::Null => match value.parse::<u64>() {
                    Ok(n) => serde_json::Value::Number(n.into()),
                    Err(_) if value == "none" => serde_json::Value::Null,
                    Err(_) => serde_json::Value::String(value.into()),
                },
                serde_json::Value::String(_) => serde_json::Value::String(value.into()),
            };

            obj.insert(part.to_string(), new_value);
            return Ok(());
        }

        Err(unknown())
    }

    fn path() -> Result<PathBuf, ConfigError> {
        data_dir()
            .map(|dir| dir.join("config.toml"))
            .map_err(|e| ConfigError::LoadFailed {
                path: PathBuf::from("config.toml"),
                message: e.to_string(),
            })
    }

    /// Load from disk or create the default file.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file exists but cannot be parsed,
    /// or if the default config cannot be written to disk.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::path()?;
        match std::fs::read_to_string(&path) {
            Ok(content) => Ok(toml::from_str(&content)?),
            Err(_) => {
                let cfg = Self::default();
                cfg.save()?;
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
        let path = Self::path()?;
        let content = toml::to_string_pretty(self).map_err(|e| ConfigError::SaveFailed {
            path: path.clone(),
            message: e.to_string(),
        })?;
        std::fs::write(&path, content).map_err(|e| ConfigError::SaveFailed {
            path,
            message: e.to_string(),
        })
    }

    /// Load from disk, returning default on error.
    pub fn load_or_default() -> Self {
        Self::load().unwrap_or_else(|e| {
            tracing::warn!(error = %e, "falling back to default configuration");
            Self::default()
        })
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
        let mut json = serde_json::to_value(&*self)
            .map_err(|e| ConfigError::ParseFailed(e.to_string()))?;
        Self::set_json_value_by_path(&mut json, key, value)?;
        *self = serde_json::from_value(json).map_err(|e| ConfigError::InvalidValue {
            key: key.to_string(),
            message: e.to_string(),
        })?;
        Ok(())
    }

    /// Set a config value by key and save.
    ///
    /// # Errors
    ///
    /// Returns an error if the key is unknown, the value cannot be parsed,
    /// or the config cannot be saved.
    pub fn set(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        self.set_value(key, value)?;
        self.save()
    }

    pub fn timing(&self) -> Timing {
        Timing {
            fire_buffer: Duration::seconds(self.timing.fire_buffer_secs.into()),
            notification_lead: Duration::minutes(self.timing.upcoming_notification_minutes.into()),
            missed_ttl: Duration::hours(self.timing.missed_ttl_hours.into()),
        }
    }

    pub fn ringtone_resolver(&self) -> LibraryResolver {
        LibraryResolver::new(self.ringtones.library.clone(), self.ringtones.fallback.clone())
    }

    /// A new alarm at `hour:minute` carrying the configured defaults.
    pub fn new_alarm(&self, hour: u32, minute: u32) -> Result<Alarm, ValidationError> {
        let defaults = &self.alarm_defaults;
        let mut alarm = Alarm::new(hour, minute)?;
        alarm.snooze_minutes = Some(defaults.snooze_minutes).filter(|m| *m > 0);
        alarm.auto_silence_minutes = Some(defaults.auto_silence_minutes).filter(|m| *m > 0);
        alarm.missed_repeat_limit = defaults.missed_repeat_limit;
        alarm.crescendo_secs = defaults.crescendo_secs;
        alarm.volume = defaults.volume;
        alarm.vibrate = defaults.vibrate;
        Ok(alarm)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_roundtrip() {
        let cfg = Config::default();
        let toml_str = toml::to_string_pretty(&cfg).unwrap();
        let parsed: Config = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.timing.fire_buffer_secs, 15);
        assert_eq!(parsed.alarm_defaults.snooze_minutes, 10);
        assert_eq!(parsed.logging.filter, "info");
    }

    #[test]
    fn partial_file_fills_defaults() {
        let parsed: Config = toml::from_str("[timing]\nmissed_ttl_hours = 6\n").unwrap();
        assert_eq!(parsed.timing.missed_ttl_hours, 6);
        assert_eq!(parsed.timing.upcoming_notification_minutes, 120);
        assert_eq!(parsed.daemon.poll_interval_ms, 1000);
    }

    #[test]
    fn get_supports_dot_path_keys() {
        let cfg = Config::default();
        assert_eq!(cfg.get("timing.fire_buffer_secs").as_deref(), Some("15"));
        assert_eq!(cfg.get("alarm_defaults.vibrate").as_deref(), Some("true"));
        assert!(cfg.get("timing.missing_key").is_none());
    }

    #[test]
    fn set_value_updates_number_and_bool() {
        let mut cfg = Config::default();
        cfg.set_value("timing.upcoming_notification_minutes", "30").unwrap();
        cfg.set_value("alarm_defaults.vibrate", "false").unwrap();
        assert_eq!(cfg.timing.upcoming_notification_minutes, 30);
        assert!(!cfg.alarm_defaults.vibrate);
    }

    #[test]
    fn set_value_fills_optional_field() {
        let mut cfg = Config::default();
        cfg.set_value("alarm_defaults.volume", "70").unwrap();
        assert_eq!(cfg.alarm_defaults.volume, Some(70));
        cfg.set_value("ringtones.fallback", "file:///bell.ogg").unwrap();
        assert_eq!(cfg.ringtones.fallback.as_deref(), Some("file:///bell.ogg"));
    }

    #[test]
    fn set_value_clears_optional_number() {
        let mut cfg = Config::default();
        cfg.set_value("alarm_defaults.volume", "70").unwrap();
        cfg.set_value("alarm_defaults.volume", "none").unwrap();
        assert_eq!(cfg.alarm_defaults.volume, None);
        assert!(matches!(
            cfg.set_value("timing.fire_buffer_secs", "none"),
            Err(ConfigError::InvalidValue { .. })
        ));
        assert_eq!(cfg.timing.fire_buffer_secs, 15);
    }

    #[test]
    fn set_value_accepts_json_lists() {
        let mut cfg = Config::default();
        cfg.set_value("ringtones.library", r#"["a.ogg","b.ogg"]"#).unwrap();
        assert_eq!(cfg.ringtones.library, vec!["a.ogg", "b.ogg"]);
    }

    #[test]
    fn set_value_rejects_unknown_key_and_bad_type() {
        let mut cfg = Config::default();
        assert!(matches!(
            cfg.set_value("timing.nonexistent", "1"),
            Err(ConfigError::UnknownKey(_))
        ));
        assert!(matches!(
            cfg.set_value("alarm_defaults.vibrate", "sometimes"),
            Err(ConfigError::InvalidValue { .. })
        ));
    }

    #[test]
    fn timing_converts_units() {
        let cfg = Config::default();
        let timing = cfg.timing();
        assert_eq!(timing.fire_buffer, Duration::seconds(15));
        assert_eq!(timing.notification_lead, Duration::hours(2));
        assert_eq!(timing.missed_ttl, Duration::hours(12));
    }

    #[test]
    fn zero_defaults_mean_disabled() {
        let mut cfg = Config::default();
        cfg.alarm_defaults.snooze_minutes = 0;
        cfg.alarm_defaults.auto_silence_minutes = 0;
        let alarm = cfg.new_alarm(7, 0).unwrap();
        assert_eq!(alarm.snooze_minutes, None);
        assert_eq!(alarm.auto_silence_minutes, None);
    }
}
