use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::control::{LoopOptions, PeakScale};
use crate::error::{Result, TameError};
use crate::limiter::LimiterConfig;

/// User settings, stored in `config.toml`.
///
/// Times are kept in the units people think in (ms for the envelope,
/// seconds for the slow stuff) and turned into a [`LimiterConfig`] on load.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_volume_cap")]
    pub volume_cap: f32,
    #[serde(default = "default_attack_ms")]
    pub attack_ms: u64,
    #[serde(default = "default_release_ms")]
    pub release_ms: u64,
    #[serde(default = "default_hold_ms")]
    pub hold_ms: u64,
    #[serde(default = "default_cooldown_s")]
    pub cooldown_s: f32,
    #[serde(default = "default_leeway_db")]
    pub leeway_db: f32,
    /// Max extra reduction for sustained peaks (1.0 = none)
    #[serde(default = "default_dampening")]
    pub dampening: f32,
    /// Seconds to reach full dampening (0 = instant)
    #[serde(default)]
    pub dampening_speed_s: f32,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_io_timeout_ms")]
    pub io_timeout_ms: u64,
    /// The metered device already has the system volume applied
    #[serde(default)]
    pub post_volume_meter: bool,
    /// Input device to meter (default input when unset)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_device: Option<String>,
}

fn default_true() -> bool {
    true
}

fn default_volume_cap() -> f32 {
    0.2
}

fn default_attack_ms() -> u64 {
    50
}

fn default_release_ms() -> u64 {
    500
}

fn default_hold_ms() -> u64 {
    150
}

fn default_cooldown_s() -> f32 {
    2.0
}

fn default_leeway_db() -> f32 {
    3.0
}

fn default_dampening() -> f32 {
    1.0
}

fn default_poll_interval_ms() -> u64 {
    20
}

fn default_io_timeout_ms() -> u64 {
    250
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            enabled: true,
            volume_cap: default_volume_cap(),
            attack_ms: default_attack_ms(),
            release_ms: default_release_ms(),
            hold_ms: default_hold_ms(),
            cooldown_s: default_cooldown_s(),
            leeway_db: default_leeway_db(),
            dampening: default_dampening(),
            dampening_speed_s: 0.0,
            poll_interval_ms: default_poll_interval_ms(),
            io_timeout_ms: default_io_timeout_ms(),
            post_volume_meter: false,
            input_device: None,
        }
    }
}

/// Command line values that win over the file, re-applied on every reload.
#[derive(Debug, Clone, Default)]
pub struct SettingsOverrides {
    pub volume_cap: Option<f32>,
    pub attack_ms: Option<u64>,
    pub release_ms: Option<u64>,
    pub hold_ms: Option<u64>,
    pub cooldown_s: Option<f32>,
    pub leeway_db: Option<f32>,
    pub dampening: Option<f32>,
    pub dampening_speed_s: Option<f32>,
    pub poll_interval_ms: Option<u64>,
    pub input_device: Option<String>,
}

impl SettingsOverrides {
    pub fn apply(&self, settings: &mut Settings) {
        if let Some(v) = self.volume_cap {
            settings.volume_cap = v;
        }
        if let Some(v) = self.attack_ms {
            settings.attack_ms = v;
        }
        if let Some(v) = self.release_ms {
            settings.release_ms = v;
        }
        if let Some(v) = self.hold_ms {
            settings.hold_ms = v;
        }
        if let Some(v) = self.cooldown_s {
            settings.cooldown_s = v;
        }
        if let Some(v) = self.leeway_db {
            settings.leeway_db = v;
        }
        if let Some(v) = self.dampening {
            settings.dampening = v;
        }
        if let Some(v) = self.dampening_speed_s {
            settings.dampening_speed_s = v;
        }
        if let Some(v) = self.poll_interval_ms {
            settings.poll_interval_ms = v;
        }
        if let Some(name) = &self.input_device {
            settings.input_device = Some(name.clone());
        }
    }
}

impl Settings {
    pub fn config_dir() -> PathBuf {
        let mut path = dirs::config_dir().unwrap_or_else(|| PathBuf::from("."));
        path.push("tame");
        path
    }

    pub fn config_path() -> PathBuf {
        Self::config_dir().join("config.toml")
    }

    pub fn log_dir() -> PathBuf {
        Self::config_dir().join("logs")
    }

    /// Load from the default location, writing a default file on first run.
    pub fn load() -> Self {
        let path = Self::config_path();
        if !path.exists() {
            let settings = Self::default();
            if let Err(e) = settings.save_to(&path) {
                tracing::warn!("could not write default settings: {}", e);
            }
            return settings;
        }
        match Self::load_from(&path) {
            Ok(settings) => settings,
            Err(e) => {
                tracing::warn!("using default settings, {}", e);
                Self::default()
            }
        }
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| TameError::Parse(e.to_string()))
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| TameError::Parse(e.to_string()))
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path())
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }
        fs::write(path, self.to_toml()?)?;
        Ok(())
    }

    pub fn to_limiter_config(&self) -> Result<LimiterConfig> {
        let config = LimiterConfig {
            enabled: self.enabled,
            cap: self.volume_cap,
            attack: Duration::from_millis(self.attack_ms),
            release: Duration::from_millis(self.release_ms),
            hold: Duration::from_millis(self.hold_ms),
            cooldown: seconds("cooldown_s", self.cooldown_s)?,
            leeway_db: self.leeway_db,
            dampening_max: self.dampening,
            dampening_speed: seconds("dampening_speed_s", self.dampening_speed_s)?,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn loop_options(&self) -> LoopOptions {
        LoopOptions {
            interval: Duration::from_millis(self.poll_interval_ms.max(1)),
            io_timeout: Duration::from_millis(self.io_timeout_ms.max(1)),
            peak_scale: if self.post_volume_meter {
                PeakScale::PostVolume
            } else {
                PeakScale::PreVolume
            },
        }
    }
}

fn seconds(field: &'static str, value: f32) -> Result<Duration> {
    Duration::try_from_secs_f32(value)
        .map_err(|_| TameError::invalid(field, format!("must be a non-negative number of seconds, got {value}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_limiter_defaults() {
        let config = Settings::default().to_limiter_config().unwrap();
        assert_eq!(config, LimiterConfig::default());
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let settings = Settings::from_toml("volume_cap = 0.35\nhold_ms = 300\n").unwrap();
        assert_eq!(settings.volume_cap, 0.35);
        assert_eq!(settings.hold_ms, 300);
        assert_eq!(settings.attack_ms, 50);
        assert_eq!(settings.leeway_db, 3.0);
        assert!(settings.enabled);
        assert_eq!(settings.input_device, None);
    }

    #[test]
    fn test_toml_round_trip_keeps_values() {
        let settings = Settings {
            volume_cap: 0.5,
            dampening: 2.0,
            dampening_speed_s: 1.5,
            input_device: Some("Monitor of Built-in Audio".into()),
            ..Default::default()
        };
        let text = settings.to_toml().unwrap();
        assert_eq!(Settings::from_toml(&text).unwrap(), settings);
    }

    #[test]
    fn test_garbage_is_a_parse_error() {
        assert!(matches!(Settings::from_toml("volume_cap = \"loud\""), Err(TameError::Parse(_))));
    }

    #[test]
    fn test_out_of_range_settings_are_rejected() {
        let zero_attack = Settings { attack_ms: 0, ..Default::default() };
        assert!(matches!(
            zero_attack.to_limiter_config(),
            Err(TameError::InvalidConfig { field: "attack", .. })
        ));

        let negative_cooldown = Settings { cooldown_s: -1.0, ..Default::default() };
        assert!(matches!(
            negative_cooldown.to_limiter_config(),
            Err(TameError::InvalidConfig { field: "cooldown_s", .. })
        ));
    }

    #[test]
    fn test_overrides_win() {
        let mut settings = Settings::default();
        SettingsOverrides {
            volume_cap: Some(0.6),
            release_ms: Some(900),
            ..Default::default()
        }
        .apply(&mut settings);
        assert_eq!(settings.volume_cap, 0.6);
        assert_eq!(settings.release_ms, 900);
        assert_eq!(settings.hold_ms, 150);
    }

    #[test]
    fn test_post_volume_meter_selects_scale() {
        let settings = Settings { post_volume_meter: true, ..Default::default() };
        assert_eq!(settings.loop_options().peak_scale, PeakScale::PostVolume);
        assert_eq!(Settings::default().loop_options().interval, Duration::from_millis(20));
    }
}
