//! Configuration for the performance controller

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::quality::QualityMode;

const BYTES_PER_MB: u64 = 1024 * 1024;

/// Main controller configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PerfConfig {
    /// Decoded-image cache size at full quality, in megabytes
    pub cache_capacity_mb: u32,

    /// Exact cache size in bytes; overrides `cache_capacity_mb` when set
    pub cache_capacity_bytes: Option<u64>,

    /// FPS below this degrades quality
    pub fps_threshold: f64,

    /// FPS must reach `fps_threshold * fps_upgrade_multiplier` to count as good
    pub fps_upgrade_multiplier: f64,

    /// Consecutive good evaluations required before upgrading one level
    pub good_sample_streak_required: u32,

    /// FPS estimate publication interval (milliseconds)
    pub fps_update_interval_ms: u64,

    /// Background memory poll interval (milliseconds)
    pub memory_poll_interval_ms: u64,

    /// Available-fraction cutoffs for pressure classification
    pub memory_pressure_thresholds: PressureThresholds,

    /// Cache capacity per quality mode, as a fraction of the full capacity
    pub quality_cache_fractions: CacheFractions,
}

/// Available-memory fractions below which each pressure level applies.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PressureThresholds {
    pub moderate: f64,
    pub low: f64,
    pub critical: f64,
}

impl Default for PressureThresholds {
    fn default() -> Self {
        Self {
            moderate: 0.35,
            low: 0.20,
            critical: 0.10,
        }
    }
}

/// Cache capacity scaling for each quality mode.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheFractions {
    pub low: f64,
    pub medium: f64,
    pub high: f64,
}

impl CacheFractions {
    pub fn for_mode(&self, mode: QualityMode) -> f64 {
        match mode {
            QualityMode::Low => self.low,
            QualityMode::Medium => self.medium,
            QualityMode::High => self.high,
        }
    }
}

impl Default for CacheFractions {
    fn default() -> Self {
        Self {
            low: 0.5,
            medium: 0.75,
            high: 1.0,
        }
    }
}

impl Default for PerfConfig {
    fn default() -> Self {
        Self {
            cache_capacity_mb: 64,
            cache_capacity_bytes: None,
            fps_threshold: 50.0,
            fps_upgrade_multiplier: 1.1,
            good_sample_streak_required: 3,
            fps_update_interval_ms: 1000,
            memory_poll_interval_ms: 5000,
            memory_pressure_thresholds: PressureThresholds::default(),
            quality_cache_fractions: CacheFractions::default(),
        }
    }
}

/// Errors from loading, saving or validating a configuration
#[derive(Debug)]
pub enum ConfigError {
    /// Reading or writing the config file failed
    Io(std::io::Error),
    /// The file is not valid TOML for `PerfConfig`
    Parse(String),
    /// Serializing the config failed
    Serialize(String),
    /// A value is out of range
    Invalid(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(e) => write!(f, "Config I/O error: {}", e),
            Self::Parse(msg) => write!(f, "Config parse error: {}", msg),
            Self::Serialize(msg) => write!(f, "Config serialize error: {}", msg),
            Self::Invalid(msg) => write!(f, "Invalid config: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for ConfigError {
    fn from(err: std::io::Error) -> Self {
        ConfigError::Io(err)
    }
}

impl PerfConfig {
    /// Full-quality cache capacity in bytes
    pub fn cache_capacity_bytes(&self) -> u64 {
        self.cache_capacity_bytes
            .unwrap_or(self.cache_capacity_mb as u64 * BYTES_PER_MB)
    }

    /// FPS at or above which a sample counts toward an upgrade
    pub fn fps_upgrade_threshold(&self) -> f64 {
        self.fps_threshold * self.fps_upgrade_multiplier
    }

    pub fn fps_update_interval(&self) -> Duration {
        Duration::from_millis(self.fps_update_interval_ms)
    }

    pub fn memory_poll_interval(&self) -> Duration {
        Duration::from_millis(self.memory_poll_interval_ms)
    }

    /// Check every value is in range
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.cache_capacity_bytes() == 0 {
            return Err(ConfigError::Invalid("cache capacity must be non-zero".into()));
        }
        if !(self.fps_threshold > 0.0) {
            return Err(ConfigError::Invalid(format!(
                "fps_threshold must be positive, got {}",
                self.fps_threshold
            )));
        }
        if !(self.fps_upgrade_multiplier >= 1.0) {
            return Err(ConfigError::Invalid(format!(
                "fps_upgrade_multiplier must be >= 1.0, got {}",
                self.fps_upgrade_multiplier
            )));
        }
        if self.good_sample_streak_required == 0 {
            return Err(ConfigError::Invalid(
                "good_sample_streak_required must be at least 1".into(),
            ));
        }
        if self.fps_update_interval_ms == 0 || self.memory_poll_interval_ms == 0 {
            return Err(ConfigError::Invalid("intervals must be non-zero".into()));
        }

        let t = &self.memory_pressure_thresholds;
        if !(0.0 < t.critical && t.critical < t.low && t.low < t.moderate && t.moderate <= 1.0) {
            return Err(ConfigError::Invalid(format!(
                "pressure thresholds must satisfy 0 < critical < low < moderate <= 1, got {}/{}/{}",
                t.critical, t.low, t.moderate
            )));
        }

        let f = &self.quality_cache_fractions;
        for (name, value) in [("low", f.low), ("medium", f.medium), ("high", f.high)] {
            if !(value > 0.0 && value <= 1.0) {
                return Err(ConfigError::Invalid(format!(
                    "quality_cache_fractions.{} must be in (0, 1], got {}",
                    name, value
                )));
            }
        }
        if !(f.low <= f.medium && f.medium <= f.high) {
            return Err(ConfigError::Invalid(
                "quality_cache_fractions must not shrink as quality rises".into(),
            ));
        }

        Ok(())
    }

    /// Default config file location
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("renderpace")
            .join("config.toml")
    }

    /// Load config from TOML file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: Self =
            toml::from_str(&content).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from `path` if it exists, defaults otherwise
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Save config to TOML file
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let content =
            toml::to_string_pretty(self).map_err(|e| ConfigError::Serialize(e.to_string()))?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Render as TOML text
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::Serialize(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = PerfConfig::default();
        assert_eq!(config.cache_capacity_bytes(), 64 * 1024 * 1024);
        assert_eq!(config.fps_threshold, 50.0);
        assert!((config.fps_upgrade_threshold() - 55.0).abs() < 1e-9);
        assert_eq!(config.good_sample_streak_required, 3);
        assert_eq!(config.memory_poll_interval(), Duration::from_millis(5000));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_capacity_override() {
        let config = PerfConfig {
            cache_capacity_bytes: Some(100),
            ..Default::default()
        };
        assert_eq!(config.cache_capacity_bytes(), 100);
    }

    #[test]
    fn test_invalid_thresholds() {
        let config = PerfConfig {
            memory_pressure_thresholds: PressureThresholds {
                moderate: 0.2,
                low: 0.35,
                critical: 0.1,
            },
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_invalid_streak() {
        let config = PerfConfig {
            good_sample_streak_required: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_invalid_fraction() {
        let config = PerfConfig {
            quality_cache_fractions: CacheFractions {
                low: 0.0,
                medium: 0.75,
                high: 1.0,
            },
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: PerfConfig = toml::from_str(
            r#"
            fps_threshold = 40.0

            [memory_pressure_thresholds]
            critical = 0.05
            "#,
        )
        .unwrap();
        assert_eq!(config.fps_threshold, 40.0);
        assert_eq!(config.memory_pressure_thresholds.critical, 0.05);
        assert_eq!(config.memory_pressure_thresholds.low, 0.20);
        assert_eq!(config.memory_poll_interval_ms, 5000);
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let config = PerfConfig {
            cache_capacity_mb: 16,
            fps_threshold: 45.0,
            ..Default::default()
        };
        config.save(&path).unwrap();

        let loaded = PerfConfig::load(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_load_or_default_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let config = PerfConfig::load_or_default(&dir.path().join("missing.toml")).unwrap();
        assert_eq!(config, PerfConfig::default());
    }

    #[test]
    fn test_load_rejects_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "fps_threshold = \"fast\"").unwrap();
        assert!(matches!(PerfConfig::load(&path), Err(ConfigError::Parse(_))));
    }
}
