//! Run configuration, loadable from TOML and validated before any frame is processed.
//!
//! ```toml
//! [tracker]
//! high_thresh = 0.5
//! low_thresh = 0.1
//! min_hits = 3
//! max_age = 30
//!
//! [counting]
//! line_y = 200.0
//! band_halfwidth = 5.0
//! snapshot_interval_seconds = 5.0
//!
//! [[classes]]
//! name = "car"
//! id = 2
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::counting::{ClassEntry, ClassWhitelist};
use crate::error::ConfigError;
use crate::tracker::TrackerConfig;

/// Crossing geometry and reporting cadence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CountingConfig {
    /// Y coordinate of the horizontal reference line
    pub line_y: f32,
    /// Half-width of the band around `line_y` counted as crossing
    pub band_halfwidth: f32,
    /// Snapshot cadence in stream seconds
    pub snapshot_interval_seconds: f64,
}

impl Default for CountingConfig {
    fn default() -> Self {
        Self {
            line_y: 200.0,
            band_halfwidth: 5.0,
            snapshot_interval_seconds: 5.0,
        }
    }
}

/// Complete configuration of a counting run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CounterConfig {
    pub tracker: TrackerConfig,
    pub counting: CountingConfig,
    pub classes: Vec<ClassEntry>,
}

impl Default for CounterConfig {
    fn default() -> Self {
        Self {
            tracker: TrackerConfig::default(),
            counting: CountingConfig::default(),
            classes: ClassWhitelist::vehicles(),
        }
    }
}

impl CounterConfig {
    /// Parse and validate a TOML document.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: CounterConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a TOML config file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.tracker.validate()?;
        self.counting.validate()?;
        ClassWhitelist::new(&self.classes)?;
        Ok(())
    }

    pub fn whitelist(&self) -> Result<ClassWhitelist, ConfigError> {
        ClassWhitelist::new(&self.classes)
    }
}

fn unit_interval(field: &'static str, value: f32) -> Result<(), ConfigError> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::invalid(field, format!("{value} is outside [0, 1]")))
    }
}

impl TrackerConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        unit_interval("high_thresh", self.high_thresh)?;
        unit_interval("low_thresh", self.low_thresh)?;
        unit_interval("min_iou_high", self.min_iou_high)?;
        unit_interval("min_iou_low", self.min_iou_low)?;

        if self.low_thresh >= self.high_thresh {
            return Err(ConfigError::invalid(
                "low_thresh",
                format!(
                    "must be below high_thresh ({} >= {})",
                    self.low_thresh, self.high_thresh
                ),
            ));
        }
        if self.min_iou_low >= self.min_iou_high {
            return Err(ConfigError::invalid(
                "min_iou_low",
                format!(
                    "must be below min_iou_high ({} >= {})",
                    self.min_iou_low, self.min_iou_high
                ),
            ));
        }
        if let Some(thresh) = self.new_track_thresh {
            unit_interval("new_track_thresh", thresh)?;
            if thresh < self.high_thresh {
                return Err(ConfigError::invalid(
                    "new_track_thresh",
                    format!("must not be below high_thresh ({thresh} < {})", self.high_thresh),
                ));
            }
        }
        if self.min_hits < 1 {
            return Err(ConfigError::invalid("min_hits", "must be at least 1"));
        }
        if self.max_age < 1 {
            return Err(ConfigError::invalid("max_age", "must be at least 1"));
        }
        Ok(())
    }
}

impl CountingConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.line_y.is_finite() {
            return Err(ConfigError::invalid("line_y", "must be finite"));
        }
        if !(self.band_halfwidth.is_finite() && self.band_halfwidth > 0.0) {
            return Err(ConfigError::invalid("band_halfwidth", "must be positive"));
        }
        let interval = self.snapshot_interval_seconds;
        if !(interval.is_finite() && interval > 0.0) {
            return Err(ConfigError::invalid(
                "snapshot_interval_seconds",
                "must be positive",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        let config = CounterConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.whitelist().unwrap().len(), 4);
    }

    #[test]
    fn test_from_toml_partial() {
        let config = CounterConfig::from_toml_str(
            r#"
            [tracker]
            min_hits = 2
            max_age = 10

            [counting]
            line_y = 320.0

            [[classes]]
            name = "car"
            id = 2

            [[classes]]
            name = "truck"
            id = 7
            "#,
        )
        .unwrap();

        assert_eq!(config.tracker.min_hits, 2);
        assert_eq!(config.tracker.max_age, 10);
        assert_eq!(config.tracker.high_thresh, TrackerConfig::default().high_thresh);
        assert_eq!(config.counting.line_y, 320.0);
        assert_eq!(config.counting.band_halfwidth, 5.0);
        assert_eq!(config.classes.len(), 2);
    }

    #[test]
    fn test_empty_document_uses_defaults() {
        let config = CounterConfig::from_toml_str("").unwrap();
        assert_eq!(config, CounterConfig::default());
    }

    #[test]
    fn test_rejects_inverted_thresholds() {
        let mut config = CounterConfig::default();
        config.tracker.low_thresh = 0.6;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid { field: "low_thresh", .. })
        ));

        let mut config = CounterConfig::default();
        config.tracker.min_iou_low = config.tracker.min_iou_high;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid { field: "min_iou_low", .. })
        ));
    }

    #[test]
    fn test_rejects_out_of_range() {
        let mut config = CounterConfig::default();
        config.tracker.high_thresh = 1.5;
        assert!(config.validate().is_err());

        let mut config = CounterConfig::default();
        config.tracker.max_age = 0;
        assert!(config.validate().is_err());

        let mut config = CounterConfig::default();
        config.tracker.min_hits = 0;
        assert!(config.validate().is_err());

        let mut config = CounterConfig::default();
        config.tracker.new_track_thresh = Some(0.2);
        assert!(config.validate().is_err());

        let mut config = CounterConfig::default();
        config.counting.snapshot_interval_seconds = 0.0;
        assert!(config.validate().is_err());

        let mut config = CounterConfig::default();
        config.classes.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_parse_error() {
        assert!(matches!(
            CounterConfig::from_toml_str("[tracker]\nmin_hits = -1"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_missing_file() {
        assert!(matches!(
            CounterConfig::from_file("/nonexistent/bytecount.toml"),
            Err(ConfigError::Read { .. })
        ));
    }
}
