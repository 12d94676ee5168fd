use serde::Deserialize;
use std::path::Path;

use crate::core::Severity;
use crate::error::{FleetError, Result};
use crate::signals::scorer::FEATURE_COUNT;

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct Config {
    pub detection: DetectionConfig,
    pub emission: EmissionConfig,
    pub scorer: ScorerConfig,
    pub pipeline: PipelineConfig,
    pub database: DatabaseConfig,
}

/// Rule thresholds and fusion cut-offs.
#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct DetectionConfig {
    /// Litres; a level drop below this (more negative) is a theft candidate.
    pub fuel_theft_threshold_l: f64,
    /// Minutes of idle per day.
    pub excessive_idle_threshold_min: f64,
    /// Sigma multiplier for the CO2 intensity z-test.
    pub emission_sigma: f64,
    /// Fuel theft risk above which a verdict is CRITICAL.
    pub critical_fuel_risk: f64,
    /// Outlier score below which a model hit alone is HIGH.
    pub strong_ml_score: f64,
    /// Outlier score below which confidence gets a boost.
    pub ml_confidence_boost_score: f64,
}

/// Population statistics for CO2 intensity, taken from historical data.
///
/// Both fields are required to build a detector; there is no default.
#[derive(Debug, Deserialize, Clone, Default, PartialEq)]
#[serde(default)]
pub struct EmissionConfig {
    pub co2_intensity_mean: Option<f64>,
    pub co2_intensity_std: Option<f64>,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct ScorerConfig {
    /// Hard limit for one outlier-model call.
    pub timeout_ms: u64,
    /// Per-feature standardisation expected by the model.
    pub scaler_mean: Option<[f64; FEATURE_COUNT]>,
    pub scaler_scale: Option<[f64; FEATURE_COUNT]>,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct PipelineConfig {
    /// Bound of each per-device worker queue.
    pub channel_capacity: usize,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: String,
    /// Verdicts below this severity are not persisted.
    pub persist_min_severity: Severity,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            fuel_theft_threshold_l: -5.0,
            excessive_idle_threshold_min: 120.0,
            emission_sigma: 2.0,
            critical_fuel_risk: 0.7,
            strong_ml_score: -0.5,
            ml_confidence_boost_score: -0.3,
        }
    }
}

impl Default for ScorerConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 250,
            scaler_mean: None,
            scaler_scale: None,
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 1024,
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: "data/fleetsense.db".into(),
            persist_min_severity: Severity::Medium,
        }
    }
}

impl DetectionConfig {
    pub fn validate(&self) -> Result<()> {
        let finite = [
            ("fuel_theft_threshold_l", self.fuel_theft_threshold_l),
            ("excessive_idle_threshold_min", self.excessive_idle_threshold_min),
            ("emission_sigma", self.emission_sigma),
            ("critical_fuel_risk", self.critical_fuel_risk),
            ("strong_ml_score", self.strong_ml_score),
            ("ml_confidence_boost_score", self.ml_confidence_boost_score),
        ];
        if let Some((name, _)) = finite.iter().find(|(_, v)| !v.is_finite()) {
            return Err(FleetError::InvalidConfig(format!("detection.{name} must be finite")));
        }
        if self.fuel_theft_threshold_l >= 0.0 {
            return Err(FleetError::InvalidConfig(
                "detection.fuel_theft_threshold_l must be negative".into(),
            ));
        }
        if self.excessive_idle_threshold_min < 0.0 {
            return Err(FleetError::InvalidConfig(
                "detection.excessive_idle_threshold_min must not be negative".into(),
            ));
        }
        Ok(())
    }
}

impl Config {
    /// Load config from a TOML file. Falls back to defaults if the file is
    /// missing or unreadable.
    pub fn load(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        if !path.exists() {
            tracing::info!("Config file {} not found, using defaults", path.display());
            return Self::default();
        }
        match std::fs::read_to_string(path) {
            Ok(contents) => match Self::from_toml_str(&contents) {
                Ok(config) => {
                    tracing::info!("Config loaded from {}", path.display());
                    config
                }
                Err(e) => {
                    tracing::warn!("Failed to parse {}: {e}, using defaults", path.display());
                    Self::default()
                }
            },
            Err(e) => {
                tracing::warn!("Failed to read {}: {e}, using defaults", path.display());
                Self::default()
            }
        }
    }

    /// Strict parse; errors instead of falling back.
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        Ok(toml::from_str(contents)?)
    }
}
