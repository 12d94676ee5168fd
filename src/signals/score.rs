use crate::config::DetectionConfig;
use crate::core::{AnomalyType, AnomalyVerdict, Severity};

use super::scorer::ScorerOutcome;

/// Detector outputs for one evaluation, before fusion.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetectionSignals {
    pub fuel_theft: bool,
    pub fuel_theft_risk: f64,
    /// Only set on the daily path.
    pub excessive_idle: bool,
    pub emission_inefficient: bool,
    /// `min(co2_intensity / 1000, 1)`.
    pub emission_score: f64,
    pub ml: ScorerOutcome,
}

impl Default for DetectionSignals {
    fn default() -> Self {
        Self {
            fuel_theft: false,
            fuel_theft_risk: 0.0,
            excessive_idle: false,
            emission_inefficient: false,
            emission_score: 0.0,
            ml: ScorerOutcome::Unavailable,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FusionThresholds {
    pub critical_fuel_risk: f64,
    pub strong_ml_score: f64,
    pub ml_confidence_boost_score: f64,
}

impl Default for FusionThresholds {
    fn default() -> Self {
        Self::from(&DetectionConfig::default())
    }
}

impl From<&DetectionConfig> for FusionThresholds {
    fn from(config: &DetectionConfig) -> Self {
        Self {
            critical_fuel_risk: config.critical_fuel_risk,
            strong_ml_score: config.strong_ml_score,
            ml_confidence_boost_score: config.ml_confidence_boost_score,
        }
    }
}

const MIN_CONFIDENCE: f64 = 0.3;
const ML_CONFIDENCE_BOOST: f64 = 0.3;

/// Fuse detector flags into a single verdict.
///
/// Severity is decided first match wins:
/// CRITICAL for a high-risk fuel theft, HIGH for two or more flags or a
/// strong model hit, MEDIUM for one flag, LOW otherwise.
pub fn fuse(signals: &DetectionSignals, thresholds: &FusionThresholds) -> AnomalyVerdict {
    let ml_detected = signals.ml.is_outlier();
    let ml_score = signals.ml.ml_score();

    // Fixed priority order.
    let anomaly_types: Vec<AnomalyType> = [
        (signals.fuel_theft, AnomalyType::FuelTheft),
        (signals.emission_inefficient, AnomalyType::EmissionInefficient),
        (ml_detected, AnomalyType::MlDetected),
        (signals.excessive_idle, AnomalyType::ExcessiveIdle),
    ]
    .into_iter()
    .filter_map(|(hit, kind)| hit.then_some(kind))
    .collect();
    let count = anomaly_types.len();

    let severity = if signals.fuel_theft && signals.fuel_theft_risk > thresholds.critical_fuel_risk
    {
        Severity::Critical
    } else if count >= 2 || (ml_detected && ml_score < thresholds.strong_ml_score) {
        Severity::High
    } else if count == 1 {
        Severity::Medium
    } else {
        Severity::Low
    };

    let mut confidence = (count as f64 / 3.0).clamp(MIN_CONFIDENCE, 1.0);
    // Unavailable scores are 0.0 and never boost.
    if signals.ml.is_available() && ml_score < thresholds.ml_confidence_boost_score {
        confidence = (confidence + ML_CONFIDENCE_BOOST).min(1.0);
    }

    AnomalyVerdict {
        is_anomaly: count > 0,
        anomaly_score: ml_score,
        anomaly_types,
        severity,
        confidence,
        fuel_theft_risk: signals.fuel_theft_risk,
        emission_score: signals.emission_score,
        scorer_available: signals.ml.is_available(),
    }
}
