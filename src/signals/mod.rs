pub mod forecast;
pub mod rules;
pub mod score;
pub mod scorer;

use chrono::NaiveDate;
use serde::Serialize;

use crate::config::{Config, DetectionConfig};
use crate::core::{AnomalyVerdict, DailyAggregate, DerivedFeatures};
use crate::error::{FleetError, Result};
use rules::EmissionStats;
use score::{DetectionSignals, FusionThresholds};
use scorer::{score_or_unavailable, FeatureVector, OutlierScorer, ScorerOutcome};

const MINUTES_PER_DAY: f64 = 1440.0;

/// Daily excessive-idle evaluation for one device.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DailyIdleReport {
    pub device_id: u64,
    pub date: NaiveDate,
    pub excessive_idle_detected: bool,
    pub total_idle_minutes: f64,
    pub excessive_idle_threshold: f64,
    pub excess_minutes: f64,
    /// Share of the 24h day spent idle, 0-100.
    pub idle_percentage: f64,
    pub is_warning: bool,
    pub verdict: AnomalyVerdict,
}

/// Applies the rule detectors and fuses them with the model outcome.
///
/// Holds only immutable thresholds and population statistics, so one
/// detector can be shared by every device worker.
#[derive(Debug, Clone)]
pub struct AnomalyDetector {
    config: DetectionConfig,
    emission: EmissionStats,
    thresholds: FusionThresholds,
}

impl AnomalyDetector {
    pub fn new(config: DetectionConfig, emission: EmissionStats) -> Result<Self> {
        config.validate()?;
        let thresholds = FusionThresholds::from(&config);
        Ok(Self {
            config,
            emission,
            thresholds,
        })
    }

    /// Population statistics must be configured; they are never estimated here.
    pub fn from_config(config: &Config) -> Result<Self> {
        let (Some(mean), Some(std)) = (
            config.emission.co2_intensity_mean,
            config.emission.co2_intensity_std,
        ) else {
            return Err(FleetError::MissingPopulationStats);
        };
        Self::new(config.detection.clone(), EmissionStats::new(mean, std)?)
    }

    pub fn config(&self) -> &DetectionConfig {
        &self.config
    }

    pub fn emission_stats(&self) -> &EmissionStats {
        &self.emission
    }

    /// Per-record verdict. Excessive idle is a daily signal and is never set here.
    pub fn evaluate_record(&self, features: &DerivedFeatures, ml: ScorerOutcome) -> AnomalyVerdict {
        let theft = rules::detect_fuel_theft(
            features.fuel_level_delta_l,
            features.speed_kmh,
            features.distance_delta_km,
            self.config.fuel_theft_threshold_l,
        );
        let emission = rules::detect_emission_inefficiency(
            features.co2_intensity_gpkm,
            &self.emission,
            self.config.emission_sigma,
        );
        let signals = DetectionSignals {
            fuel_theft: theft.detected,
            fuel_theft_risk: theft.risk_score,
            excessive_idle: false,
            emission_inefficient: emission.is_inefficient,
            emission_score: (features.co2_intensity_gpkm / 1000.0).min(1.0),
            ml,
        };
        score::fuse(&signals, &self.thresholds)
    }

    /// Score synchronously with `scorer`, then evaluate.
    pub fn detect(&self, features: &DerivedFeatures, scorer: &dyn OutlierScorer) -> AnomalyVerdict {
        let ml = score_or_unavailable(scorer, &FeatureVector::from_features(features));
        self.evaluate_record(features, ml)
    }

    /// The only path on which `excessive_idle` can be raised.
    pub fn daily_report(&self, daily: &DailyAggregate) -> DailyIdleReport {
        let threshold = self.config.excessive_idle_threshold_min;
        let idle = rules::detect_excessive_idle(daily.total_idle_minutes, threshold);
        let verdict = score::fuse(
            &DetectionSignals {
                excessive_idle: idle.is_excessive,
                ..DetectionSignals::default()
            },
            &self.thresholds,
        );
        DailyIdleReport {
            device_id: daily.device_id,
            date: daily.date,
            excessive_idle_detected: idle.is_excessive,
            total_idle_minutes: daily.total_idle_minutes,
            excessive_idle_threshold: threshold,
            excess_minutes: idle.excess_minutes,
            idle_percentage: daily.total_idle_minutes / MINUTES_PER_DAY * 100.0,
            is_warning: idle.is_warning,
            verdict,
        }
    }
}
