//! Rule-based and statistical detectors.
//!
//! Every function here is pure and total over finite inputs.

use serde::{Deserialize, Serialize};

use crate::core::DerivedFeatures;
use crate::error::{FleetError, Result};

/// Distance below which a vehicle counts as not having moved (km).
const STATIONARY_DISTANCE_KM: f64 = 0.1;

/// Fraction of the idle threshold that raises an early warning.
pub const IDLE_WARNING_RATIO: f64 = 0.8;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FuelTheftCheck {
    pub detected: bool,
    /// 0-1, independent of the movement gate.
    pub risk_score: f64,
}

/// A fuel drop below `threshold` while stationary.
pub fn detect_fuel_theft(
    fuel_delta: f64,
    speed: f64,
    distance_delta: f64,
    threshold: f64,
) -> FuelTheftCheck {
    let dropped = fuel_delta < threshold;
    let risk_score = if dropped && threshold != 0.0 {
        (fuel_delta.abs() / threshold.abs()).min(1.0)
    } else if dropped {
        1.0
    } else {
        0.0
    };
    FuelTheftCheck {
        detected: dropped && speed == 0.0 && distance_delta < STATIONARY_DISTANCE_KM,
        risk_score,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct IdleCheck {
    pub is_excessive: bool,
    pub excess_minutes: f64,
    /// Above 80% of the threshold; independent of `is_excessive`.
    pub is_warning: bool,
}

/// Daily idle minutes against the excessive idle threshold.
pub fn detect_excessive_idle(daily_idle_minutes: f64, threshold: f64) -> IdleCheck {
    IdleCheck {
        is_excessive: daily_idle_minutes > threshold,
        excess_minutes: (daily_idle_minutes - threshold).max(0.0),
        is_warning: daily_idle_minutes > threshold * IDLE_WARNING_RATIO,
    }
}

/// CO2 intensity population statistics supplied by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EmissionStats {
    pub mean: f64,
    pub std: f64,
}

impl EmissionStats {
    pub fn new(mean: f64, std: f64) -> Result<Self> {
        if !mean.is_finite() || !std.is_finite() {
            return Err(FleetError::InvalidConfig(
                "co2 intensity mean/std must be finite".into(),
            ));
        }
        if std < 0.0 {
            return Err(FleetError::InvalidConfig(
                "co2 intensity std must not be negative".into(),
            ));
        }
        Ok(Self { mean, std })
    }

    /// Estimate statistics from historical features.
    ///
    /// Only records with a positive intensity count. Std is the sample
    /// standard deviation and is 0 with fewer than two records. Callers use
    /// this explicitly; detection never estimates on its own.
    pub fn estimate(features: &[DerivedFeatures]) -> EmissionSummary {
        let values: Vec<f64> = features
            .iter()
            .map(|f| f.co2_intensity_gpkm)
            .filter(|v| *v > 0.0)
            .collect();
        let count = values.len();
        if count == 0 {
            return EmissionSummary::default();
        }
        let mean = values.iter().sum::<f64>() / count as f64;
        let std = if count > 1 {
            (values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (count - 1) as f64).sqrt()
        } else {
            0.0
        };
        EmissionSummary {
            stats: EmissionStats { mean, std },
            min: values.iter().copied().fold(f64::INFINITY, f64::min),
            max: values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
            sample_count: count,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EmissionSummary {
    pub stats: EmissionStats,
    pub min: f64,
    pub max: f64,
    pub sample_count: usize,
}

impl Default for EmissionSummary {
    fn default() -> Self {
        Self {
            stats: EmissionStats { mean: 0.0, std: 0.0 },
            min: 0.0,
            max: 0.0,
            sample_count: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EmissionCheck {
    pub is_inefficient: bool,
    /// `mean + sigma * std`.
    pub threshold: f64,
    /// z-score; 0 when std is 0.
    pub deviation: f64,
    /// Standard normal CDF of the deviation, 0-100.
    pub percentile: f64,
}

/// z-test of one CO2 intensity against population statistics.
pub fn detect_emission_inefficiency(
    co2_intensity: f64,
    stats: &EmissionStats,
    sigma: f64,
) -> EmissionCheck {
    let threshold = stats.mean + sigma * stats.std;
    let deviation = if stats.std > 0.0 {
        (co2_intensity - stats.mean) / stats.std
    } else {
        0.0
    };
    EmissionCheck {
        is_inefficient: stats.std > 0.0 && co2_intensity > threshold,
        threshold,
        deviation,
        percentile: standard_normal_cdf(deviation) * 100.0,
    }
}

fn standard_normal_cdf(x: f64) -> f64 {
    0.5 * (1.0 + libm::erf(x / std::f64::consts::SQRT_2))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::timestamp_format;

    #[test]
    fn fuel_theft_while_stationary() {
        let check = detect_fuel_theft(-10.0, 0.0, 0.0, -5.0);
        assert!(check.detected);
        assert_eq!(check.risk_score, 1.0);
    }

    #[test]
    fn fuel_drop_while_moving_keeps_risk() {
        let check = detect_fuel_theft(-10.0, 0.0, 5.0, -5.0);
        assert!(!check.detected);
        assert_eq!(check.risk_score, 1.0);
    }

    #[test]
    fn fuel_drop_with_speed_not_theft() {
        let check = detect_fuel_theft(-8.0, 12.0, 0.0, -5.0);
        assert!(!check.detected);
    }

    #[test]
    fn fuel_theft_threshold_scales_risk() {
        // Capped at 1.
        let check = detect_fuel_theft(-6.0, 0.0, 0.0, -4.0);
        assert!(check.detected);
        assert_eq!(check.risk_score, 1.0);

        let check = detect_fuel_theft(-6.0, 0.0, 0.0, -8.0);
        assert!(!check.detected);
        assert_eq!(check.risk_score, 0.0);
    }

    #[test]
    fn small_drop_has_no_risk() {
        let check = detect_fuel_theft(-2.0, 0.0, 0.0, -5.0);
        assert!(!check.detected);
        assert_eq!(check.risk_score, 0.0);
    }

    #[test]
    fn excessive_idle_over_threshold() {
        let check = detect_excessive_idle(180.0, 120.0);
        assert!(check.is_excessive);
        assert_eq!(check.excess_minutes, 60.0);
        assert!(check.is_warning);
    }

    #[test]
    fn idle_near_threshold_warns_only() {
        let check = detect_excessive_idle(100.0, 120.0);
        assert!(!check.is_excessive);
        assert_eq!(check.excess_minutes, 0.0);
        assert!(check.is_warning);
    }

    #[test]
    fn low_idle_no_warning() {
        let check = detect_excessive_idle(96.0, 120.0);
        assert!(!check.is_warning);
        assert!(!check.is_excessive);
    }

    #[test]
    fn emission_inefficiency_two_sigma() {
        let stats = EmissionStats::new(150.0, 50.0).unwrap();
        let check = detect_emission_inefficiency(450.5, &stats, 2.0);
        assert_eq!(check.threshold, 250.0);
        assert!(check.is_inefficient);
        assert!((check.deviation - 6.01).abs() < 1e-9);
        assert!(check.percentile > 99.99);
    }

    #[test]
    fn emission_at_mean_is_fiftieth_percentile() {
        let stats = EmissionStats::new(150.0, 50.0).unwrap();
        let check = detect_emission_inefficiency(150.0, &stats, 2.0);
        assert!(!check.is_inefficient);
        assert!((check.percentile - 50.0).abs() < 1e-9);
    }

    #[test]
    fn zero_std_never_flags() {
        let stats = EmissionStats::new(150.0, 0.0).unwrap();
        let check = detect_emission_inefficiency(900.0, &stats, 2.0);
        assert!(!check.is_inefficient);
        assert_eq!(check.deviation, 0.0);
        assert!((check.percentile - 50.0).abs() < 1e-9);
    }

    #[test]
    fn invalid_stats_rejected() {
        assert!(EmissionStats::new(150.0, -1.0).is_err());
        assert!(EmissionStats::new(f64::NAN, 1.0).is_err());
    }

    #[test]
    fn estimate_ignores_zero_intensity() {
        let make = |intensity: f64| DerivedFeatures {
            device_id: 1,
            timestamp: timestamp_format::parse("2024-01-01 00:00:00").unwrap(),
            speed_kmh: 0.0,
            rpm: 0.0,
            is_moving: false,
            is_idle: false,
            time_delta_min: 0.0,
            distance_delta_km: 0.0,
            fuel_level_delta_l: 0.0,
            fuel_consumed_l: 0.0,
            idle_duration_min: 0.0,
            engine_load_pct: 0.0,
            fuel_consumption_rate_lpkm: 0.0,
            co2_grams: 0.0,
            co2_intensity_gpkm: intensity,
        };
        let summary = EmissionStats::estimate(&[make(0.0), make(100.0), make(200.0), make(300.0)]);
        assert_eq!(summary.sample_count, 3);
        assert_eq!(summary.stats.mean, 200.0);
        assert!((summary.stats.std - 100.0).abs() < 1e-9);
        assert_eq!(summary.min, 100.0);
        assert_eq!(summary.max, 300.0);

        let single = EmissionStats::estimate(&[make(120.0)]);
        assert_eq!(single.stats.std, 0.0);
        assert_eq!(EmissionStats::estimate(&[]).sample_count, 0);
    }
}
