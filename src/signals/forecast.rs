//! Hourly emission forecasting boundary.
//!
//! A regressor trained outside this crate predicts hourly CO2 output and
//! intensity from a fixed 12-feature hourly vector. Only the contract lives
//! here, with the same explicit `Unavailable` outcome as the outlier scorer.

use serde::{Deserialize, Serialize};

use super::scorer::ScorerError;
use crate::core::HourlyAggregate;

pub const HOURLY_FEATURE_COUNT: usize = 12;

/// Column order the regressor was trained on.
pub const HOURLY_FEATURE_NAMES: [&str; HOURLY_FEATURE_COUNT] = [
    "speed_mean",
    "speed_max",
    "speed_std",
    "distance_delta_total",
    "rpm_mean",
    "rpm_max",
    "engine_load_mean",
    "is_moving_mean",
    "is_idle_total",
    "hour",
    "day_of_week",
    "is_weekend",
];

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct HourlyFeatureVector {
    pub speed_mean: f64,
    pub speed_max: f64,
    pub speed_std: f64,
    pub distance_delta_total: f64,
    pub rpm_mean: f64,
    pub rpm_max: f64,
    pub engine_load_mean: f64,
    pub is_moving_mean: f64,
    pub is_idle_total: f64,
    pub hour: f64,
    pub day_of_week: f64,
    pub is_weekend: f64,
}

impl HourlyFeatureVector {
    pub fn from_aggregate(h: &HourlyAggregate) -> Self {
        Self {
            speed_mean: h.speed_mean,
            speed_max: h.speed_max,
            speed_std: h.speed_std,
            distance_delta_total: h.distance_total_km,
            rpm_mean: h.rpm_mean,
            rpm_max: h.rpm_max,
            engine_load_mean: h.engine_load_mean,
            is_moving_mean: h.moving_fraction,
            is_idle_total: h.idle_minutes_total,
            hour: f64::from(h.hour),
            day_of_week: f64::from(h.day_of_week),
            is_weekend: f64::from(h.is_weekend),
        }
    }

    pub fn to_array(&self) -> [f64; HOURLY_FEATURE_COUNT] {
        let Self {
            speed_mean,
            speed_max,
            speed_std,
            distance_delta_total,
            rpm_mean,
            rpm_max,
            engine_load_mean,
            is_moving_mean,
            is_idle_total,
            hour,
            day_of_week,
            is_weekend,
        } = *self;
        [
            speed_mean,
            speed_max,
            speed_std,
            distance_delta_total,
            rpm_mean,
            rpm_max,
            engine_load_mean,
            is_moving_mean,
            is_idle_total,
            hour,
            day_of_week,
            is_weekend,
        ]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EmissionForecast {
    /// Grams of CO2 over the hour.
    pub co2_grams_total: f64,
    /// g/km averaged over the hour.
    pub co2_intensity_mean: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum ForecastOutcome {
    Predicted(EmissionForecast),
    Unavailable,
}

impl ForecastOutcome {
    pub fn is_available(&self) -> bool {
        matches!(self, Self::Predicted(_))
    }
}

pub trait EmissionForecaster: Send + Sync {
    fn name(&self) -> &str;
    fn predict(
        &self,
        features: &[f64; HOURLY_FEATURE_COUNT],
    ) -> Result<EmissionForecast, ScorerError>;
}

/// Stand-in used when no regressor is configured.
pub struct UnavailableForecaster;

impl EmissionForecaster for UnavailableForecaster {
    fn name(&self) -> &str {
        "unavailable"
    }

    fn predict(
        &self,
        _features: &[f64; HOURLY_FEATURE_COUNT],
    ) -> Result<EmissionForecast, ScorerError> {
        Err(ScorerError::NotLoaded)
    }
}

/// Failures and non-finite predictions become `Unavailable`.
pub fn forecast_or_unavailable(
    forecaster: &dyn EmissionForecaster,
    hourly: &HourlyAggregate,
) -> ForecastOutcome {
    let features = HourlyFeatureVector::from_aggregate(hourly);
    match forecaster.predict(&features.to_array()) {
        Ok(f) if f.co2_grams_total.is_finite() && f.co2_intensity_mean.is_finite() => {
            ForecastOutcome::Predicted(f)
        }
        Ok(_) => {
            tracing::warn!("{} returned a non-finite forecast", forecaster.name());
            ForecastOutcome::Unavailable
        }
        Err(e) => {
            tracing::debug!("{}: {e}", forecaster.name());
            ForecastOutcome::Unavailable
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::timestamp_format;

    /// Echoes one slot as the prediction so the vector order is observable.
    struct EchoForecaster(usize);

    impl EmissionForecaster for EchoForecaster {
        fn name(&self) -> &str {
            "echo"
        }

        fn predict(
            &self,
            features: &[f64; HOURLY_FEATURE_COUNT],
        ) -> Result<EmissionForecast, ScorerError> {
            Ok(EmissionForecast {
                co2_grams_total: features[self.0],
                co2_intensity_mean: features[self.0] / 2.0,
            })
        }
    }

    fn make_hourly() -> HourlyAggregate {
        HourlyAggregate {
            device_id: 4,
            hour_start: timestamp_format::parse("2024-03-09 07:00:00").unwrap(),
            sample_count: 12,
            speed_mean: 1.0,
            speed_max: 2.0,
            speed_std: 3.0,
            distance_total_km: 4.0,
            rpm_mean: 5.0,
            rpm_max: 6.0,
            engine_load_mean: 7.0,
            moving_fraction: 8.0,
            idle_minutes_total: 9.0,
            co2_grams_total: 999.0,
            fuel_consumed_total_l: 999.0,
            hour: 10,
            day_of_week: 11,
            is_weekend: 12,
        }
    }

    #[test]
    fn hourly_vector_positions_are_fixed() {
        let v = HourlyFeatureVector::from_aggregate(&make_hourly());
        let expected: [f64; HOURLY_FEATURE_COUNT] = std::array::from_fn(|i| (i + 1) as f64);
        assert_eq!(v.to_array(), expected);
        assert_eq!(HOURLY_FEATURE_NAMES[3], "distance_delta_total");
        assert_eq!(HOURLY_FEATURE_NAMES[8], "is_idle_total");
        assert_eq!(HOURLY_FEATURE_NAMES[11], "is_weekend");
    }

    #[test]
    fn forecaster_sees_each_feature_in_its_slot() {
        let hourly = make_hourly();
        for i in 0..HOURLY_FEATURE_COUNT {
            let ForecastOutcome::Predicted(f) = forecast_or_unavailable(&EchoForecaster(i), &hourly)
            else {
                panic!("slot {i} ({}) not predicted", HOURLY_FEATURE_NAMES[i]);
            };
            assert_eq!(f.co2_grams_total, (i + 1) as f64, "slot {i}");
        }
    }

    #[test]
    fn totals_are_not_model_inputs() {
        let mut hourly = make_hourly();
        hourly.co2_grams_total = -1.0;
        hourly.fuel_consumed_total_l = -1.0;
        let v = HourlyFeatureVector::from_aggregate(&hourly);
        assert!(v.to_array().iter().all(|x| *x > 0.0));
    }

    #[test]
    fn unavailable_forecaster() {
        let outcome = forecast_or_unavailable(&UnavailableForecaster, &make_hourly());
        assert_eq!(outcome, ForecastOutcome::Unavailable);
        assert!(!outcome.is_available());
    }

    #[test]
    fn non_finite_forecast_is_unavailable() {
        let mut hourly = make_hourly();
        hourly.speed_mean = f64::NAN;
        assert_eq!(
            forecast_or_unavailable(&EchoForecaster(0), &hourly),
            ForecastOutcome::Unavailable
        );
    }
}
