//! Per-record feature derivation.
//!
//! Every delta is taken against the immediately preceding sample of the same
//! device. The only state is a [`DeviceCursor`], owned by whoever processes
//! that device's stream; there is no shared or global state.
//!
//! Input must be strictly ascending by timestamp within a device. A sample at
//! or before the previous one is rejected with [`FleetError::SequenceOrder`]
//! and leaves the cursor untouched; callers sort before feeding the engine.
//!
//! Engine load is relative: `rpm / max_rpm * 100`, where `max_rpm` is the
//! highest RPM in the working set (the batch, or everything a streaming
//! cursor has seen so far). It is not an absolute load measurement and is
//! not comparable across working sets.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

use super::{DerivedFeatures, TelemetrySample};
use crate::error::{FleetError, Result};

/// kg of CO2 per litre of diesel.
pub const CO2_KG_PER_LITRE: f64 = 2.68;

const MAX_TIME_DELTA_MIN: f64 = 1440.0;
const MAX_DISTANCE_DELTA_KM: f64 = 200.0;
const FUEL_LEVEL_DELTA_LIMIT_L: f64 = 50.0;
const MAX_FUEL_CONSUMED_L: f64 = 100.0;
const MAX_CONSUMPTION_RATE_LPKM: f64 = 2.0;
const MAX_CO2_INTENSITY_GPKM: f64 = 1000.0;

#[derive(Debug, Clone, Copy, PartialEq)]
struct LastSeen {
    timestamp: DateTime<Utc>,
    odometer_km: Option<f64>,
    fuel_level_l: Option<f64>,
}

/// Previous-sample state for one device.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceCursor {
    device_id: u64,
    last: Option<LastSeen>,
    peak_rpm: f64,
}

impl DeviceCursor {
    pub fn new(device_id: u64) -> Self {
        Self {
            device_id,
            last: None,
            peak_rpm: 0.0,
        }
    }

    pub fn device_id(&self) -> u64 {
        self.device_id
    }

    pub fn last_timestamp(&self) -> Option<DateTime<Utc>> {
        self.last.map(|l| l.timestamp)
    }

    /// Streaming step: engine load is relative to the highest RPM this cursor
    /// has seen, including the current sample.
    pub fn push(&mut self, sample: &TelemetrySample) -> Result<DerivedFeatures> {
        self.check(sample)?;
        let rpm = sample.rpm.unwrap_or(0.0);
        let peak = if rpm > self.peak_rpm { rpm } else { self.peak_rpm };
        let features = self.step(sample, peak)?;
        self.peak_rpm = peak;
        Ok(features)
    }

    /// Derive features for `sample` against the previous one, using a
    /// caller-supplied working-set maximum RPM for engine load.
    pub fn step(&mut self, sample: &TelemetrySample, max_rpm: f64) -> Result<DerivedFeatures> {
        self.check(sample)?;

        let rpm = sample.rpm.unwrap_or(0.0);
        let is_idle = sample.speed_kmh == 0.0 && sample.ignition;

        let (time_delta_min, distance_delta_km, fuel_level_delta_l, fuel_consumed_l) =
            match self.last {
                None => (0.0, 0.0, 0.0, 0.0),
                Some(prev) => {
                    let minutes = (sample.timestamp - prev.timestamp).num_milliseconds() as f64
                        / 60_000.0;
                    // Odometer rollback is a sensor glitch: floor to 0.
                    let distance = diff(sample.odometer_km, prev.odometer_km)
                        .map(|d| d.clamp(0.0, MAX_DISTANCE_DELTA_KM))
                        .unwrap_or(0.0);
                    let level = diff(sample.fuel_level_l, prev.fuel_level_l).unwrap_or(0.0);
                    (
                        minutes.clamp(0.0, MAX_TIME_DELTA_MIN),
                        distance,
                        level.clamp(-FUEL_LEVEL_DELTA_LIMIT_L, FUEL_LEVEL_DELTA_LIMIT_L),
                        (-level).clamp(0.0, MAX_FUEL_CONSUMED_L),
                    )
                }
            };

        let idle_duration_min = if is_idle { time_delta_min } else { 0.0 };

        let engine_load_pct = if max_rpm > 0.0 {
            (rpm / max_rpm * 100.0).clamp(0.0, 100.0)
        } else {
            0.0
        };

        // Per-record convention: consumption is the negated level delta.
        let consumed = (-fuel_level_delta_l).max(0.0);
        let co2_grams = consumed * CO2_KG_PER_LITRE * 1000.0;
        let (fuel_consumption_rate_lpkm, co2_intensity_gpkm) = if distance_delta_km > 0.0 {
            (
                (consumed / distance_delta_km).clamp(0.0, MAX_CONSUMPTION_RATE_LPKM),
                (co2_grams / distance_delta_km).clamp(0.0, MAX_CO2_INTENSITY_GPKM),
            )
        } else {
            (0.0, 0.0)
        };

        self.last = Some(LastSeen {
            timestamp: sample.timestamp,
            odometer_km: sample.odometer_km,
            fuel_level_l: sample.fuel_level_l,
        });

        Ok(DerivedFeatures {
            device_id: sample.device_id,
            timestamp: sample.timestamp,
            speed_kmh: sample.speed_kmh,
            rpm,
            is_moving: sample.speed_kmh > 0.0,
            is_idle,
            time_delta_min,
            distance_delta_km,
            fuel_level_delta_l,
            fuel_consumed_l,
            idle_duration_min,
            engine_load_pct,
            fuel_consumption_rate_lpkm,
            co2_grams,
            co2_intensity_gpkm,
        })
    }

    fn check(&self, sample: &TelemetrySample) -> Result<()> {
        if sample.device_id != self.device_id {
            return Err(FleetError::DeviceMismatch {
                expected: self.device_id,
                found: sample.device_id,
            });
        }
        if let Some(prev) = self.last {
            if sample.timestamp <= prev.timestamp {
                return Err(FleetError::SequenceOrder {
                    device_id: self.device_id,
                    previous: prev.timestamp,
                    current: sample.timestamp,
                });
            }
        }
        Ok(())
    }
}

/// Difference of two optional readings; `None` when either side is missing.
fn diff(current: Option<f64>, previous: Option<f64>) -> Option<f64> {
    Some(current? - previous?)
}

/// Highest RPM across a working set; 0 when none is reported.
pub fn working_set_max_rpm<'a>(samples: impl IntoIterator<Item = &'a TelemetrySample>) -> f64 {
    samples
        .into_iter()
        .filter_map(|s| s.rpm)
        .filter(|rpm| rpm.is_finite())
        .fold(0.0, f64::max)
}

/// Derive features for one device's ascending samples.
pub fn derive_device(samples: &[TelemetrySample]) -> Result<Vec<DerivedFeatures>> {
    let Some(first) = samples.first() else {
        return Ok(Vec::new());
    };
    let max_rpm = working_set_max_rpm(samples);
    let mut cursor = DeviceCursor::new(first.device_id);
    samples.iter().map(|s| cursor.step(s, max_rpm)).collect()
}

/// Derive features for a mixed-device batch.
///
/// Samples are grouped by device (devices in ascending id order, input order
/// kept within a device). Each device's samples must already be ascending.
/// Engine load uses the maximum RPM of the whole batch.
pub fn derive_fleet(samples: &[TelemetrySample]) -> Result<Vec<DerivedFeatures>> {
    let max_rpm = working_set_max_rpm(samples);
    let mut by_device: BTreeMap<u64, Vec<&TelemetrySample>> = BTreeMap::new();
    for sample in samples {
        by_device.entry(sample.device_id).or_default().push(sample);
    }

    let mut out = Vec::with_capacity(samples.len());
    for (device_id, device_samples) in by_device {
        let mut cursor = DeviceCursor::new(device_id);
        for sample in device_samples {
            out.push(cursor.step(sample, max_rpm)?);
        }
    }
    Ok(out)
}
