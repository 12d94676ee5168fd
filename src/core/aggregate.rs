use std::collections::BTreeMap;

use chrono::{DateTime, Datelike, NaiveDate, Timelike, Utc};

use super::features::CO2_KG_PER_LITRE;
use super::{DailyAggregate, DerivedFeatures, HourlyAggregate, TelemetrySample};

const SECONDS_PER_HOUR: i64 = 3600;

/// Start of the UTC hour containing `ts`.
pub fn floor_hour(ts: DateTime<Utc>) -> DateTime<Utc> {
    let secs = ts.timestamp();
    DateTime::<Utc>::from_timestamp(secs - secs.rem_euclid(SECONDS_PER_HOUR), 0).unwrap_or(ts)
}

/// Roll per-record features up to one row per (device, hour).
///
/// Rows come out ordered by device id, then hour. Speed std is the sample
/// standard deviation; a single-sample hour reports 0.
pub fn hourly_aggregates(features: &[DerivedFeatures]) -> Vec<HourlyAggregate> {
    let mut groups: BTreeMap<(u64, DateTime<Utc>), Vec<&DerivedFeatures>> = BTreeMap::new();
    for f in features {
        groups
            .entry((f.device_id, floor_hour(f.timestamp)))
            .or_default()
            .push(f);
    }

    groups
        .into_iter()
        .map(|((device_id, hour_start), rows)| {
            let speeds: Vec<f64> = rows.iter().map(|r| r.speed_kmh).collect();
            let rpms: Vec<f64> = rows.iter().map(|r| r.rpm).collect();
            let day_of_week = hour_start.weekday().num_days_from_monday();
            let fuel_consumed: f64 = rows.iter().map(|r| r.fuel_consumed_l).sum();

            HourlyAggregate {
                device_id,
                hour_start,
                sample_count: rows.len(),
                speed_mean: mean(&speeds),
                speed_max: max(&speeds),
                speed_std: sample_std(&speeds),
                distance_total_km: rows.iter().map(|r| r.distance_delta_km).sum(),
                rpm_mean: mean(&rpms),
                rpm_max: max(&rpms),
                engine_load_mean: mean_of(&rows, |r| r.engine_load_pct),
                moving_fraction: mean_of(&rows, |r| if r.is_moving { 1.0 } else { 0.0 }),
                idle_minutes_total: rows.iter().map(|r| r.idle_duration_min).sum(),
                // Totals follow the consumed-fuel convention, not the per-record
                // level delta used for intensity.
                co2_grams_total: fuel_consumed * CO2_KG_PER_LITRE * 1000.0,
                fuel_consumed_total_l: fuel_consumed,
                hour: hour_start.hour(),
                day_of_week,
                is_weekend: u8::from(day_of_week >= 5),
            }
        })
        .collect()
}

/// Roll per-record features up to one row per (device, UTC date).
pub fn daily_aggregates(features: &[DerivedFeatures]) -> Vec<DailyAggregate> {
    let mut groups: BTreeMap<(u64, NaiveDate), Vec<&DerivedFeatures>> = BTreeMap::new();
    for f in features {
        groups
            .entry((f.device_id, f.timestamp.date_naive()))
            .or_default()
            .push(f);
    }

    groups
        .into_iter()
        .map(|((device_id, date), rows)| DailyAggregate {
            device_id,
            date,
            total_idle_minutes: rows.iter().map(|r| r.idle_duration_min).sum(),
            average_co2_intensity: mean_of(&rows, |r| r.co2_intensity_gpkm),
        })
        .collect()
}

/// Minutes spent in the current idle period of one device's ascending samples.
///
/// An idle period opens at an `Idle`/`Start` status and closes at
/// `Drive`/`End`. A period still open after the last sample runs until `now`;
/// a closed one ends at its last idle timestamp. `now` is supplied by the
/// caller so results are reproducible.
pub fn open_idle_minutes(samples: &[TelemetrySample], now: DateTime<Utc>) -> f64 {
    let mut period: Option<(DateTime<Utc>, DateTime<Utc>)> = None;
    let mut open = false;

    for sample in samples {
        let Some(status) = sample.status else {
            continue;
        };
        if status.is_idle_phase() {
            period = match period {
                Some((start, _)) if open => Some((start, sample.timestamp)),
                _ => Some((sample.timestamp, sample.timestamp)),
            };
            open = true;
        } else if matches!(status, super::VehicleStatus::Drive | super::VehicleStatus::End) {
            open = false;
        }
    }

    match period {
        Some((start, end)) => {
            let until = if open { now } else { end };
            ((until - start).num_milliseconds() as f64 / 60_000.0).max(0.0)
        }
        None => 0.0,
    }
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

fn mean_of(rows: &[&DerivedFeatures], field: impl Fn(&DerivedFeatures) -> f64) -> f64 {
    if rows.is_empty() {
        return 0.0;
    }
    rows.iter().map(|r| field(*r)).sum::<f64>() / rows.len() as f64
}

fn max(values: &[f64]) -> f64 {
    values.iter().copied().fold(f64::NEG_INFINITY, f64::max).max(0.0)
}

fn sample_std(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let m = mean(values);
    let var = values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / (values.len() - 1) as f64;
    var.sqrt()
}
