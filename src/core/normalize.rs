use super::decoder::DecodedSensorMap;
use super::{RawSample, TelemetrySample, VehicleStatus};

/// Minimum satellites for a fix to count as valid (strictly more than this).
const MIN_VALID_SATELLITES: f64 = 3.0;

/// Build the canonical sample from a raw observation and its decoded payload.
///
/// Pure and total: missing or non-numeric tags become `None`, unknown status
/// codes become `None`, and a negative or non-finite speed is read as 0.
pub fn normalize(
    raw: &RawSample,
    decoded: &DecodedSensorMap,
    status_code: Option<i64>,
) -> TelemetrySample {
    let satellite_count = decoded.number("sat");

    TelemetrySample {
        timestamp: raw.timestamp,
        device_id: raw.device_id,
        latitude: raw.latitude,
        longitude: raw.longitude,
        speed_kmh: if raw.speed.is_finite() { raw.speed.max(0.0) } else { 0.0 },
        ignition: decoded.flag("ignition").unwrap_or(false),
        motion: decoded.flag("motion").unwrap_or(false),
        // io87 / io24 carry metres, io85 / io115 carry decilitres.
        odometer_km: first_available(decoded, &["io87", "io24"]).map(|m| m / 1000.0),
        fuel_level_l: first_available(decoded, &["io85", "io115"]).map(|dl| dl / 10.0),
        rpm: decoded.number("io84"),
        engine_hours: decoded.number("enginehours"),
        battery_voltage: decoded.number("power"),
        satellite_count,
        hdop: decoded.number("hdop"),
        pdop: decoded.number("pdop"),
        valid: satellite_count.is_some_and(|sat| sat > MIN_VALID_SATELLITES),
        status: status_code.and_then(VehicleStatus::from_code),
    }
}

fn first_available(decoded: &DecodedSensorMap, tags: &[&str]) -> Option<f64> {
    tags.iter().find_map(|tag| decoded.number(tag))
}
