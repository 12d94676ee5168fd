pub mod aggregate;
pub mod decoder;
pub mod features;
pub mod normalize;
pub mod pipeline;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// A raw observation as delivered by the telemetry provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawSample {
    pub device_id: u64,
    #[serde(with = "timestamp_format")]
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub latitude: f64,
    #[serde(default)]
    pub longitude: f64,
    #[serde(default)]
    pub speed: f64,
    /// Tagged sensor payload, e.g. `<ignition>true<io87>123456<sat>9`.
    #[serde(default)]
    pub sensors: Option<String>,
    #[serde(default)]
    pub status_code: Option<i64>,
}

/// Provider status codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VehicleStatus {
    Drive,
    Idle,
    Start,
    End,
    Ack,
}

impl VehicleStatus {
    /// Unknown codes map to `None`.
    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            1 => Some(VehicleStatus::Drive),
            2 => Some(VehicleStatus::Idle),
            3 => Some(VehicleStatus::Start),
            4 => Some(VehicleStatus::End),
            5 => Some(VehicleStatus::Ack),
            _ => None,
        }
    }

    pub fn is_idle_phase(&self) -> bool {
        matches!(self, VehicleStatus::Idle | VehicleStatus::Start)
    }
}

/// Canonical, immutable view of one observation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetrySample {
    pub timestamp: DateTime<Utc>,
    pub device_id: u64,
    pub latitude: f64,
    pub longitude: f64,
    pub speed_kmh: f64,
    pub ignition: bool,
    pub motion: bool,
    pub odometer_km: Option<f64>,
    pub engine_hours: Option<f64>,
    pub fuel_level_l: Option<f64>,
    pub rpm: Option<f64>,
    pub battery_voltage: Option<f64>,
    pub satellite_count: Option<f64>,
    pub hdop: Option<f64>,
    pub pdop: Option<f64>,
    /// GPS fix quality: more than three satellites.
    pub valid: bool,
    pub status: Option<VehicleStatus>,
}

/// Per-record features, computed against the previous sample of the same device.
///
/// Two fuel sign conventions are carried side by side:
/// `fuel_level_delta_l` is `current - previous` (negative = consumption) and
/// feeds anomaly detection; `fuel_consumed_l` is `previous - current` floored
/// at zero and feeds totals.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DerivedFeatures {
    pub device_id: u64,
    pub timestamp: DateTime<Utc>,
    pub speed_kmh: f64,
    pub rpm: f64,
    pub is_moving: bool,
    pub is_idle: bool,
    /// Minutes since the previous sample, clamped to [0, 1440].
    pub time_delta_min: f64,
    /// Clamped to [0, 200]; odometer rollbacks floor to 0.
    pub distance_delta_km: f64,
    /// Clamped to [-50, 50].
    pub fuel_level_delta_l: f64,
    /// Clamped to [0, 100].
    pub fuel_consumed_l: f64,
    /// Clamped to [0, 1440].
    pub idle_duration_min: f64,
    /// Relative to the highest RPM in the working set, [0, 100].
    pub engine_load_pct: f64,
    /// Clamped to [0, 2].
    pub fuel_consumption_rate_lpkm: f64,
    pub co2_grams: f64,
    /// Clamped to [0, 1000].
    pub co2_intensity_gpkm: f64,
}

/// Per-device, per-calendar-hour rollup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HourlyAggregate {
    pub device_id: u64,
    pub hour_start: DateTime<Utc>,
    pub sample_count: usize,
    pub speed_mean: f64,
    pub speed_max: f64,
    pub speed_std: f64,
    pub distance_total_km: f64,
    pub rpm_mean: f64,
    pub rpm_max: f64,
    pub engine_load_mean: f64,
    pub moving_fraction: f64,
    pub idle_minutes_total: f64,
    pub co2_grams_total: f64,
    pub fuel_consumed_total_l: f64,
    pub hour: u32,
    /// 0 = Monday.
    pub day_of_week: u32,
    pub is_weekend: u8,
}

/// Per-device, per-UTC-day rollup feeding the excessive idle rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyAggregate {
    pub device_id: u64,
    pub date: NaiveDate,
    pub total_idle_minutes: f64,
    pub average_co2_intensity: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnomalyType {
    FuelTheft,
    EmissionInefficient,
    MlDetected,
    ExcessiveIdle,
}

impl AnomalyType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnomalyType::FuelTheft => "fuel_theft",
            AnomalyType::EmissionInefficient => "emission_inefficient",
            AnomalyType::MlDetected => "ml_detected",
            AnomalyType::ExcessiveIdle => "excessive_idle",
        }
    }
}

/// Severity levels, ordered from least to most severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "LOW",
            Severity::Medium => "MEDIUM",
            Severity::High => "HIGH",
            Severity::Critical => "CRITICAL",
        }
    }

    /// Position in the severity order, 0 for LOW. Stored for SQL filtering.
    pub fn rank(&self) -> i64 {
        *self as i64
    }
}

impl std::str::FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "LOW" => Ok(Severity::Low),
            "MEDIUM" => Ok(Severity::Medium),
            "HIGH" => Ok(Severity::High),
            "CRITICAL" => Ok(Severity::Critical),
            other => Err(format!("unknown severity {other:?}")),
        }
    }
}

/// Fused outcome of one detection call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnomalyVerdict {
    pub is_anomaly: bool,
    /// Outlier model score (more negative = more anomalous); 0.0 when the
    /// scorer was unavailable.
    pub anomaly_score: f64,
    /// Triggered rules in fixed priority order.
    pub anomaly_types: Vec<AnomalyType>,
    pub severity: Severity,
    pub confidence: f64,
    pub fuel_theft_risk: f64,
    /// `co2_intensity / 1000`, capped at 1.
    pub emission_score: f64,
    pub scorer_available: bool,
}

/// `"YYYY-MM-DD HH:MM:SS"` timestamps, interpreted as UTC.
pub mod timestamp_format {
    use chrono::{DateTime, NaiveDateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub const FORMAT: &str = "%Y-%m-%d %H:%M:%S";

    pub fn parse(raw: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
        NaiveDateTime::parse_from_str(raw.trim(), FORMAT).map(|naive| naive.and_utc())
    }

    pub fn serialize<S: Serializer>(ts: &DateTime<Utc>, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&ts.format(FORMAT).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(d)?;
        parse(&raw).map_err(serde::de::Error::custom)
    }
}
