use chrono::{DateTime, Utc};
use thiserror::Error;

/// Errors surfaced to callers of the detection pipeline.
///
/// Malformed payloads and scorer failures are not represented here: both
/// degrade to missing fields or a rule-only verdict instead of failing.
#[derive(Debug, Error)]
pub enum FleetError {
    /// Samples for one device arrived out of ascending timestamp order.
    #[error(
        "device {device_id}: sample at {current} is not after previous sample at {previous}"
    )]
    SequenceOrder {
        device_id: u64,
        previous: DateTime<Utc>,
        current: DateTime<Utc>,
    },

    /// A cursor was handed a sample that belongs to another device.
    #[error("cursor for device {expected} received a sample for device {found}")]
    DeviceMismatch { expected: u64, found: u64 },

    /// Emission inefficiency needs caller-supplied population statistics.
    #[error("co2 intensity population statistics (mean/std) are not configured")]
    MissingPopulationStats,

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("device id {0} does not fit the history store")]
    DeviceIdOutOfRange(u64),

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("config parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

pub type Result<T> = std::result::Result<T, FleetError>;
