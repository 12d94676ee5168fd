//! Vehicle telemetry decoding, per-record feature derivation and layered
//! anomaly detection (rules, z-test and an external outlier model).

pub mod config;
pub mod core;
pub mod db;
pub mod error;
pub mod signals;

pub use crate::config::Config;
pub use crate::core::pipeline::{process_batch, run_pipeline, BatchReport, PipelineContext};
pub use crate::error::{FleetError, Result};
pub use crate::signals::AnomalyDetector;
