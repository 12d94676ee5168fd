//! Outlier-model boundary.
//!
//! The model itself lives outside this crate. What lives here is the contract:
//! an ordered 8-feature vector in, a continuous score plus outlier flag out,
//! and an explicit `Unavailable` outcome when the model cannot answer.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::DerivedFeatures;

pub const FEATURE_COUNT: usize = 8;

/// Column order the model was trained on.
pub const FEATURE_NAMES: [&str; FEATURE_COUNT] = [
    "speed",
    "distance_delta",
    "fuel_delta",
    "fuel_consumption_rate",
    "idle_duration",
    "rpm",
    "engine_load",
    "co2_intensity",
];

/// Named model inputs. Position in the vector comes only from `to_array`.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct FeatureVector {
    pub speed: f64,
    pub distance_delta: f64,
    pub fuel_delta: f64,
    pub fuel_consumption_rate: f64,
    pub idle_duration: f64,
    pub rpm: f64,
    pub engine_load: f64,
    pub co2_intensity: f64,
}

impl FeatureVector {
    pub fn from_features(f: &DerivedFeatures) -> Self {
        Self {
            speed: f.speed_kmh,
            distance_delta: f.distance_delta_km,
            fuel_delta: f.fuel_level_delta_l,
            fuel_consumption_rate: f.fuel_consumption_rate_lpkm,
            idle_duration: f.idle_duration_min,
            rpm: f.rpm,
            engine_load: f.engine_load_pct,
            co2_intensity: f.co2_intensity_gpkm,
        }
    }

    pub fn to_array(&self) -> [f64; FEATURE_COUNT] {
        // Destructure so adding a field without placing it fails to compile.
        let Self {
            speed,
            distance_delta,
            fuel_delta,
            fuel_consumption_rate,
            idle_duration,
            rpm,
            engine_load,
            co2_intensity,
        } = *self;
        [
            speed,
            distance_delta,
            fuel_delta,
            fuel_consumption_rate,
            idle_duration,
            rpm,
            engine_load,
            co2_intensity,
        ]
    }
}

/// Per-feature standardisation, `(x - mean) / scale`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FeatureScaler {
    mean: [f64; FEATURE_COUNT],
    scale: [f64; FEATURE_COUNT],
}

impl FeatureScaler {
    /// A zero or non-finite scale is treated as 1.
    pub fn new(mean: [f64; FEATURE_COUNT], scale: [f64; FEATURE_COUNT]) -> Self {
        let scale = scale.map(|s| if s == 0.0 || !s.is_finite() { 1.0 } else { s });
        Self { mean, scale }
    }

    pub fn transform(&self, values: &[f64; FEATURE_COUNT]) -> [f64; FEATURE_COUNT] {
        std::array::from_fn(|i| (values[i] - self.mean[i]) / self.scale[i])
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OutlierScore {
    /// More negative is more anomalous.
    pub score: f64,
    pub is_outlier: bool,
}

/// Either a real model answer or an explicit "no answer".
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum ScorerOutcome {
    Scored(OutlierScore),
    Unavailable,
}

impl ScorerOutcome {
    pub fn is_available(&self) -> bool {
        matches!(self, Self::Scored(_))
    }

    pub fn is_outlier(&self) -> bool {
        matches!(self, Self::Scored(s) if s.is_outlier)
    }

    /// Neutral 0.0 when unavailable.
    pub fn ml_score(&self) -> f64 {
        match self {
            Self::Scored(s) => s.score,
            Self::Unavailable => 0.0,
        }
    }
}

#[derive(Debug, Error)]
pub enum ScorerError {
    #[error("outlier model not loaded")]
    NotLoaded,

    #[error("outlier model timed out after {0:?}")]
    Timeout(Duration),

    #[error("outlier model failed: {0}")]
    Failed(String),
}

pub trait OutlierScorer: Send + Sync {
    fn name(&self) -> &str;
    fn score(&self, features: &[f64; FEATURE_COUNT]) -> Result<OutlierScore, ScorerError>;
}

impl<T: OutlierScorer + ?Sized> OutlierScorer for Arc<T> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn score(&self, features: &[f64; FEATURE_COUNT]) -> Result<OutlierScore, ScorerError> {
        (**self).score(features)
    }
}

/// Stand-in used when no model is configured.
pub struct UnavailableScorer;

impl OutlierScorer for UnavailableScorer {
    fn name(&self) -> &str {
        "unavailable"
    }

    fn score(&self, _features: &[f64; FEATURE_COUNT]) -> Result<OutlierScore, ScorerError> {
        Err(ScorerError::NotLoaded)
    }
}

/// Standardises the raw vector before handing it to the wrapped model.
pub struct ScaledScorer<S> {
    scaler: FeatureScaler,
    inner: S,
}

impl<S: OutlierScorer> ScaledScorer<S> {
    pub fn new(scaler: FeatureScaler, inner: S) -> Self {
        Self { scaler, inner }
    }
}

impl<S: OutlierScorer> OutlierScorer for ScaledScorer<S> {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn score(&self, features: &[f64; FEATURE_COUNT]) -> Result<OutlierScore, ScorerError> {
        self.inner.score(&self.scaler.transform(features))
    }
}

/// Call the scorer, mapping any failure or non-finite score to `Unavailable`.
pub fn score_or_unavailable(scorer: &dyn OutlierScorer, features: &FeatureVector) -> ScorerOutcome {
    match scorer.score(&features.to_array()) {
        Ok(s) if s.score.is_finite() => ScorerOutcome::Scored(s),
        Ok(s) => {
            tracing::warn!("{} returned non-finite score {}", scorer.name(), s.score);
            ScorerOutcome::Unavailable
        }
        Err(e) => {
            tracing::debug!("{}: {e}", scorer.name());
            ScorerOutcome::Unavailable
        }
    }
}

/// Like `score_or_unavailable`, with a hard deadline for slow models.
pub async fn score_with_timeout(
    scorer: Arc<dyn OutlierScorer>,
    features: FeatureVector,
    limit: Duration,
) -> ScorerOutcome {
    let task = tokio::task::spawn_blocking(move || score_or_unavailable(scorer.as_ref(), &features));
    match tokio::time::timeout(limit, task).await {
        Ok(Ok(outcome)) => outcome,
        Ok(Err(e)) => {
            tracing::warn!("Scorer task failed: {e}");
            ScorerOutcome::Unavailable
        }
        Err(_) => {
            tracing::warn!("{}", ScorerError::Timeout(limit));
            ScorerOutcome::Unavailable
        }
    }
}
