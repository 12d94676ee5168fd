use std::collections::HashMap;
use std::io::BufRead;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use super::aggregate::{daily_aggregates, hourly_aggregates};
use super::decoder::decode_sensors;
use super::features::{derive_fleet, DeviceCursor};
use super::normalize::normalize;
use super::{AnomalyVerdict, DerivedFeatures, HourlyAggregate, RawSample, TelemetrySample};
use crate::config::Config;
use crate::error::Result;
use crate::signals::forecast::{
    forecast_or_unavailable, EmissionForecaster, ForecastOutcome, UnavailableForecaster,
};
use crate::signals::scorer::{
    score_with_timeout, FeatureScaler, FeatureVector, OutlierScorer, ScaledScorer,
};
use crate::signals::{AnomalyDetector, DailyIdleReport};

/// Everything a worker needs, shared read-only across devices.
pub struct PipelineContext {
    pub detector: AnomalyDetector,
    pub scorer: Arc<dyn OutlierScorer>,
    pub forecaster: Arc<dyn EmissionForecaster>,
    /// Per-record deadline for the scorer, in batch and stream mode alike.
    pub scorer_timeout: Duration,
    pub channel_capacity: usize,
}

impl PipelineContext {
    /// Builds the detector from config and wraps `scorer` in the configured
    /// feature scaler, if both scaler arrays are present. No forecaster is
    /// attached until [`with_forecaster`](Self::with_forecaster).
    pub fn from_config(config: &Config, scorer: Arc<dyn OutlierScorer>) -> Result<Self> {
        let detector = AnomalyDetector::from_config(config)?;
        let scorer: Arc<dyn OutlierScorer> =
            match (config.scorer.scaler_mean, config.scorer.scaler_scale) {
                (Some(mean), Some(scale)) => {
                    Arc::new(ScaledScorer::new(FeatureScaler::new(mean, scale), scorer))
                }
                _ => scorer,
            };
        Ok(Self {
            detector,
            scorer,
            forecaster: Arc::new(UnavailableForecaster),
            scorer_timeout: Duration::from_millis(config.scorer.timeout_ms),
            channel_capacity: config.pipeline.channel_capacity.max(1),
        })
    }

    pub fn with_forecaster(mut self, forecaster: Arc<dyn EmissionForecaster>) -> Self {
        self.forecaster = forecaster;
        self
    }
}

/// One derived record with its verdict.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecordOutcome {
    pub features: DerivedFeatures,
    pub verdict: AnomalyVerdict,
}

/// An hourly rollup row and the regressor's view of it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HourlyOutcome {
    pub aggregate: HourlyAggregate,
    pub forecast: ForecastOutcome,
}

/// Hourly and daily results over a set of derived records.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Rollup {
    pub hourly: Vec<HourlyOutcome>,
    pub daily: Vec<DailyIdleReport>,
}

impl Rollup {
    pub fn aggregates(&self) -> Vec<HourlyAggregate> {
        self.hourly.iter().map(|h| h.aggregate.clone()).collect()
    }

    pub fn excessive_idle_days(&self) -> usize {
        self.daily.iter().filter(|d| d.excessive_idle_detected).count()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchReport {
    pub records: Vec<RecordOutcome>,
    pub hourly: Vec<HourlyOutcome>,
    pub daily: Vec<DailyIdleReport>,
    /// Payload segments the decoder could not read, across all samples.
    pub malformed_payloads: usize,
    /// Records fused without a model score.
    pub scorer_unavailable: usize,
}

/// Samples parsed from a JSON-lines source.
#[derive(Debug, Clone, Default)]
pub struct LoadedSamples {
    pub samples: Vec<RawSample>,
    pub skipped_lines: usize,
}

/// Read one JSON `RawSample` per line. Blank lines are ignored; lines that
/// fail to parse are skipped and counted.
pub fn read_samples<R: BufRead>(reader: R) -> Result<LoadedSamples> {
    let mut loaded = LoadedSamples::default();
    for (idx, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<RawSample>(&line) {
            Ok(sample) => loaded.samples.push(sample),
            Err(e) => {
                warn!("Skipping line {}: {e}", idx + 1);
                loaded.skipped_lines += 1;
            }
        }
    }
    Ok(loaded)
}

/// Decode and normalize one raw sample. Also returns the number of malformed
/// payload segments.
pub fn prepare_sample(raw: &RawSample) -> (TelemetrySample, usize) {
    let decoded = decode_sensors(raw.sensors.as_deref());
    let sample = normalize(raw, &decoded, raw.status_code);
    (sample, decoded.malformed_tags)
}

/// Hourly aggregates with forecasts, plus daily idle reports.
///
/// Input order does not matter, so stream output can be rolled up as it
/// arrives interleaved across devices.
pub fn rollup(features: &[DerivedFeatures], ctx: &PipelineContext) -> Rollup {
    let hourly: Vec<HourlyOutcome> = hourly_aggregates(features)
        .into_iter()
        .map(|aggregate| HourlyOutcome {
            forecast: forecast_or_unavailable(ctx.forecaster.as_ref(), &aggregate),
            aggregate,
        })
        .collect();

    let daily: Vec<DailyIdleReport> = daily_aggregates(features)
        .iter()
        .map(|d| ctx.detector.daily_report(d))
        .collect();
    for report in daily.iter().filter(|r| r.excessive_idle_detected) {
        info!(
            device_id = report.device_id,
            "Excessive idle on {}: {:.1} min ({:.1} over)",
            report.date,
            report.total_idle_minutes,
            report.excess_minutes
        );
    }

    Rollup { hourly, daily }
}

/// Run a whole batch: decode, normalize, derive, detect and aggregate.
///
/// Each device's samples must be in ascending timestamp order; a violation
/// fails the batch. Engine load is relative to the batch-wide maximum RPM.
/// Every scorer call is bounded by `ctx.scorer_timeout`.
pub async fn process_batch(raw: &[RawSample], ctx: &PipelineContext) -> Result<BatchReport> {
    let mut malformed_payloads = 0;
    let samples: Vec<TelemetrySample> = raw
        .iter()
        .map(|r| {
            let (sample, malformed) = prepare_sample(r);
            if malformed > 0 {
                debug!(device_id = r.device_id, "{malformed} malformed payload segment(s)");
            }
            malformed_payloads += malformed;
            sample
        })
        .collect();

    let features = derive_fleet(&samples).inspect_err(|e| error!("Batch rejected: {e}"))?;

    let mut scorer_unavailable = 0;
    let mut records = Vec::with_capacity(features.len());
    for f in &features {
        let ml = score_with_timeout(
            ctx.scorer.clone(),
            FeatureVector::from_features(f),
            ctx.scorer_timeout,
        )
        .await;
        if !ml.is_available() {
            scorer_unavailable += 1;
        }
        let verdict = ctx.detector.evaluate_record(f, ml);
        log_verdict(f, &verdict);
        records.push(RecordOutcome {
            features: f.clone(),
            verdict,
        });
    }

    if scorer_unavailable > 0 {
        warn!(
            "Outlier scorer unavailable for {scorer_unavailable}/{} records, verdicts are rule-only",
            records.len()
        );
    }

    let Rollup { hourly, daily } = rollup(&features, ctx);
    Ok(BatchReport {
        records,
        hourly,
        daily,
        malformed_payloads,
        scorer_unavailable,
    })
}

fn log_verdict(features: &DerivedFeatures, verdict: &AnomalyVerdict) {
    if !verdict.is_anomaly {
        return;
    }
    let types: Vec<&str> = verdict.anomaly_types.iter().map(|t| t.as_str()).collect();
    info!(
        device_id = features.device_id,
        "Anomaly at {}: {} [{}] confidence={:.2}",
        features.timestamp,
        verdict.severity.as_str(),
        types.join(","),
        verdict.confidence
    );
}

/// Messages from the streaming pipeline.
#[derive(Debug, Clone)]
pub enum PipelineOutput {
    Record(RecordOutcome),
    /// The sample was not processed; the device's cursor is unchanged.
    Rejected {
        device_id: u64,
        timestamp: DateTime<Utc>,
        reason: String,
    },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineSummary {
    pub devices: usize,
    pub records: usize,
    pub rejected: usize,
}

#[derive(Debug, Clone, Copy, Default)]
struct WorkerStats {
    records: usize,
    rejected: usize,
}

/// Streaming pipeline: one worker task per device.
///
/// Each worker exclusively owns its device's `DeviceCursor` and handles that
/// device's samples in arrival order, so different devices run in parallel
/// while one device is strictly sequential. Engine load is relative to the
/// highest RPM the device has reported so far.
pub async fn run_pipeline(
    mut rx: mpsc::Receiver<RawSample>,
    out: mpsc::Sender<PipelineOutput>,
    ctx: Arc<PipelineContext>,
) -> PipelineSummary {
    let mut workers: HashMap<u64, mpsc::Sender<RawSample>> = HashMap::new();
    let mut tasks = JoinSet::new();

    info!("Pipeline started, waiting for samples...");

    while let Some(raw) = rx.recv().await {
        let device_id = raw.device_id;
        let worker = workers.entry(device_id).or_insert_with(|| {
            let (worker_tx, worker_rx) = mpsc::channel(ctx.channel_capacity);
            tasks.spawn(device_worker(device_id, worker_rx, out.clone(), ctx.clone()));
            debug!(device_id, "Spawned device worker");
            worker_tx
        });
        if worker.send(raw).await.is_err() {
            // Worker stopped because the output side closed.
            info!("Output channel closed, stopping pipeline");
            break;
        }
    }

    let devices = workers.len();
    drop(workers);

    let mut summary = PipelineSummary {
        devices,
        ..PipelineSummary::default()
    };
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(stats) => {
                summary.records += stats.records;
                summary.rejected += stats.rejected;
            }
            Err(e) => error!("Device worker panicked: {e}"),
        }
    }

    info!(
        "Pipeline shutting down after {} records from {} devices ({} rejected)",
        summary.records, summary.devices, summary.rejected
    );
    summary
}

async fn device_worker(
    device_id: u64,
    mut rx: mpsc::Receiver<RawSample>,
    out: mpsc::Sender<PipelineOutput>,
    ctx: Arc<PipelineContext>,
) -> WorkerStats {
    let mut cursor = DeviceCursor::new(device_id);
    let mut stats = WorkerStats::default();
    let mut warned_unavailable = false;

    while let Some(raw) = rx.recv().await {
        let (sample, malformed) = prepare_sample(&raw);
        if malformed > 0 {
            debug!(device_id, "{malformed} malformed payload segment(s)");
        }

        let message = match cursor.push(&sample) {
            Ok(features) => {
                let ml = score_with_timeout(
                    ctx.scorer.clone(),
                    FeatureVector::from_features(&features),
                    ctx.scorer_timeout,
                )
                .await;
                if !ml.is_available() && !warned_unavailable {
                    warn!(device_id, "Outlier scorer unavailable, falling back to rule-only verdicts");
                    warned_unavailable = true;
                }
                let verdict = ctx.detector.evaluate_record(&features, ml);
                log_verdict(&features, &verdict);
                stats.records += 1;
                PipelineOutput::Record(RecordOutcome { features, verdict })
            }
            Err(e) => {
                error!(device_id, "Sample rejected: {e}");
                stats.rejected += 1;
                PipelineOutput::Rejected {
                    device_id,
                    timestamp: sample.timestamp,
                    reason: e.to_string(),
                }
            }
        };

        if out.send(message).await.is_err() {
            debug!(device_id, "Output channel closed, stopping worker");
            break;
        }
    }
    stats
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DetectionConfig;
    use crate::core::{timestamp_format, AnomalyType, Severity};
    use crate::error::FleetError;
    use crate::signals::forecast::{EmissionForecast, HOURLY_FEATURE_COUNT};
    use crate::signals::rules::EmissionStats;
    use crate::signals::scorer::{OutlierScore, ScorerError, UnavailableScorer, FEATURE_COUNT};

    struct OutlierOnFuelDrop;

    impl OutlierScorer for OutlierOnFuelDrop {
        fn name(&self) -> &str {
            "fuel-drop"
        }

        fn score(&self, f: &[f64; FEATURE_COUNT]) -> std::result::Result<OutlierScore, ScorerError> {
            let outlier = f[2] < -5.0;
            Ok(OutlierScore {
                score: if outlier { -0.6 } else { 0.1 },
                is_outlier: outlier,
            })
        }
    }

    struct SlowScorer;

    impl OutlierScorer for SlowScorer {
        fn name(&self) -> &str {
            "slow"
        }

        fn score(&self, _f: &[f64; FEATURE_COUNT]) -> std::result::Result<OutlierScore, ScorerError> {
            std::thread::sleep(Duration::from_millis(300));
            Ok(OutlierScore { score: -0.9, is_outlier: true })
        }
    }

    /// Predicts idle minutes as grams so the hourly input is visible.
    struct IdleForecaster;

    impl EmissionForecaster for IdleForecaster {
        fn name(&self) -> &str {
            "idle"
        }

        fn predict(
            &self,
            f: &[f64; HOURLY_FEATURE_COUNT],
        ) -> std::result::Result<EmissionForecast, ScorerError> {
            Ok(EmissionForecast {
                co2_grams_total: f[8],
                co2_intensity_mean: 0.0,
            })
        }
    }

    fn make_context(scorer: Arc<dyn OutlierScorer>) -> PipelineContext {
        PipelineContext {
            detector: AnomalyDetector::new(
                DetectionConfig::default(),
                EmissionStats::new(150.0, 50.0).unwrap(),
            )
            .unwrap(),
            scorer,
            forecaster: Arc::new(UnavailableForecaster),
            scorer_timeout: Duration::from_secs(1),
            channel_capacity: 8,
        }
    }

    fn make_raw(device_id: u64, ts: &str, speed: f64, sensors: &str) -> RawSample {
        RawSample {
            device_id,
            timestamp: timestamp_format::parse(ts).unwrap(),
            latitude: -6.2,
            longitude: 106.8,
            speed,
            sensors: Some(sensors.to_string()),
            status_code: Some(1),
        }
    }

    /// Stationary vehicle losing 12 L between the second and third samples.
    fn theft_batch() -> Vec<RawSample> {
        vec![
            make_raw(1, "2024-03-04 10:00:00", 0.0, "<io87>100000<io85>500<ignition>true<sat>8"),
            make_raw(1, "2024-03-04 10:05:00", 0.0, "<io87>100000<io85>500<ignition>true<sat>8"),
            make_raw(1, "2024-03-04 10:10:00", 0.0, "<io87>100000<io85>380<ignition>true<sat>8"),
        ]
    }

    #[tokio::test]
    async fn batch_flags_stationary_fuel_drop() {
        let ctx = make_context(Arc::new(UnavailableScorer));
        let report = process_batch(&theft_batch(), &ctx).await.unwrap();

        assert_eq!(report.records.len(), 3);
        let last = &report.records[2];
        assert!((last.features.fuel_level_delta_l + 12.0).abs() < 1e-9);
        assert_eq!(last.verdict.severity, Severity::Critical);
        assert_eq!(last.verdict.anomaly_types, vec![AnomalyType::FuelTheft]);
        assert!(!report.records[1].verdict.is_anomaly);
        assert_eq!(report.scorer_unavailable, 3);
        assert_eq!(report.hourly.len(), 1);
        assert_eq!(report.daily.len(), 1);
        assert!((report.daily[0].total_idle_minutes - 10.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn batch_fuses_model_output() {
        let ctx = make_context(Arc::new(OutlierOnFuelDrop));
        let report = process_batch(&theft_batch(), &ctx).await.unwrap();
        let v = &report.records[2].verdict;
        assert_eq!(v.anomaly_types, vec![AnomalyType::FuelTheft, AnomalyType::MlDetected]);
        assert!(v.scorer_available);
        assert_eq!(v.anomaly_score, -0.6);
        assert_eq!(report.scorer_unavailable, 0);
    }

    #[tokio::test]
    async fn batch_is_idempotent() {
        let ctx = make_context(Arc::new(OutlierOnFuelDrop));
        let first = process_batch(&theft_batch(), &ctx).await.unwrap();
        let second = process_batch(&theft_batch(), &ctx).await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn batch_rejects_out_of_order_device() {
        let ctx = make_context(Arc::new(UnavailableScorer));
        let mut batch = theft_batch();
        batch.swap(1, 2);
        assert!(matches!(
            process_batch(&batch, &ctx).await,
            Err(FleetError::SequenceOrder { device_id: 1, .. })
        ));
    }

    #[tokio::test]
    async fn batch_counts_malformed_payloads() {
        let ctx = make_context(Arc::new(UnavailableScorer));
        let batch = vec![make_raw(2, "2024-03-04 10:00:00", 10.0, "<io87>5<broken<>7<sat>5")];
        let report = process_batch(&batch, &ctx).await.unwrap();
        assert_eq!(report.malformed_payloads, 2);
        assert_eq!(report.records.len(), 1);
    }

    #[tokio::test]
    async fn batch_scorer_deadline_falls_back_to_rules() {
        let ctx = PipelineContext {
            scorer_timeout: Duration::from_millis(20),
            ..make_context(Arc::new(SlowScorer))
        };
        let report = process_batch(&theft_batch(), &ctx).await.unwrap();
        assert_eq!(report.scorer_unavailable, 3);
        assert!(report.records.iter().all(|r| !r.verdict.scorer_available));
        let last = &report.records[2].verdict;
        assert_eq!(last.severity, Severity::Critical);
        assert_eq!(last.anomaly_types, vec![AnomalyType::FuelTheft]);
        assert_eq!(last.anomaly_score, 0.0);
    }

    #[tokio::test]
    async fn batch_attaches_hourly_forecasts() {
        let ctx = make_context(Arc::new(UnavailableScorer)).with_forecaster(Arc::new(IdleForecaster));
        let report = process_batch(&theft_batch(), &ctx).await.unwrap();
        assert_eq!(report.hourly.len(), 1);
        let ForecastOutcome::Predicted(forecast) = report.hourly[0].forecast else {
            panic!("expected a forecast");
        };
        assert!((forecast.co2_grams_total - 10.0).abs() < 1e-9);

        let plain = process_batch(&theft_batch(), &make_context(Arc::new(UnavailableScorer)))
            .await
            .unwrap();
        assert_eq!(plain.hourly[0].forecast, ForecastOutcome::Unavailable);
        assert_eq!(plain.hourly[0].aggregate, report.hourly[0].aggregate);
    }

    #[test]
    fn context_requires_population_stats() {
        let result = PipelineContext::from_config(&Config::default(), Arc::new(UnavailableScorer));
        assert!(matches!(result, Err(FleetError::MissingPopulationStats)));
    }

    #[test]
    fn read_samples_skips_bad_lines() {
        let input = concat!(
            r#"{"device_id":1,"timestamp":"2024-03-04 10:00:00","latitude":1.0,"longitude":2.0,"speed":12.5,"sensors":"<sat>5","status_code":1}"#,
            "\n",
            "not json\n",
            "\n",
            r#"{"device_id":1,"timestamp":"2024-03-04T10:05:00","latitude":1.0,"longitude":2.0}"#,
            "\n",
            r#"{"device_id":2,"timestamp":"2024-03-04 10:05:00","latitude":1.0,"longitude":2.0}"#,
            "\n",
        );
        let loaded = read_samples(input.as_bytes()).unwrap();
        assert_eq!(loaded.samples.len(), 2);
        assert_eq!(loaded.skipped_lines, 2);
        assert_eq!(loaded.samples[0].speed, 12.5);
        assert_eq!(loaded.samples[1].sensors, None);
    }

    async fn run_stream(samples: Vec<RawSample>) -> (Vec<PipelineOutput>, PipelineSummary) {
        let ctx = Arc::new(make_context(Arc::new(OutlierOnFuelDrop)));
        let (in_tx, in_rx) = mpsc::channel(16);
        let (out_tx, mut out_rx) = mpsc::channel(64);
        let handle = tokio::spawn(run_pipeline(in_rx, out_tx, ctx));
        for s in samples {
            in_tx.send(s).await.unwrap();
        }
        drop(in_tx);
        let summary = handle.await.unwrap();
        let mut outputs = Vec::new();
        while let Some(o) = out_rx.recv().await {
            outputs.push(o);
        }
        (outputs, summary)
    }

    #[tokio::test]
    async fn stream_keeps_per_device_order() {
        let mut samples = Vec::new();
        for minute in 0..5 {
            let ts = format!("2024-03-04 10:0{minute}:00");
            samples.push(make_raw(1, &ts, 30.0, &format!("<io87>{}<sat>6", 1000 + minute * 500)));
            samples.push(make_raw(2, &ts, 0.0, "<io87>2000<ignition>true<sat>6"));
        }

        let (outputs, summary) = run_stream(samples).await;
        assert_eq!(summary, PipelineSummary { devices: 2, records: 10, rejected: 0 });

        for device in [1, 2] {
            let stamps: Vec<DateTime<Utc>> = outputs
                .iter()
                .filter_map(|o| match o {
                    PipelineOutput::Record(r) if r.features.device_id == device => {
                        Some(r.features.timestamp)
                    }
                    _ => None,
                })
                .collect();
            assert_eq!(stamps.len(), 5);
            assert!(stamps.windows(2).all(|w| w[0] < w[1]));
        }
    }

    #[tokio::test]
    async fn stream_rejects_without_advancing_cursor() {
        let samples = vec![
            make_raw(7, "2024-03-04 10:00:00", 0.0, "<io85>500<ignition>true"),
            make_raw(7, "2024-03-04 10:10:00", 0.0, "<io85>500<ignition>true"),
            make_raw(7, "2024-03-04 10:05:00", 0.0, "<io85>100<ignition>true"),
            make_raw(7, "2024-03-04 10:15:00", 0.0, "<io85>380<ignition>true"),
        ];
        let (outputs, summary) = run_stream(samples).await;
        assert_eq!(summary.records, 3);
        assert_eq!(summary.rejected, 1);

        assert!(matches!(outputs[2], PipelineOutput::Rejected { device_id: 7, .. }));
        // Delta taken against 10:10, not the rejected 10:05 sample.
        let PipelineOutput::Record(last) = &outputs[3] else {
            panic!("expected record");
        };
        assert!((last.features.fuel_level_delta_l + 12.0).abs() < 1e-9);
        assert!((last.features.time_delta_min - 5.0).abs() < 1e-9);
        assert_eq!(last.verdict.severity, Severity::Critical);
    }

    #[tokio::test]
    async fn stream_output_rolls_up_like_batch() {
        // Device 9 idles from 08:00 to 11:00; device 1 drives alongside.
        let mut samples = Vec::new();
        for step in 0..19 {
            let minutes = step * 10;
            let ts = format!("2024-03-04 {:02}:{:02}:00", 8 + minutes / 60, minutes % 60);
            samples.push(make_raw(9, &ts, 0.0, "<io87>5000<ignition>true<sat>7"));
            samples.push(make_raw(1, &ts, 40.0, &format!("<io87>{}<sat>7", 1000 + step * 6000)));
        }
        let (outputs, summary) = run_stream(samples.clone()).await;
        assert_eq!(summary.records, 38);

        let features: Vec<DerivedFeatures> = outputs
            .into_iter()
            .filter_map(|o| match o {
                PipelineOutput::Record(r) => Some(r.features),
                PipelineOutput::Rejected { .. } => None,
            })
            .collect();
        let ctx = make_context(Arc::new(UnavailableScorer));
        let streamed = rollup(&features, &ctx);

        assert_eq!(streamed.excessive_idle_days(), 1);
        let idle = streamed.daily.iter().find(|d| d.device_id == 9).unwrap();
        assert!((idle.total_idle_minutes - 180.0).abs() < 1e-9);
        assert_eq!(idle.verdict.anomaly_types, vec![AnomalyType::ExcessiveIdle]);
        assert_eq!(streamed.aggregates().len(), 8);

        let batch = process_batch(&samples_by_device(samples), &ctx).await.unwrap();
        assert_eq!(batch.daily, streamed.daily);
        assert_eq!(
            batch.hourly.iter().map(|h| h.aggregate.sample_count).collect::<Vec<_>>(),
            streamed.hourly.iter().map(|h| h.aggregate.sample_count).collect::<Vec<_>>()
        );
    }

    fn samples_by_device(mut samples: Vec<RawSample>) -> Vec<RawSample> {
        samples.sort_by_key(|s| (s.device_id, s.timestamp));
        samples
    }
}
