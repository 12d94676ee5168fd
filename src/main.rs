use std::collections::BTreeMap;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::Parser;
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

use fleetsense::config::Config;
use fleetsense::core::pipeline::{self, PipelineContext, PipelineOutput, Rollup};
use fleetsense::core::{DerivedFeatures, RawSample, Severity};
use fleetsense::db::{SharedDatabase, VerdictEntry};
use fleetsense::signals::scorer::{OutlierScorer, UnavailableScorer};

/// Vehicle telemetry anomaly detection
#[derive(Parser)]
#[command(name = "fleetsense")]
#[command(about = "Decode vehicle telemetry, derive fuel and emission features, flag anomalies", long_about = None)]
#[command(version)]
struct Cli {
    /// JSON-lines file with one raw sample per line
    samples: PathBuf,

    /// Configuration file path
    #[arg(short, long, env = "FLEETSENSE_CONFIG", default_value = "config.toml")]
    config: PathBuf,

    /// Run the per-device streaming pipeline instead of one batch
    #[arg(long)]
    stream: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive("fleetsense=info".parse()?),
        )
        .init();

    tracing::info!("fleetsense starting...");
    let config = Config::load(&cli.config);

    // The outlier model and the hourly regressor are trained and loaded
    // outside this crate.
    let scorer: Arc<dyn OutlierScorer> = Arc::new(UnavailableScorer);
    tracing::info!("No outlier model configured, verdicts are rule-only");

    let ctx = PipelineContext::from_config(&config, scorer)
        .context("failed to build anomaly detector")?;

    let file = File::open(&cli.samples)
        .with_context(|| format!("failed to open {}", cli.samples.display()))?;
    let loaded = pipeline::read_samples(BufReader::new(file))?;
    tracing::info!(
        "Read {} samples from {} ({} lines skipped)",
        loaded.samples.len(),
        cli.samples.display(),
        loaded.skipped_lines
    );
    let samples = order_samples(loaded.samples);

    let db = SharedDatabase::open(Path::new(&config.database.path))
        .with_context(|| format!("failed to open database {}", config.database.path))?;
    tracing::info!("History database opened at {}", config.database.path);

    let min_severity = config.database.persist_min_severity;
    if cli.stream {
        run_stream(samples, ctx, &db, min_severity).await
    } else {
        run_batch(&samples, &ctx, &db, min_severity).await
    }
}

/// Sort by (device, timestamp) and drop exact duplicate timestamps, which the
/// feature engine would reject.
fn order_samples(mut samples: Vec<RawSample>) -> Vec<RawSample> {
    samples.sort_by_key(|s| (s.device_id, s.timestamp));
    let before = samples.len();
    samples.dedup_by_key(|s| (s.device_id, s.timestamp));
    if samples.len() < before {
        tracing::warn!("Dropped {} duplicate samples", before - samples.len());
    }
    samples
}

async fn run_batch(
    samples: &[RawSample],
    ctx: &PipelineContext,
    db: &SharedDatabase,
    min_severity: Severity,
) -> anyhow::Result<()> {
    let report = pipeline::process_batch(samples, ctx).await?;

    let entries: Vec<VerdictEntry<'_>> = report
        .records
        .iter()
        .filter(|r| r.verdict.severity >= min_severity)
        .map(|r| VerdictEntry {
            device_id: r.features.device_id,
            timestamp: r.features.timestamp,
            verdict: &r.verdict,
        })
        .collect();
    db.store_verdicts_batch(&entries)?;

    let mut by_severity: BTreeMap<Severity, usize> = BTreeMap::new();
    for record in &report.records {
        *by_severity.entry(record.verdict.severity).or_default() += 1;
    }
    for (severity, count) in by_severity.iter().rev() {
        tracing::info!("{:>8}: {count}", severity.as_str());
    }

    let rollup = Rollup {
        hourly: report.hourly,
        daily: report.daily,
    };
    store_rollup(db, &rollup)?;
    tracing::info!(
        "Processed {} records, stored {} verdicts, {} malformed payload segments",
        report.records.len(),
        entries.len(),
        report.malformed_payloads
    );
    Ok(())
}

async fn run_stream(
    samples: Vec<RawSample>,
    ctx: PipelineContext,
    db: &SharedDatabase,
    min_severity: Severity,
) -> anyhow::Result<()> {
    let ctx = Arc::new(ctx);
    let (sample_tx, sample_rx) = mpsc::channel(ctx.channel_capacity);
    let (out_tx, mut out_rx) = mpsc::channel(ctx.channel_capacity);
    let runner = tokio::spawn(pipeline::run_pipeline(sample_rx, out_tx, ctx.clone()));

    let feeder = tokio::spawn(async move {
        for sample in samples {
            if sample_tx.send(sample).await.is_err() {
                break;
            }
        }
    });

    let mut stored = 0usize;
    let mut features: Vec<DerivedFeatures> = Vec::new();
    while let Some(output) = out_rx.recv().await {
        match output {
            PipelineOutput::Record(record) => {
                if record.verdict.severity >= min_severity {
                    db.store_verdict(&VerdictEntry {
                        device_id: record.features.device_id,
                        timestamp: record.features.timestamp,
                        verdict: &record.verdict,
                    })?;
                    stored += 1;
                }
                features.push(record.features);
            }
            PipelineOutput::Rejected { device_id, timestamp, reason } => {
                tracing::warn!(device_id, "Sample at {timestamp} rejected: {reason}");
            }
        }
    }

    feeder.await?;
    let summary = runner.await?;
    if summary.records == 0 && summary.rejected > 0 {
        bail!("every sample was rejected");
    }

    store_rollup(db, &pipeline::rollup(&features, &ctx))?;
    tracing::info!(
        "Streamed {} records from {} devices, stored {stored} verdicts",
        summary.records,
        summary.devices
    );
    Ok(())
}

fn store_rollup(db: &SharedDatabase, rollup: &Rollup) -> anyhow::Result<()> {
    db.store_hourly(&rollup.aggregates())?;
    let forecasts = rollup.hourly.iter().filter(|h| h.forecast.is_available()).count();
    tracing::info!(
        "Stored {} hourly rows ({forecasts} forecast), {} excessive idle days",
        rollup.hourly.len(),
        rollup.excessive_idle_days()
    );
    Ok(())
}
