pub mod schema;

use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::core::{timestamp_format, AnomalyType, AnomalyVerdict, HourlyAggregate, Severity};
use crate::error::{FleetError, Result};

/// A persisted verdict.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerdictRecord {
    pub id: i64,
    pub device_id: u64,
    pub timestamp: DateTime<Utc>,
    pub severity: Severity,
    pub anomaly_types: Vec<AnomalyType>,
    pub anomaly_score: f64,
    pub confidence: f64,
    pub fuel_theft_risk: f64,
    pub emission_score: f64,
    pub scorer_available: bool,
    pub created_at: String,
}

/// Entry for batch insertion.
#[derive(Debug, Clone)]
pub struct VerdictEntry<'a> {
    pub device_id: u64,
    pub timestamp: DateTime<Utc>,
    pub verdict: &'a AnomalyVerdict,
}

pub struct Database {
    conn: Connection,
}

/// Thread-safe wrapper around Database.
#[derive(Clone)]
pub struct SharedDatabase {
    inner: Arc<Mutex<Database>>,
}

impl SharedDatabase {
    pub fn open(path: &Path) -> Result<Self> {
        let db = Database::open(path)?;
        Ok(Self {
            inner: Arc::new(Mutex::new(db)),
        })
    }

    fn lock(&self) -> MutexGuard<'_, Database> {
        // Every write is a single statement or transaction, so a poisoned
        // lock still guards a consistent connection.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn store_verdict(&self, entry: &VerdictEntry<'_>) -> Result<()> {
        self.lock().store_verdict(entry)
    }

    /// Store many verdicts in a single transaction.
    pub fn store_verdicts_batch(&self, entries: &[VerdictEntry<'_>]) -> Result<()> {
        self.lock().store_verdicts_batch(entries)
    }

    /// Upsert hourly rows keyed by (device, hour).
    pub fn store_hourly(&self, rows: &[HourlyAggregate]) -> Result<()> {
        self.lock().store_hourly(rows)
    }

    pub fn recent_verdicts(&self, limit: usize) -> Result<Vec<VerdictRecord>> {
        self.lock().recent_verdicts(limit)
    }

    pub fn verdicts_at_or_above(&self, min: Severity, limit: usize) -> Result<Vec<VerdictRecord>> {
        self.lock().verdicts_at_or_above(min, limit)
    }

    pub fn verdict_count(&self) -> Result<usize> {
        self.lock().verdict_count()
    }

    /// Verdicts whose sample timestamp falls in `[from, to]`.
    pub fn verdicts_by_timerange(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<VerdictRecord>> {
        self.lock().verdicts_by_timerange(from, to)
    }

    pub fn hourly_for_device(&self, device_id: u64) -> Result<Vec<HourlyAggregate>> {
        self.lock().hourly_for_device(device_id)
    }
}

const INSERT_VERDICT: &str =
    "INSERT INTO verdicts (device_id, timestamp, severity, severity_rank, anomaly_types, anomaly_score, confidence, fuel_theft_risk, emission_score, scorer_available, created_at)
     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, datetime('now'))";

const SELECT_VERDICT: &str =
    "SELECT id, device_id, timestamp, severity, anomaly_types, anomaly_score, confidence, fuel_theft_risk, emission_score, scorer_available, created_at
     FROM verdicts";

const SELECT_HOURLY: &str =
    "SELECT device_id, hour_start, sample_count, speed_mean, speed_max, speed_std, distance_total_km, rpm_mean, rpm_max, engine_load_mean, moving_fraction, idle_minutes_total, co2_grams_total, fuel_consumed_total_l, hour, day_of_week, is_weekend
     FROM hourly_aggregates";

impl Database {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
        schema::migrate(&conn)?;
        Ok(Self { conn })
    }

    pub fn store_verdict(&self, entry: &VerdictEntry<'_>) -> Result<()> {
        let mut stmt = self.conn.prepare_cached(INSERT_VERDICT)?;
        execute_verdict(&mut stmt, entry)
    }

    pub fn store_verdicts_batch(&self, entries: &[VerdictEntry<'_>]) -> Result<()> {
        let tx = self.conn.unchecked_transaction()?;
        {
            let mut stmt = tx.prepare_cached(INSERT_VERDICT)?;
            for entry in entries {
                execute_verdict(&mut stmt, entry)?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    pub fn store_hourly(&self, rows: &[HourlyAggregate]) -> Result<()> {
        let tx = self.conn.unchecked_transaction()?;
        {
            let mut stmt = tx.prepare_cached(
                "INSERT OR REPLACE INTO hourly_aggregates (device_id, hour_start, sample_count, speed_mean, speed_max, speed_std, distance_total_km, rpm_mean, rpm_max, engine_load_mean, moving_fraction, idle_minutes_total, co2_grams_total, fuel_consumed_total_l, hour, day_of_week, is_weekend)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)",
            )?;
            for h in rows {
                stmt.execute(rusqlite::params![
                    stored_device_id(h.device_id)?,
                    format_ts(h.hour_start),
                    h.sample_count as i64,
                    h.speed_mean,
                    h.speed_max,
                    h.speed_std,
                    h.distance_total_km,
                    h.rpm_mean,
                    h.rpm_max,
                    h.engine_load_mean,
                    h.moving_fraction,
                    h.idle_minutes_total,
                    h.co2_grams_total,
                    h.fuel_consumed_total_l,
                    h.hour,
                    h.day_of_week,
                    h.is_weekend,
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    fn row_to_verdict(row: &rusqlite::Row) -> rusqlite::Result<VerdictRecord> {
        let severity: String = row.get(3)?;
        let types: String = row.get(4)?;
        Ok(VerdictRecord {
            id: row.get(0)?,
            device_id: loaded_device_id(row, 1)?,
            timestamp: parse_ts(row.get(2)?, 2)?,
            severity: severity
                .parse()
                .map_err(|e: String| rusqlite::Error::FromSqlConversionFailure(3, Type::Text, e.into()))?,
            anomaly_types: serde_json::from_str(&types)
                .map_err(|e| rusqlite::Error::FromSqlConversionFailure(4, Type::Text, Box::new(e)))?,
            anomaly_score: row.get(5)?,
            confidence: row.get(6)?,
            fuel_theft_risk: row.get(7)?,
            emission_score: row.get(8)?,
            scorer_available: row.get::<_, i32>(9)? != 0,
            created_at: row.get(10)?,
        })
    }

    fn row_to_hourly(row: &rusqlite::Row) -> rusqlite::Result<HourlyAggregate> {
        Ok(HourlyAggregate {
            device_id: loaded_device_id(row, 0)?,
            hour_start: parse_ts(row.get(1)?, 1)?,
            sample_count: row.get::<_, i64>(2)? as usize,
            speed_mean: row.get(3)?,
            speed_max: row.get(4)?,
            speed_std: row.get(5)?,
            distance_total_km: row.get(6)?,
            rpm_mean: row.get(7)?,
            rpm_max: row.get(8)?,
            engine_load_mean: row.get(9)?,
            moving_fraction: row.get(10)?,
            idle_minutes_total: row.get(11)?,
            co2_grams_total: row.get(12)?,
            fuel_consumed_total_l: row.get(13)?,
            hour: row.get(14)?,
            day_of_week: row.get(15)?,
            is_weekend: row.get(16)?,
        })
    }

    /// Most recent sample timestamps first.
    pub fn recent_verdicts(&self, limit: usize) -> Result<Vec<VerdictRecord>> {
        let mut stmt = self
            .conn
            .prepare(&format!("{SELECT_VERDICT} ORDER BY timestamp DESC, id DESC LIMIT ?1"))?;
        let rows = stmt.query_map(rusqlite::params![limit as i64], Self::row_to_verdict)?;
        Ok(rows.collect::<rusqlite::Result<_>>()?)
    }

    /// Most severe first.
    pub fn verdicts_at_or_above(&self, min: Severity, limit: usize) -> Result<Vec<VerdictRecord>> {
        let mut stmt = self.conn.prepare(&format!(
            "{SELECT_VERDICT} WHERE severity_rank >= ?1 ORDER BY severity_rank DESC, timestamp DESC LIMIT ?2"
        ))?;
        let rows = stmt.query_map(
            rusqlite::params![min.rank(), limit as i64],
            Self::row_to_verdict,
        )?;
        Ok(rows.collect::<rusqlite::Result<_>>()?)
    }

    pub fn verdict_count(&self) -> Result<usize> {
        Ok(self
            .conn
            .query_row("SELECT COUNT(*) FROM verdicts", [], |row| {
                row.get::<_, i64>(0).map(|c| c as usize)
            })?)
    }

    pub fn verdicts_by_timerange(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<VerdictRecord>> {
        let mut stmt = self.conn.prepare(&format!(
            "{SELECT_VERDICT} WHERE timestamp >= ?1 AND timestamp <= ?2 ORDER BY timestamp ASC, id ASC"
        ))?;
        let rows = stmt.query_map(
            rusqlite::params![format_ts(from), format_ts(to)],
            Self::row_to_verdict,
        )?;
        Ok(rows.collect::<rusqlite::Result<_>>()?)
    }

    pub fn hourly_for_device(&self, device_id: u64) -> Result<Vec<HourlyAggregate>> {
        let mut stmt = self
            .conn
            .prepare(&format!("{SELECT_HOURLY} WHERE device_id = ?1 ORDER BY hour_start ASC"))?;
        let rows = stmt.query_map(rusqlite::params![stored_device_id(device_id)?], Self::row_to_hourly)?;
        Ok(rows.collect::<rusqlite::Result<_>>()?)
    }
}

fn execute_verdict(stmt: &mut rusqlite::CachedStatement<'_>, entry: &VerdictEntry<'_>) -> Result<()> {
    let v = entry.verdict;
    stmt.execute(rusqlite::params![
        stored_device_id(entry.device_id)?,
        format_ts(entry.timestamp),
        v.severity.as_str(),
        v.severity.rank(),
        serde_json::to_string(&v.anomaly_types)?,
        v.anomaly_score,
        v.confidence,
        v.fuel_theft_risk,
        v.emission_score,
        v.scorer_available as i32,
    ])?;
    Ok(())
}

/// SQLite integers are signed; ids above `i64::MAX` are refused, not wrapped.
fn stored_device_id(device_id: u64) -> Result<i64> {
    i64::try_from(device_id).map_err(|_| FleetError::DeviceIdOutOfRange(device_id))
}

fn loaded_device_id(row: &rusqlite::Row, idx: usize) -> rusqlite::Result<u64> {
    u64::try_from(row.get::<_, i64>(idx)?)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Integer, Box::new(e)))
}

/// Fixed-width text so SQL string comparison orders chronologically.
fn format_ts(ts: DateTime<Utc>) -> String {
    ts.format(timestamp_format::FORMAT).to_string()
}

fn parse_ts(raw: String, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    timestamp_format::parse(&raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}
