use rusqlite::Connection;

pub fn migrate(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS verdicts (
            id               INTEGER PRIMARY KEY AUTOINCREMENT,
            device_id        INTEGER NOT NULL,
            timestamp        TEXT NOT NULL,
            severity         TEXT NOT NULL,
            severity_rank    INTEGER NOT NULL,
            anomaly_types    TEXT NOT NULL, -- JSON
            anomaly_score    REAL NOT NULL,
            confidence       REAL NOT NULL,
            fuel_theft_risk  REAL NOT NULL,
            emission_score   REAL NOT NULL,
            scorer_available INTEGER NOT NULL,
            created_at       TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS hourly_aggregates (
            device_id             INTEGER NOT NULL,
            hour_start            TEXT NOT NULL,
            sample_count          INTEGER NOT NULL,
            speed_mean            REAL NOT NULL,
            speed_max             REAL NOT NULL,
            speed_std             REAL NOT NULL,
            distance_total_km     REAL NOT NULL,
            rpm_mean              REAL NOT NULL,
            rpm_max               REAL NOT NULL,
            engine_load_mean      REAL NOT NULL,
            moving_fraction       REAL NOT NULL,
            idle_minutes_total    REAL NOT NULL,
            co2_grams_total       REAL NOT NULL,
            fuel_consumed_total_l REAL NOT NULL,
            hour                  INTEGER NOT NULL,
            day_of_week           INTEGER NOT NULL,
            is_weekend            INTEGER NOT NULL,
            PRIMARY KEY (device_id, hour_start)
        );

        CREATE INDEX IF NOT EXISTS idx_verdicts_rank ON verdicts(severity_rank DESC);
        CREATE INDEX IF NOT EXISTS idx_verdicts_device_ts ON verdicts(device_id, timestamp);
        CREATE INDEX IF NOT EXISTS idx_verdicts_ts ON verdicts(timestamp DESC);
        ",
    )?;
    Ok(())
}
