//! Relational window log backend, pooled with r2d2.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::params;
use serde_json::{Map, Value};

use super::{LogError, SpeciesSummary, WindowLog, WindowRecord};
use crate::classifier::Detection;
use crate::features::AudioFeatures;
use crate::gate::GateDecision;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS windows (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    timestamp TEXT NOT NULL,
    site_id TEXT NOT NULL,
    stream_name TEXT NOT NULL,
    rms_total_db REAL NOT NULL,
    rms_bird_band_db REAL NOT NULL,
    rms_low_band_db REAL NOT NULL,
    snr_bird_db REAL NOT NULL,
    decision TEXT NOT NULL,
    reason TEXT,
    created_at TEXT DEFAULT CURRENT_TIMESTAMP
);

CREATE TABLE IF NOT EXISTS detections (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    window_id INTEGER NOT NULL,
    species TEXT NOT NULL,
    confidence REAL NOT NULL,
    start_time REAL,
    end_time REAL,
    FOREIGN KEY (window_id) REFERENCES windows(id)
);

CREATE INDEX IF NOT EXISTS idx_windows_timestamp ON windows(timestamp);
CREATE INDEX IF NOT EXISTS idx_windows_stream ON windows(stream_name);
CREATE INDEX IF NOT EXISTS idx_windows_decision ON windows(decision);
CREATE INDEX IF NOT EXISTS idx_detections_species ON detections(species);
CREATE INDEX IF NOT EXISTS idx_detections_window ON detections(window_id);
";

pub struct SqliteWindowLog {
    pool: Pool<SqliteConnectionManager>,
    site_id: String,
}

impl SqliteWindowLog {
    pub fn open(path: &str, site_id: &str) -> Result<Self, LogError> {
        if let Some(parent) = std::path::Path::new(path).parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let manager = SqliteConnectionManager::file(path).with_init(|conn| {
            conn.busy_timeout(Duration::from_secs(5))?;
            conn.execute_batch("PRAGMA journal_mode = WAL;")?;
            Ok(())
        });
        let pool = Pool::new(manager).map_err(LogError::Pool)?;
        pool.get()?.execute_batch(SCHEMA)?;
        log::info!("initialized SQLite window log at {path}");
        Ok(Self {
            pool,
            site_id: site_id.to_string(),
        })
    }
}

impl WindowLog for SqliteWindowLog {
    fn log_window(
        &self,
        timestamp: DateTime<Utc>,
        stream_name: &str,
        features: &AudioFeatures,
        decision: GateDecision,
        reason: &str,
        detections: &[Detection],
    ) -> Result<i64, LogError> {
        let mut conn = self.pool.get()?;
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO windows (
                timestamp, site_id, stream_name,
                rms_total_db, rms_bird_band_db, rms_low_band_db, snr_bird_db,
                decision, reason
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                timestamp.to_rfc3339(),
                self.site_id,
                stream_name,
                features.rms_total_db,
                features.rms_bird_band_db,
                features.rms_low_band_db,
                features.snr_bird_db,
                decision.to_string(),
                reason,
            ],
        )?;
        let window_id = tx.last_insert_rowid();

        for detection in detections {
            tx.execute(
                "INSERT INTO detections (window_id, species, confidence, start_time, end_time)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    window_id,
                    detection.species,
                    detection.confidence,
                    detection.start_time,
                    detection.end_time,
                ],
            )?;
        }

        tx.commit()?;
        Ok(window_id)
    }

    fn get_recent_windows(
        &self,
        limit: usize,
        stream_name: Option<&str>,
        decision: Option<GateDecision>,
    ) -> Result<Vec<WindowRecord>, LogError> {
        let conn = self.pool.get()?;
        let mut query = "SELECT * FROM windows WHERE 1=1".to_string();
        if stream_name.is_some() {
            query.push_str(" AND stream_name = ?1");
        }
        if decision.is_some() {
            let placeholder = if stream_name.is_some() { "?2" } else { "?1" };
            query.push_str(&format!(" AND decision = {placeholder}"));
        }
        query.push_str(" ORDER BY timestamp DESC LIMIT ?");
        let limit_placeholder = query.matches('?').count();
        query = query.replacen(
            " LIMIT ?",
            &format!(" LIMIT ?{limit_placeholder}"),
            1,
        );

        let mut stmt = conn.prepare(&query)?;
        let mut bound: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();
        if let Some(name) = stream_name {
            bound.push(Box::new(name.to_string()));
        }
        if let Some(d) = decision {
            bound.push(Box::new(d.to_string()));
        }
        bound.push(Box::new(limit as i64));

        let params: Vec<&dyn rusqlite::ToSql> = bound.iter().map(|b| b.as_ref()).collect();
        let rows = stmt.query_map(params.as_slice(), row_to_record)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(LogError::from)
    }

    fn get_detections_for_window(&self, window_id: i64) -> Result<Vec<Detection>, LogError> {
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare(
            "SELECT species, confidence, start_time, end_time FROM detections
             WHERE window_id = ?1 ORDER BY confidence DESC",
        )?;
        let rows = stmt.query_map(params![window_id], |row| {
            Ok(Detection {
                species: row.get(0)?,
                confidence: row.get(1)?,
                start_time: row.get::<_, Option<f64>>(2)?.unwrap_or(0.0),
                end_time: row.get::<_, Option<f64>>(3)?.unwrap_or(0.0),
            })
        })?;
        rows.collect::<Result<Vec<_>, _>>().map_err(LogError::from)
    }

    fn get_species_summary(
        &self,
        since: Option<DateTime<Utc>>,
        stream_name: Option<&str>,
    ) -> Result<Vec<SpeciesSummary>, LogError> {
        let conn = self.pool.get()?;
        let mut query = "
            SELECT d.species, COUNT(*) as detection_count,
                   MAX(d.confidence) as max_confidence, AVG(d.confidence) as avg_confidence
            FROM detections d JOIN windows w ON d.window_id = w.id
            WHERE 1=1"
            .to_string();
        if since.is_some() {
            query.push_str(" AND w.timestamp >= ?1");
        }
        if stream_name.is_some() {
            let placeholder = if since.is_some() { "?2" } else { "?1" };
            query.push_str(&format!(" AND w.stream_name = {placeholder}"));
        }
        query.push_str(" GROUP BY d.species ORDER BY detection_count DESC");

        let mut stmt = conn.prepare(&query)?;
        let mut bound: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();
        if let Some(t) = since {
            bound.push(Box::new(t.to_rfc3339()));
        }
        if let Some(name) = stream_name {
            bound.push(Box::new(name.to_string()));
        }
        let params: Vec<&dyn rusqlite::ToSql> = bound.iter().map(|b| b.as_ref()).collect();

        let rows = stmt.query_map(params.as_slice(), |row| {
            Ok(SpeciesSummary {
                species: row.get(0)?,
                detection_count: row.get(1)?,
                max_confidence: row.get(2)?,
                avg_confidence: row.get(3)?,
            })
        })?;
        rows.collect::<Result<Vec<_>, _>>().map_err(LogError::from)
    }

    fn get_decision_stats(
        &self,
        since: Option<DateTime<Utc>>,
        stream_name: Option<&str>,
    ) -> Result<HashMap<String, i64>, LogError> {
        let conn = self.pool.get()?;
        let mut query = "SELECT decision, COUNT(*) as count FROM windows WHERE 1=1".to_string();
        if since.is_some() {
            query.push_str(" AND timestamp >= ?1");
        }
        if stream_name.is_some() {
            let placeholder = if since.is_some() { "?2" } else { "?1" };
            query.push_str(&format!(" AND stream_name = {placeholder}"));
        }
        query.push_str(" GROUP BY decision");

        let mut stmt = conn.prepare(&query)?;
        let mut bound: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();
        if let Some(t) = since {
            bound.push(Box::new(t.to_rfc3339()));
        }
        if let Some(name) = stream_name {
            bound.push(Box::new(name.to_string()));
        }
        let params: Vec<&dyn rusqlite::ToSql> = bound.iter().map(|b| b.as_ref()).collect();

        let mut stats = HashMap::new();
        let rows = stmt.query_map(params.as_slice(), |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?;
        for row in rows {
            let (decision, count) = row?;
            stats.insert(decision, count);
        }
        Ok(stats)
    }
}

/// Flattens a `windows` row into a [`WindowRecord`] — the SQLite backend's
/// half of the dual-shape wart described in [`super::feature_field`].
fn row_to_record(row: &rusqlite::Row) -> rusqlite::Result<WindowRecord> {
    let mut record = Map::new();
    record.insert("id".to_string(), Value::from(row.get::<_, i64>("id")?));
    record.insert("timestamp".to_string(), Value::from(row.get::<_, String>("timestamp")?));
    record.insert("site_id".to_string(), Value::from(row.get::<_, String>("site_id")?));
    record.insert("stream_name".to_string(), Value::from(row.get::<_, String>("stream_name")?));
    record.insert("rms_total_db".to_string(), Value::from(row.get::<_, f64>("rms_total_db")?));
    record.insert(
        "rms_bird_band_db".to_string(),
        Value::from(row.get::<_, f64>("rms_bird_band_db")?),
    );
    record.insert(
        "rms_low_band_db".to_string(),
        Value::from(row.get::<_, f64>("rms_low_band_db")?),
    );
    record.insert("snr_bird_db".to_string(), Value::from(row.get::<_, f64>("snr_bird_db")?));
    record.insert("decision".to_string(), Value::from(row.get::<_, String>("decision")?));
    record.insert(
        "reason".to_string(),
        row.get::<_, Option<String>>("reason")?.map(Value::from).unwrap_or(Value::Null),
    );
    Ok(record)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    fn unique_db_path() -> std::path::PathBuf {
        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        std::env::temp_dir().join(format!("birdgate-test-{nanos}.db"))
    }

    fn sample_features() -> AudioFeatures {
        AudioFeatures {
            rms_total_db: -30.0,
            rms_bird_band_db: -20.0,
            rms_low_band_db: -40.0,
            snr_bird_db: 20.0,
        }
    }

    #[test]
    fn log_window_round_trips_with_detections() {
        let path = unique_db_path();
        let log = SqliteWindowLog::open(path.to_str().unwrap(), "yard").unwrap();
        let id = log
            .log_window(
                Utc::now(),
                "backyard",
                &sample_features(),
                GateDecision::SendToBirdnet,
                "RMS -30.0 dB, Bird SNR 20.0 dB",
                &[Detection {
                    species: "Turdus migratorius".to_string(),
                    confidence: 0.9,
                    start_time: 0.0,
                    end_time: 3.0,
                }],
            )
            .unwrap();

        let windows = log.get_recent_windows(10, None, None).unwrap();
        assert_eq!(windows.len(), 1);
        assert_eq!(feature_field_test(&windows[0]), -30.0);

        let detections = log.get_detections_for_window(id).unwrap();
        assert_eq!(detections.len(), 1);
        assert_eq!(detections[0].species, "Turdus migratorius");
    }

    #[test]
    fn decision_stats_group_correctly() {
        let path = unique_db_path();
        let log = SqliteWindowLog::open(path.to_str().unwrap(), "yard").unwrap();
        log.log_window(Utc::now(), "a", &sample_features(), GateDecision::Silence, "x", &[])
            .unwrap();
        log.log_window(Utc::now(), "a", &sample_features(), GateDecision::Silence, "x", &[])
            .unwrap();
        log.log_window(Utc::now(), "a", &sample_features(), GateDecision::Trash, "x", &[])
            .unwrap();

        let stats = log.get_decision_stats(None, None).unwrap();
        assert_eq!(stats.get("SILENCE"), Some(&2));
        assert_eq!(stats.get("TRASH"), Some(&1));
    }

    #[test]
    fn concurrent_writers_all_persist_without_dropping_records() {
        let path = unique_db_path();
        let log = Arc::new(SqliteWindowLog::open(path.to_str().unwrap(), "yard").unwrap());
        let writers: i64 = 4;
        let per_writer: i64 = 25;

        let handles: Vec<_> = (0..writers)
            .map(|i| {
                let log = Arc::clone(&log);
                std::thread::spawn(move || {
                    for _ in 0..per_writer {
                        log.log_window(
                            Utc::now(),
                            &format!("stream-{i}"),
                            &sample_features(),
                            GateDecision::SendToBirdnet,
                            "x",
                            &[],
                        )
                        .unwrap();
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        let stats = log.get_decision_stats(None, None).unwrap();
        assert_eq!(stats.get("SEND_TO_BIRDNET"), Some(&(writers * per_writer)));
    }

    fn feature_field_test(record: &WindowRecord) -> f64 {
        super::super::feature_field(record, "rms_total_db").unwrap()
    }
}
