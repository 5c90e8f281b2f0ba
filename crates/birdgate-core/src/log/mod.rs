//! Durable record of every gating decision and its evidence.

mod jsonl;
mod sqlite;

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::classifier::Detection;
use crate::config::{StorageBackend, StorageConfig};
use crate::features::AudioFeatures;
use crate::gate::GateDecision;

#[derive(Debug, Error)]
pub enum LogError {
    #[error("storage I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("connection pool error: {0}")]
    Pool(#[from] r2d2::Error),
    #[error("malformed record: {0}")]
    Malformed(String),
}

/// A window log row. The two backends disagree on shape: SQLite flattens
/// feature columns onto the row, JSONL nests them under `features`. Both
/// shapes are preserved rather than normalized — see [`feature_field`].
pub type WindowRecord = Map<String, Value>;

/// Reads a feature value off a [`WindowRecord`], tolerating either the
/// nested `features.<field>` shape (JSONL) or the flattened `<field>` shape
/// (SQLite). A known wart, kept because at least one consumer depends on it.
pub fn feature_field(record: &WindowRecord, field: &str) -> Option<f64> {
    record
        .get("features")
        .and_then(Value::as_object)
        .and_then(|nested| nested.get(field))
        .or_else(|| record.get(field))
        .and_then(Value::as_f64)
}

#[derive(Debug, Clone)]
pub struct SpeciesSummary {
    pub species: String,
    pub detection_count: i64,
    pub max_confidence: f32,
    pub avg_confidence: f32,
}

/// Persists window decisions and their evidence, and answers the read
/// queries the inspection CLI needs.
pub trait WindowLog: Send + Sync {
    fn log_window(
        &self,
        timestamp: DateTime<Utc>,
        stream_name: &str,
        features: &AudioFeatures,
        decision: GateDecision,
        reason: &str,
        detections: &[Detection],
    ) -> Result<i64, LogError>;

    fn get_recent_windows(
        &self,
        limit: usize,
        stream_name: Option<&str>,
        decision: Option<GateDecision>,
    ) -> Result<Vec<WindowRecord>, LogError>;

    fn get_detections_for_window(&self, window_id: i64) -> Result<Vec<Detection>, LogError>;

    fn get_species_summary(
        &self,
        since: Option<DateTime<Utc>>,
        stream_name: Option<&str>,
    ) -> Result<Vec<SpeciesSummary>, LogError>;

    fn get_decision_stats(
        &self,
        since: Option<DateTime<Utc>>,
        stream_name: Option<&str>,
    ) -> Result<HashMap<String, i64>, LogError>;
}

/// Builds the configured window log backend.
pub fn create_window_log(config: &StorageConfig, site_id: &str) -> Result<Box<dyn WindowLog>, LogError> {
    match config.backend {
        StorageBackend::Sqlite => Ok(Box::new(sqlite::SqliteWindowLog::open(&config.path, site_id)?)),
        StorageBackend::Jsonl => Ok(Box::new(jsonl::JsonlWindowLog::open(&config.path, site_id)?)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn feature_field_reads_nested_shape() {
        let mut nested = Map::new();
        nested.insert("rms_total_db".to_string(), Value::from(-42.0));
        let mut record = Map::new();
        record.insert("features".to_string(), Value::Object(nested));
        assert_eq!(feature_field(&record, "rms_total_db"), Some(-42.0));
    }

    #[test]
    fn feature_field_reads_flat_shape() {
        let mut record = Map::new();
        record.insert("rms_total_db".to_string(), Value::from(-42.0));
        assert_eq!(feature_field(&record, "rms_total_db"), Some(-42.0));
    }
}
