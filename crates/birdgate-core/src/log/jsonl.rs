//! Append-only JSON-Lines window log backend.

use std::collections::HashMap;
use std::fs::OpenOptions;
use std::io::{BufRead, BufReader, Write};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde_json::{json, Map, Value};

use super::{LogError, SpeciesSummary, WindowLog, WindowRecord};
use crate::classifier::Detection;
use crate::features::AudioFeatures;
use crate::gate::GateDecision;

struct State {
    next_id: i64,
}

pub struct JsonlWindowLog {
    path: std::path::PathBuf,
    site_id: String,
    /// Guards both the in-memory ID counter and the file append so the two
    /// never drift out of sync under concurrent writers.
    state: Mutex<State>,
}

impl JsonlWindowLog {
    pub fn open(path: &str, site_id: &str) -> Result<Self, LogError> {
        let path = std::path::PathBuf::from(path);
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let existing_lines = if path.exists() {
            let file = std::fs::File::open(&path)?;
            BufReader::new(file).lines().count() as i64
        } else {
            0
        };

        log::info!("initialized JSONL window log at {} (starting ID: {existing_lines})", path.display());
        Ok(Self {
            path,
            site_id: site_id.to_string(),
            state: Mutex::new(State { next_id: existing_lines }),
        })
    }

    fn read_all_records(&self) -> Result<Vec<WindowRecord>, LogError> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let file = std::fs::File::open(&self.path)?;
        let mut records = Vec::new();
        for line in BufReader::new(file).lines() {
            let line = line?;
            match serde_json::from_str::<Value>(line.trim()) {
                Ok(Value::Object(map)) => records.push(map),
                Ok(_) => log::warn!("skipping non-object JSONL record"),
                Err(e) => log::warn!("skipping malformed JSONL record: {e}"),
            }
        }
        Ok(records)
    }
}

impl WindowLog for JsonlWindowLog {
    fn log_window(
        &self,
        timestamp: DateTime<Utc>,
        stream_name: &str,
        features: &AudioFeatures,
        decision: GateDecision,
        reason: &str,
        detections: &[Detection],
    ) -> Result<i64, LogError> {
        let mut state = self.state.lock();
        state.next_id += 1;
        let id = state.next_id;

        let record = json!({
            "id": id,
            "timestamp": timestamp.to_rfc3339(),
            "site_id": self.site_id,
            "stream_name": stream_name,
            "features": {
                "rms_total_db": features.rms_total_db,
                "rms_bird_band_db": features.rms_bird_band_db,
                "rms_low_band_db": features.rms_low_band_db,
                "snr_bird_db": features.snr_bird_db,
            },
            "decision": decision.to_string(),
            "reason": reason,
            "detections": detections,
        });

        let mut file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        writeln!(file, "{}", serde_json::to_string(&record).map_err(|e| LogError::Malformed(e.to_string()))?)?;

        Ok(id)
    }

    fn get_recent_windows(
        &self,
        limit: usize,
        stream_name: Option<&str>,
        decision: Option<GateDecision>,
    ) -> Result<Vec<WindowRecord>, LogError> {
        let records = self.read_all_records()?;
        let decision_str = decision.map(|d| d.to_string());
        let matching: Vec<WindowRecord> = records
            .into_iter()
            .filter(|r| {
                stream_name
                    .map(|name| r.get("stream_name").and_then(Value::as_str) == Some(name))
                    .unwrap_or(true)
                    && decision_str
                        .as_deref()
                        .map(|d| r.get("decision").and_then(Value::as_str) == Some(d))
                        .unwrap_or(true)
            })
            .collect();

        let start = matching.len().saturating_sub(limit);
        Ok(matching[start..].iter().rev().cloned().collect())
    }

    fn get_detections_for_window(&self, window_id: i64) -> Result<Vec<Detection>, LogError> {
        let records = self.read_all_records()?;
        for record in records {
            if record.get("id").and_then(Value::as_i64) == Some(window_id) {
                let detections = record.get("detections").cloned().unwrap_or(Value::Array(vec![]));
                return serde_json::from_value(detections).map_err(|e| LogError::Malformed(e.to_string()));
            }
        }
        Ok(Vec::new())
    }

    fn get_species_summary(
        &self,
        since: Option<DateTime<Utc>>,
        stream_name: Option<&str>,
    ) -> Result<Vec<SpeciesSummary>, LogError> {
        let records = self.read_all_records()?;
        let mut stats: HashMap<String, (i64, f32, f32)> = HashMap::new();

        for record in &records {
            if !record_passes_since(record, since) {
                continue;
            }
            if stream_name
                .map(|name| record.get("stream_name").and_then(Value::as_str) != Some(name))
                .unwrap_or(false)
            {
                continue;
            }
            let Some(Value::Array(detections)) = record.get("detections") else {
                continue;
            };
            for detection in detections {
                let species = detection.get("species").and_then(Value::as_str).unwrap_or("Unknown");
                let confidence = detection.get("confidence").and_then(Value::as_f64).unwrap_or(0.0) as f32;
                let entry = stats.entry(species.to_string()).or_insert((0, 0.0, 0.0));
                entry.0 += 1;
                entry.1 = entry.1.max(confidence);
                entry.2 += confidence;
            }
        }

        let mut results: Vec<SpeciesSummary> = stats
            .into_iter()
            .map(|(species, (count, max_confidence, total_confidence))| SpeciesSummary {
                species,
                detection_count: count,
                max_confidence,
                avg_confidence: total_confidence / count as f32,
            })
            .collect();
        results.sort_by_key(|s| std::cmp::Reverse(s.detection_count));
        Ok(results)
    }

    fn get_decision_stats(
        &self,
        since: Option<DateTime<Utc>>,
        stream_name: Option<&str>,
    ) -> Result<HashMap<String, i64>, LogError> {
        let records = self.read_all_records()?;
        let mut counts = HashMap::new();
        for record in &records {
            if !record_passes_since(record, since) {
                continue;
            }
            if stream_name
                .map(|name| record.get("stream_name").and_then(Value::as_str) != Some(name))
                .unwrap_or(false)
            {
                continue;
            }
            let decision = record.get("decision").and_then(Value::as_str).unwrap_or("UNKNOWN");
            *counts.entry(decision.to_string()).or_insert(0) += 1;
        }
        Ok(counts)
    }
}

fn record_passes_since(record: &Map<String, Value>, since: Option<DateTime<Utc>>) -> bool {
    let Some(since) = since else { return true };
    let Some(timestamp) = record.get("timestamp").and_then(Value::as_str) else {
        return false;
    };
    match DateTime::parse_from_rfc3339(timestamp) {
        Ok(t) => t.with_timezone(&Utc) >= since,
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_features() -> AudioFeatures {
        AudioFeatures {
            rms_total_db: -30.0,
            rms_bird_band_db: -20.0,
            rms_low_band_db: -40.0,
            snr_bird_db: 20.0,
        }
    }

    fn temp_path() -> std::path::PathBuf {
        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        std::env::temp_dir().join(format!("birdgate-test-{nanos}.jsonl"))
    }

    #[test]
    fn ids_increment_and_resume_from_existing_lines() {
        let path = temp_path();
        let log = JsonlWindowLog::open(path.to_str().unwrap(), "yard").unwrap();
        let first = log
            .log_window(Utc::now(), "a", &sample_features(), GateDecision::Silence, "x", &[])
            .unwrap();
        let second = log
            .log_window(Utc::now(), "a", &sample_features(), GateDecision::Silence, "x", &[])
            .unwrap();
        assert_eq!(first, 1);
        assert_eq!(second, 2);

        let reopened = JsonlWindowLog::open(path.to_str().unwrap(), "yard").unwrap();
        let third = reopened
            .log_window(Utc::now(), "a", &sample_features(), GateDecision::Silence, "x", &[])
            .unwrap();
        assert_eq!(third, 3);
    }

    #[test]
    fn recent_windows_are_most_recent_first_and_respect_limit() {
        let path = temp_path();
        let log = JsonlWindowLog::open(path.to_str().unwrap(), "yard").unwrap();
        for _ in 0..5 {
            log.log_window(Utc::now(), "a", &sample_features(), GateDecision::Silence, "x", &[])
                .unwrap();
        }
        let recent = log.get_recent_windows(2, None, None).unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].get("id").and_then(Value::as_i64), Some(5));
        assert_eq!(recent[1].get("id").and_then(Value::as_i64), Some(4));
    }

    #[test]
    fn malformed_lines_are_skipped() {
        let path = temp_path();
        let log = JsonlWindowLog::open(path.to_str().unwrap(), "yard").unwrap();
        log.log_window(Utc::now(), "a", &sample_features(), GateDecision::Silence, "x", &[])
            .unwrap();
        {
            let mut file = OpenOptions::new().append(true).open(&path).unwrap();
            writeln!(file, "not json").unwrap();
        }
        let recent = log.get_recent_windows(10, None, None).unwrap();
        assert_eq!(recent.len(), 1);
    }
}
