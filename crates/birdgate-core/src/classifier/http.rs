//! BirdNET-Go HTTP API client.

use async_trait::async_trait;
use serde_json::Value;
use tempfile::NamedTempFile;

use super::{finalize, resolve_species, Classifier, Detection};
use crate::config::BirdnetConfig;

pub struct HttpClassifier {
    config: BirdnetConfig,
    client: reqwest::Client,
}

impl HttpClassifier {
    pub fn new(config: BirdnetConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }

    async fn analyze_inner(&self, samples: &[f32], sample_rate: u32) -> anyhow::Result<Vec<Detection>> {
        let temp_file = NamedTempFile::new()?;
        write_wav(temp_file.path(), samples, sample_rate)?;

        let bytes = tokio::fs::read(temp_file.path()).await?;
        let part = reqwest::multipart::Part::bytes(bytes)
            .file_name("audio.wav")
            .mime_str("audio/wav")?;
        let form = reqwest::multipart::Form::new().part("audio", part);

        let response = self
            .client
            .post(&self.config.http_url)
            .query(&[
                ("lat", self.config.latitude.to_string()),
                ("lon", self.config.longitude.to_string()),
                ("min_confidence", self.config.min_confidence.to_string()),
            ])
            .multipart(form)
            .timeout(std::time::Duration::from_secs_f64(self.config.http_timeout))
            .send()
            .await?
            .error_for_status()?;

        let data: Value = response.json().await?;
        Ok(parse_response(&data))
    }
}

#[async_trait]
impl Classifier for HttpClassifier {
    async fn analyze(&self, samples: &[f32], sample_rate: u32) -> Vec<Detection> {
        match self.analyze_inner(samples, sample_rate).await {
            Ok(detections) => finalize(detections, &self.config),
            Err(e) => {
                log::error!("BirdNET HTTP request failed: {e}");
                Vec::new()
            }
        }
    }
}

fn write_wav(path: &std::path::Path, samples: &[f32], sample_rate: u32) -> anyhow::Result<()> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 32,
        sample_format: hound::SampleFormat::Float,
    };
    let mut writer = hound::WavWriter::create(path, spec)?;
    for &s in samples {
        writer.write_sample(s)?;
    }
    writer.finalize()?;
    Ok(())
}

fn detection_from_item(item: &Value) -> Option<Detection> {
    let species = resolve_species(
        item.get("scientific_name").and_then(Value::as_str),
        item.get("common_name").and_then(Value::as_str),
        item.get("species").and_then(Value::as_str),
    );
    let confidence = item.get("confidence").and_then(Value::as_f64).unwrap_or(0.0) as f32;
    Some(Detection {
        species,
        confidence,
        start_time: item.get("start_time").and_then(Value::as_f64).unwrap_or(0.0),
        end_time: item.get("end_time").and_then(Value::as_f64).unwrap_or(0.0),
    })
}

/// Tolerates the response shapes BirdNET-Go has shipped over time: a bare
/// list of detections, a wrapper object with a `detections` array, or a
/// single inline detection object.
fn parse_response(data: &Value) -> Vec<Detection> {
    match data {
        Value::Array(items) => items.iter().filter_map(detection_from_item).collect(),
        Value::Object(map) => {
            if let Some(Value::Array(items)) = map.get("detections") {
                items.iter().filter_map(detection_from_item).collect()
            } else if map.contains_key("species") || map.contains_key("scientific_name") {
                detection_from_item(data).into_iter().collect()
            } else {
                Vec::new()
            }
        }
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_bare_list_response() {
        let data = json!([
            {"scientific_name": "Turdus migratorius", "confidence": 0.8},
            {"common_name": "Blue Jay", "confidence": 0.4},
        ]);
        let detections = parse_response(&data);
        assert_eq!(detections.len(), 2);
        assert_eq!(detections[0].species, "Turdus migratorius");
        assert_eq!(detections[1].species, "Blue Jay");
    }

    #[test]
    fn parses_wrapped_detections_object() {
        let data = json!({"detections": [{"species": "robin", "confidence": 0.5}]});
        let detections = parse_response(&data);
        assert_eq!(detections.len(), 1);
        assert_eq!(detections[0].species, "robin");
    }

    #[test]
    fn parses_single_inline_detection() {
        let data = json!({"scientific_name": "Corvus corax", "confidence": 0.9});
        let detections = parse_response(&data);
        assert_eq!(detections.len(), 1);
        assert_eq!(detections[0].species, "Corvus corax");
    }

    #[test]
    fn unrecognized_shape_yields_no_detections() {
        let data = json!({"status": "ok"});
        assert!(parse_response(&data).is_empty());
    }
}
