//! BirdNET-Analyzer CLI client: shells out to a local classifier process.

use async_trait::async_trait;
use serde_json::Value;
use tempfile::TempDir;

use super::{finalize, Classifier, Detection};
use crate::config::BirdnetConfig;

pub struct CliClassifier {
    config: BirdnetConfig,
}

impl CliClassifier {
    pub fn new(config: BirdnetConfig) -> Self {
        Self { config }
    }

    async fn analyze_inner(&self, samples: &[f32], sample_rate: u32) -> anyhow::Result<Vec<Detection>> {
        let work_dir = TempDir::new()?;
        let audio_path = work_dir.path().join("audio.wav");
        write_wav(&audio_path, samples, sample_rate)?;

        let mut parts = self.config.cli_path.split_whitespace();
        let program = parts
            .next()
            .ok_or_else(|| anyhow::anyhow!("birdnet cli_path is empty"))?;
        let mut cmd = tokio::process::Command::new(program);
        cmd.args(parts);
        cmd.arg("--i").arg(&audio_path);
        cmd.arg("--o").arg(work_dir.path());
        cmd.arg("--lat").arg(self.config.latitude.to_string());
        cmd.arg("--lon").arg(self.config.longitude.to_string());
        cmd.arg("--min_conf").arg(self.config.min_confidence.to_string());
        cmd.arg("--rtype").arg("json");
        if let Some(model_path) = &self.config.cli_model_path {
            cmd.arg("--classifier").arg(model_path);
        }

        log::debug!("running BirdNET CLI: {:?}", cmd.as_std());

        let output = tokio::time::timeout(
            std::time::Duration::from_secs_f64(self.config.http_timeout),
            cmd.output(),
        )
        .await
        .map_err(|_| anyhow::anyhow!("BirdNET CLI timed out"))??;

        if !output.status.success() {
            anyhow::bail!("BirdNET CLI failed: {}", String::from_utf8_lossy(&output.stderr));
        }

        let pattern = format!("{}/audio*.json", work_dir.path().display());
        let output_path = glob::glob(&pattern)?
            .filter_map(Result::ok)
            .next()
            .ok_or_else(|| anyhow::anyhow!("no BirdNET output file found"))?;

        let content = tokio::fs::read_to_string(&output_path).await?;
        let data: Value = serde_json::from_str(&content)?;
        Ok(parse_output(&data, self.config.min_confidence))
    }
}

#[async_trait]
impl Classifier for CliClassifier {
    async fn analyze(&self, samples: &[f32], sample_rate: u32) -> Vec<Detection> {
        match self.analyze_inner(samples, sample_rate).await {
            Ok(detections) => finalize(detections, &self.config),
            Err(e) => {
                log::error!("BirdNET CLI analysis error: {e}");
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

fn species_or_unknown(item: &Value) -> String {
    item.get("scientific_name")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .or_else(|| item.get("common_name").and_then(Value::as_str).filter(|s| !s.is_empty()))
        .unwrap_or("Unknown")
        .to_string()
}

fn detection_from_item(item: &Value, min_confidence: f32) -> Option<Detection> {
    let confidence = item.get("confidence").and_then(Value::as_f64).unwrap_or(0.0) as f32;
    if confidence < min_confidence {
        return None;
    }
    Some(Detection {
        species: species_or_unknown(item),
        confidence,
        start_time: 0.0,
        end_time: 0.0,
    })
}

/// Tolerates the two shapes BirdNET-Analyzer's result JSON can take: a
/// `results[].detections[]` wrapper, or a bare list of detection objects.
fn parse_output(data: &Value, min_confidence: f32) -> Vec<Detection> {
    if let Some(results) = data.get("results").and_then(Value::as_array) {
        return results
            .iter()
            .flat_map(|result| {
                result
                    .get("detections")
                    .and_then(Value::as_array)
                    .cloned()
                    .unwrap_or_default()
            })
            .filter_map(|item| detection_from_item(&item, min_confidence))
            .collect();
    }
    if let Some(items) = data.as_array() {
        return items
            .iter()
            .filter_map(|item| detection_from_item(item, min_confidence))
            .collect();
    }
    Vec::new()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_results_wrapper_shape() {
        let data = json!({
            "results": [
                {"detections": [{"scientific_name": "Turdus migratorius", "confidence": 0.8}]}
            ]
        });
        let detections = parse_output(&data, 0.1);
        assert_eq!(detections.len(), 1);
        assert_eq!(detections[0].species, "Turdus migratorius");
    }

    #[test]
    fn parses_bare_list_shape() {
        let data = json!([{"common_name": "Blue Jay", "confidence": 0.5}]);
        let detections = parse_output(&data, 0.1);
        assert_eq!(detections.len(), 1);
        assert_eq!(detections[0].species, "Blue Jay");
    }

    #[test]
    fn filters_below_min_confidence() {
        let data = json!([{"common_name": "Blue Jay", "confidence": 0.05}]);
        assert!(parse_output(&data, 0.1).is_empty());
    }
}
