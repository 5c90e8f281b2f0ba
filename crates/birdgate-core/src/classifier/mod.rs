//! Dispatch to an external BirdNET classifier, over HTTP or a local CLI.

mod cli;
mod http;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::{BirdnetConfig, BirdnetMode};

/// A single BirdNET detection result.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Detection {
    pub species: String,
    pub confidence: f32,
    #[serde(default)]
    pub start_time: f64,
    #[serde(default)]
    pub end_time: f64,
}

/// Analyzes a window of audio and returns detections, sorted by descending
/// confidence and truncated to the configured `top_n`.
///
/// Implementations never propagate I/O or parse failures: a failed analysis
/// is logged and reported as an empty detection list, so a flaky classifier
/// doesn't interrupt the stream pipeline it's wired into.
#[async_trait]
pub trait Classifier: Send + Sync {
    async fn analyze(&self, samples: &[f32], sample_rate: u32) -> Vec<Detection>;
}

/// Builds the configured classifier backend.
pub fn create_classifier(config: &BirdnetConfig) -> Box<dyn Classifier> {
    match config.mode {
        BirdnetMode::Http => Box::new(http::HttpClassifier::new(config.clone())),
        BirdnetMode::Cli => Box::new(cli::CliClassifier::new(config.clone())),
    }
}

/// Picks the display species name the way the original client does:
/// scientific name first, then common name, then a generic field, else
/// "Unknown".
fn resolve_species(
    scientific_name: Option<&str>,
    common_name: Option<&str>,
    species: Option<&str>,
) -> String {
    scientific_name
        .filter(|s| !s.is_empty())
        .or(common_name.filter(|s| !s.is_empty()))
        .or(species.filter(|s| !s.is_empty()))
        .unwrap_or("Unknown")
        .to_string()
}

/// Filters by minimum confidence, sorts descending, truncates to `top_n`.
fn finalize(mut detections: Vec<Detection>, config: &BirdnetConfig) -> Vec<Detection> {
    detections.retain(|d| d.confidence >= config.min_confidence);
    detections.sort_by(|a, b| b.confidence.partial_cmp(&a.confidence).unwrap());
    detections.truncate(config.top_n);
    detections
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn species_priority_prefers_scientific_name() {
        let name = resolve_species(Some("Turdus migratorius"), Some("American Robin"), None);
        assert_eq!(name, "Turdus migratorius");
    }

    #[test]
    fn species_priority_falls_back_to_common_name() {
        let name = resolve_species(None, Some("American Robin"), Some("robin"));
        assert_eq!(name, "American Robin");
    }

    #[test]
    fn species_priority_falls_back_to_unknown() {
        let name = resolve_species(None, None, None);
        assert_eq!(name, "Unknown");
    }

    #[test]
    fn finalize_filters_sorts_and_truncates() {
        let config = BirdnetConfig {
            min_confidence: 0.5,
            top_n: 2,
            ..BirdnetConfig::default()
        };
        let detections = vec![
            Detection {
                species: "a".into(),
                confidence: 0.9,
                start_time: 0.0,
                end_time: 0.0,
            },
            Detection {
                species: "b".into(),
                confidence: 0.3,
                start_time: 0.0,
                end_time: 0.0,
            },
            Detection {
                species: "c".into(),
                confidence: 0.6,
                start_time: 0.0,
                end_time: 0.0,
            },
            Detection {
                species: "d".into(),
                confidence: 0.99,
                start_time: 0.0,
                end_time: 0.0,
            },
        ];
        let result = finalize(detections, &config);
        assert_eq!(
            result.iter().map(|d| d.species.as_str()).collect::<Vec<_>>(),
            vec!["d", "a"]
        );
    }
}
