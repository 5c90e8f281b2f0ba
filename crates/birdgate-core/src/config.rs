//! Configuration types for Birdgate, loaded from YAML with environment overrides.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can occur while loading or validating configuration.
///
/// `ConfigError` is fatal: the daemon exits before any pipeline starts.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("at least one stream must be configured")]
    NoStreams,

    #[error("stream '{name}': {reason}")]
    InvalidStream { name: String, reason: String },

    #[error("invalid frequency band ({low}, {high}): {reason}")]
    InvalidBand { low: f64, high: f64, reason: String },
}

/// A frequency band in Hz, used for the bird/low energy proxies.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct FrequencyBand {
    pub low: f64,
    pub high: f64,
}

impl FrequencyBand {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.low < 0.0 {
            return Err(ConfigError::InvalidBand {
                low: self.low,
                high: self.high,
                reason: "low frequency must be non-negative".to_string(),
            });
        }
        if self.low >= self.high {
            return Err(ConfigError::InvalidBand {
                low: self.low,
                high: self.high,
                reason: "low must be less than high".to_string(),
            });
        }
        Ok(())
    }
}

/// Thresholds used by the gate to classify a window.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct GatingThresholds {
    pub min_overall_rms_db: f64,
    pub min_bird_snr_db: f64,
}

impl Default for GatingThresholds {
    fn default() -> Self {
        Self {
            min_overall_rms_db: -60.0,
            min_bird_snr_db: 3.0,
        }
    }
}

/// Configuration for a single RTSP stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamConfig {
    pub name: String,
    pub url: String,
    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,
    #[serde(default = "default_window_size_seconds")]
    pub window_size_seconds: f64,
    #[serde(default = "default_channels")]
    pub channels: u16,
}

fn default_sample_rate() -> u32 {
    48_000
}

fn default_window_size_seconds() -> f64 {
    5.0
}

fn default_channels() -> u16 {
    1
}

impl StreamConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sample_rate == 0 {
            return Err(ConfigError::InvalidStream {
                name: self.name.clone(),
                reason: "sample_rate must be positive".to_string(),
            });
        }
        if self.window_size_seconds <= 0.0 {
            return Err(ConfigError::InvalidStream {
                name: self.name.clone(),
                reason: "window_size_seconds must be positive".to_string(),
            });
        }
        if self.channels == 0 {
            return Err(ConfigError::InvalidStream {
                name: self.name.clone(),
                reason: "channels must be at least 1".to_string(),
            });
        }
        Ok(())
    }

    /// Number of samples (per channel, post-mixdown) in one window.
    pub fn samples_per_window(&self) -> usize {
        (self.sample_rate as f64 * self.window_size_seconds).round() as usize
    }
}

/// Which classifier backend to dispatch to.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BirdnetMode {
    Http,
    Cli,
}

/// Configuration for the classifier dispatch adapter.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BirdnetConfig {
    pub mode: BirdnetMode,
    pub http_url: String,
    pub http_timeout: f64,
    pub cli_path: String,
    pub cli_model_path: Option<String>,
    pub min_confidence: f32,
    pub top_n: usize,
    pub latitude: f64,
    pub longitude: f64,
}

impl Default for BirdnetConfig {
    fn default() -> Self {
        Self {
            mode: BirdnetMode::Http,
            http_url: "http://localhost:8080/analyze".to_string(),
            http_timeout: 30.0,
            cli_path: "python -m birdnet_analyzer".to_string(),
            cli_model_path: None,
            min_confidence: 0.1,
            top_n: 5,
            latitude: 47.6,
            longitude: -122.3,
        }
    }
}

/// Which window log backend to use.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Sqlite,
    Jsonl,
}

/// Configuration for the window log.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    pub path: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Sqlite,
            path: "birdgate.db".to_string(),
        }
    }
}

fn default_bird_band() -> FrequencyBand {
    FrequencyBand {
        low: 2000.0,
        high: 9000.0,
    }
}

fn default_low_band() -> FrequencyBand {
    FrequencyBand {
        low: 20.0,
        high: 500.0,
    }
}

fn default_site_id() -> String {
    "default".to_string()
}

fn default_reconnect_delay() -> f64 {
    5.0
}

fn default_max_reconnect_delay() -> f64 {
    60.0
}

/// Root configuration for Birdgate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_site_id")]
    pub site_id: String,
    pub streams: Vec<StreamConfig>,
    #[serde(default = "default_bird_band")]
    pub bird_band: FrequencyBand,
    #[serde(default = "default_low_band")]
    pub low_band: FrequencyBand,
    #[serde(default)]
    pub gating: GatingThresholds,
    #[serde(default)]
    pub birdnet: BirdnetConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default = "default_reconnect_delay")]
    pub reconnect_delay_seconds: f64,
    #[serde(default = "default_max_reconnect_delay")]
    pub max_reconnect_delay_seconds: f64,
}

impl Config {
    /// Loads configuration from a YAML file and validates it.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Config = serde_yaml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration, mirroring the constructor checks the
    /// original dataclasses performed in `__post_init__`.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.streams.is_empty() {
            return Err(ConfigError::NoStreams);
        }
        for stream in &self.streams {
            stream.validate()?;
        }
        self.bird_band.validate()?;
        self.low_band.validate()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_empty_streams() {
        let config = Config {
            site_id: "default".to_string(),
            streams: vec![],
            bird_band: default_bird_band(),
            low_band: default_low_band(),
            gating: GatingThresholds::default(),
            birdnet: BirdnetConfig::default(),
            storage: StorageConfig::default(),
            reconnect_delay_seconds: 5.0,
            max_reconnect_delay_seconds: 60.0,
        };
        assert!(matches!(config.validate(), Err(ConfigError::NoStreams)));
    }

    #[test]
    fn rejects_inverted_band() {
        let band = FrequencyBand {
            low: 500.0,
            high: 20.0,
        };
        assert!(band.validate().is_err());
    }

    #[test]
    fn samples_per_window_rounds() {
        let stream = StreamConfig {
            name: "yard".to_string(),
            url: "rtsp://example".to_string(),
            sample_rate: 48_000,
            window_size_seconds: 5.0,
            channels: 1,
        };
        assert_eq!(stream.samples_per_window(), 240_000);
    }

    #[test]
    fn parses_minimal_yaml() {
        let yaml = r#"
streams:
  - name: yard
    url: "rtsp://example/stream"
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.site_id, "default");
        assert_eq!(config.streams.len(), 1);
        assert_eq!(config.streams[0].sample_rate, 48_000);
        assert_eq!(config.bird_band.low, 2000.0);
        assert_eq!(config.birdnet.mode, BirdnetMode::Http);
        config.validate().unwrap();
    }
}
