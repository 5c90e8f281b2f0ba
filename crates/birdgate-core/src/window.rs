//! The unit of work flowing through a stream pipeline.

use chrono::{DateTime, Utc};

/// A fixed-duration, mono, float-normalized slice of a stream.
///
/// Produced by the reconnecting reader, consumed exactly once by a stream
/// pipeline, then discarded.
#[derive(Debug, Clone)]
pub struct AudioWindow {
    /// Mono samples normalized to `[-1, 1]`.
    pub samples: Vec<f32>,
    /// UTC timestamp captured after the read completed.
    pub timestamp: DateTime<Utc>,
    pub stream_name: String,
    pub sample_rate: u32,
    pub duration_seconds: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn window_sample_count_matches_duration() {
        let window = AudioWindow {
            samples: vec![0.0; 240_000],
            timestamp: Utc::now(),
            stream_name: "yard".to_string(),
            sample_rate: 48_000,
            duration_seconds: 5.0,
        };
        let expected = (window.sample_rate as f64 * window.duration_seconds).round() as usize;
        assert_eq!(window.samples.len(), expected);
        assert!(window.samples.iter().all(|s| (-1.0..=1.0).contains(s)));
    }
}
