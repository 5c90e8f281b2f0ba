//! Cheap spectral-energy features used to gate windows before they're sent
//! to the classifier.

mod biquad;
mod butterworth;

use crate::config::FrequencyBand;

/// Extracted audio features for a single window.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AudioFeatures {
    pub rms_total_db: f64,
    pub rms_bird_band_db: f64,
    pub rms_low_band_db: f64,
    pub snr_bird_db: f64,
}

const DB_FLOOR: f64 = 1e-10;

fn db_from_rms(rms: f64, floor: f64) -> f64 {
    20.0 * rms.max(floor).log10()
}

fn rms(samples: &[f32]) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_sq: f64 = samples.iter().map(|&s| (s as f64) * (s as f64)).sum();
    (sum_sq / samples.len() as f64).sqrt()
}

/// Runs a band through the Butterworth SOS cascade, clamping the edges to
/// `[0.001, 0.999]` of Nyquist and passing samples through unfiltered (with
/// a warning) if the band collapses after clamping.
fn bandpass_rms(samples: &[f32], sample_rate: u32, band: FrequencyBand) -> f64 {
    let nyquist = sample_rate as f64 / 2.0;
    let low = (band.low / nyquist).max(0.001);
    let high = (band.high / nyquist).min(0.999);

    if low >= high {
        log::warn!(
            "invalid band: {}-{} Hz at {} Hz sample rate, passing through unfiltered",
            band.low,
            band.high,
            sample_rate
        );
        return rms(samples);
    }

    let mut sections = butterworth::bandpass_sos(low, high);
    let mut filtered = samples.to_vec();
    for section in &mut sections {
        let mut out = vec![0.0_f32; filtered.len()];
        section.process_buffer(&filtered, &mut out);
        filtered = out;
    }
    rms(&filtered)
}

/// Extracts [`AudioFeatures`] for a window of mono samples normalized to
/// `[-1, 1]`.
pub struct FeatureExtractor {
    sample_rate: u32,
    bird_band: FrequencyBand,
    low_band: FrequencyBand,
}

impl FeatureExtractor {
    pub fn new(sample_rate: u32, bird_band: FrequencyBand, low_band: FrequencyBand) -> Self {
        Self {
            sample_rate,
            bird_band,
            low_band,
        }
    }

    pub fn extract(&self, samples: &[f32]) -> AudioFeatures {
        let rms_total_db = db_from_rms(rms(samples), DB_FLOOR);
        let rms_bird_band_db = db_from_rms(
            bandpass_rms(samples, self.sample_rate, self.bird_band),
            DB_FLOOR,
        );
        let rms_low_band_db = db_from_rms(
            bandpass_rms(samples, self.sample_rate, self.low_band),
            DB_FLOOR,
        );
        let snr_bird_db = rms_bird_band_db - rms_low_band_db;

        AudioFeatures {
            rms_total_db,
            rms_bird_band_db,
            rms_low_band_db,
            snr_bird_db,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn silence_floors_at_minus_200_db() {
        let extractor = FeatureExtractor::new(
            48_000,
            FrequencyBand {
                low: 2000.0,
                high: 9000.0,
            },
            FrequencyBand {
                low: 20.0,
                high: 500.0,
            },
        );
        let features = extractor.extract(&vec![0.0_f32; 48_000]);
        assert_eq!(features.rms_total_db, -200.0);
    }

    #[test]
    fn full_scale_tone_is_loud() {
        let extractor = FeatureExtractor::new(
            48_000,
            FrequencyBand {
                low: 2000.0,
                high: 9000.0,
            },
            FrequencyBand {
                low: 20.0,
                high: 500.0,
            },
        );
        let samples: Vec<f32> = (0..48_000)
            .map(|i| (2.0 * std::f64::consts::PI * 5000.0 * i as f64 / 48_000.0).sin() as f32)
            .collect();
        let features = extractor.extract(&samples);
        assert!(features.rms_total_db > -10.0);
        assert!(features.snr_bird_db > 0.0);
    }

    #[test]
    fn inverted_band_after_clamping_passes_through_unfiltered() {
        // low/high both above Nyquist clamp to the same 0.999 edge.
        let band = FrequencyBand {
            low: 23_999.0,
            high: 23_999.5,
        };
        let rms_out = bandpass_rms(&vec![1.0_f32; 1000], 48_000, band);
        assert!(rms_out > 0.0);
    }
}
