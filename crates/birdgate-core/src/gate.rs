//! Routing decisions: should a window be thrown away, or sent on to BirdNET.

use serde::{Deserialize, Serialize};

use crate::config::GatingThresholds;
use crate::features::AudioFeatures;

/// Possible gating decisions for an audio window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GateDecision {
    Silence,
    Trash,
    SendToBirdnet,
}

impl std::fmt::Display for GateDecision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            GateDecision::Silence => "SILENCE",
            GateDecision::Trash => "TRASH",
            GateDecision::SendToBirdnet => "SEND_TO_BIRDNET",
        };
        f.write_str(s)
    }
}

/// Result of a gating decision, with a human-readable explanation.
#[derive(Debug, Clone)]
pub struct GateResult {
    pub decision: GateDecision,
    pub reason: String,
}

/// Applies gating rules to determine whether a window should reach BirdNET.
pub struct Gate {
    thresholds: GatingThresholds,
}

impl Gate {
    pub fn new(thresholds: GatingThresholds) -> Self {
        Self { thresholds }
    }

    /// Decision order: silence first, then noise (low bird-band SNR),
    /// otherwise the window passes.
    pub fn evaluate(&self, features: &AudioFeatures) -> GateResult {
        if features.rms_total_db < self.thresholds.min_overall_rms_db {
            return GateResult {
                decision: GateDecision::Silence,
                reason: format!(
                    "RMS {:.1} dB < threshold {:.1} dB",
                    features.rms_total_db, self.thresholds.min_overall_rms_db
                ),
            };
        }

        if features.snr_bird_db < self.thresholds.min_bird_snr_db {
            return GateResult {
                decision: GateDecision::Trash,
                reason: format!(
                    "Bird SNR {:.1} dB < threshold {:.1} dB",
                    features.snr_bird_db, self.thresholds.min_bird_snr_db
                ),
            };
        }

        GateResult {
            decision: GateDecision::SendToBirdnet,
            reason: format!(
                "RMS {:.1} dB, Bird SNR {:.1} dB",
                features.rms_total_db, features.snr_bird_db
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn features(rms_total_db: f64, snr_bird_db: f64) -> AudioFeatures {
        AudioFeatures {
            rms_total_db,
            rms_bird_band_db: 0.0,
            rms_low_band_db: 0.0,
            snr_bird_db,
        }
    }

    #[test]
    fn silence_below_rms_threshold() {
        let gate = Gate::new(GatingThresholds::default());
        let result = gate.evaluate(&features(-70.0, 10.0));
        assert_eq!(result.decision, GateDecision::Silence);
        assert_eq!(result.reason, "RMS -70.0 dB < threshold -60.0 dB");
    }

    #[test]
    fn trash_below_snr_threshold() {
        let gate = Gate::new(GatingThresholds::default());
        let result = gate.evaluate(&features(-40.0, 1.0));
        assert_eq!(result.decision, GateDecision::Trash);
        assert_eq!(result.reason, "Bird SNR 1.0 dB < threshold 3.0 dB");
    }

    #[test]
    fn sends_to_birdnet_when_both_pass() {
        let gate = Gate::new(GatingThresholds::default());
        let result = gate.evaluate(&features(-30.0, 12.34));
        assert_eq!(result.decision, GateDecision::SendToBirdnet);
        assert_eq!(result.reason, "RMS -30.0 dB, Bird SNR 12.3 dB");
    }

    #[test]
    fn decision_serializes_screaming_snake_case() {
        let json = serde_json::to_string(&GateDecision::SendToBirdnet).unwrap();
        assert_eq!(json, "\"SEND_TO_BIRDNET\"");
    }
}
