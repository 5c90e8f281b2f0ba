//! Per-window processing: feature extraction, gating, optional
//! classification, and logging.

use std::sync::Arc;

use crate::classifier::Classifier;
use crate::config::{Config, StreamConfig};
use crate::features::FeatureExtractor;
use crate::gate::{Gate, GateDecision};
use crate::log::WindowLog;
use crate::window::AudioWindow;

/// Composes the feature extractor, gate, classifier, and window log for one
/// stream. One of these is built per configured stream; they all share the
/// same classifier and window log instances.
pub struct StreamPipeline {
    stream_name: String,
    feature_extractor: FeatureExtractor,
    gate: Gate,
    classifier: Arc<dyn Classifier>,
    window_log: Arc<dyn WindowLog>,
}

impl StreamPipeline {
    pub fn new(
        stream_config: &StreamConfig,
        config: &Config,
        classifier: Arc<dyn Classifier>,
        window_log: Arc<dyn WindowLog>,
    ) -> Self {
        Self {
            stream_name: stream_config.name.clone(),
            feature_extractor: FeatureExtractor::new(
                stream_config.sample_rate,
                config.bird_band,
                config.low_band,
            ),
            gate: Gate::new(config.gating),
            classifier,
            window_log,
        }
    }

    /// Processes one window end-to-end. Errors from any step are logged and
    /// swallowed so a bad window never kills the ingest loop behind it.
    pub async fn process(&self, window: AudioWindow) {
        let features = self.feature_extractor.extract(&window.samples);
        let gate_result = self.gate.evaluate(&features);

        let detections = if gate_result.decision == GateDecision::SendToBirdnet {
            let detections = self.classifier.analyze(&window.samples, window.sample_rate).await;
            if detections.is_empty() {
                log::debug!("[{}] no detections (sent to BirdNET)", self.stream_name);
            } else {
                let summary = detections
                    .iter()
                    .map(|d| format!("{} ({:.2})", d.species, d.confidence))
                    .collect::<Vec<_>>()
                    .join(", ");
                log::info!("[{}] detections: {summary}", self.stream_name);
            }
            detections
        } else {
            log::debug!(
                "[{}] {}: {}",
                self.stream_name,
                gate_result.decision,
                gate_result.reason
            );
            Vec::new()
        };

        let window_log = Arc::clone(&self.window_log);
        let stream_name = window.stream_name.clone();
        let reason = gate_result.reason.clone();
        let decision = gate_result.decision;
        let result = tokio::task::spawn_blocking(move || {
            window_log.log_window(window.timestamp, &stream_name, &features, decision, &reason, &detections)
        })
        .await;

        match result {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => log::error!("[{}] failed to log window: {e}", self.stream_name),
            Err(e) => log::error!("[{}] log task panicked: {e}", self.stream_name),
        }
    }
}
