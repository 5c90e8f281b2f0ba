//! Reconnecting stream reader: owns one [`FfmpegDecoder`], reframes its PCM
//! output into [`AudioWindow`]s, and restarts it with exponential backoff on
//! failure.

use std::sync::Arc;

use birdgate_core::config::StreamConfig;
use birdgate_core::window::AudioWindow;
use chrono::Utc;
use tokio::sync::mpsc;

use crate::ffmpeg::FfmpegDecoder;

const BYTES_PER_SAMPLE: usize = 2; // s16le

/// Reading state, surfaced mainly for logging and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReaderState {
    Idle,
    Connecting,
    Streaming,
    Backoff,
    Stopped,
}

/// Runs the reconnect loop for one stream, sending completed windows to
/// `tx` until `shutdown` fires.
///
/// Mirrors the original reader's backoff: the delay resets to
/// `reconnect_delay_seconds` only after a *successful spawn*, not after
/// every successful read, and doubles up to `max_reconnect_delay_seconds`
/// between attempts.
pub async fn run(
    config: Arc<StreamConfig>,
    reconnect_delay_seconds: f64,
    max_reconnect_delay_seconds: f64,
    tx: mpsc::Sender<AudioWindow>,
    mut shutdown: tokio::sync::watch::Receiver<bool>,
) {
    let mut current_delay = reconnect_delay_seconds;
    let samples_per_window = config.samples_per_window();
    let bytes_needed = samples_per_window * config.channels as usize * BYTES_PER_SAMPLE;

    while !*shutdown.borrow() {
        log::info!("starting ffmpeg for stream '{}': {}", config.name, config.url);
        let decoder = match FfmpegDecoder::spawn(&config.url, config.sample_rate, config.channels) {
            Ok(decoder) => {
                current_delay = reconnect_delay_seconds;
                decoder
            }
            Err(e) => {
                log::error!("failed to start stream '{}': {e}", config.name);
                if wait_or_shutdown(current_delay, &mut shutdown).await {
                    break;
                }
                current_delay = (current_delay * 2.0).min(max_reconnect_delay_seconds);
                continue;
            }
        };

        read_until_failure(decoder, &config, bytes_needed, samples_per_window, &tx, &mut shutdown).await;

        if *shutdown.borrow() {
            break;
        }

        log::info!(
            "stream '{}' disconnected, reconnecting in {current_delay:.1}s...",
            config.name
        );
        if wait_or_shutdown(current_delay, &mut shutdown).await {
            break;
        }
        current_delay = (current_delay * 2.0).min(max_reconnect_delay_seconds);
    }

    log::info!("stream '{}' reader stopped", config.name);
}

async fn read_until_failure(
    mut decoder: FfmpegDecoder,
    config: &StreamConfig,
    bytes_needed: usize,
    samples_per_window: usize,
    tx: &mpsc::Sender<AudioWindow>,
    shutdown: &mut tokio::sync::watch::Receiver<bool>,
) {
    loop {
        let raw = tokio::select! {
            biased;
            _ = shutdown.changed() => {
                decoder.stop().await;
                return;
            }
            result = decoder.read_exact(bytes_needed) => result,
        };

        let raw = match raw {
            Ok(raw) => raw,
            Err(e) => {
                log::warn!("stream '{}' read failed: {e}", config.name);
                decoder.stop().await;
                return;
            }
        };

        let samples = pcm_to_mono_f32(&raw, config.channels, samples_per_window);
        let window = AudioWindow {
            samples,
            timestamp: Utc::now(),
            stream_name: config.name.clone(),
            sample_rate: config.sample_rate,
            duration_seconds: config.window_size_seconds,
        };

        if tx.send(window).await.is_err() {
            decoder.stop().await;
            return;
        }
    }
}

/// Waits for the backoff delay, returning early (with `true`) if shutdown
/// fires first.
async fn wait_or_shutdown(delay_seconds: f64, shutdown: &mut tokio::sync::watch::Receiver<bool>) -> bool {
    if *shutdown.borrow() {
        return true;
    }
    tokio::select! {
        _ = tokio::time::sleep(std::time::Duration::from_secs_f64(delay_seconds)) => false,
        _ = shutdown.changed() => true,
    }
}

/// Converts interleaved i16 PCM to mono f32 samples normalized to `[-1, 1]`,
/// averaging channels down when `channels > 1`.
fn pcm_to_mono_f32(raw: &[u8], channels: u16, samples_per_window: usize) -> Vec<f32> {
    let channels = channels as usize;
    let mut mono = Vec::with_capacity(samples_per_window);
    let mut frame = vec![0i32; channels];

    for chunk in raw.chunks_exact(2 * channels) {
        for (c, slot) in frame.iter_mut().enumerate() {
            let bytes = [chunk[2 * c], chunk[2 * c + 1]];
            *slot = i16::from_le_bytes(bytes) as i32;
        }
        let avg = frame.iter().sum::<i32>() as f32 / channels as f32;
        mono.push(avg / 32768.0);
    }

    mono
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mono_passthrough_normalizes_to_unit_range() {
        let raw = 32767i16.to_le_bytes().to_vec();
        let samples = pcm_to_mono_f32(&raw, 1, 1);
        assert_eq!(samples.len(), 1);
        assert!((samples[0] - 0.99997).abs() < 0.001);
    }

    #[test]
    fn stereo_is_averaged_to_mono() {
        let mut raw = Vec::new();
        raw.extend_from_slice(&16384i16.to_le_bytes());
        raw.extend_from_slice(&(-16384i16).to_le_bytes());
        let samples = pcm_to_mono_f32(&raw, 2, 1);
        assert_eq!(samples.len(), 1);
        assert!(samples[0].abs() < 1e-6);
    }
}
