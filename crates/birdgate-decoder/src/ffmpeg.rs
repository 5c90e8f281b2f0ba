//! Subprocess adapter around `ffmpeg`, decoding one RTSP stream to raw PCM.

use thiserror::Error;
use tokio::io::{AsyncReadExt, BufReader};
use tokio::process::{Child, ChildStdout};

#[derive(Debug, Error)]
pub enum DecoderError {
    #[error("failed to spawn ffmpeg: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("stream ended or produced an incomplete window (got {got} of {expected} bytes)")]
    IncompleteRead { got: usize, expected: usize },
    #[error("io error reading ffmpeg output: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(unix)]
fn request_termination(child: &Child) {
    if let Some(pid) = child.id() {
        // SAFETY: sending SIGTERM to our own child by pid is always sound.
        unsafe {
            libc::kill(pid as i32, libc::SIGTERM);
        }
    }
}

#[cfg(not(unix))]
fn request_termination(_child: &Child) {}

/// A running `ffmpeg` decode of one RTSP URL to signed 16-bit PCM on stdout.
pub struct FfmpegDecoder {
    child: Child,
    stdout: BufReader<ChildStdout>,
}

impl FfmpegDecoder {
    /// Spawns `ffmpeg` against `url`, decoding to raw `s16le` PCM at
    /// `sample_rate`/`channels` on stdout.
    pub fn spawn(url: &str, sample_rate: u32, channels: u16) -> Result<Self, DecoderError> {
        let mut child = tokio::process::Command::new("ffmpeg")
            .args(["-hide_banner", "-loglevel", "warning"])
            .args(["-rtsp_transport", "tcp"])
            .args(["-i", url])
            .args(["-vn", "-acodec", "pcm_s16le"])
            .args(["-ar", &sample_rate.to_string()])
            .args(["-ac", &channels.to_string()])
            .args(["-f", "s16le", "-"])
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(DecoderError::Spawn)?;

        let stdout = child.stdout.take().expect("stdout was piped");
        Ok(Self {
            child,
            stdout: BufReader::new(stdout),
        })
    }

    /// Reads exactly `bytes_needed` bytes of PCM, or an error if the
    /// process ends (or stalls past EOF) before that many are available.
    pub async fn read_exact(&mut self, bytes_needed: usize) -> Result<Vec<u8>, DecoderError> {
        let mut buf = vec![0u8; bytes_needed];
        match self.stdout.read_exact(&mut buf).await {
            Ok(_) => Ok(buf),
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                Err(DecoderError::IncompleteRead {
                    got: 0,
                    expected: bytes_needed,
                })
            }
            Err(e) => Err(DecoderError::Io(e)),
        }
    }

    /// Terminates the decoder, giving it 5 seconds to exit cleanly before
    /// killing it outright.
    pub async fn stop(mut self) {
        request_termination(&self.child);
        let wait = tokio::time::timeout(std::time::Duration::from_secs(5), self.child.wait()).await;
        if wait.is_err() {
            let _ = self.child.kill().await;
        }
    }
}
