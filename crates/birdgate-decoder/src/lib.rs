//! RTSP decode and windowing: turns one stream URL into a channel of
//! fixed-duration [`birdgate_core::window::AudioWindow`]s, reconnecting
//! with backoff when the decoder dies.

mod ffmpeg;
mod reader;

pub use ffmpeg::{DecoderError, FfmpegDecoder};
pub use reader::{run, ReaderState};
