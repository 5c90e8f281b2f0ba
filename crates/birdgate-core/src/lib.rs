//! Core library for Birdgate: configuration, feature extraction, gating,
//! classifier dispatch, and the window log, shared by the daemon and the
//! inspection CLI.

pub mod classifier;
pub mod config;
pub mod features;
pub mod gate;
pub mod log;
pub mod pipeline;
pub mod window;
