//! livecast - WebRTC-to-HLS live streaming server.
//!
//! A browser pushes a live camera feed over WebRTC; the server persists
//! the tracks to disk, transcodes them into an adaptive-bitrate HLS
//! ladder with a supervised ffmpeg child, and publishes every playlist
//! and segment to object storage as it appears. Viewers attach to a
//! per-stream control channel for JSON events; media is served by the
//! CDN directly.

pub mod api;
pub mod config;
pub mod encoder;
pub mod error;
pub mod ingest;
pub mod logging;
pub mod pipeline;
pub mod stream;
pub mod uploader;

pub use error::{Error, Result};
