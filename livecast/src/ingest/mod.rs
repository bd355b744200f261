//! WebRTC media ingestion.
//!
//! Accepts a broadcaster's media session, demuxes the incoming tracks,
//! and persists them under the per-stream scratch directory where the
//! encoder picks them up.

mod session;
mod writer;

pub use session::{IngestConfig, IngestSession};
