//! HTTP control surface.
//!
//! Thin axum adapters over the stream registry; the registry and the
//! stream entities own all observable side effects.

pub mod error;
pub mod models;
pub mod routes;
pub mod server;

pub use server::{ApiServer, AppState};
