//! Web viewer for WiFi/USB microscopes: capture, per-frame processing, and
//! MJPEG fan-out to any number of browsers.
//!
//! The crate is split into focused modules:
//! - `config`: CLI configuration parsing.
//! - `settings`: shared mutable processing/capture settings with validated
//!   control writes.
//! - `pipeline`: orchestrates the capture → process → encode → publish loop.
//! - `processing`: the fixed transform chain (color, geometry, zoom).
//! - `stabilize`: phase-correlation drift compensation.
//! - `encoding`: JPEG output.
//! - `store`: single-slot versioned frame store.
//! - `server`: actix-web control surface and streaming sessions.
//! - `watchdog`: health monitoring for pipeline stages.
//! - `telemetry`: tracing and metrics wiring.

pub mod config;
pub mod encoding;
mod html;
pub mod pipeline;
pub mod processing;
pub mod server;
pub mod settings;
pub mod stabilize;
pub mod store;
pub mod telemetry;
mod watchdog;
