//! Frame acquisition for WiFi and USB microscopes.
//!
//! Two interchangeable sources behind the [`FrameSource`] trait:
//! - [`WifiSource`]: the proprietary UDP transport (command handshake,
//!   fragmented JPEG reassembly, heartbeats).
//! - [`DeviceSource`]: a directly attached capture device at its native
//!   resolution.
//!
//! Both are designed to be reopened from scratch by the caller when they
//! report [`SourceError::Disconnected`]; neither retries internally beyond
//! its own thresholds.

mod camera;
mod types;
mod wifi;

pub use camera::DeviceSource;
pub use types::{Frame, FrameSource, SourceError};
pub use wifi::{probe, WifiSource, COMMAND_PORT, DEFAULT_HOST, STREAM_PORT};
