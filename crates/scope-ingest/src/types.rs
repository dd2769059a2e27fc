use anyhow::Error;
use chrono::Utc;
use thiserror::Error;

/// Raw RGB frame pulled from a microscope source.
///
/// Pixels are 8-bit, three channels, row-major. Stages downstream construct
/// new frames instead of mutating one they were handed.
#[derive(Clone)]
pub struct Frame {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub timestamp_ms: i64,
}

impl Frame {
    pub fn new(data: Vec<u8>, width: u32, height: u32) -> Self {
        Self {
            data,
            width,
            height,
            timestamp_ms: Utc::now().timestamp_millis(),
        }
    }

    /// Fixed "no signal" frame published while a source is disconnected:
    /// dark field with diagonal hatching, so viewers see an explicit outage
    /// instead of a stale image.
    pub fn no_signal(width: u32, height: u32) -> Self {
        let mut data = vec![0u8; (width * height * 3) as usize];
        for y in 0..height {
            for x in 0..width {
                let value = if ((x + y) / 24) % 2 == 0 { 0x20 } else { 0x12 };
                let idx = ((y * width + x) * 3) as usize;
                data[idx] = value;
                data[idx + 1] = value;
                data[idx + 2] = value;
            }
        }
        Self::new(data, width, height)
    }
}

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("failed to open video source {uri:?}")]
    Open { uri: String },
    #[error("source disconnected: {reason}")]
    Disconnected { reason: String },
    #[error(transparent)]
    Other(#[from] Error),
}

/// One capability shared by both microscope transports.
///
/// `Ok(None)` means no complete frame arrived within this call's time slice;
/// the caller simply tries again next iteration. `Disconnected` tells the
/// caller to substitute its placeholder frame and reopen the source from
/// scratch; sources do not retry internally beyond their own thresholds.
pub trait FrameSource {
    fn next_frame(&mut self) -> Result<Option<Frame>, SourceError>;

    /// Human-readable description for logs.
    fn describe(&self) -> String;
}
