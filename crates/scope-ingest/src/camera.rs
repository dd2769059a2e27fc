//! USB microscope capture via the platform camera stack.

use std::thread;
use std::time::Duration;

use nokhwa::pixel_format::RgbFormat;
use nokhwa::utils::{CameraIndex, RequestedFormat, RequestedFormatType};
use nokhwa::Camera;
use tracing::debug;

use crate::types::{Frame, FrameSource, SourceError};

const SCAN_INDICES: u32 = 5;
const MAX_CONSECUTIVE_FAILURES: u32 = 30;
const FAILURE_BACKOFF: Duration = Duration::from_millis(100);

/// Frame source for a directly attached capture device.
///
/// One frame is pulled per `next_frame` call at the device's native
/// resolution. Read failures are tolerated up to a threshold, then escalated
/// so the caller can reopen from scratch.
pub struct DeviceSource {
    camera: Camera,
    index: u32,
    consecutive_failures: u32,
}

impl DeviceSource {
    /// Scan the first few device indices and open the first one that accepts
    /// a stream.
    pub fn open() -> Result<Self, SourceError> {
        for index in 0..SCAN_INDICES {
            let format =
                RequestedFormat::new::<RgbFormat>(RequestedFormatType::AbsoluteHighestResolution);
            match Camera::new(CameraIndex::Index(index), format) {
                Ok(mut camera) => match camera.open_stream() {
                    Ok(()) => {
                        let resolution = camera.resolution();
                        debug!(
                            "capture device {index} opened at {}x{}",
                            resolution.width(),
                            resolution.height()
                        );
                        return Ok(Self {
                            camera,
                            index,
                            consecutive_failures: 0,
                        });
                    }
                    Err(err) => debug!("capture device {index} refused stream: {err}"),
                },
                Err(err) => debug!("capture device {index} unavailable: {err}"),
            }
        }
        Err(SourceError::Open {
            uri: format!("device:0..{SCAN_INDICES}"),
        })
    }

    fn read_failed(&mut self, what: &str, detail: String) -> Result<Option<Frame>, SourceError> {
        self.consecutive_failures += 1;
        if self.consecutive_failures >= MAX_CONSECUTIVE_FAILURES {
            return Err(SourceError::Disconnected {
                reason: format!(
                    "{what} failed {} times in a row on device {}: {detail}",
                    self.consecutive_failures, self.index
                ),
            });
        }
        thread::sleep(FAILURE_BACKOFF);
        Ok(None)
    }
}

impl FrameSource for DeviceSource {
    fn next_frame(&mut self) -> Result<Option<Frame>, SourceError> {
        let buffer = match self.camera.frame() {
            Ok(buffer) => buffer,
            Err(err) => return self.read_failed("frame read", err.to_string()),
        };
        match buffer.decode_image::<RgbFormat>() {
            Ok(decoded) => {
                self.consecutive_failures = 0;
                let (width, height) = (decoded.width(), decoded.height());
                Ok(Some(Frame::new(decoded.into_raw(), width, height)))
            }
            Err(err) => self.read_failed("frame decode", err.to_string()),
        }
    }

    fn describe(&self) -> String {
        let resolution = self.camera.resolution();
        format!(
            "capture device {} ({}x{})",
            self.index,
            resolution.width(),
            resolution.height()
        )
    }
}
