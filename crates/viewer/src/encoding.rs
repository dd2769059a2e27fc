//! JPEG encoding of processed frames.

use anyhow::{anyhow, Result};
use image::codecs::jpeg::JpegEncoder;
use image::ExtendedColorType;
use scope_ingest::Frame;

/// Compress a frame to JPEG at the given quality (clamped to 1..=100).
pub fn encode_jpeg(frame: &Frame, quality: u8) -> Result<Vec<u8>> {
    let expected = frame.width as usize * frame.height as usize * 3;
    if frame.data.len() != expected {
        return Err(anyhow!(
            "frame buffer is {} bytes, expected {} for {}x{}",
            frame.data.len(),
            expected,
            frame.width,
            frame.height
        ));
    }
    let mut buffer = Vec::with_capacity(frame.data.len() / 8);
    let encoder = JpegEncoder::new_with_quality(&mut buffer, quality.clamp(1, 100));
    encoder
        .encode(
            &frame.data,
            frame.width,
            frame.height,
            ExtendedColorType::Rgb8,
        )
        .map_err(|err| anyhow!("JPEG encode failed: {err}"))?;
    Ok(buffer)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gradient_frame(width: u32, height: u32) -> Frame {
        let mut data = Vec::with_capacity((width * height * 3) as usize);
        for y in 0..height {
            for x in 0..width {
                data.push((x * 255 / width.max(1)) as u8);
                data.push((y * 255 / height.max(1)) as u8);
                data.push(128);
            }
        }
        Frame::new(data, width, height)
    }

    #[test]
    fn produces_a_delimited_jpeg_with_matching_geometry() {
        let frame = gradient_frame(64, 48);
        let jpeg = encode_jpeg(&frame, 75).unwrap();
        assert_eq!(&jpeg[0..2], &[0xFF, 0xD8]);
        assert_eq!(&jpeg[jpeg.len() - 2..], &[0xFF, 0xD9]);

        let decoded = image::load_from_memory(&jpeg).unwrap();
        assert_eq!(decoded.width(), 64);
        assert_eq!(decoded.height(), 48);
    }

    #[test]
    fn rejects_a_frame_with_inconsistent_geometry() {
        let mut frame = gradient_frame(64, 48);
        frame.data.truncate(100);
        assert!(encode_jpeg(&frame, 75).is_err());
    }
}
