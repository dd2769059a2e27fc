//! Per-frame transform chain.
//!
//! Stage order is fixed: stabilization (on sensor pixels, before any
//! geometry), brightness/contrast, gain, saturation, flip, rotation, zoom.
//! Stages at their identity values are skipped; skipping is invisible in the
//! output.

use image::imageops::{self, FilterType};
use image::RgbImage;
use scope_ingest::Frame;

use crate::settings::{ProcessingSettings, Rotation};
use crate::stabilize::Stabilizer;

/// Run the whole chain over one frame with an immutable settings snapshot.
pub fn process(frame: Frame, settings: &ProcessingSettings, stabilizer: &mut Stabilizer) -> Frame {
    let frame = stabilizer.stabilize(frame, settings);

    let timestamp_ms = frame.timestamp_ms;
    let expected = frame.width as usize * frame.height as usize * 3;
    if frame.data.len() != expected {
        return frame;
    }
    let mut image = RgbImage::from_raw(frame.width, frame.height, frame.data)
        .expect("frame length checked above");

    if settings.brightness != 0 || settings.contrast != 1.0 {
        brightness_contrast(&mut image, settings.contrast, settings.brightness);
    }
    if settings.gain != 1.0 {
        gain(&mut image, settings.gain);
    }
    if settings.saturation != 1.0 {
        saturation(&mut image, settings.saturation);
    }
    image = flip(image, settings.flip_h, settings.flip_v);
    image = rotate(image, settings.rotation);
    if settings.zoom != 1.0 {
        image = zoom(image, settings.zoom);
    }

    Frame {
        width: image.width(),
        height: image.height(),
        data: image.into_raw(),
        timestamp_ms,
    }
}

/// Affine map `contrast * value + brightness`, saturating into the sample
/// range.
pub(crate) fn brightness_contrast(image: &mut RgbImage, contrast: f32, brightness: i32) {
    let offset = brightness as f32;
    for sample in image.iter_mut() {
        *sample = (contrast * f32::from(*sample) + offset).round().clamp(0.0, 255.0) as u8;
    }
}

/// Purely multiplicative second affine stage.
pub(crate) fn gain(image: &mut RgbImage, gain: f32) {
    for sample in image.iter_mut() {
        *sample = (gain * f32::from(*sample)).round().clamp(0.0, 255.0) as u8;
    }
}

/// Scale the saturation channel in HSV space, clamped to the valid range.
pub(crate) fn saturation(image: &mut RgbImage, factor: f32) {
    for pixel in image.pixels_mut() {
        let (h, s, v) = rgb_to_hsv(
            f32::from(pixel[0]) / 255.0,
            f32::from(pixel[1]) / 255.0,
            f32::from(pixel[2]) / 255.0,
        );
        let (r, g, b) = hsv_to_rgb(h, (s * factor).clamp(0.0, 1.0), v);
        pixel[0] = (r * 255.0).round().clamp(0.0, 255.0) as u8;
        pixel[1] = (g * 255.0).round().clamp(0.0, 255.0) as u8;
        pixel[2] = (b * 255.0).round().clamp(0.0, 255.0) as u8;
    }
}

pub(crate) fn flip(image: RgbImage, flip_h: bool, flip_v: bool) -> RgbImage {
    match (flip_h, flip_v) {
        (true, true) => imageops::rotate180(&image),
        (true, false) => imageops::flip_horizontal(&image),
        (false, true) => imageops::flip_vertical(&image),
        (false, false) => image,
    }
}

pub(crate) fn rotate(image: RgbImage, rotation: Rotation) -> RgbImage {
    match rotation {
        Rotation::Deg0 => image,
        Rotation::Deg90 => imageops::rotate90(&image),
        Rotation::Deg180 => imageops::rotate180(&image),
        Rotation::Deg270 => imageops::rotate270(&image),
    }
}

/// Zoom in by cropping a centered window and resizing back up; zoom out by
/// shrinking and letterboxing onto a black canvas. Output geometry always
/// equals input geometry.
pub(crate) fn zoom(image: RgbImage, zoom: f32) -> RgbImage {
    let (width, height) = image.dimensions();
    if zoom > 1.0 {
        let crop_w = ((width as f32 / zoom) as u32).max(1);
        let crop_h = ((height as f32 / zoom) as u32).max(1);
        let x0 = (width - crop_w) / 2;
        let y0 = (height - crop_h) / 2;
        let cropped = imageops::crop_imm(&image, x0, y0, crop_w, crop_h).to_image();
        imageops::resize(&cropped, width, height, FilterType::Triangle)
    } else {
        let new_w = ((width as f32 * zoom) as u32).max(1);
        let new_h = ((height as f32 * zoom) as u32).max(1);
        let resized = imageops::resize(&image, new_w, new_h, FilterType::Triangle);
        let mut canvas = RgbImage::new(width, height);
        let x0 = i64::from((width - new_w) / 2);
        let y0 = i64::from((height - new_h) / 2);
        imageops::replace(&mut canvas, &resized, x0, y0);
        canvas
    }
}

fn rgb_to_hsv(r: f32, g: f32, b: f32) -> (f32, f32, f32) {
    let max = r.max(g).max(b);
    let min = r.min(g).min(b);
    let delta = max - min;

    let h = if delta == 0.0 {
        0.0
    } else if max == r {
        60.0 * (((g - b) / delta).rem_euclid(6.0))
    } else if max == g {
        60.0 * ((b - r) / delta + 2.0)
    } else {
        60.0 * ((r - g) / delta + 4.0)
    };
    let s = if max == 0.0 { 0.0 } else { delta / max };
    (h, s, max)
}

fn hsv_to_rgb(h: f32, s: f32, v: f32) -> (f32, f32, f32) {
    let c = v * s;
    let x = c * (1.0 - ((h / 60.0).rem_euclid(2.0) - 1.0).abs());
    let m = v - c;
    let (r, g, b) = match h {
        h if h < 60.0 => (c, x, 0.0),
        h if h < 120.0 => (x, c, 0.0),
        h if h < 180.0 => (0.0, c, x),
        h if h < 240.0 => (0.0, x, c),
        h if h < 300.0 => (x, 0.0, c),
        _ => (c, 0.0, x),
    };
    (r + m, g + m, b + m)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::ProcessingSettings;

    fn textured_image(width: u32, height: u32) -> RgbImage {
        RgbImage::from_fn(width, height, |x, y| {
            let seed = x.wrapping_mul(31).wrapping_add(y.wrapping_mul(17));
            image::Rgb([
                (seed % 251) as u8,
                (seed.wrapping_mul(7) % 239) as u8,
                (seed.wrapping_mul(13) % 241) as u8,
            ])
        })
    }

    fn textured_frame(width: u32, height: u32) -> Frame {
        let image = textured_image(width, height);
        Frame::new(image.into_raw(), width, height)
    }

    #[test]
    fn identity_settings_leave_the_frame_untouched() {
        let frame = textured_frame(32, 24);
        let original = frame.data.clone();
        let mut stabilizer = Stabilizer::new();
        let processed = process(frame, &ProcessingSettings::identity(), &mut stabilizer);
        assert_eq!(processed.width, 32);
        assert_eq!(processed.height, 24);
        assert_eq!(processed.data, original);
    }

    #[test]
    fn four_quarter_turns_are_the_identity() {
        let image = textured_image(20, 12);
        let original = image.clone();
        let mut rotated = image;
        for _ in 0..4 {
            rotated = rotate(rotated, Rotation::Deg90);
        }
        assert_eq!(rotated, original);
    }

    #[test]
    fn quarter_turn_swaps_dimensions() {
        let rotated = rotate(textured_image(20, 12), Rotation::Deg90);
        assert_eq!(rotated.dimensions(), (12, 20));
    }

    #[test]
    fn flipping_twice_is_the_identity() {
        let image = textured_image(17, 9);
        let original = image.clone();
        let once = flip(image, true, false);
        assert_ne!(once, original);
        let twice = flip(once, true, false);
        assert_eq!(twice, original);
    }

    #[test]
    fn flipping_both_axes_matches_a_half_turn() {
        let image = textured_image(16, 10);
        let both = flip(image.clone(), true, true);
        assert_eq!(both, rotate(image, Rotation::Deg180));
    }

    #[test]
    fn zoom_preserves_output_geometry() {
        for factor in [0.5f32, 0.7, 1.3, 2.0, 4.0] {
            let zoomed = zoom(textured_image(64, 48), factor);
            assert_eq!(zoomed.dimensions(), (64, 48), "zoom {factor}");
        }
    }

    #[test]
    fn zoom_out_letterboxes_onto_black() {
        let zoomed = zoom(textured_image(40, 40), 0.5);
        assert_eq!(*zoomed.get_pixel(0, 0), image::Rgb([0, 0, 0]));
        assert_eq!(*zoomed.get_pixel(39, 39), image::Rgb([0, 0, 0]));
    }

    #[test]
    fn brightness_offsets_and_saturates() {
        let mut image = RgbImage::from_pixel(2, 2, image::Rgb([100, 250, 0]));
        brightness_contrast(&mut image, 1.0, 20);
        assert_eq!(*image.get_pixel(0, 0), image::Rgb([120, 255, 20]));
        brightness_contrast(&mut image, 1.0, -130);
        assert_eq!(*image.get_pixel(0, 0), image::Rgb([0, 125, 0]));
    }

    #[test]
    fn contrast_scales_around_zero() {
        let mut image = RgbImage::from_pixel(1, 1, image::Rgb([50, 100, 200]));
        brightness_contrast(&mut image, 2.0, 0);
        assert_eq!(*image.get_pixel(0, 0), image::Rgb([100, 200, 255]));
    }

    #[test]
    fn gain_is_purely_multiplicative() {
        let mut image = RgbImage::from_pixel(1, 1, image::Rgb([40, 0, 180]));
        gain(&mut image, 1.5);
        assert_eq!(*image.get_pixel(0, 0), image::Rgb([60, 0, 255]));
    }

    #[test]
    fn zero_saturation_collapses_to_neutral() {
        let mut image = RgbImage::from_pixel(1, 1, image::Rgb([200, 40, 90]));
        saturation(&mut image, 0.0);
        let pixel = image.get_pixel(0, 0);
        assert_eq!(pixel[0], pixel[1]);
        assert_eq!(pixel[1], pixel[2]);
    }

    #[test]
    fn saturation_leaves_neutral_pixels_alone() {
        let mut image = RgbImage::from_pixel(1, 1, image::Rgb([77, 77, 77]));
        saturation(&mut image, 3.0);
        assert_eq!(*image.get_pixel(0, 0), image::Rgb([77, 77, 77]));
    }

    #[test]
    fn hsv_round_trip_is_stable() {
        for &(r, g, b) in &[(255u8, 0u8, 0u8), (12, 200, 33), (0, 0, 0), (255, 255, 255)] {
            let (h, s, v) = rgb_to_hsv(
                f32::from(r) / 255.0,
                f32::from(g) / 255.0,
                f32::from(b) / 255.0,
            );
            let (r2, g2, b2) = hsv_to_rgb(h, s, v);
            assert!((f32::from(r) / 255.0 - r2).abs() < 1e-4);
            assert!((f32::from(g) / 255.0 - g2).abs() < 1e-4);
            assert!((f32::from(b) / 255.0 - b2).abs() < 1e-4);
        }
    }
}
