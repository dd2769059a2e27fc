//! Feedback-driven digital stabilization.
//!
//! Frame-to-frame translation is estimated by phase correlation on a
//! downsampled grayscale plane, accumulated into a decaying drift total, and
//! compensated with a smoothed counter-translation. The estimator works at a
//! fixed 640x360 so its cost does not scale with the source resolution. All
//! state lives on the capture thread; streaming sessions never touch it.

use std::collections::VecDeque;

use rustfft::num_complex::Complex;
use rustfft::FftPlanner;
use scope_ingest::Frame;

use crate::settings::ProcessingSettings;

const WORK_WIDTH: usize = 640;
const WORK_HEIGHT: usize = 360;
/// Raw shifts beyond this fraction of the smaller frame dimension are scene
/// changes, not jitter.
const SCENE_CHANGE_FRACTION: f32 = 0.3;
const DRIFT_CLAMP_FRACTION: f32 = 0.5;

pub struct Stabilizer {
    planner: FftPlanner<f32>,
    prev_gray: Option<Vec<f32>>,
    drift_x: f32,
    drift_y: f32,
    correction_x: f32,
    correction_y: f32,
    blend_ring: VecDeque<Vec<u8>>,
    blend_dims: Option<(u32, u32)>,
}

impl Stabilizer {
    pub fn new() -> Self {
        Self {
            planner: FftPlanner::new(),
            prev_gray: None,
            drift_x: 0.0,
            drift_y: 0.0,
            correction_x: 0.0,
            correction_y: 0.0,
            blend_ring: VecDeque::new(),
            blend_dims: None,
        }
    }

    /// Drop all motion history. The next stabilized frame primes the
    /// estimator and passes through unprocessed.
    pub fn reset(&mut self) {
        self.prev_gray = None;
        self.drift_x = 0.0;
        self.drift_y = 0.0;
        self.correction_x = 0.0;
        self.correction_y = 0.0;
        self.blend_ring.clear();
        self.blend_dims = None;
    }

    /// Run one frame through the filter. Disabled means pass-through, and
    /// also clears the state so no stale drift survives a later re-enable.
    pub fn stabilize(&mut self, frame: Frame, settings: &ProcessingSettings) -> Frame {
        if !settings.stabilize {
            self.reset();
            return frame;
        }
        let expected = frame.width as usize * frame.height as usize * 3;
        if frame.width == 0 || frame.height == 0 || frame.data.len() != expected {
            return frame;
        }

        let gray = downsample_gray(&frame);
        let shift = match self.prev_gray.take() {
            None => {
                self.prev_gray = Some(gray);
                return frame;
            }
            Some(prev) => {
                let estimate = self.phase_correlate(&prev, &gray);
                self.prev_gray = Some(gray);
                estimate
            }
        };

        let min_dim = (frame.width.min(frame.height)) as f32;
        let output = match shift {
            Some((raw_dx, raw_dy)) => {
                let mut dx = raw_dx * frame.width as f32 / WORK_WIDTH as f32;
                let mut dy = raw_dy * frame.height as f32 / WORK_HEIGHT as f32;

                let noise = settings.noise_threshold_px();
                if dx.abs() < noise {
                    dx = 0.0;
                }
                if dy.abs() < noise {
                    dy = 0.0;
                }

                let max_shift = min_dim * SCENE_CHANGE_FRACTION;
                if dx.abs() < max_shift && dy.abs() < max_shift {
                    let max_drift = min_dim * DRIFT_CLAMP_FRACTION;
                    let decay = settings.decay();
                    self.drift_x = ((self.drift_x + dx) * decay).clamp(-max_drift, max_drift);
                    self.drift_y = ((self.drift_y + dy) * decay).clamp(-max_drift, max_drift);

                    let smooth = settings.smoothing();
                    self.correction_x =
                        smooth * self.correction_x + (1.0 - smooth) * -self.drift_x;
                    self.correction_y =
                        smooth * self.correction_y + (1.0 - smooth) * -self.drift_y;

                    translate_replicate(&frame, self.correction_x, self.correction_y)
                } else {
                    self.drift_x = 0.0;
                    self.drift_y = 0.0;
                    self.correction_x = 0.0;
                    self.correction_y = 0.0;
                    self.blend_ring.clear();
                    frame
                }
            }
            // Correlation went non-finite; pass the frame through untouched.
            None => frame,
        };

        self.blend(output, settings.blend_depth())
    }

    /// Average the most recent stabilized frames with linearly higher weight
    /// on newer ones, trading a little motion blur for fewer translation
    /// seams.
    fn blend(&mut self, output: Frame, depth: usize) -> Frame {
        if depth <= 1 {
            self.blend_ring.clear();
            self.blend_dims = None;
            return output;
        }
        if self.blend_dims != Some((output.width, output.height)) {
            self.blend_ring.clear();
            self.blend_dims = Some((output.width, output.height));
        }
        self.blend_ring.push_back(output.data.clone());
        while self.blend_ring.len() > depth {
            self.blend_ring.pop_front();
        }
        if self.blend_ring.len() < 2 {
            return output;
        }

        let total_weight: f32 = (1..=self.blend_ring.len()).sum::<usize>() as f32;
        let mut accum = vec![0.0f32; output.data.len()];
        for (index, data) in self.blend_ring.iter().enumerate() {
            let weight = (index + 1) as f32;
            for (acc, &sample) in accum.iter_mut().zip(data.iter()) {
                *acc += weight * f32::from(sample);
            }
        }
        let blended = accum
            .into_iter()
            .map(|value| (value / total_weight).round().clamp(0.0, 255.0) as u8)
            .collect();
        Frame {
            data: blended,
            width: output.width,
            height: output.height,
            timestamp_ms: output.timestamp_ms,
        }
    }

    /// Estimate the translation between two working-resolution planes via
    /// the normalized cross-power spectrum. Returns the shift of `curr`
    /// relative to `prev` in working pixels, or `None` if anything went
    /// non-finite.
    pub(crate) fn phase_correlate(
        &mut self,
        prev: &[f32],
        curr: &[f32],
    ) -> Option<(f32, f32)> {
        let mut spectrum_prev: Vec<Complex<f32>> =
            prev.iter().map(|&v| Complex::new(v, 0.0)).collect();
        let mut spectrum_curr: Vec<Complex<f32>> =
            curr.iter().map(|&v| Complex::new(v, 0.0)).collect();
        self.fft_2d(&mut spectrum_prev, true);
        self.fft_2d(&mut spectrum_curr, true);

        let mut cross: Vec<Complex<f32>> = spectrum_prev
            .iter()
            .zip(&spectrum_curr)
            .map(|(&a, &b)| {
                let product = a * b.conj();
                let magnitude = product.norm();
                if magnitude > f32::EPSILON {
                    product / magnitude
                } else {
                    Complex::new(0.0, 0.0)
                }
            })
            .collect();
        self.fft_2d(&mut cross, false);

        let mut peak_index = 0;
        let mut peak_value = f32::MIN;
        for (index, value) in cross.iter().enumerate() {
            let magnitude = value.norm();
            if !magnitude.is_finite() {
                return None;
            }
            if magnitude > peak_value {
                peak_value = magnitude;
                peak_index = index;
            }
        }

        let px = (peak_index % WORK_WIDTH) as isize;
        let py = (peak_index / WORK_WIDTH) as isize;
        let magnitude_at = |x: isize, y: isize| -> f32 {
            let xi = x.rem_euclid(WORK_WIDTH as isize) as usize;
            let yi = y.rem_euclid(WORK_HEIGHT as isize) as usize;
            cross[yi * WORK_WIDTH + xi].norm()
        };
        let mut shift_x =
            px as f32 + parabolic_offset(magnitude_at(px - 1, py), peak_value, magnitude_at(px + 1, py));
        let mut shift_y =
            py as f32 + parabolic_offset(magnitude_at(px, py - 1), peak_value, magnitude_at(px, py + 1));

        // The correlation surface wraps; fold the upper half onto negative
        // shifts, then negate to express motion of `curr` against `prev`.
        if shift_x > (WORK_WIDTH / 2) as f32 {
            shift_x -= WORK_WIDTH as f32;
        }
        if shift_y > (WORK_HEIGHT / 2) as f32 {
            shift_y -= WORK_HEIGHT as f32;
        }
        let (dx, dy) = (-shift_x, -shift_y);
        if dx.is_finite() && dy.is_finite() {
            Some((dx, dy))
        } else {
            None
        }
    }

    fn fft_2d(&mut self, data: &mut [Complex<f32>], forward: bool) {
        let row_fft = if forward {
            self.planner.plan_fft_forward(WORK_WIDTH)
        } else {
            self.planner.plan_fft_inverse(WORK_WIDTH)
        };
        for row in data.chunks_exact_mut(WORK_WIDTH) {
            row_fft.process(row);
        }

        let col_fft = if forward {
            self.planner.plan_fft_forward(WORK_HEIGHT)
        } else {
            self.planner.plan_fft_inverse(WORK_HEIGHT)
        };
        let mut column = vec![Complex::new(0.0, 0.0); WORK_HEIGHT];
        for x in 0..WORK_WIDTH {
            for y in 0..WORK_HEIGHT {
                column[y] = data[y * WORK_WIDTH + x];
            }
            col_fft.process(&mut column);
            for y in 0..WORK_HEIGHT {
                data[y * WORK_WIDTH + x] = column[y];
            }
        }
    }
}

impl Default for Stabilizer {
    fn default() -> Self {
        Self::new()
    }
}

/// Sub-pixel peak refinement from the two neighbors along one axis.
fn parabolic_offset(left: f32, center: f32, right: f32) -> f32 {
    let denom = left - 2.0 * center + right;
    if denom.abs() < f32::EPSILON {
        return 0.0;
    }
    (0.5 * (left - right) / denom).clamp(-0.5, 0.5)
}

/// Nearest-sample downscale to the working grayscale plane.
fn downsample_gray(frame: &Frame) -> Vec<f32> {
    let width = frame.width as usize;
    let height = frame.height as usize;
    let mut out = Vec::with_capacity(WORK_WIDTH * WORK_HEIGHT);
    for y in 0..WORK_HEIGHT {
        let sy = y * height / WORK_HEIGHT;
        for x in 0..WORK_WIDTH {
            let sx = x * width / WORK_WIDTH;
            let idx = (sy * width + sx) * 3;
            let r = f32::from(frame.data[idx]);
            let g = f32::from(frame.data[idx + 1]);
            let b = f32::from(frame.data[idx + 2]);
            out.push(0.299 * r + 0.587 * g + 0.114 * b);
        }
    }
    out
}

/// Pure translation with bilinear sampling; out-of-range source coordinates
/// replicate the border pixel.
fn translate_replicate(frame: &Frame, tx: f32, ty: f32) -> Frame {
    let width = frame.width as usize;
    let height = frame.height as usize;
    let mut data = vec![0u8; frame.data.len()];

    let clamp_x = |v: isize| v.clamp(0, width as isize - 1) as usize;
    let clamp_y = |v: isize| v.clamp(0, height as isize - 1) as usize;

    for y in 0..height {
        let src_y = y as f32 - ty;
        let y_floor = src_y.floor();
        let fy = src_y - y_floor;
        let y0 = clamp_y(y_floor as isize);
        let y1 = clamp_y(y_floor as isize + 1);
        for x in 0..width {
            let src_x = x as f32 - tx;
            let x_floor = src_x.floor();
            let fx = src_x - x_floor;
            let x0 = clamp_x(x_floor as isize);
            let x1 = clamp_x(x_floor as isize + 1);

            let base = (y * width + x) * 3;
            for channel in 0..3 {
                let sample = |xx: usize, yy: usize| -> f32 {
                    f32::from(frame.data[(yy * width + xx) * 3 + channel])
                };
                let top = sample(x0, y0) * (1.0 - fx) + sample(x1, y0) * fx;
                let bottom = sample(x0, y1) * (1.0 - fx) + sample(x1, y1) * fx;
                let value = top * (1.0 - fy) + bottom * fy;
                data[base + channel] = value.round().clamp(0.0, 255.0) as u8;
            }
        }
    }

    Frame {
        data,
        width: frame.width,
        height: frame.height,
        timestamp_ms: frame.timestamp_ms,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::ProcessingSettings;

    fn stabilized_settings() -> ProcessingSettings {
        let mut settings = ProcessingSettings::default();
        settings.stabilize = true;
        settings
    }

    fn texel(x: usize, y: usize) -> u8 {
        let seed = (x as u32)
            .wrapping_mul(2_654_435_761)
            .wrapping_add((y as u32).wrapping_mul(40_503))
            .wrapping_mul(2_246_822_519);
        (seed >> 24) as u8
    }

    /// Frame whose content is circularly shifted by (shift_x, shift_y).
    fn shifted_frame(width: usize, height: usize, shift_x: usize, shift_y: usize) -> Frame {
        let mut data = Vec::with_capacity(width * height * 3);
        for y in 0..height {
            for x in 0..width {
                let sx = (x + width - shift_x) % width;
                let sy = (y + height - shift_y) % height;
                let value = texel(sx, sy);
                data.push(value);
                data.push(value.wrapping_mul(3));
                data.push(value.wrapping_add(40));
            }
        }
        Frame::new(data, width as u32, height as u32)
    }

    fn noise_plane(shift_x: usize, shift_y: usize) -> Vec<f32> {
        let mut out = Vec::with_capacity(WORK_WIDTH * WORK_HEIGHT);
        for y in 0..WORK_HEIGHT {
            for x in 0..WORK_WIDTH {
                let sx = (x + WORK_WIDTH - shift_x) % WORK_WIDTH;
                let sy = (y + WORK_HEIGHT - shift_y) % WORK_HEIGHT;
                out.push(f32::from(texel(sx, sy)));
            }
        }
        out
    }

    #[test]
    fn correlating_a_plane_with_itself_finds_zero_shift() {
        let mut stabilizer = Stabilizer::new();
        let plane = noise_plane(0, 0);
        let (dx, dy) = stabilizer.phase_correlate(&plane, &plane).unwrap();
        assert!(dx.abs() < 0.1, "dx = {dx}");
        assert!(dy.abs() < 0.1, "dy = {dy}");
    }

    #[test]
    fn recovers_a_known_translation() {
        let mut stabilizer = Stabilizer::new();
        let prev = noise_plane(0, 0);
        let curr = noise_plane(8, 4);
        let (dx, dy) = stabilizer.phase_correlate(&prev, &curr).unwrap();
        assert!((dx - 8.0).abs() < 0.5, "dx = {dx}");
        assert!((dy - 4.0).abs() < 0.5, "dy = {dy}");
    }

    #[test]
    fn recovers_a_negative_translation() {
        let mut stabilizer = Stabilizer::new();
        let prev = noise_plane(10, 6);
        let curr = noise_plane(0, 0);
        let (dx, dy) = stabilizer.phase_correlate(&prev, &curr).unwrap();
        assert!((dx + 10.0).abs() < 0.5, "dx = {dx}");
        assert!((dy + 6.0).abs() < 0.5, "dy = {dy}");
    }

    #[test]
    fn disabled_passes_through_and_clears_history() {
        let mut stabilizer = Stabilizer::new();
        let settings = stabilized_settings();

        let primer = shifted_frame(WORK_WIDTH, WORK_HEIGHT, 0, 0);
        stabilizer.stabilize(primer.clone(), &settings);
        stabilizer.stabilize(primer.clone(), &settings);
        assert!(stabilizer.prev_gray.is_some());

        let mut disabled = settings;
        disabled.stabilize = false;
        let output = stabilizer.stabilize(primer.clone(), &disabled);
        assert_eq!(output.data, primer.data);
        assert!(stabilizer.prev_gray.is_none());
        assert!(stabilizer.blend_ring.is_empty());
    }

    #[test]
    fn first_frame_after_reenable_is_unprocessed() {
        let mut stabilizer = Stabilizer::new();
        let settings = stabilized_settings();

        stabilizer.stabilize(shifted_frame(WORK_WIDTH, WORK_HEIGHT, 0, 0), &settings);
        let mut disabled = settings;
        disabled.stabilize = false;
        stabilizer.stabilize(shifted_frame(WORK_WIDTH, WORK_HEIGHT, 0, 0), &disabled);

        // Re-enabled: even a heavily shifted frame primes instead of being
        // corrected against stale history.
        let moved = shifted_frame(WORK_WIDTH, WORK_HEIGHT, 50, 20);
        let output = stabilizer.stabilize(moved.clone(), &settings);
        assert_eq!(output.data, moved.data);
    }

    #[test]
    fn identical_frames_leave_the_output_unchanged() {
        let mut stabilizer = Stabilizer::new();
        let settings = stabilized_settings();
        let frame = shifted_frame(WORK_WIDTH, WORK_HEIGHT, 0, 0);

        let primed = stabilizer.stabilize(frame.clone(), &settings);
        assert_eq!(primed.data, frame.data);
        let output = stabilizer.stabilize(frame.clone(), &settings);
        assert_eq!(output.data, frame.data);
        assert!(stabilizer.drift_x.abs() < f32::EPSILON);
        assert!(stabilizer.drift_y.abs() < f32::EPSILON);
    }

    #[test]
    fn large_shift_is_treated_as_a_scene_change() {
        let mut stabilizer = Stabilizer::new();
        let settings = stabilized_settings();

        stabilizer.stabilize(shifted_frame(WORK_WIDTH, WORK_HEIGHT, 0, 0), &settings);
        // 200 px on a 360 px min dimension is well past the 30 % threshold.
        let jumped = shifted_frame(WORK_WIDTH, WORK_HEIGHT, 200, 0);
        let output = stabilizer.stabilize(jumped.clone(), &settings);
        assert_eq!(output.data, jumped.data);
        assert_eq!(stabilizer.drift_x, 0.0);
        assert_eq!(stabilizer.correction_x, 0.0);
    }

    #[test]
    fn blend_ring_never_exceeds_the_configured_depth() {
        let mut stabilizer = Stabilizer::new();
        let mut settings = stabilized_settings();
        settings.stab_blend = 3;

        for _ in 0..8 {
            stabilizer.stabilize(shifted_frame(WORK_WIDTH, WORK_HEIGHT, 0, 0), &settings);
        }
        assert!(stabilizer.blend_ring.len() <= 3);

        settings.stab_blend = 1;
        stabilizer.stabilize(shifted_frame(WORK_WIDTH, WORK_HEIGHT, 0, 0), &settings);
        assert!(stabilizer.blend_ring.is_empty());
    }

    #[test]
    fn integer_translation_moves_content_exactly() {
        let frame = shifted_frame(32, 20, 0, 0);
        let moved = translate_replicate(&frame, 5.0, 3.0);
        // Interior pixels: dst(x, y) = src(x - 5, y - 3).
        for y in 3..20usize {
            for x in 5..32usize {
                let dst = (y * 32 + x) * 3;
                let src = ((y - 3) * 32 + (x - 5)) * 3;
                assert_eq!(moved.data[dst], frame.data[src]);
            }
        }
    }

    #[test]
    fn translation_replicates_the_border() {
        let frame = shifted_frame(16, 12, 0, 0);
        let moved = translate_replicate(&frame, 4.0, 0.0);
        // The first columns replicate column zero of the source.
        for x in 0..4usize {
            assert_eq!(moved.data[x * 3], frame.data[0]);
        }
    }

    #[test]
    fn zero_translation_is_exact() {
        let frame = shifted_frame(32, 20, 0, 0);
        let moved = translate_replicate(&frame, 0.0, 0.0);
        assert_eq!(moved.data, frame.data);
    }
}
