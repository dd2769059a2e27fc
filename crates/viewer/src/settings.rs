//! Shared mutable settings: the per-frame processing record and the capture
//! tuning knobs.
//!
//! Control handlers mutate these under a mutex; the capture loop takes a
//! `Copy` snapshot once per frame so a mid-frame write can never tear the
//! transform chain. Values arrive from the control surface in the integer
//! encodings the sliders send (`contrast=150` means 1.5×). Out-of-range
//! writes are rejected with an explicit error, never clamped.

use std::sync::{Arc, Mutex};

use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("unknown setting {0:?}")]
    UnknownSetting(String),
    #[error("malformed value {value:?} for {setting}")]
    Malformed { setting: String, value: String },
    #[error("value {value} for {setting} outside {min}..={max}")]
    OutOfRange {
        setting: String,
        value: i64,
        min: i64,
        max: i64,
    },
}

/// Quarter-turn rotation applied by the transform chain.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(into = "u32")]
pub enum Rotation {
    Deg0,
    Deg90,
    Deg180,
    Deg270,
}

impl From<Rotation> for u32 {
    fn from(rotation: Rotation) -> u32 {
        match rotation {
            Rotation::Deg0 => 0,
            Rotation::Deg90 => 90,
            Rotation::Deg180 => 180,
            Rotation::Deg270 => 270,
        }
    }
}

impl Rotation {
    fn from_degrees(degrees: u32) -> Option<Self> {
        match degrees {
            0 => Some(Rotation::Deg0),
            90 => Some(Rotation::Deg90),
            180 => Some(Rotation::Deg180),
            270 => Some(Rotation::Deg270),
            _ => None,
        }
    }

    /// Fold a signed delta (a multiple of 90) onto the current rotation.
    pub fn rotated_by(self, delta_degrees: i32) -> Self {
        let current = u32::from(self) as i32;
        let folded = (current + delta_degrees).rem_euclid(360) as u32;
        Rotation::from_degrees(folded).unwrap_or(Rotation::Deg0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct ProcessingSettings {
    pub brightness: i32,
    pub contrast: f32,
    pub saturation: f32,
    pub gain: f32,
    pub flip_h: bool,
    pub flip_v: bool,
    pub rotation: Rotation,
    pub zoom: f32,
    pub stabilize: bool,
    pub stab_noise: u32,
    pub stab_smooth: u32,
    pub stab_decay: u32,
    pub stab_blend: u32,
    pub revision: u64,
}

impl Default for ProcessingSettings {
    fn default() -> Self {
        Self {
            brightness: 0,
            contrast: 1.0,
            saturation: 1.0,
            gain: 1.0,
            // The device profile ships mirrored on both axes.
            flip_h: true,
            flip_v: true,
            rotation: Rotation::Deg0,
            zoom: 1.0,
            stabilize: false,
            stab_noise: 5,
            stab_smooth: 30,
            stab_decay: 60,
            stab_blend: 2,
            revision: 0,
        }
    }
}

impl ProcessingSettings {
    /// Dead-zone in pixels below which a detected shift is treated as noise.
    pub fn noise_threshold_px(&self) -> f32 {
        self.stab_noise as f32 / 10.0
    }

    /// Weight of the previous smoothed correction in the single-pole filter.
    pub fn smoothing(&self) -> f32 {
        self.stab_smooth as f32 / 100.0
    }

    /// Per-frame multiplier applied to the accumulated drift.
    pub fn decay(&self) -> f32 {
        self.stab_decay as f32 / 100.0
    }

    pub fn blend_depth(&self) -> usize {
        self.stab_blend as usize
    }

    /// Apply one control-surface write. `value` is the raw path segment the
    /// client sent; toggles expect the literal `toggle`.
    pub fn apply(&mut self, setting: &str, value: &str) -> Result<(), SettingsError> {
        match setting {
            "brightness" => self.brightness = parse_ranged(setting, value, -100, 100)? as i32,
            "contrast" => self.contrast = parse_ranged(setting, value, 10, 300)? as f32 / 100.0,
            "saturation" => self.saturation = parse_ranged(setting, value, 0, 300)? as f32 / 100.0,
            "gain" => self.gain = parse_ranged(setting, value, 20, 300)? as f32 / 100.0,
            "zoom" => self.zoom = parse_ranged(setting, value, 50, 400)? as f32 / 100.0,
            "flip_h" => self.flip_h = toggled("flip_h", value, self.flip_h)?,
            "flip_v" => self.flip_v = toggled("flip_v", value, self.flip_v)?,
            "stabilize" => self.stabilize = toggled("stabilize", value, self.stabilize)?,
            "rotate" => {
                let delta = parse_int("rotate", value)?;
                if delta % 90 != 0 {
                    return Err(SettingsError::Malformed {
                        setting: "rotate".to_string(),
                        value: value.to_string(),
                    });
                }
                self.rotation = self.rotation.rotated_by(delta as i32);
            }
            "stab_noise" => self.stab_noise = parse_ranged(setting, value, 0, 100)? as u32,
            "stab_smooth" => self.stab_smooth = parse_ranged(setting, value, 0, 99)? as u32,
            "stab_decay" => self.stab_decay = parse_ranged(setting, value, 0, 100)? as u32,
            "stab_blend" => self.stab_blend = parse_ranged(setting, value, 1, 10)? as u32,
            other => return Err(SettingsError::UnknownSetting(other.to_string())),
        }
        self.revision += 1;
        Ok(())
    }

    /// Restore the documented processing defaults. Stabilizer tuning is left
    /// alone; it has its own reset.
    pub fn reset(&mut self) {
        let defaults = ProcessingSettings::default();
        self.brightness = defaults.brightness;
        self.contrast = defaults.contrast;
        self.saturation = defaults.saturation;
        self.gain = defaults.gain;
        self.flip_h = defaults.flip_h;
        self.flip_v = defaults.flip_v;
        self.rotation = defaults.rotation;
        self.zoom = defaults.zoom;
        self.revision += 1;
    }

    /// Restore the stabilizer tuning defaults.
    pub fn reset_stabilizer(&mut self) {
        let defaults = ProcessingSettings::default();
        self.stab_noise = defaults.stab_noise;
        self.stab_smooth = defaults.stab_smooth;
        self.stab_decay = defaults.stab_decay;
        self.stab_blend = defaults.stab_blend;
        self.revision += 1;
    }

    /// All-identity snapshot used by transform tests.
    #[cfg(test)]
    pub(crate) fn identity() -> Self {
        Self {
            flip_h: false,
            flip_v: false,
            ..Default::default()
        }
    }
}

/// Capture-side tuning, mutable at runtime through `/capture/...`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct CaptureTuning {
    pub fps: u32,
    pub jpeg_quality: u8,
}

impl Default for CaptureTuning {
    fn default() -> Self {
        Self {
            fps: 30,
            jpeg_quality: 75,
        }
    }
}

impl CaptureTuning {
    pub fn apply(&mut self, setting: &str, value: &str) -> Result<(), SettingsError> {
        match setting {
            "fps" => self.fps = parse_ranged("fps", value, 1, 30)? as u32,
            "quality" => self.jpeg_quality = parse_ranged("quality", value, 10, 100)? as u8,
            other => return Err(SettingsError::UnknownSetting(other.to_string())),
        }
        Ok(())
    }
}

pub type SharedSettings = Arc<Mutex<ProcessingSettings>>;
pub type SharedTuning = Arc<Mutex<CaptureTuning>>;

pub fn snapshot_settings(settings: &SharedSettings) -> ProcessingSettings {
    match settings.lock() {
        Ok(guard) => *guard,
        Err(poisoned) => *poisoned.into_inner(),
    }
}

pub fn snapshot_tuning(tuning: &SharedTuning) -> CaptureTuning {
    match tuning.lock() {
        Ok(guard) => *guard,
        Err(poisoned) => *poisoned.into_inner(),
    }
}

fn parse_int(setting: &str, value: &str) -> Result<i64, SettingsError> {
    value
        .parse::<i64>()
        .map_err(|_| SettingsError::Malformed {
            setting: setting.to_string(),
            value: value.to_string(),
        })
}

fn parse_ranged(setting: &str, value: &str, min: i64, max: i64) -> Result<i64, SettingsError> {
    let parsed = parse_int(setting, value)?;
    if parsed < min || parsed > max {
        return Err(SettingsError::OutOfRange {
            setting: setting.to_string(),
            value: parsed,
            min,
            max,
        });
    }
    Ok(parsed)
}

fn toggled(setting: &str, value: &str, current: bool) -> Result<bool, SettingsError> {
    if value == "toggle" {
        Ok(!current)
    } else {
        Err(SettingsError::Malformed {
            setting: setting.to_string(),
            value: value.to_string(),
        })
    }
}
