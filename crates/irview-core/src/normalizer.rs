//! Infrared intensity normalization: 16-bit sensor samples to gray BGRA.
//!
//! Each sample is scaled against the full sensor range, rescaled by the
//! expected scene brightness (average × standard deviations), clamped into
//! `[output_min, output_max]` and converted to an 8-bit intensity. The map
//! only depends on the sample value, so it is precomputed once per
//! calibration as a 65536-entry lookup table.

use crate::types::{FrameError, PixelBuffer, RawFrame, ALPHA_OPAQUE, BYTES_PER_PIXEL};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The highest value a sensor sample can take.
pub const SOURCE_VALUE_MAX: f32 = u16::MAX as f32;

const LUT_LEN: usize = u16::MAX as usize + 1;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("invalid calibration: {0}")]
    InvalidCalibration(String),
}

/// How the clamped ratio is turned into an intensity byte.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntensityRounding {
    /// Round to the nearest byte value.
    #[default]
    Nearest,
    /// Cast toward zero, matching older viewers.
    Truncate,
}

/// Calibration constants for the intensity map.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct NormalizerConfig {
    /// Expected mean scene brightness as a fraction of the sensor range.
    pub scene_average: f32,
    /// Standard deviations above the average that render fully bright.
    pub scene_std_devs: f32,
    /// Lower output clamp. Keeps dark regions visibly "on".
    pub output_min: f32,
    /// Upper output clamp.
    pub output_max: f32,
    pub rounding: IntensityRounding,
}

impl Default for NormalizerConfig {
    fn default() -> Self {
        Self {
            scene_average: 0.08,
            scene_std_devs: 3.0,
            output_min: 0.01,
            output_max: 1.0,
            rounding: IntensityRounding::Nearest,
        }
    }
}

impl NormalizerConfig {
    /// Check that the calibration describes a usable map.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let fields = [
            ("scene_average", self.scene_average),
            ("scene_std_devs", self.scene_std_devs),
            ("output_min", self.output_min),
            ("output_max", self.output_max),
        ];
        for (name, value) in fields {
            if !value.is_finite() {
                return Err(ConfigError::InvalidCalibration(format!(
                    "{name} must be finite, got {value}"
                )));
            }
        }
        if self.scene_average <= 0.0 || self.scene_std_devs <= 0.0 {
            return Err(ConfigError::InvalidCalibration(format!(
                "scene_average and scene_std_devs must be positive, got {} and {}",
                self.scene_average, self.scene_std_devs
            )));
        }
        if !self.scene_scale().is_normal() {
            return Err(ConfigError::InvalidCalibration(format!(
                "scene_average * scene_std_devs must be a normal positive number, got {}",
                self.scene_scale()
            )));
        }
        for (name, value) in [("output_min", self.output_min), ("output_max", self.output_max)] {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::InvalidCalibration(format!(
                    "{name} must be within [0, 1], got {value}"
                )));
            }
        }
        if self.output_min > self.output_max {
            return Err(ConfigError::InvalidCalibration(format!(
                "output_min ({}) exceeds output_max ({})",
                self.output_min, self.output_max
            )));
        }
        Ok(())
    }

    /// Divisor applied to the range-normalized sample.
    pub fn scene_scale(&self) -> f32 {
        self.scene_average * self.scene_std_devs
    }
}

/// Pure per-pixel map from raw samples to gray BGRA pixels.
#[derive(Clone)]
pub struct IntensityNormalizer {
    config: NormalizerConfig,
    lut: Box<[u8]>,
}

impl std::fmt::Debug for IntensityNormalizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IntensityNormalizer")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl IntensityNormalizer {
    /// Validate the calibration and build the lookup table.
    pub fn new(config: NormalizerConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let lut = (0..LUT_LEN)
            .map(|v| to_byte(clamped_ratio(&config, v as u16), config.rounding))
            .collect();
        Ok(Self { config, lut })
    }

    pub fn config(&self) -> &NormalizerConfig {
        &self.config
    }

    /// Clamped display ratio for a single sample.
    pub fn ratio(&self, sample: u16) -> f32 {
        clamped_ratio(&self.config, sample)
    }

    /// Intensity byte for a single sample.
    pub fn intensity(&self, sample: u16) -> u8 {
        self.lut[sample as usize]
    }

    /// Normalize a whole frame into a display buffer of the same geometry.
    pub fn normalize_into(
        &self,
        frame: &RawFrame,
        pixels: &mut PixelBuffer,
    ) -> Result<(), FrameError> {
        if frame.geometry() != pixels.geometry() {
            return Err(FrameError::GeometryMismatch {
                expected: pixels.geometry(),
                actual: frame.geometry(),
            });
        }
        self.normalize_samples(frame.samples(), pixels.as_bytes_mut())
    }

    /// Normalize `samples` into `bgra`, which must hold exactly 4 bytes per
    /// sample. Nothing is written on a length mismatch.
    pub fn normalize_samples(&self, samples: &[u16], bgra: &mut [u8]) -> Result<(), FrameError> {
        let expected = samples.len() * BYTES_PER_PIXEL;
        if bgra.len() != expected {
            return Err(FrameError::LengthMismatch {
                expected,
                actual: bgra.len(),
            });
        }
        let lut = &self.lut;
        bgra.par_chunks_exact_mut(BYTES_PER_PIXEL)
            .zip(samples.par_iter())
            .for_each(|(px, &sample)| {
                let i = lut[sample as usize];
                px.copy_from_slice(&[i, i, i, ALPHA_OPAQUE]);
            });
        Ok(())
    }
}

/// Clamp high, then clamp low. With `output_min <= output_max` (enforced by
/// `validate`) this equals a two-sided clamp; `f32::clamp` is avoided since
/// it panics on inverted bounds.
fn clamped_ratio(config: &NormalizerConfig, sample: u16) -> f32 {
    let ratio = sample as f32 / SOURCE_VALUE_MAX / config.scene_scale();
    ratio.min(config.output_max).max(config.output_min)
}

fn to_byte(ratio: f32, rounding: IntensityRounding) -> u8 {
    let scaled = ratio * 255.0;
    match rounding {
        IntensityRounding::Nearest => scaled.round() as u8,
        IntensityRounding::Truncate => scaled as u8,
    }
}
