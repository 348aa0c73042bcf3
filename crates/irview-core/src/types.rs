//! Stream geometry and the reusable sample/pixel buffers.

use serde::Serialize;
use std::fmt;

/// Bytes per output pixel (B, G, R, A).
pub const BYTES_PER_PIXEL: usize = 4;

/// Alpha value written for every output pixel.
pub const ALPHA_OPAQUE: u8 = 255;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FrameError {
    #[error("invalid stream geometry {width}x{height}")]
    InvalidGeometry { width: u32, height: u32 },
    #[error("invalid sample length: expected {expected}, got {actual}")]
    LengthMismatch { expected: usize, actual: usize },
    #[error("geometry mismatch: expected {expected}, got {actual}")]
    GeometryMismatch {
        expected: StreamGeometry,
        actual: StreamGeometry,
    },
}

/// Resolution contract between a sensor stream and its display buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct StreamGeometry {
    width: u32,
    height: u32,
}

impl StreamGeometry {
    /// Build a geometry, rejecting empty dimensions and sizes whose pixel
    /// buffer length would not fit in `usize`.
    pub fn new(width: u32, height: u32) -> Result<Self, FrameError> {
        let valid = width > 0
            && height > 0
            && (width as usize)
                .checked_mul(height as usize)
                .and_then(|n| n.checked_mul(BYTES_PER_PIXEL))
                .is_some();
        if !valid {
            return Err(FrameError::InvalidGeometry { width, height });
        }
        Ok(Self { width, height })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Number of samples in one frame.
    pub fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }

    /// Length in bytes of the BGRA buffer for this geometry.
    pub fn pixel_buffer_len(&self) -> usize {
        self.pixel_count() * BYTES_PER_PIXEL
    }
}

impl fmt::Display for StreamGeometry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Raw 16-bit infrared samples for one frame, row-major.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawFrame {
    geometry: StreamGeometry,
    samples: Vec<u16>,
}

impl RawFrame {
    /// Zero-filled frame buffer, allocated once per stream.
    pub fn new(geometry: StreamGeometry) -> Self {
        Self {
            geometry,
            samples: vec![0; geometry.pixel_count()],
        }
    }

    pub fn from_samples(geometry: StreamGeometry, samples: Vec<u16>) -> Result<Self, FrameError> {
        if samples.len() != geometry.pixel_count() {
            return Err(FrameError::LengthMismatch {
                expected: geometry.pixel_count(),
                actual: samples.len(),
            });
        }
        Ok(Self { geometry, samples })
    }

    pub fn geometry(&self) -> StreamGeometry {
        self.geometry
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn samples(&self) -> &[u16] {
        &self.samples
    }

    pub fn samples_mut(&mut self) -> &mut [u16] {
        &mut self.samples
    }
}

/// BGRA display buffer, 4 bytes per pixel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PixelBuffer {
    geometry: StreamGeometry,
    data: Vec<u8>,
}

impl PixelBuffer {
    /// Zero-filled ("unwritten") buffer, allocated once per stream.
    pub fn new(geometry: StreamGeometry) -> Self {
        Self {
            geometry,
            data: vec![0; geometry.pixel_buffer_len()],
        }
    }

    pub fn geometry(&self) -> StreamGeometry {
        self.geometry
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// The `[B, G, R, A]` bytes of pixel `index`, if in range.
    pub fn pixel(&self, index: usize) -> Option<[u8; BYTES_PER_PIXEL]> {
        let start = index.checked_mul(BYTES_PER_PIXEL)?;
        let end = start.checked_add(BYTES_PER_PIXEL)?;
        let px = self.data.get(start..end)?;
        Some([px[0], px[1], px[2], px[3]])
    }
}

/// Mean of the first channel of a packed BGRA byte slice.
///
/// Normalized frames are gray, so this is the mean displayed intensity.
pub fn mean_intensity(bgra: &[u8]) -> f32 {
    let pixels = bgra.len() / BYTES_PER_PIXEL;
    if pixels == 0 {
        return 0.0;
    }
    let sum: u64 = bgra
        .chunks_exact(BYTES_PER_PIXEL)
        .map(|px| px[0] as u64)
        .sum();
    sum as f32 / pixels as f32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_geometry_sizes() {
        let g = StreamGeometry::new(512, 424).unwrap();
        assert_eq!(g.pixel_count(), 512 * 424);
        assert_eq!(g.pixel_buffer_len(), 512 * 424 * 4);
        assert_eq!(g.to_string(), "512x424");
    }

    #[test]
    fn test_geometry_rejects_empty() {
        assert!(StreamGeometry::new(0, 424).is_err());
        assert!(StreamGeometry::new(512, 0).is_err());
    }

    #[test]
    fn test_raw_frame_length_invariant() {
        let g = StreamGeometry::new(4, 2).unwrap();
        assert_eq!(RawFrame::new(g).len(), 8);
        assert!(RawFrame::from_samples(g, vec![0; 8]).is_ok());
        assert_eq!(
            RawFrame::from_samples(g, vec![0; 7]),
            Err(FrameError::LengthMismatch {
                expected: 8,
                actual: 7
            })
        );
    }

    #[test]
    fn test_pixel_buffer_starts_unwritten() {
        let g = StreamGeometry::new(3, 3).unwrap();
        let buf = PixelBuffer::new(g);
        assert_eq!(buf.as_bytes().len(), 36);
        assert!(buf.as_bytes().iter().all(|&b| b == 0));
        assert_eq!(buf.pixel(8), Some([0, 0, 0, 0]));
        assert_eq!(buf.pixel(9), None);
        assert_eq!(buf.pixel(usize::MAX / BYTES_PER_PIXEL), None);
        assert_eq!(buf.pixel(usize::MAX), None);
    }

    #[test]
    fn test_mean_intensity() {
        let bgra = [10, 10, 10, 255, 30, 30, 30, 255];
        assert_eq!(mean_intensity(&bgra), 20.0);
        assert_eq!(mean_intensity(&[]), 0.0);
    }
}
