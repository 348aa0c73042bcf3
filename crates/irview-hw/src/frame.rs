//! Y16 frame handle — little-endian 16-bit infrared samples straight from
//! a V4L2 capture buffer.

use irview_core::{FrameError, FrameGuard, FrameHandle, RawFrameView, StreamGeometry};

/// Decode packed little-endian 16-bit samples into `dst`.
///
/// `y16` must hold at least `2 * dst.len()` bytes; trailing bytes (driver
/// padding) are ignored.
pub fn decode_y16(y16: &[u8], dst: &mut [u16]) -> Result<(), FrameError> {
    let expected = dst.len() * 2;
    if y16.len() < expected {
        return Err(FrameError::LengthMismatch {
            expected,
            actual: y16.len(),
        });
    }
    for (sample, bytes) in dst.iter_mut().zip(y16[..expected].chunks_exact(2)) {
        *sample = u16::from_le_bytes([bytes[0], bytes[1]]);
    }
    Ok(())
}

/// One dequeued capture buffer, valid only for the duration of the
/// frame-ready callback.
pub struct Y16Frame<'a> {
    data: &'a [u8],
    geometry: StreamGeometry,
    sequence: u32,
    acquired: bool,
    released: bool,
}

impl<'a> Y16Frame<'a> {
    pub fn new(data: &'a [u8], geometry: StreamGeometry, sequence: u32) -> Self {
        Self {
            data,
            geometry,
            sequence,
            acquired: false,
            released: false,
        }
    }

    pub fn sequence(&self) -> u32 {
        self.sequence
    }

    pub fn is_released(&self) -> bool {
        self.released
    }
}

impl RawFrameView for Y16Frame<'_> {
    fn geometry(&self) -> StreamGeometry {
        self.geometry
    }

    fn copy_into(&self, dst: &mut [u16]) -> Result<(), FrameError> {
        if dst.len() != self.geometry.pixel_count() {
            return Err(FrameError::LengthMismatch {
                expected: self.geometry.pixel_count(),
                actual: dst.len(),
            });
        }
        decode_y16(self.data, dst)
    }

    fn release(&mut self) {
        // The buffer is requeued by the capture stream once the callback
        // returns; after release the handle must not hand it out again.
        self.released = true;
        self.data = &[];
    }
}

impl FrameHandle for Y16Frame<'_> {
    fn try_acquire(&mut self) -> Option<FrameGuard<'_>> {
        if self.acquired || self.data.is_empty() {
            return None;
        }
        self.acquired = true;
        Some(FrameGuard::new(self))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_y16_little_endian() {
        let y16 = [0x88, 0x13, 0xff, 0xff, 0x00, 0x00];
        let mut dst = [0u16; 3];
        decode_y16(&y16, &mut dst).unwrap();
        assert_eq!(dst, [5000, u16::MAX, 0]);
    }

    #[test]
    fn test_decode_y16_ignores_padding() {
        let y16 = [1, 0, 2, 0, 0xaa, 0xbb];
        let mut dst = [0u16; 2];
        decode_y16(&y16, &mut dst).unwrap();
        assert_eq!(dst, [1, 2]);
    }

    #[test]
    fn test_decode_y16_short_buffer() {
        let mut dst = [7u16; 2];
        let result = decode_y16(&[1, 0, 2], &mut dst);
        assert_eq!(
            result,
            Err(FrameError::LengthMismatch {
                expected: 4,
                actual: 3
            })
        );
        assert_eq!(dst, [7, 7]);
    }

    #[test]
    fn test_frame_acquired_once_and_released() {
        let g = StreamGeometry::new(2, 1).unwrap();
        let data = [0x88, 0x13, 0x10, 0x27];
        let mut frame = Y16Frame::new(&data, g, 42);
        {
            let guard = frame.try_acquire().unwrap();
            assert_eq!(guard.geometry(), g);
            let mut dst = [0u16; 2];
            guard.copy_into(&mut dst).unwrap();
            assert_eq!(dst, [5000, 10000]);
        }
        assert!(frame.is_released());
        assert_eq!(frame.sequence(), 42);
        assert!(frame.try_acquire().is_none());
    }

    #[test]
    fn test_empty_buffer_not_acquired() {
        let g = StreamGeometry::new(2, 1).unwrap();
        let mut frame = Y16Frame::new(&[], g, 0);
        assert!(frame.try_acquire().is_none());
    }

    #[test]
    fn test_copy_into_wrong_destination() {
        let g = StreamGeometry::new(2, 1).unwrap();
        let data = [0u8; 4];
        let mut frame = Y16Frame::new(&data, g, 0);
        let guard = frame.try_acquire().unwrap();
        let mut dst = [0u16; 3];
        assert!(guard.copy_into(&mut dst).is_err());
    }
}
