//! Presentation Sink interface and an in-memory display surface.

use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SinkError {
    #[error("failed to bind {width}x{height} surface: {reason}")]
    Bind {
        width: u32,
        height: u32,
        reason: String,
    },
    #[error("pixel write rejected: expected {expected} bytes, got {actual}")]
    WriteLength { expected: usize, actual: usize },
    #[error("present failed: {0}")]
    Present(String),
}

/// A display target that renders BGRA pixel buffers.
pub trait PresentationSink {
    type Surface: Surface;

    fn bind_surface(&mut self, width: u32, height: u32) -> Result<Self::Surface, SinkError>;
}

/// A bound surface of fixed dimensions.
pub trait Surface {
    /// `(width, height)` in pixels.
    fn dimensions(&self) -> (u32, u32);

    /// Stage a full BGRA frame for the next present.
    fn write_pixels(&mut self, bgra: &[u8]) -> Result<(), SinkError>;

    fn present(&mut self) -> Result<(), SinkError>;
}

/// Snapshot of what an in-memory surface has shown so far.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Display {
    /// Bound surface dimensions, once bound.
    pub dimensions: Option<(u32, u32)>,
    /// Last presented frame.
    pub front: Vec<u8>,
    pub writes: u64,
    pub presents: u64,
}

/// Headless sink. Clones share the same display state, so a caller can keep
/// one to inspect what the pump presented.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    display: Arc<Mutex<Display>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> Display {
        self.display
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl PresentationSink for MemorySink {
    type Surface = MemorySurface;

    fn bind_surface(&mut self, width: u32, height: u32) -> Result<MemorySurface, SinkError> {
        let mut display = self.display.lock().unwrap_or_else(PoisonError::into_inner);
        *display = Display {
            dimensions: Some((width, height)),
            ..Display::default()
        };
        Ok(MemorySurface {
            width,
            height,
            back: Vec::new(),
            display: Arc::clone(&self.display),
        })
    }
}

#[derive(Debug)]
pub struct MemorySurface {
    width: u32,
    height: u32,
    back: Vec<u8>,
    display: Arc<Mutex<Display>>,
}

impl Surface for MemorySurface {
    fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn write_pixels(&mut self, bgra: &[u8]) -> Result<(), SinkError> {
        let expected = self.width as usize * self.height as usize * 4;
        if bgra.len() != expected {
            return Err(SinkError::WriteLength {
                expected,
                actual: bgra.len(),
            });
        }
        self.back.clear();
        self.back.extend_from_slice(bgra);
        self.display
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .writes += 1;
        Ok(())
    }

    fn present(&mut self) -> Result<(), SinkError> {
        let mut display = self.display.lock().unwrap_or_else(PoisonError::into_inner);
        display.front.clone_from(&self.back);
        display.presents += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_present_copies_back_to_front() {
        let sink = MemorySink::new();
        let mut surface = sink.clone().bind_surface(1, 1).unwrap();
        surface.write_pixels(&[1, 2, 3, 255]).unwrap();
        assert!(sink.snapshot().front.is_empty());
        surface.present().unwrap();
        let display = sink.snapshot();
        assert_eq!(display.dimensions, Some((1, 1)));
        assert_eq!(display.front, vec![1, 2, 3, 255]);
        assert_eq!((display.writes, display.presents), (1, 1));
    }

    #[test]
    fn test_write_rejects_wrong_length() {
        let mut sink = MemorySink::new();
        let mut surface = sink.bind_surface(2, 1).unwrap();
        assert!(surface.write_pixels(&[0; 4]).is_err());
        assert_eq!(sink.snapshot().writes, 0);
    }
}
