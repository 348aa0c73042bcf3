//! Hardware-free frame source producing generated infrared frames.

use crate::source::{FrameReadyCallback, FrameSource, OwnedFrame, SourceError, Subscription};
use crate::types::StreamGeometry;
use std::sync::atomic::Ordering;
use std::time::Duration;

/// Default resolution, matching common time-of-flight IR sensors.
pub const DEFAULT_WIDTH: u32 = 512;
pub const DEFAULT_HEIGHT: u32 = 424;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pattern {
    /// Every sample has the same value.
    Constant(u16),
    /// Horizontal ramp across the full sample range, shifted each frame.
    Ramp,
}

impl Pattern {
    fn fill(&self, geometry: StreamGeometry, sequence: u64, samples: &mut Vec<u16>) {
        samples.clear();
        match *self {
            Pattern::Constant(value) => samples.resize(geometry.pixel_count(), value),
            Pattern::Ramp => {
                let width = geometry.width() as u64;
                for _ in 0..geometry.height() {
                    samples.extend((0..width).map(|x| {
                        let column = (x + sequence) % width;
                        (column * u16::MAX as u64 / width.saturating_sub(1).max(1)) as u16
                    }));
                }
            }
        }
    }
}

pub struct SyntheticSource {
    pattern: Pattern,
    /// Stop after this many frames; `None` runs until cancelled.
    frames: Option<u64>,
    interval: Duration,
    geometry: Option<StreamGeometry>,
    subscribed: bool,
}

impl SyntheticSource {
    pub fn new(pattern: Pattern) -> Self {
        Self {
            pattern,
            frames: None,
            interval: Duration::from_millis(33),
            geometry: None,
            subscribed: false,
        }
    }

    pub fn with_frame_limit(mut self, frames: u64) -> Self {
        self.frames = Some(frames);
        self
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }
}

impl FrameSource for SyntheticSource {
    fn open_stream(
        &mut self,
        desired: Option<StreamGeometry>,
    ) -> Result<StreamGeometry, SourceError> {
        let geometry = match desired {
            Some(g) => g,
            None => StreamGeometry::new(DEFAULT_WIDTH, DEFAULT_HEIGHT)
                .map_err(|e| SourceError::StreamOpen(e.to_string()))?,
        };
        self.geometry = Some(geometry);
        tracing::info!(%geometry, pattern = ?self.pattern, "synthetic stream open");
        Ok(geometry)
    }

    fn subscribe(
        &mut self,
        mut on_frame_ready: FrameReadyCallback,
    ) -> Result<Subscription, SourceError> {
        let geometry = self.geometry.ok_or(SourceError::NotOpen)?;
        if self.subscribed {
            return Err(SourceError::AlreadySubscribed);
        }

        let pattern = self.pattern;
        let limit = self.frames;
        let interval = self.interval;
        let subscription = Subscription::spawn("irview-synthetic", move |stop| {
            let mut samples = Vec::with_capacity(geometry.pixel_count());
            let mut sequence = 0u64;
            while !stop.load(Ordering::SeqCst) && limit.map_or(true, |n| sequence < n) {
                pattern.fill(geometry, sequence, &mut samples);
                let mut frame = OwnedFrame::new(geometry, std::mem::take(&mut samples));
                on_frame_ready(&mut frame);
                sequence += 1;
                if !interval.is_zero() {
                    std::thread::sleep(interval);
                }
            }
            tracing::debug!(frames = sequence, "synthetic source finished");
        })?;
        self.subscribed = true;
        Ok(subscription)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::FrameHandle;
    use std::sync::{Arc, Mutex};

    #[test]
    fn test_open_defaults_geometry() {
        let mut source = SyntheticSource::new(Pattern::Constant(1));
        let g = source.open_stream(None).unwrap();
        assert_eq!((g.width(), g.height()), (DEFAULT_WIDTH, DEFAULT_HEIGHT));
    }

    #[test]
    fn test_subscribe_requires_open_stream() {
        let mut source = SyntheticSource::new(Pattern::Constant(1));
        assert!(matches!(
            source.subscribe(Box::new(|_: &mut dyn FrameHandle| {})),
            Err(SourceError::NotOpen)
        ));
    }

    #[test]
    fn test_bounded_delivery_in_order() {
        let g = StreamGeometry::new(4, 1).unwrap();
        let mut source = SyntheticSource::new(Pattern::Ramp)
            .with_frame_limit(3)
            .with_interval(Duration::ZERO);
        source.open_stream(Some(g)).unwrap();

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let sub = source
            .subscribe(Box::new(move |handle: &mut dyn FrameHandle| {
                if let Some(frame) = handle.try_acquire() {
                    let mut dst = vec![0u16; 4];
                    frame.copy_into(&mut dst).unwrap();
                    sink.lock().unwrap().push(dst);
                }
            }))
            .unwrap();
        for _ in 0..1000 {
            if sub.is_finished() {
                break;
            }
            std::thread::sleep(Duration::from_millis(1));
        }
        sub.cancel();

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 3);
        assert_eq!(seen[0], vec![0, 21845, 43690, 65535]);
        assert_eq!(seen[1], vec![21845, 43690, 65535, 0]);
        assert!(matches!(
            source.subscribe(Box::new(|_: &mut dyn FrameHandle| {})),
            Err(SourceError::AlreadySubscribed)
        ));
    }

    #[test]
    fn test_ramp_spans_full_range() {
        let g = StreamGeometry::new(5, 2).unwrap();
        let mut samples = Vec::new();
        Pattern::Ramp.fill(g, 0, &mut samples);
        assert_eq!(samples.len(), 10);
        assert_eq!(samples[0], 0);
        assert_eq!(samples[4], u16::MAX);
        assert_eq!(samples[5], 0);
    }
}
