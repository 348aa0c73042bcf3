//! Frame Pump: validates each delivered frame against the stream geometry,
//! normalizes it and hands the pixels to the presentation surface.

use crate::normalizer::IntensityNormalizer;
use crate::sink::{PresentationSink, SinkError, Surface};
use crate::source::FrameHandle;
use crate::types::{PixelBuffer, RawFrame, StreamGeometry};
use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PumpError {
    #[error("stream already open at {0}")]
    AlreadyStreaming(StreamGeometry),
    #[error("pump is closed")]
    Closed,
    #[error("sink error: {0}")]
    Sink(#[from] SinkError),
}

/// Lifecycle phase of a pump.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PumpPhase {
    AwaitingGeometry,
    Streaming,
    Closed,
}

/// What happened to one frame-ready notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    Presented,
    /// The handle had no frame to acquire.
    NoFrame,
    /// Frame dropped: its geometry does not match the bound buffers.
    GeometryMismatch {
        expected: StreamGeometry,
        actual: StreamGeometry,
    },
    /// The surface refused the pixels.
    SinkFailed,
    /// The pump is not streaming; the notification was ignored.
    NotStreaming,
}

/// Running counters for diagnostics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PumpStats {
    pub presented: u64,
    pub no_frame: u64,
    pub geometry_mismatch: u64,
    pub sink_failed: u64,
    pub ignored: u64,
}

impl PumpStats {
    fn record(&mut self, outcome: &FrameOutcome) {
        match outcome {
            FrameOutcome::Presented => self.presented += 1,
            FrameOutcome::NoFrame => self.no_frame += 1,
            FrameOutcome::GeometryMismatch { .. } => self.geometry_mismatch += 1,
            FrameOutcome::SinkFailed => self.sink_failed += 1,
            FrameOutcome::NotStreaming => self.ignored += 1,
        }
    }

    /// Notifications that did not end in a presented frame.
    pub fn dropped(&self) -> u64 {
        self.no_frame + self.geometry_mismatch + self.sink_failed + self.ignored
    }
}

/// Buffers and surface that exist only while streaming.
struct Stream<T> {
    geometry: StreamGeometry,
    raw: RawFrame,
    pixels: PixelBuffer,
    surface: T,
}

enum State<T> {
    AwaitingGeometry,
    Streaming(Stream<T>),
    Closed,
}

pub struct FramePump<S: PresentationSink> {
    normalizer: IntensityNormalizer,
    sink: S,
    state: State<S::Surface>,
    stats: PumpStats,
}

impl<S: PresentationSink> FramePump<S> {
    pub fn new(normalizer: IntensityNormalizer, sink: S) -> Self {
        Self {
            normalizer,
            sink,
            state: State::AwaitingGeometry,
            stats: PumpStats::default(),
        }
    }

    pub fn phase(&self) -> PumpPhase {
        match self.state {
            State::AwaitingGeometry => PumpPhase::AwaitingGeometry,
            State::Streaming(_) => PumpPhase::Streaming,
            State::Closed => PumpPhase::Closed,
        }
    }

    pub fn stats(&self) -> PumpStats {
        self.stats
    }

    pub fn geometry(&self) -> Option<StreamGeometry> {
        match &self.state {
            State::Streaming(stream) => Some(stream.geometry),
            _ => None,
        }
    }

    /// The display buffer, while streaming.
    pub fn pixels(&self) -> Option<&PixelBuffer> {
        match &self.state {
            State::Streaming(stream) => Some(&stream.pixels),
            _ => None,
        }
    }

    /// Bind the surface and allocate the per-stream buffers.
    ///
    /// Only valid once, from `AwaitingGeometry`. If binding fails the pump
    /// keeps waiting for geometry.
    pub fn open_stream(&mut self, geometry: StreamGeometry) -> Result<(), PumpError> {
        match &self.state {
            State::AwaitingGeometry => {}
            State::Streaming(stream) => return Err(PumpError::AlreadyStreaming(stream.geometry)),
            State::Closed => return Err(PumpError::Closed),
        }

        let surface = self
            .sink
            .bind_surface(geometry.width(), geometry.height())?;
        self.state = State::Streaming(Stream {
            geometry,
            raw: RawFrame::new(geometry),
            pixels: PixelBuffer::new(geometry),
            surface,
        });
        tracing::info!(%geometry, "infrared stream open");
        Ok(())
    }

    /// Handle one frame-ready notification.
    pub fn on_frame_ready(&mut self, handle: &mut dyn FrameHandle) -> FrameOutcome {
        let outcome = self.process(handle);
        self.stats.record(&outcome);
        outcome
    }

    fn process(&mut self, handle: &mut dyn FrameHandle) -> FrameOutcome {
        let State::Streaming(stream) = &mut self.state else {
            return FrameOutcome::NotStreaming;
        };

        // The guard lives only for this block: the frame is released right
        // after the copy, on every path.
        {
            let Some(frame) = handle.try_acquire() else {
                return FrameOutcome::NoFrame;
            };

            let actual = frame.geometry();
            let surface_dims = stream.surface.dimensions();
            if actual.pixel_count() != stream.raw.len()
                || (actual.width(), actual.height()) != surface_dims
            {
                tracing::debug!(
                    expected = %stream.geometry,
                    actual = %actual,
                    "dropping frame with mismatched geometry"
                );
                return FrameOutcome::GeometryMismatch {
                    expected: stream.geometry,
                    actual,
                };
            }

            if let Err(e) = frame.copy_into(stream.raw.samples_mut()) {
                tracing::debug!(error = %e, "dropping frame with unreadable samples");
                return FrameOutcome::GeometryMismatch {
                    expected: stream.geometry,
                    actual,
                };
            }
        }

        if let Err(e) = self.normalizer.normalize_into(&stream.raw, &mut stream.pixels) {
            tracing::warn!(error = %e, "normalization rejected frame buffers");
            return FrameOutcome::GeometryMismatch {
                expected: stream.geometry,
                actual: stream.raw.geometry(),
            };
        }

        let shown = stream
            .surface
            .write_pixels(stream.pixels.as_bytes())
            .and_then(|()| stream.surface.present());
        match shown {
            Ok(()) => FrameOutcome::Presented,
            Err(e) => {
                tracing::warn!(error = %e, "surface rejected frame");
                FrameOutcome::SinkFailed
            }
        }
    }

    /// Tear down the surface and buffers. Terminal; calling it again is a
    /// no-op.
    pub fn close(&mut self) {
        if let State::Streaming(stream) = std::mem::replace(&mut self.state, State::Closed) {
            tracing::info!(
                geometry = %stream.geometry,
                presented = self.stats.presented,
                dropped = self.stats.dropped(),
                "infrared stream closed"
            );
        }
    }
}
