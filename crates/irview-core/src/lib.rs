//! irview-core — Infrared frame normalization and the frame pump.
//!
//! Converts raw 16-bit infrared sensor frames into gray BGRA pixel buffers
//! and drives them from a frame source to a presentation surface.

pub mod normalizer;
pub mod pump;
pub mod session;
pub mod sink;
pub mod source;
pub mod synthetic;
pub mod types;

pub use normalizer::{ConfigError, IntensityNormalizer, IntensityRounding, NormalizerConfig};
pub use pump::{FrameOutcome, FramePump, PumpError, PumpPhase, PumpStats};
pub use session::{Session, SessionError};
pub use sink::{MemorySink, PresentationSink, SinkError, Surface};
pub use source::{
    FrameGuard, FrameHandle, FrameReadyCallback, FrameSource, OwnedFrame, RawFrameView,
    SourceError, Subscription,
};
pub use types::{FrameError, PixelBuffer, RawFrame, StreamGeometry};
