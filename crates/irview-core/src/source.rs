//! Frame Source interface: stream open, frame-ready subscription and
//! scoped frame acquisition.

use crate::types::{FrameError, StreamGeometry};
use std::ops::Deref;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SourceError {
    #[error("sensor not found: {0}")]
    DeviceNotFound(String),
    #[error("stream open failed: {0}")]
    StreamOpen(String),
    #[error("stream is not open")]
    NotOpen,
    #[error("stream already has a subscriber")]
    AlreadySubscribed,
    #[error("failed to spawn delivery thread: {0}")]
    Spawn(#[source] std::io::Error),
    #[error(transparent)]
    Backend(Box<dyn std::error::Error + Send + Sync>),
}

/// A readable frame owned by the source for the duration of delivery.
pub trait RawFrameView {
    fn geometry(&self) -> StreamGeometry;

    /// Copy the frame's samples into `dst`, which must hold exactly
    /// `geometry().pixel_count()` samples.
    fn copy_into(&self, dst: &mut [u16]) -> Result<(), FrameError>;

    /// Give the underlying frame back to the source. Called exactly once,
    /// by [`FrameGuard`]'s drop.
    fn release(&mut self);
}

/// Scoped acquisition of a frame: the frame is released when the guard
/// goes out of scope, on every path.
pub struct FrameGuard<'a> {
    view: &'a mut (dyn RawFrameView + 'a),
}

impl<'a> FrameGuard<'a> {
    pub fn new(view: &'a mut (dyn RawFrameView + 'a)) -> Self {
        Self { view }
    }
}

impl<'a> Deref for FrameGuard<'a> {
    type Target = dyn RawFrameView + 'a;

    fn deref(&self) -> &Self::Target {
        &*self.view
    }
}

impl Drop for FrameGuard<'_> {
    fn drop(&mut self) {
        self.view.release();
    }
}

/// Per-notification handle passed to the frame-ready callback.
pub trait FrameHandle {
    /// Acquire the frame, or `None` if none is ready or it was already
    /// taken. A frame can be acquired at most once.
    fn try_acquire(&mut self) -> Option<FrameGuard<'_>>;
}

/// Callback registered with [`FrameSource::subscribe`].
pub type FrameReadyCallback = Box<dyn FnMut(&mut dyn FrameHandle) + Send>;

/// Something that delivers infrared frames.
pub trait FrameSource {
    /// Open the infrared stream, returning the geometry every frame will
    /// have. `desired` is a hint; the source decides.
    fn open_stream(&mut self, desired: Option<StreamGeometry>)
        -> Result<StreamGeometry, SourceError>;

    /// Register the frame-ready handler. Invocations never overlap.
    fn subscribe(&mut self, on_frame_ready: FrameReadyCallback) -> Result<Subscription, SourceError>;
}

/// A running delivery worker. Cancelling (or dropping) stops delivery and
/// waits for any in-flight notification to finish.
pub struct Subscription {
    stop: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl Subscription {
    /// Spawn a named delivery thread. `run` should poll the stop flag
    /// between notifications and return once it is set.
    pub fn spawn<F>(name: &str, run: F) -> Result<Self, SourceError>
    where
        F: FnOnce(&AtomicBool) + Send + 'static,
    {
        let stop = Arc::new(AtomicBool::new(false));
        let worker_stop = Arc::clone(&stop);
        let worker = std::thread::Builder::new()
            .name(name.into())
            .spawn(move || run(&worker_stop))
            .map_err(SourceError::Spawn)?;
        Ok(Self {
            stop,
            worker: Some(worker),
        })
    }

    /// True once the worker has returned (a bounded source ran dry, or the
    /// source gave up).
    pub fn is_finished(&self) -> bool {
        self.worker.as_ref().map_or(true, |w| w.is_finished())
    }

    pub fn cancel(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                tracing::warn!("frame delivery thread panicked");
            }
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// A heap-backed frame handle. Used by the synthetic source and tests.
#[derive(Debug, Clone)]
pub struct OwnedFrame {
    data: Option<FrameData>,
    acquired: bool,
}

#[derive(Debug, Clone)]
struct FrameData {
    geometry: StreamGeometry,
    samples: Vec<u16>,
    released: bool,
}

impl OwnedFrame {
    /// A handle carrying `samples`, which should hold `geometry.pixel_count()`
    /// values. The length is checked on copy, like a device buffer would be.
    pub fn new(geometry: StreamGeometry, samples: Vec<u16>) -> Self {
        Self {
            data: Some(FrameData {
                geometry,
                samples,
                released: false,
            }),
            acquired: false,
        }
    }

    /// A frame filled with a single value.
    pub fn filled(geometry: StreamGeometry, value: u16) -> Self {
        Self::new(geometry, vec![value; geometry.pixel_count()])
    }

    /// A notification with no frame behind it.
    pub fn empty() -> Self {
        Self {
            data: None,
            acquired: false,
        }
    }

    pub fn is_acquired(&self) -> bool {
        self.acquired
    }

    pub fn is_released(&self) -> bool {
        self.data.as_ref().map_or(false, |d| d.released)
    }
}

impl RawFrameView for FrameData {
    fn geometry(&self) -> StreamGeometry {
        self.geometry
    }

    fn copy_into(&self, dst: &mut [u16]) -> Result<(), FrameError> {
        if self.samples.len() != dst.len() {
            return Err(FrameError::LengthMismatch {
                expected: dst.len(),
                actual: self.samples.len(),
            });
        }
        dst.copy_from_slice(&self.samples);
        Ok(())
    }

    fn release(&mut self) {
        self.released = true;
        self.samples = Vec::new();
    }
}

impl FrameHandle for OwnedFrame {
    fn try_acquire(&mut self) -> Option<FrameGuard<'_>> {
        if self.acquired {
            return None;
        }
        let data = self.data.as_mut()?;
        self.acquired = true;
        Some(FrameGuard::new(data))
    }
}
