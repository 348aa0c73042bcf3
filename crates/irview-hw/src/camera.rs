//! V4L2 infrared capture via the `v4l` crate.

use crate::frame::Y16Frame;
use irview_core::{FrameReadyCallback, FrameSource, SourceError, StreamGeometry, Subscription};
use std::io;
use std::path::Path;
use std::sync::atomic::Ordering;
use std::time::Duration;
use thiserror::Error;
use v4l::buffer::Type as BufType;
use v4l::io::traits::CaptureStream;
use v4l::prelude::*;
use v4l::video::Capture;
use v4l::FourCC;

/// Resolution requested when the caller has no preference.
pub const DEFAULT_WIDTH: u32 = 512;
pub const DEFAULT_HEIGHT: u32 = 424;

const BUFFER_COUNT: u32 = 4;

/// Capture errors in a row before the worker stops delivering.
const MAX_CONSECUTIVE_FAILURES: u32 = 10;

/// Upper bound on one dequeue wait, so the worker keeps seeing the stop
/// flag when the sensor stalls.
const DEQUEUE_TIMEOUT: Duration = Duration::from_millis(200);

#[derive(Error, Debug)]
pub enum CameraError {
    #[error("device not found: {0}")]
    DeviceNotFound(String),
    #[error("capture failed: {0}")]
    CaptureFailed(String),
    #[error("device busy")]
    DeviceBusy,
    #[error("format negotiation failed: {0}")]
    FormatNegotiationFailed(String),
    #[error("streaming not supported")]
    StreamingNotSupported,
}

impl From<CameraError> for SourceError {
    fn from(e: CameraError) -> Self {
        match e {
            CameraError::DeviceNotFound(path) => SourceError::DeviceNotFound(path),
            other => SourceError::Backend(Box::new(other)),
        }
    }
}

fn y16_fourcc() -> FourCC {
    FourCC::new(b"Y16 ")
}

/// An infrared sensor exposed as a V4L2 capture device emitting Y16.
pub struct InfraredCamera {
    device_path: String,
    /// Present between `open_stream` and `subscribe`; the capture worker
    /// takes ownership of it.
    device: Option<Device>,
    geometry: Option<StreamGeometry>,
}

impl InfraredCamera {
    pub fn new(device_path: impl Into<String>) -> Self {
        Self {
            device_path: device_path.into(),
            device: None,
            geometry: None,
        }
    }

    fn open_device(&self, desired: StreamGeometry) -> Result<(Device, StreamGeometry), CameraError> {
        let device_path = self.device_path.as_str();
        if !Path::new(device_path).exists() {
            return Err(CameraError::DeviceNotFound(device_path.to_string()));
        }

        let device = Device::with_path(device_path).map_err(|e| {
            if e.to_string().contains("busy") || e.to_string().contains("EBUSY") {
                CameraError::DeviceBusy
            } else {
                CameraError::DeviceNotFound(format!("{device_path}: {e}"))
            }
        })?;

        let caps = device.query_caps().map_err(|e| {
            CameraError::CaptureFailed(format!("failed to query capabilities: {e}"))
        })?;

        tracing::info!(
            device = device_path,
            driver = %caps.driver,
            card = %caps.card,
            "opened infrared sensor"
        );

        if !caps
            .capabilities
            .contains(v4l::capability::Flags::VIDEO_CAPTURE)
        {
            return Err(CameraError::StreamingNotSupported);
        }

        let mut fmt = device.format().map_err(|e| {
            CameraError::FormatNegotiationFailed(format!("failed to get format: {e}"))
        })?;
        fmt.fourcc = y16_fourcc();
        fmt.width = desired.width();
        fmt.height = desired.height();

        let negotiated = device.set_format(&fmt).map_err(|e| {
            CameraError::FormatNegotiationFailed(format!("failed to set format: {e}"))
        })?;

        // Some drivers report the fourcc NUL-padded.
        let fourcc = negotiated.fourcc;
        if fourcc != y16_fourcc() && fourcc != FourCC::new(b"Y16\0") {
            return Err(CameraError::FormatNegotiationFailed(format!(
                "unsupported pixel format: {fourcc:?} (need Y16)"
            )));
        }

        let geometry = StreamGeometry::new(negotiated.width, negotiated.height)
            .map_err(|e| CameraError::FormatNegotiationFailed(e.to_string()))?;

        tracing::info!(%geometry, fourcc = ?fourcc, "negotiated infrared format");
        Ok((device, geometry))
    }
}

impl FrameSource for InfraredCamera {
    fn open_stream(
        &mut self,
        desired: Option<StreamGeometry>,
    ) -> Result<StreamGeometry, SourceError> {
        if let Some(geometry) = self.geometry {
            return Err(SourceError::StreamOpen(format!(
                "{} already open at {geometry}",
                self.device_path
            )));
        }
        let desired = match desired {
            Some(g) => g,
            None => StreamGeometry::new(DEFAULT_WIDTH, DEFAULT_HEIGHT)
                .map_err(|e| SourceError::StreamOpen(e.to_string()))?,
        };
        let (device, geometry) = self.open_device(desired)?;
        self.device = Some(device);
        self.geometry = Some(geometry);
        Ok(geometry)
    }

    fn subscribe(
        &mut self,
        mut on_frame_ready: FrameReadyCallback,
    ) -> Result<Subscription, SourceError> {
        let geometry = self.geometry.ok_or(SourceError::NotOpen)?;
        let device = self.device.take().ok_or(SourceError::AlreadySubscribed)?;
        let device_path = self.device_path.clone();

        Subscription::spawn("irview-capture", move |stop| {
            let mut stream =
                match MmapStream::with_buffers(&device, BufType::VideoCapture, BUFFER_COUNT) {
                    Ok(stream) => stream,
                    Err(e) => {
                        tracing::warn!(device = %device_path, error = %e, "failed to create mmap stream");
                        return;
                    }
                };

            stream.set_timeout(DEQUEUE_TIMEOUT);

            let mut failures = FailureCount::default();
            while !stop.load(Ordering::SeqCst) {
                let (buf, meta) = match stream.next() {
                    Ok(next) => next,
                    Err(e) => match failures.record(&e) {
                        DequeueStep::Retry => continue,
                        DequeueStep::GiveUp => {
                            tracing::warn!(device = %device_path, "giving up on infrared capture");
                            break;
                        }
                    },
                };
                failures.reset();

                let used = meta.bytesused as usize;
                let data = if used > 0 && used <= buf.len() {
                    &buf[..used]
                } else {
                    buf
                };
                let mut frame = Y16Frame::new(data, geometry, meta.sequence);
                on_frame_ready(&mut frame);
            }
            tracing::info!(device = %device_path, "capture worker exiting");
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DequeueStep {
    Retry,
    GiveUp,
}

/// Consecutive dequeue failures. Timeouts only mean no frame arrived in
/// time and are not counted.
#[derive(Debug, Default)]
struct FailureCount(u32);

impl FailureCount {
    fn record(&mut self, e: &io::Error) -> DequeueStep {
        if e.kind() == io::ErrorKind::TimedOut {
            tracing::trace!("no infrared frame within dequeue timeout");
            return DequeueStep::Retry;
        }
        self.0 += 1;
        tracing::warn!(error = %e, failures = self.0, "failed to dequeue buffer");
        if self.0 >= MAX_CONSECUTIVE_FAILURES {
            DequeueStep::GiveUp
        } else {
            DequeueStep::Retry
        }
    }

    fn reset(&mut self) {
        self.0 = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_device_reports_not_found() {
        let mut camera = InfraredCamera::new("/dev/irview-missing-sensor");
        let result = camera.open_stream(None);
        assert!(matches!(result, Err(SourceError::DeviceNotFound(_))));
        assert!(matches!(
            camera.subscribe(Box::new(|_: &mut dyn irview_core::FrameHandle| {})),
            Err(SourceError::NotOpen)
        ));
    }

    #[test]
    fn test_camera_errors_map_to_source_errors() {
        let e: SourceError = CameraError::DeviceBusy.into();
        assert!(matches!(e, SourceError::Backend(_)));
        assert_eq!(e.to_string(), "device busy");
    }

    #[test]
    fn test_dequeue_timeouts_never_exhaust_retries() {
        let mut failures = FailureCount::default();
        let timeout = io::Error::new(io::ErrorKind::TimedOut, "VIDIOC_DQBUF");
        for _ in 0..(MAX_CONSECUTIVE_FAILURES * 5) {
            assert_eq!(failures.record(&timeout), DequeueStep::Retry);
        }
    }

    #[test]
    fn test_dequeue_errors_give_up_after_limit() {
        let mut failures = FailureCount::default();
        let error = io::Error::new(io::ErrorKind::Other, "EIO");
        for _ in 1..MAX_CONSECUTIVE_FAILURES {
            assert_eq!(failures.record(&error), DequeueStep::Retry);
        }
        assert_eq!(failures.record(&error), DequeueStep::GiveUp);

        failures.reset();
        assert_eq!(failures.record(&error), DequeueStep::Retry);
    }
}
