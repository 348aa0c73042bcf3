//! Wires a frame source to a pump and a presentation sink.

use crate::normalizer::IntensityNormalizer;
use crate::pump::{FramePump, PumpError, PumpPhase, PumpStats};
use crate::sink::PresentationSink;
use crate::source::{FrameHandle, FrameSource, SourceError, Subscription};
use crate::types::StreamGeometry;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("source error: {0}")]
    Source(#[from] SourceError),
    #[error("pump error: {0}")]
    Pump(#[from] PumpError),
}

/// A live stream: the source's delivery worker feeding a shared pump.
pub struct Session<S: PresentationSink> {
    pump: Arc<Mutex<FramePump<S>>>,
    subscription: Option<Subscription>,
    geometry: StreamGeometry,
}

impl<S> Session<S>
where
    S: PresentationSink + Send + 'static,
    S::Surface: Send,
{
    /// Open the source's stream, open the pump at the negotiated geometry
    /// and subscribe the pump to frame-ready notifications.
    pub fn start<Src>(
        source: &mut Src,
        desired: Option<StreamGeometry>,
        normalizer: IntensityNormalizer,
        sink: S,
    ) -> Result<Self, SessionError>
    where
        Src: FrameSource + ?Sized,
    {
        let mut pump = FramePump::new(normalizer, sink);
        let geometry = source.open_stream(desired).map_err(|e| {
            tracing::warn!(error = %e, "infrared stream failed to open");
            e
        })?;
        pump.open_stream(geometry)?;

        let pump = Arc::new(Mutex::new(pump));
        let handler_pump = Arc::clone(&pump);
        let subscription = source.subscribe(Box::new(move |handle: &mut dyn FrameHandle| {
            lock(&handler_pump).on_frame_ready(handle);
        }))?;

        Ok(Self {
            pump,
            subscription: Some(subscription),
            geometry,
        })
    }
}

impl<S: PresentationSink> Session<S> {
    pub fn geometry(&self) -> StreamGeometry {
        self.geometry
    }

    pub fn stats(&self) -> PumpStats {
        lock(&self.pump).stats()
    }

    pub fn phase(&self) -> PumpPhase {
        lock(&self.pump).phase()
    }

    /// True once a bounded source has delivered its last frame.
    pub fn is_finished(&self) -> bool {
        self.subscription
            .as_ref()
            .map_or(true, Subscription::is_finished)
    }

    /// Stop delivery, then tear the pump down.
    ///
    /// Cancelling joins the delivery worker, so a notification in flight
    /// completes against live buffers before they are released.
    pub fn close(mut self) -> PumpStats {
        self.shutdown();
        self.stats()
    }

    fn shutdown(&mut self) {
        if let Some(subscription) = self.subscription.take() {
            subscription.cancel();
        }
        lock(&self.pump).close();
    }
}

impl<S: PresentationSink> Drop for Session<S> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalizer::NormalizerConfig;
    use crate::sink::MemorySink;
    use crate::source::FrameReadyCallback;
    use crate::synthetic::{Pattern, SyntheticSource};
    use std::time::Duration;

    fn normalizer() -> IntensityNormalizer {
        IntensityNormalizer::new(NormalizerConfig::default()).unwrap()
    }

    fn wait_finished<S: PresentationSink>(session: &Session<S>) {
        for _ in 0..2000 {
            if session.is_finished() {
                return;
            }
            std::thread::sleep(Duration::from_millis(1));
        }
        panic!("source did not finish");
    }

    struct AbsentSensor;

    impl FrameSource for AbsentSensor {
        fn open_stream(
            &mut self,
            _desired: Option<StreamGeometry>,
        ) -> Result<StreamGeometry, SourceError> {
            Err(SourceError::DeviceNotFound("no sensor attached".into()))
        }

        fn subscribe(&mut self, _cb: FrameReadyCallback) -> Result<Subscription, SourceError> {
            Err(SourceError::NotOpen)
        }
    }

    #[test]
    fn test_bounded_stream_presents_every_frame() {
        let g = StreamGeometry::new(512, 424).unwrap();
        let mut source = SyntheticSource::new(Pattern::Constant(5000))
            .with_frame_limit(3)
            .with_interval(Duration::ZERO);
        let sink = MemorySink::new();

        let session = Session::start(&mut source, Some(g), normalizer(), sink.clone()).unwrap();
        assert_eq!(session.geometry(), g);
        wait_finished(&session);

        let stats = session.close();
        assert_eq!(stats.presented, 3);
        assert_eq!(stats.dropped(), 0);

        let display = sink.snapshot();
        assert_eq!(display.presents, 3);
        assert_eq!(display.front.len(), 4 * 512 * 424);
        assert!(display.front.chunks_exact(4).all(|px| px == [81, 81, 81, 255]));
    }

    #[test]
    fn test_open_failure_is_reported() {
        let result = Session::start(&mut AbsentSensor, None, normalizer(), MemorySink::new());
        assert!(matches!(
            result,
            Err(SessionError::Source(SourceError::DeviceNotFound(_)))
        ));
    }

    #[test]
    fn test_close_while_streaming() {
        let g = StreamGeometry::new(32, 8).unwrap();
        let mut source =
            SyntheticSource::new(Pattern::Ramp).with_interval(Duration::from_millis(1));
        let sink = MemorySink::new();

        let session = Session::start(&mut source, Some(g), normalizer(), sink.clone()).unwrap();
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(session.phase(), PumpPhase::Streaming);

        let stats = session.close();
        let presents = sink.snapshot().presents;
        assert_eq!(stats.presented, presents);

        std::thread::sleep(Duration::from_millis(10));
        assert_eq!(sink.snapshot().presents, presents);
    }
}
