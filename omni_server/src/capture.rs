//! Background loop reading the camera, running the detector and publishing frames.
//!
//! The loop runs on a blocking thread. It is independent of any viewer and keeps
//! producing frames until the running flag is cleared.
use std::{
    panic::{catch_unwind, AssertUnwindSafe},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread,
    time::Duration,
};

use cam_source::{Frame, FrameSource};

use crate::{annotate::Annotator, meter::METER, nn::InferModel, store::FrameStore, PipelineError};

const MIN_RETRY_DELAY: Duration = Duration::from_millis(10);
const MAX_RETRY_DELAY: Duration = Duration::from_millis(100);

/// Run state shared between the controller and the capture loop.
#[derive(Debug, Default)]
pub struct RunFlags {
    running: AtomicBool,
    detection: AtomicBool,
}

impl RunFlags {
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn detection_enabled(&self) -> bool {
        self.detection.load(Ordering::Acquire)
    }

    pub(crate) fn set_running(&self, running: bool) {
        self.running.store(running, Ordering::Release);
    }

    pub(crate) fn set_detection(&self, enabled: bool) {
        self.detection.store(enabled, Ordering::Release);
    }
}

/// Clears the run flags when the capture loop ends, also when it panics.
struct ClearOnExit<'a>(&'a RunFlags);

impl Drop for ClearOnExit<'_> {
    fn drop(&mut self) {
        self.0.set_running(false);
        self.0.set_detection(false);
    }
}

/// Everything a capture loop needs besides its frame source.
#[derive(Clone)]
pub struct Pipeline {
    pub store: Arc<FrameStore>,
    pub model: Option<Arc<dyn InferModel>>,
    pub annotator: Arc<Annotator>,
    /// Frames are resized to this size before detection and publishing.
    pub work_size: Option<(u32, u32)>,
}

impl Pipeline {
    pub fn new(store: Arc<FrameStore>) -> Self {
        Self {
            store,
            model: None,
            annotator: Arc::new(Annotator::default()),
            work_size: None,
        }
    }

    /// Run the detector on a frame and draw its results.
    ///
    /// On failure the frame is handed back untouched together with the error.
    pub fn annotate(&self, mut frame: Frame) -> (Frame, Option<PipelineError>) {
        let Some(model) = &self.model else {
            return (frame, None);
        };

        let result = catch_unwind(AssertUnwindSafe(|| model.run(&frame)))
            .unwrap_or_else(|_| Err(anyhow::anyhow!("detector panicked")));

        match result {
            Ok(detections) => {
                METER.tick_infered();
                log::debug!("Detected {} objects", detections.len());
                self.annotator.draw(&mut frame, &detections);
                (frame, None)
            }
            Err(err) => (frame, Some(PipelineError::Inference(err))),
        }
    }

    fn prepare(&self, frame: Frame) -> Frame {
        match self.work_size {
            Some((width, height)) if frame.dimensions() != (width, height) => {
                image::imageops::resize(
                    &frame,
                    width,
                    height,
                    image::imageops::FilterType::Triangle,
                )
            }
            _ => frame,
        }
    }
}

/// Capped exponential delay between failed reads.
#[derive(Debug)]
struct Backoff {
    failures: u32,
}

impl Backoff {
    fn new() -> Self {
        Self { failures: 0 }
    }

    fn next_delay(&mut self) -> Duration {
        let delay = MIN_RETRY_DELAY
            .saturating_mul(1 << self.failures.min(8))
            .min(MAX_RETRY_DELAY);
        self.failures = self.failures.saturating_add(1);
        delay
    }

    fn reset(&mut self) {
        self.failures = 0;
    }
}

/// Capture frames until `flags` says to stop. Closes the source on exit.
///
/// Per-frame errors never end the loop: capture errors are retried with a
/// backoff, detector errors publish the raw frame. However the loop ends, the
/// flags are cleared afterwards.
pub fn run_capture_loop(source: Box<dyn FrameSource>, pipeline: Pipeline, flags: Arc<RunFlags>) {
    let _clear_flags = ClearOnExit(&flags);
    // Dropped before the guard, so the camera is released once flags read stopped
    let mut source = source;
    log::info!("Capture loop started on {}", source.name());
    let mut backoff = Backoff::new();
    let mut warned_no_model = false;

    while flags.is_running() {
        let frame = match source.read() {
            Ok(frame) => {
                backoff.reset();
                frame
            }
            Err(err) => {
                let delay = backoff.next_delay();
                if backoff.failures == 1 {
                    log::warn!("Failed to capture frame ({err}), retrying...");
                } else {
                    log::debug!("Capture still failing ({err}), retrying in {delay:?}");
                }
                thread::sleep(delay);
                continue;
            }
        };
        METER.tick_captured();

        let frame = pipeline.prepare(frame);

        let frame = if flags.detection_enabled() {
            if pipeline.model.is_none() && !warned_no_model {
                log::warn!("Detection enabled but no model loaded, streaming raw frames");
                warned_no_model = true;
            }
            let (frame, err) = pipeline.annotate(frame);
            if let Some(err) = err {
                log::warn!("{err}, publishing raw frame");
            }
            frame
        } else {
            frame
        };

        pipeline.store.publish(frame);
    }

    source.close();
    log::info!("Capture loop on {} stopped, camera released", source.name());
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn backoff_is_capped() {
        let mut backoff = Backoff::new();
        assert_eq!(backoff.next_delay(), Duration::from_millis(10));
        assert_eq!(backoff.next_delay(), Duration::from_millis(20));
        assert_eq!(backoff.next_delay(), Duration::from_millis(40));
        assert_eq!(backoff.next_delay(), Duration::from_millis(80));
        for _ in 0..40 {
            assert_eq!(backoff.next_delay(), MAX_RETRY_DELAY);
        }

        backoff.reset();
        assert_eq!(backoff.next_delay(), MIN_RETRY_DELAY);
    }

    #[test]
    fn flags_start_cleared() {
        let flags = RunFlags::default();
        assert!(!flags.is_running());
        assert!(!flags.detection_enabled());

        flags.set_running(true);
        flags.set_detection(true);
        assert!(flags.is_running());
        assert!(flags.detection_enabled());
    }

    #[test]
    fn flags_are_cleared_after_panic() {
        let flags = RunFlags::default();
        flags.set_running(true);
        flags.set_detection(true);

        let result = catch_unwind(AssertUnwindSafe(|| {
            let _clear_flags = ClearOnExit(&flags);
            panic!("capture failed hard");
        }));
        assert!(result.is_err());
        assert!(!flags.is_running());
        assert!(!flags.detection_enabled());
    }

    #[test]
    fn work_size_resizes_frames() {
        let mut pipeline = Pipeline::new(Arc::new(FrameStore::new()));
        pipeline.work_size = Some((64, 48));
        let frame = pipeline.prepare(Frame::new(128, 96));
        assert_eq!(frame.dimensions(), (64, 48));
    }

    #[test]
    fn annotate_without_model_is_passthrough() {
        let pipeline = Pipeline::new(Arc::new(FrameStore::new()));
        let (frame, err) = pipeline.annotate(Frame::new(8, 8));
        assert!(err.is_none());
        assert_eq!(frame.dimensions(), (8, 8));
    }
}
