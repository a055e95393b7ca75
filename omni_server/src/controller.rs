//! Start/stop control of the capture loop.
//!
//! All transitions go through one async mutex, so concurrent callers always see
//! either a fully running pipeline with exactly one capture loop or a fully
//! stopped one.
use std::sync::Arc;

use cam_source::FrameSource;
use serde::Serialize;
use tokio::{sync::Mutex, task::JoinHandle};

use crate::{
    capture::{run_capture_loop, Pipeline, RunFlags},
    store::FrameStore,
    PipelineError,
};

/// Creates a fresh, unopened frame source for each start.
pub type SourceFactory = Box<dyn Fn() -> Box<dyn FrameSource> + Send + Sync>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StartOutcome {
    Started,
    AlreadyRunning,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StopOutcome {
    Stopped,
    AlreadyStopped,
}

/// Snapshot of the run state.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct RunState {
    pub running: bool,
    pub detection: bool,
}

pub struct Controller {
    make_source: SourceFactory,
    pipeline: Pipeline,
    flags: Arc<RunFlags>,
    capture_task: Mutex<Option<JoinHandle<()>>>,
    detect_on_start: bool,
}

impl Controller {
    pub fn new(make_source: SourceFactory, pipeline: Pipeline) -> Self {
        Self {
            make_source,
            pipeline,
            flags: Arc::new(RunFlags::default()),
            capture_task: Mutex::new(None),
            detect_on_start: true,
        }
    }

    /// Whether `start` enables detection right away, on by default.
    pub fn detect_on_start(mut self, enabled: bool) -> Self {
        self.detect_on_start = enabled;
        self
    }

    pub fn store(&self) -> &Arc<FrameStore> {
        &self.pipeline.store
    }

    pub fn status(&self) -> RunState {
        let running = self.flags.is_running();
        RunState {
            running,
            // A toggle racing with a dying loop may leave the flag set
            detection: running && self.flags.detection_enabled(),
        }
    }

    /// Open the camera and spawn the capture loop.
    ///
    /// Fails with [`PipelineError::DeviceUnavailable`] if the camera can't be claimed,
    /// in which case nothing keeps running.
    pub async fn start(&self) -> Result<StartOutcome, PipelineError> {
        let mut capture_task = self.capture_task.lock().await;

        if let Some(handle) = capture_task.as_ref() {
            if !handle.is_finished() {
                log::info!("Detection already running");
                return Ok(StartOutcome::AlreadyRunning);
            }
            // The loop died on its own, clean up before starting over
            if let Some(handle) = capture_task.take() {
                if let Err(err) = handle.await {
                    log::error!("Capture loop ended unexpectedly: {err}");
                }
            }
            self.flags.set_running(false);
            self.flags.set_detection(false);
        }

        let mut source = (self.make_source)();
        log::info!("Opening camera {}", source.name());
        let source = tokio::task::spawn_blocking(move || source.open().map(|_| source)).await??;

        self.flags.set_detection(self.detect_on_start);
        self.flags.set_running(true);

        let pipeline = self.pipeline.clone();
        let flags = Arc::clone(&self.flags);
        *capture_task = Some(tokio::task::spawn_blocking(move || {
            run_capture_loop(source, pipeline, flags)
        }));

        log::info!("Detection started");
        Ok(StartOutcome::Started)
    }

    /// Stop the capture loop and wait until it released the camera.
    pub async fn stop(&self) -> StopOutcome {
        let mut capture_task = self.capture_task.lock().await;

        self.flags.set_running(false);
        self.flags.set_detection(false);

        match capture_task.take() {
            None => {
                log::debug!("Detection not running, nothing to stop");
                StopOutcome::AlreadyStopped
            }
            Some(handle) => {
                if let Err(err) = handle.await {
                    log::error!("Capture loop ended unexpectedly: {err}");
                }
                log::info!("Detection stopped");
                StopOutcome::Stopped
            }
        }
    }

    /// Stop capturing for good and end all viewer streams.
    ///
    /// Used on process shutdown, so that draining HTTP connections finish.
    pub async fn shutdown(&self) {
        self.stop().await;
        self.store().close();
    }

    /// Toggle the detection overlay of a running capture loop.
    ///
    /// Has no effect while stopped, `start` decides the initial setting.
    pub async fn set_detection(&self, enabled: bool) -> RunState {
        let _capture_task = self.capture_task.lock().await;
        if self.flags.is_running() {
            self.flags.set_detection(enabled);
            log::info!(
                "Detection overlay {}",
                if enabled { "enabled" } else { "disabled" }
            );
        }
        self.status()
    }
}
