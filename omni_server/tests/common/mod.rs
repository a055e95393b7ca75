//! Scripted cameras and detectors for pipeline tests.
#![allow(dead_code)]

use std::{
    collections::VecDeque,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    thread,
    time::Duration,
};

use anyhow::{anyhow, Result};
use cam_source::{CameraError, Frame, FrameSource};
use image::{Rgb, RgbImage};
use omni_server::{
    capture::Pipeline,
    controller::{Controller, SourceFactory},
    nn::{Detection, InferModel},
    store::{FrameStore, PublishedFrame},
};

pub const FRAME_SIZE: (u32, u32) = (32, 24);
pub const FRAME_COLOR: Rgb<u8> = Rgb([10, 20, 30]);
pub const BOX_COLOR: Rgb<u8> = Rgb([0, 255, 0]);

/// What a scripted camera does on a read.
#[derive(Clone, Copy, Debug)]
pub enum Step {
    Frame,
    Fail,
    /// Crash the capture thread, like a misbehaving driver binding would.
    Panic,
}

/// Counts what happens to the cameras of one factory.
#[derive(Debug, Default)]
pub struct SourceProbe {
    pub open_now: AtomicUsize,
    pub max_open: AtomicUsize,
    pub opened_total: AtomicUsize,
    pub reads: AtomicUsize,
}

impl SourceProbe {
    pub fn open_now(&self) -> usize {
        self.open_now.load(Ordering::SeqCst)
    }

    pub fn max_open(&self) -> usize {
        self.max_open.load(Ordering::SeqCst)
    }

    pub fn opened_total(&self) -> usize {
        self.opened_total.load(Ordering::SeqCst)
    }

    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }
}

/// Camera playing back a script of reads, then delivering frames forever.
pub struct ScriptedSource {
    probe: Arc<SourceProbe>,
    script: VecDeque<Step>,
    fail_open: bool,
    open: bool,
}

impl FrameSource for ScriptedSource {
    fn open(&mut self) -> Result<(), CameraError> {
        if self.fail_open {
            return Err(CameraError::DeviceUnavailable {
                device: "scripted".into(),
                reason: "device busy".into(),
            });
        }
        // Simulate a slow device
        thread::sleep(Duration::from_millis(5));
        self.open = true;
        let now = self.probe.open_now.fetch_add(1, Ordering::SeqCst) + 1;
        self.probe.max_open.fetch_max(now, Ordering::SeqCst);
        self.probe.opened_total.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn read(&mut self) -> Result<Frame, CameraError> {
        if !self.open {
            return Err(CameraError::Capture("camera not open".into()));
        }
        self.probe.reads.fetch_add(1, Ordering::SeqCst);
        thread::sleep(Duration::from_millis(2));
        match self.script.pop_front() {
            Some(Step::Fail) => Err(CameraError::CaptureTimeout),
            Some(Step::Panic) => panic!("camera driver crashed"),
            _ => Ok(RgbImage::from_pixel(FRAME_SIZE.0, FRAME_SIZE.1, FRAME_COLOR)),
        }
    }

    fn close(&mut self) {
        if self.open {
            self.open = false;
            self.probe.open_now.fetch_sub(1, Ordering::SeqCst);
        }
    }

    fn is_open(&self) -> bool {
        self.open
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

impl Drop for ScriptedSource {
    fn drop(&mut self) {
        self.close();
    }
}

pub fn scripted_factory(probe: Arc<SourceProbe>, script: Vec<Step>) -> SourceFactory {
    Box::new(move || -> Box<dyn FrameSource> {
        Box::new(ScriptedSource {
            probe: Arc::clone(&probe),
            script: script.iter().copied().collect(),
            fail_open: false,
            open: false,
        })
    })
}

pub fn unavailable_factory(probe: Arc<SourceProbe>) -> SourceFactory {
    Box::new(move || -> Box<dyn FrameSource> {
        Box::new(ScriptedSource {
            probe: Arc::clone(&probe),
            script: VecDeque::new(),
            fail_open: true,
            open: false,
        })
    })
}

/// Detector that always fails.
pub struct FailingModel;

impl InferModel for FailingModel {
    fn run(&self, _input: &RgbImage) -> Result<Vec<Detection>> {
        Err(anyhow!("model exploded"))
    }
}

/// Detector that panics.
pub struct PanickingModel;

impl InferModel for PanickingModel {
    fn run(&self, _input: &RgbImage) -> Result<Vec<Detection>> {
        panic!("inference backend crashed")
    }
}

/// Detector finding one person in the middle of every frame.
pub struct CenterBoxModel;

impl InferModel for CenterBoxModel {
    fn run(&self, _input: &RgbImage) -> Result<Vec<Detection>> {
        Ok(vec![Detection {
            bbox: [0.25, 0.25, 0.75, 0.75],
            confidence: 0.9,
            class_id: 0,
            label: "person".into(),
        }])
    }
}

pub fn controller_with(
    factory: SourceFactory,
    model: Option<Arc<dyn InferModel>>,
) -> Arc<Controller> {
    let mut pipeline = Pipeline::new(Arc::new(FrameStore::new()));
    pipeline.model = model;
    Arc::new(Controller::new(factory, pipeline))
}

/// Wait for a frame newer than `seen`, failing the test after two seconds.
pub async fn next_frame(store: &FrameStore, seen: u64) -> PublishedFrame {
    tokio::time::timeout(Duration::from_secs(2), store.wait_newer(seen))
        .await
        .expect("no frame published in time")
        .expect("frame store closed")
}

pub fn is_raw(frame: &RgbImage) -> bool {
    frame.pixels().all(|pixel| *pixel == FRAME_COLOR)
}

/// Poll until the capture loop is no longer reported running.
pub async fn wait_until_stopped(controller: &Controller) {
    tokio::time::timeout(Duration::from_secs(2), async {
        while controller.status().running {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("capture loop still reported running")
}
