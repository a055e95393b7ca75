use std::{
    sync::atomic::{AtomicU64, Ordering},
    time::{Duration, Instant},
};

use tokio::{task::JoinHandle, time::interval};

pub static METER: Meter = Meter::new();

#[derive(Default)]
pub struct Meter {
    captured_frames: AtomicU64,
    infered_frames: AtomicU64,
    streamed_frames: AtomicU64,
}

impl Meter {
    pub const fn new() -> Meter {
        Meter {
            captured_frames: AtomicU64::new(0),
            infered_frames: AtomicU64::new(0),
            streamed_frames: AtomicU64::new(0),
        }
    }

    pub fn tick_captured(&self) {
        self.captured_frames.fetch_add(1, Ordering::Relaxed);
    }

    pub fn tick_infered(&self) {
        self.infered_frames.fetch_add(1, Ordering::Relaxed);
    }

    pub fn tick_streamed(&self) {
        self.streamed_frames.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get_reset_captured(&self) -> u64 {
        self.captured_frames.swap(0, Ordering::Relaxed)
    }

    pub fn get_reset_infered(&self) -> u64 {
        self.infered_frames.swap(0, Ordering::Relaxed)
    }

    pub fn get_reset_streamed(&self) -> u64 {
        self.streamed_frames.swap(0, Ordering::Relaxed)
    }
}

pub fn spawn_meter_logger() -> JoinHandle<()> {
    tokio::spawn(async {
        let mut log_interval = interval(Duration::from_secs(2));
        log_interval.tick().await;

        loop {
            let start = Instant::now();
            log_interval.tick().await;

            let elapsed = start.elapsed().as_secs_f32();
            let captured_frames = METER.get_reset_captured();
            let infered_frames = METER.get_reset_infered();
            let streamed_frames = METER.get_reset_streamed();

            if captured_frames > 0 {
                log::info!(
                    "Captured frames per second: {:.2}",
                    captured_frames as f32 / elapsed
                )
            }
            if infered_frames > 0 {
                log::info!(
                    "Infered frames per second: {:.2}",
                    infered_frames as f32 / elapsed
                )
            }
            if streamed_frames > 0 {
                log::info!(
                    "Streamed frames per second (all viewers): {:.2}",
                    streamed_frames as f32 / elapsed
                )
            }
        }
    })
}
