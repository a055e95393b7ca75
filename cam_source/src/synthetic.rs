//! Synthetic source for `stub://` devices.
//!
//! Produces a moving test pattern so the server can be run and tested without
//! a camera attached.
use std::{thread, time::Duration};

use image::{Rgb, RgbImage};

use crate::{CameraConfig, CameraError, Frame, FrameSource};

const DEFAULT_RESOLUTION: (u32, u32) = (640, 480);
const DEFAULT_INTERVAL: (u32, u32) = (1, 30);
const BAR_WIDTH: u32 = 32;

pub struct SyntheticCamera {
    config: CameraConfig,
    open: bool,
    frame_count: u64,
}

impl SyntheticCamera {
    pub fn new(config: CameraConfig) -> Self {
        Self {
            config,
            open: false,
            frame_count: 0,
        }
    }

    fn frame_interval(&self) -> Duration {
        let (numerator, denominator) = self.config.frame_rate.unwrap_or(DEFAULT_INTERVAL);
        if denominator == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(numerator as f64 / denominator as f64)
    }

    /// Gradient background with a bright bar sweeping from left to right.
    fn render(&self) -> Frame {
        let (width, height) = self.config.resolution.unwrap_or(DEFAULT_RESOLUTION);
        let offset = ((self.frame_count * 4) % width.max(1) as u64) as u32;

        RgbImage::from_fn(width, height, |x, y| {
            if x >= offset && x < offset + BAR_WIDTH {
                Rgb([255, 255, 255])
            } else {
                let r = (x * 255 / width.max(1)) as u8;
                let g = (y * 255 / height.max(1)) as u8;
                Rgb([r, g, (self.frame_count % 256) as u8])
            }
        })
    }
}

impl FrameSource for SyntheticCamera {
    fn open(&mut self) -> Result<(), CameraError> {
        log::info!("Connected to {} (synthetic)", &self.config.device);
        self.open = true;
        Ok(())
    }

    fn read(&mut self) -> Result<Frame, CameraError> {
        if !self.open {
            return Err(CameraError::Capture("camera not open".into()));
        }
        thread::sleep(self.frame_interval());
        self.frame_count += 1;
        Ok(self.render())
    }

    fn close(&mut self) {
        if self.open {
            log::info!("Released {} (synthetic)", &self.config.device);
        }
        self.open = false;
    }

    fn is_open(&self) -> bool {
        self.open
    }

    fn name(&self) -> &str {
        &self.config.device
    }
}
