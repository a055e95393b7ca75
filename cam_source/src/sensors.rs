//! Sensors module.
//!
use crate::{CameraConfig, CameraError, Frame, FrameSource};

#[cfg(feature = "v4l")]
pub use self::v4l::{log_supported_formats, V4lCamera};

#[cfg(feature = "v4l")]
mod v4l {
    use std::io;

    use image::ImageFormat;
    use rscam::{Camera, Config};

    use super::*;

    /// The only pixel format frames can be decoded from.
    const DECODED_FORMAT: &str = "MJPG";

    /// Video4Linux camera streaming MJPG frames, decoded to RGB.
    pub struct V4lCamera {
        config: CameraConfig,
        cam: Option<Camera>,
    }

    impl V4lCamera {
        /// Create a new instance. The device is claimed on `open`.
        pub fn new(config: CameraConfig) -> Self {
            Self { config, cam: None }
        }

        fn unavailable(&self, reason: impl ToString) -> CameraError {
            CameraError::DeviceUnavailable {
                device: self.config.device.clone(),
                reason: reason.to_string(),
            }
        }
    }

    impl FrameSource for V4lCamera {
        fn open(&mut self) -> Result<(), CameraError> {
            if self.cam.is_some() {
                return Ok(());
            }
            // Frames are decoded as JPEG, other formats would fail on every read
            if !self.config.format.eq_ignore_ascii_case(DECODED_FORMAT) {
                return Err(self.unavailable(format!(
                    "unsupported pixel format {}, only {DECODED_FORMAT} can be decoded",
                    self.config.format
                )));
            }

            let mut cam = Camera::new(&self.config.device).map_err(|err| self.unavailable(err))?;
            log_supported_formats(&cam, &self.config.format);
            let format = self.config.format.as_bytes();

            let resolution = match self.config.resolution {
                Some(resolution) => resolution,
                None => get_max_resolution(&cam, format)?,
            };
            let frame_rate = match self.config.frame_rate {
                Some(frame_rate) => frame_rate,
                None => get_max_frame_rate(&cam, format, resolution)?,
            };

            cam.start(&Config {
                interval: frame_rate,
                resolution,
                format,
                ..Default::default()
            })
            .map_err(|err| self.unavailable(err))?;

            log::info!(
                "Using camera {} at {}x{}, interval {}/{}s",
                &self.config.device,
                resolution.0,
                resolution.1,
                frame_rate.0,
                frame_rate.1
            );
            self.cam = Some(cam);
            Ok(())
        }

        fn read(&mut self) -> Result<Frame, CameraError> {
            let cam = self
                .cam
                .as_ref()
                .ok_or_else(|| CameraError::Capture("camera not open".into()))?;

            let raw = cam.capture().map_err(|err| match err.kind() {
                io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => CameraError::CaptureTimeout,
                _ => CameraError::Capture(err.to_string()),
            })?;

            // Webcams regularly hand out truncated MJPG frames, skip those
            let image = image::load_from_memory_with_format(&raw[..], ImageFormat::Jpeg)
                .map_err(|err| CameraError::Capture(format!("undecodable frame: {err}")))?;

            Ok(image.to_rgb8())
        }

        fn close(&mut self) {
            if let Some(mut cam) = self.cam.take() {
                if let Err(err) = cam.stop() {
                    log::debug!("Stopping stream of {} failed: {err}", &self.config.device);
                }
                log::info!("Released camera {}", &self.config.device);
            }
        }

        fn is_open(&self) -> bool {
            self.cam.is_some()
        }

        fn name(&self) -> &str {
            &self.config.device
        }
    }

    impl Drop for V4lCamera {
        fn drop(&mut self) {
            self.close();
        }
    }

    /// Get the maximum supported resolution for the given format.
    pub(crate) fn get_max_resolution(cam: &Camera, format: &[u8]) -> Result<(u32, u32), CameraError> {
        let resolution_info = cam
            .resolutions(format)
            .map_err(|_| CameraError::NoResolution)?;
        log::debug!("Found resolutions: {:?}", &resolution_info);
        match resolution_info {
            rscam::ResolutionInfo::Discretes(resolutions) => resolutions
                .into_iter()
                // Highest resolution in terms of number of pixels
                .max_by_key(|(width, height)| width * height),
            rscam::ResolutionInfo::Stepwise { max, .. } => Some(max),
        }
        .ok_or(CameraError::NoResolution)
    }

    /// Get the fastest frame interval for the given format and resolution.
    pub(crate) fn get_max_frame_rate(
        cam: &Camera,
        format: &[u8],
        resolution: (u32, u32),
    ) -> Result<(u32, u32), CameraError> {
        let interval_info = cam
            .intervals(format, resolution)
            .map_err(|_| CameraError::NoFrameRate)?;
        log::debug!("Found frame rates: {:?}", &interval_info);
        match interval_info {
            rscam::IntervalInfo::Discretes(intervals) => intervals
                .into_iter()
                .filter(|(numerator, _)| *numerator > 0)
                // Interval is numerator/denominator seconds, so the rate is the inverse
                .max_by(|a, b| {
                    let rate_a = a.1 as f32 / a.0 as f32;
                    let rate_b = b.1 as f32 / b.0 as f32;
                    rate_a.total_cmp(&rate_b)
                }),
            // Stepwise intervals list the shortest interval as `min`
            rscam::IntervalInfo::Stepwise { min, .. } => Some(min),
        }
        .ok_or(CameraError::NoFrameRate)
    }

    pub fn log_supported_formats(cam: &Camera, format: &str) {
        let formats: Vec<_> = cam.formats().filter_map(|fmt| fmt.ok()).collect();
        log::debug!(
            "Supported formats: {:?}, using format {:?}",
            formats,
            format
        );
    }

    /// Print what a device supports, used by the probe binary.
    pub fn describe_device(device: &str, format: &str) -> Result<String, CameraError> {
        let cam = Camera::new(device).map_err(|err| CameraError::DeviceUnavailable {
            device: device.to_owned(),
            reason: err.to_string(),
        })?;
        let formats: Vec<_> = cam.formats().filter_map(|fmt| fmt.ok()).collect();
        let resolutions = cam
            .resolutions(format.as_bytes())
            .map_err(|_| CameraError::NoResolution)?;
        let max_resolution = get_max_resolution(&cam, format.as_bytes())?;
        let intervals = cam
            .intervals(format.as_bytes(), max_resolution)
            .map_err(|_| CameraError::NoFrameRate)?;

        Ok(format!(
            "Supported formats: {formats:?}\nSupported resolutions: {resolutions:?}\nFrame intervals at {}x{}: {intervals:?}",
            max_resolution.0, max_resolution.1
        ))
    }
}

#[cfg(feature = "v4l")]
pub use self::v4l::describe_device;

/// Stand-in for real devices when built without V4L support.
#[cfg(not(feature = "v4l"))]
pub struct UnsupportedCamera {
    config: CameraConfig,
}

#[cfg(not(feature = "v4l"))]
impl UnsupportedCamera {
    pub fn new(config: CameraConfig) -> Self {
        Self { config }
    }
}

#[cfg(not(feature = "v4l"))]
impl FrameSource for UnsupportedCamera {
    fn open(&mut self) -> Result<(), CameraError> {
        Err(CameraError::DeviceUnavailable {
            device: self.config.device.clone(),
            reason: "built without v4l support".into(),
        })
    }

    fn read(&mut self) -> Result<Frame, CameraError> {
        Err(CameraError::Capture("camera not open".into()))
    }

    fn close(&mut self) {}

    fn is_open(&self) -> bool {
        false
    }

    fn name(&self) -> &str {
        &self.config.device
    }
}

#[cfg(not(feature = "v4l"))]
pub fn describe_device(device: &str, _format: &str) -> Result<String, CameraError> {
    Err(CameraError::DeviceUnavailable {
        device: device.to_owned(),
        reason: "built without v4l support".into(),
    })
}
