//! Camera frame sources for the omni recognition server.
//!
//! A [`FrameSource`] owns one capture device. Constructing it never touches the
//! hardware; [`FrameSource::open`] claims the device and [`FrameSource::close`]
//! releases it again.
pub mod sensors;
pub mod synthetic;

use image::RgbImage;
use thiserror::Error;

/// One decoded camera image.
pub type Frame = RgbImage;

/// Prefix of device paths served by the synthetic test pattern.
pub const STUB_PREFIX: &str = "stub://";

/// Errors of a frame source.
#[derive(Debug, Error)]
pub enum CameraError {
    #[error("device {device} unavailable: {reason}")]
    DeviceUnavailable { device: String, reason: String },
    #[error("timed out waiting for a frame")]
    CaptureTimeout,
    #[error("failed to capture frame: {0}")]
    Capture(String),
    #[error("no resolution found")]
    NoResolution,
    #[error("no frame rate found")]
    NoFrameRate,
}

impl CameraError {
    /// Whether retrying the read may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, CameraError::CaptureTimeout | CameraError::Capture(_))
    }
}

/// Capture device settings.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CameraConfig {
    pub device: String,
    /// FourCC of the streamed pixel format.
    pub format: String,
    /// Resolution to request, the maximum supported one if `None`.
    pub resolution: Option<(u32, u32)>,
    /// Frame interval as `(numerator, denominator)` seconds, the fastest if `None`.
    pub frame_rate: Option<(u32, u32)>,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            device: "/dev/video0".to_owned(),
            format: "MJPG".to_owned(),
            resolution: None,
            frame_rate: None,
        }
    }
}

/// A camera device producing frames on demand.
///
/// No retries happen in here, callers decide what to do with transient errors.
pub trait FrameSource: Send {
    /// Claim the device.
    fn open(&mut self) -> Result<(), CameraError>;

    /// Read the next frame. Fails with a transient error if the device had no data.
    fn read(&mut self) -> Result<Frame, CameraError>;

    /// Release the device. Safe to call when not open.
    fn close(&mut self);

    fn is_open(&self) -> bool;

    /// Device name for logging.
    fn name(&self) -> &str;
}

/// Expand a bare device index like `0` into `/dev/video0`.
pub fn device_path(device: &str) -> String {
    match device.parse::<u32>() {
        Ok(index) => format!("/dev/video{index}"),
        Err(_) => device.to_owned(),
    }
}

/// Build the frame source for a config, selected by its device path.
pub fn open_camera(config: CameraConfig) -> Box<dyn FrameSource> {
    if config.device.starts_with(STUB_PREFIX) {
        return Box::new(synthetic::SyntheticCamera::new(config));
    }
    device_camera(config)
}

#[cfg(feature = "v4l")]
fn device_camera(config: CameraConfig) -> Box<dyn FrameSource> {
    Box::new(sensors::V4lCamera::new(config))
}

#[cfg(not(feature = "v4l"))]
fn device_camera(config: CameraConfig) -> Box<dyn FrameSource> {
    Box::new(sensors::UnsupportedCamera::new(config))
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_device_path_from_index() {
        assert_eq!(device_path("0"), "/dev/video0");
        assert_eq!(device_path("3"), "/dev/video3");
        assert_eq!(device_path("/dev/video2"), "/dev/video2");
        assert_eq!(device_path("stub://desk"), "stub://desk");
    }

    #[test]
    fn test_transient_errors() {
        assert!(CameraError::CaptureTimeout.is_transient());
        assert!(CameraError::Capture("short read".into()).is_transient());
        assert!(!CameraError::NoResolution.is_transient());
        assert!(!CameraError::DeviceUnavailable {
            device: "/dev/video0".into(),
            reason: "busy".into()
        }
        .is_transient());
    }

    #[test]
    fn test_stub_device_selects_synthetic_source() {
        let source = open_camera(CameraConfig {
            device: "stub://test".into(),
            ..Default::default()
        });
        assert_eq!(source.name(), "stub://test");
        assert!(!source.is_open());
    }
}
