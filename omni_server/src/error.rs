//! Errors of the frame pipeline.
//!
use cam_source::CameraError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    /// The camera could not be claimed, starting detection failed.
    #[error("camera unavailable: {0}")]
    DeviceUnavailable(#[source] CameraError),
    /// A single frame could not be captured.
    #[error(transparent)]
    Capture(CameraError),
    /// The detector failed on a frame.
    #[error("inference failed: {0:#}")]
    Inference(anyhow::Error),
    /// A frame could not be serialized for streaming.
    #[error("failed to encode frame: {0}")]
    Encoding(#[from] image::ImageError),
    #[error("pipeline task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl From<CameraError> for PipelineError {
    fn from(err: CameraError) -> Self {
        match err {
            CameraError::DeviceUnavailable { .. }
            | CameraError::NoResolution
            | CameraError::NoFrameRate => PipelineError::DeviceUnavailable(err),
            _ => PipelineError::Capture(err),
        }
    }
}
