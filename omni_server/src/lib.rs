//! Webcam streaming server with optional object detection overlays.
//!
//! A single capture loop reads the camera, runs the detector when enabled and
//! publishes the result into a single-slot [`store::FrameStore`]. Any number of
//! HTTP viewers read the latest frame from there as a multipart JPEG stream.
pub mod annotate;
pub mod capture;
pub mod controller;
pub mod endpoints;
pub mod error;
pub mod meter;
pub mod nn;
pub mod routes;
pub mod store;
pub mod utils;

use bytes::Bytes;

pub use error::PipelineError;

/// Content type of the multipart video stream.
pub const STREAM_CONTENT_TYPE: &str = "multipart/x-mixed-replace; boundary=frame";

/// Wrap an encoded JPEG into one part of the multipart stream.
pub fn as_jpeg_stream_item(data: &[u8]) -> Bytes {
    Bytes::copy_from_slice(
        &[
            "--frame\r\nContent-Type: image/jpeg\r\n\r\n".as_bytes(),
            data,
            "\r\n".as_bytes(),
        ]
        .concat(),
    )
}
