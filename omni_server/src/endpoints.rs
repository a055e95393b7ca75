//! Endpoints of HTTP server.
//!
use std::{convert::Infallible, io::Cursor, sync::Arc};

use async_stream::stream;
use axum::{
    body::StreamBody,
    extract::Query,
    http::{header, StatusCode},
    response::{Html, IntoResponse},
    Extension, Json,
};
use bytes::Bytes;
use cam_source::Frame;
use futures::Stream;
use image::{codecs::jpeg::JpegEncoder, ColorType};
use serde::{Deserialize, Serialize};

use crate::{
    as_jpeg_stream_item,
    controller::{Controller, RunState, StartOutcome, StopOutcome},
    meter::METER,
    store::FrameStore,
    PipelineError, STREAM_CONTENT_TYPE,
};

const CONTROL_PANEL: &str = include_str!("panel.html");

/// Settings of the video stream.
#[derive(Clone, Copy, Debug)]
pub struct StreamConfig {
    pub jpeg_quality: u8,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self { jpeg_quality: 80 }
    }
}

/// Response of the control endpoints.
#[derive(Debug, Deserialize, PartialEq, Eq, Serialize)]
pub struct StatusReply {
    pub status: String,
    pub running: bool,
    pub detection: bool,
}

impl StatusReply {
    fn new(status: impl Into<String>, state: RunState) -> Self {
        Self {
            status: status.into(),
            running: state.running,
            detection: state.detection,
        }
    }
}

/// Search parameters of the detection toggle.
#[derive(Debug, Deserialize)]
pub struct DetectionParams {
    enabled: bool,
}

/// Health check endpoint.
pub async fn healthcheck() -> &'static str {
    "healthy"
}

/// Control panel page.
pub async fn index() -> Html<&'static str> {
    Html(CONTROL_PANEL)
}

pub async fn start(
    Extension(controller): Extension<Arc<Controller>>,
) -> (StatusCode, Json<StatusReply>) {
    match controller.start().await {
        Ok(StartOutcome::Started) => (
            StatusCode::OK,
            Json(StatusReply::new("Detection started", controller.status())),
        ),
        Ok(StartOutcome::AlreadyRunning) => (
            StatusCode::OK,
            Json(StatusReply::new("Detection already running", controller.status())),
        ),
        Err(PipelineError::DeviceUnavailable(err)) => {
            log::error!("Could not start detection, camera unavailable: {err}");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(StatusReply::new(
                    format!("Camera unavailable: {err}"),
                    controller.status(),
                )),
            )
        }
        Err(err) => {
            log::error!("Could not start detection: {err}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(StatusReply::new(
                    format!("Could not start detection: {err}"),
                    controller.status(),
                )),
            )
        }
    }
}

pub async fn stop(Extension(controller): Extension<Arc<Controller>>) -> Json<StatusReply> {
    if controller.stop().await == StopOutcome::AlreadyStopped {
        log::debug!("Stop requested while not running");
    }
    Json(StatusReply::new("Detection stopped", controller.status()))
}

pub async fn detection(
    Extension(controller): Extension<Arc<Controller>>,
    Query(params): Query<DetectionParams>,
) -> Json<StatusReply> {
    let state = controller.set_detection(params.enabled).await;
    let status = match (state.running, state.detection) {
        (false, _) => "Detection not running",
        (true, true) => "Detection overlay enabled",
        (true, false) => "Detection overlay disabled",
    };
    Json(StatusReply::new(status, state))
}

pub async fn status(Extension(controller): Extension<Arc<Controller>>) -> Json<StatusReply> {
    let state = controller.status();
    let status = if state.running {
        "Detection running"
    } else {
        "Detection stopped"
    };
    Json(StatusReply::new(status, state))
}

/// Endpoint of the live camera stream.
pub async fn video_feed(
    Extension(store): Extension<Arc<FrameStore>>,
    Extension(config): Extension<StreamConfig>,
) -> impl IntoResponse {
    log::info!("Video stream requested");

    // Set body and headers for multipart streaming
    let body = StreamBody::new(frame_parts(store, config));
    let headers = [
        (header::CONTENT_TYPE, STREAM_CONTENT_TYPE),
        (header::CACHE_CONTROL, "no-cache"),
    ];

    (headers, body)
}

/// Endless stream of multipart JPEG parts for one viewer.
pub fn frame_parts(
    store: Arc<FrameStore>,
    config: StreamConfig,
) -> impl Stream<Item = Result<Bytes, Infallible>> {
    let quality = config.jpeg_quality;
    encoded_parts(store, move |frame: &Frame| encode_jpeg(frame, quality))
}

/// Stream of multipart parts, each frame encoded with `encode`.
///
/// Each viewer waits for frames newer than the last one it sent, so it never
/// gets a frame twice and simply skips frames it was too slow for. Frames that
/// fail to encode are skipped. The stream ends when the store is closed.
pub fn encoded_parts<E>(
    store: Arc<FrameStore>,
    encode: E,
) -> impl Stream<Item = Result<Bytes, Infallible>>
where
    E: Fn(&Frame) -> Result<Vec<u8>, PipelineError> + Send + Sync + 'static,
{
    let encode = Arc::new(encode);
    stream! {
        let mut seen = 0;
        loop {
            let published = match store.wait_newer(seen).await {
                Some(published) => published,
                None => {
                    log::debug!("Frame store closed, ending video stream");
                    break;
                }
            };
            seen = published.seq;

            let image = published.image;
            let encode = Arc::clone(&encode);
            match tokio::task::spawn_blocking(move || (*encode)(image.as_ref())).await {
                Ok(Ok(jpeg)) => {
                    METER.tick_streamed();
                    yield Ok::<_, Infallible>(as_jpeg_stream_item(&jpeg));
                }
                Ok(Err(err)) => log::warn!("Skipping frame {seen}: {err}"),
                Err(err) => log::warn!("Skipping frame {seen}: {}", PipelineError::from(err)),
            }
        }
    }
}

/// Compress a frame to JPEG.
pub fn encode_jpeg(frame: &Frame, quality: u8) -> Result<Vec<u8>, PipelineError> {
    let (width, height) = frame.dimensions();
    let mut buf = Cursor::new(Vec::new());
    JpegEncoder::new_with_quality(&mut buf, quality).encode(
        frame.as_raw(),
        width,
        height,
        ColorType::Rgb8,
    )?;

    Ok(buf.into_inner())
}

#[cfg(test)]
mod test {
    use std::time::Duration;

    use futures::StreamExt;
    use image::{
        error::{ParameterError, ParameterErrorKind},
        ImageError, Rgb, RgbImage,
    };

    use super::*;

    #[test]
    fn encodes_valid_jpeg() {
        let frame = RgbImage::from_pixel(16, 8, Rgb([200, 10, 10]));
        let jpeg = encode_jpeg(&frame, 80).unwrap();
        assert!(jpeg.starts_with(&[0xff, 0xd8]));

        let decoded = image::load_from_memory(&jpeg).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (16, 8));
    }

    #[tokio::test]
    async fn viewer_gets_each_frame_once() {
        let store = Arc::new(FrameStore::new());
        store.publish(RgbImage::new(8, 8));

        let parts = frame_parts(Arc::clone(&store), StreamConfig::default());
        futures::pin_mut!(parts);

        let first = parts.next().await.unwrap().unwrap();
        assert!(first.starts_with(b"--frame\r\n"));

        // Nothing new was published, so nothing is sent
        let pending = tokio::time::timeout(Duration::from_millis(250), parts.next()).await;
        assert!(pending.is_err());

        store.publish(RgbImage::new(8, 8));
        let second = tokio::time::timeout(Duration::from_secs(2), parts.next())
            .await
            .unwrap();
        assert!(second.is_some());
    }

    #[tokio::test]
    async fn unencodable_frames_are_skipped() {
        let store = Arc::new(FrameStore::new());
        store.publish(RgbImage::new(2, 2));

        // Refuses tiny frames
        let parts = encoded_parts(Arc::clone(&store), |frame: &Frame| {
            if frame.width() < 4 {
                return Err(PipelineError::Encoding(ImageError::Parameter(
                    ParameterError::from_kind(ParameterErrorKind::DimensionMismatch),
                )));
            }
            encode_jpeg(frame, 80)
        });
        futures::pin_mut!(parts);

        let next = {
            let store = Arc::clone(&store);
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(50)).await;
                store.publish(RgbImage::new(8, 8));
            })
        };

        let part = tokio::time::timeout(Duration::from_secs(2), parts.next())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert!(part.starts_with(b"--frame\r\nContent-Type: image/jpeg\r\n\r\n\xff\xd8"));
        assert!(part.ends_with(b"\r\n"));
        next.await.unwrap();
    }

    #[tokio::test]
    async fn closing_the_store_ends_the_stream() {
        let store = Arc::new(FrameStore::new());
        store.publish(RgbImage::new(8, 8));

        let parts = frame_parts(Arc::clone(&store), StreamConfig::default());
        futures::pin_mut!(parts);
        assert!(parts.next().await.is_some());

        store.close();
        let end = tokio::time::timeout(Duration::from_secs(1), parts.next())
            .await
            .unwrap();
        assert!(end.is_none());
    }
}
