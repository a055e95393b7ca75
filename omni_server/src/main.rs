//! Omni recognition server binary.
//!
use std::{net::SocketAddr, path::PathBuf, sync::Arc};

use anyhow::{anyhow, Result};
use cam_source::{device_path, open_camera, CameraConfig};
use clap::Parser;
use env_logger::TimestampPrecision;
use omni_server::{
    annotate::Annotator,
    capture::Pipeline,
    controller::Controller,
    endpoints::StreamConfig,
    meter::spawn_meter_logger,
    nn::{InferModel, YoloModel},
    routes::router,
    store::FrameStore,
    utils::resolve_model_file,
};

#[derive(Parser, Debug)]
#[clap(author, version)]
struct Args {
    /// Address to serve the HTTP interface on
    #[clap(long, default_value = "127.0.0.1:5000")]
    server_address: String,

    /// Camera device path or index, `stub://<name>` for a test pattern
    #[clap(long, default_value = "0")]
    device: String,

    /// Capture resolution as WIDTHxHEIGHT, the camera maximum if unset
    #[clap(long, value_parser = parse_size)]
    resolution: Option<(u32, u32)>,

    /// Frames per second to request from the camera, the fastest if unset
    #[clap(long)]
    frame_rate: Option<u32>,

    /// Size frames are scaled to before detection and streaming, as WIDTHxHEIGHT
    #[clap(long, value_parser = parse_size, default_value = "640x480")]
    work_size: (u32, u32),

    /// ONNX detection model
    #[clap(long, default_value = "yolov8n.onnx")]
    model: PathBuf,

    /// URL to download the model from if the model file does not exist
    #[clap(long)]
    model_url: Option<String>,

    /// TrueType font for detection captions
    #[clap(long, default_value = "/usr/share/fonts/truetype/dejavu/DejaVuSansMono.ttf")]
    font: PathBuf,

    /// Minimum confidence of reported detections
    #[clap(long, default_value_t = 0.5)]
    min_confidence: f32,

    /// Maximum overlap of two detections of the same class
    #[clap(long, default_value_t = 0.5)]
    max_iou: f32,

    /// JPEG quality of the video stream
    #[clap(long, default_value_t = 80, value_parser = clap::value_parser!(u8).range(1..=100))]
    jpeg_quality: u8,

    /// Start capturing and detecting right away
    #[clap(long)]
    start: bool,
}

/// Parse a size given as `WIDTHxHEIGHT`.
fn parse_size(value: &str) -> Result<(u32, u32)> {
    let (width, height) = value
        .split_once(|c: char| c == 'x' || c == 'X')
        .ok_or_else(|| anyhow!("expected WIDTHxHEIGHT, got {value}"))?;
    let size: (u32, u32) = (width.trim().parse()?, height.trim().parse()?);
    if size.0 == 0 || size.1 == 0 {
        return Err(anyhow!("size must not be zero, got {value}"));
    }
    Ok(size)
}

async fn load_model(args: &Args) -> Result<Arc<dyn InferModel>> {
    let path = resolve_model_file(&args.model, args.model_url.as_deref()).await?;
    let (min_confidence, max_iou) = (args.min_confidence, args.max_iou);
    let model =
        tokio::task::spawn_blocking(move || YoloModel::new(path, min_confidence, max_iou))
            .await??;
    Ok(Arc::new(model))
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Setup logger
    env_logger::builder()
        .format_timestamp(Some(TimestampPrecision::Millis))
        .init();

    let model = match load_model(&args).await {
        Ok(model) => Some(model),
        Err(err) => {
            log::error!("Running without detector: {err:#}");
            None
        }
    };

    let store = Arc::new(FrameStore::new());
    let pipeline = Pipeline {
        store,
        model,
        annotator: Arc::new(Annotator::with_font_file(&args.font)),
        work_size: Some(args.work_size),
    };

    // A fresh camera handle for every start, released again on stop
    let camera_config = CameraConfig {
        device: device_path(&args.device),
        resolution: args.resolution,
        frame_rate: args.frame_rate.map(|fps| (1, fps)),
        ..Default::default()
    };
    let make_source = Box::new(move || open_camera(camera_config.clone()));
    let controller = Arc::new(Controller::new(make_source, pipeline));

    if args.start {
        if let Err(err) = controller.start().await {
            log::error!("Could not start detection: {err}");
        }
    }

    spawn_meter_logger();

    let app = router(
        Arc::clone(&controller),
        StreamConfig {
            jpeg_quality: args.jpeg_quality,
        },
    );

    // Serve HTTP server
    let addr: SocketAddr = args.server_address.parse()?;
    log::info!("Serving on http://{addr}");
    axum::Server::bind(&addr)
        .serve(app.into_make_service())
        .with_graceful_shutdown(shutdown_signal(Arc::clone(&controller)))
        .await?;

    log::info!("Server stopped");

    Ok(())
}

/// Resolve on Ctrl+C once the camera is released and video streams are ended,
/// otherwise open streams would keep the graceful shutdown waiting forever.
async fn shutdown_signal(controller: Arc<Controller>) {
    if let Err(err) = tokio::signal::ctrl_c().await {
        log::error!("Failed to listen for Ctrl+C: {err}");
        std::future::pending::<()>().await;
    }
    log::info!("Shutting down");
    controller.shutdown().await;
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_parse_size() {
        assert_eq!(parse_size("640x480").unwrap(), (640, 480));
        assert_eq!(parse_size("1280X720").unwrap(), (1280, 720));
        assert!(parse_size("640").is_err());
        assert!(parse_size("0x480").is_err());
        assert!(parse_size("axb").is_err());
    }

    #[test]
    fn test_default_args() {
        let args = Args::parse_from(["omni_server"]);
        assert_eq!(args.server_address, "127.0.0.1:5000");
        assert_eq!(args.work_size, (640, 480));
        assert_eq!(args.jpeg_quality, 80);
        assert!(args.resolution.is_none());
        assert!(!args.start);
    }
}
