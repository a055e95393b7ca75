//! Probe a capture device and grab one frame from it.
//!
use anyhow::Result;
use cam_source::{device_path, open_camera, sensors::describe_device, CameraConfig, STUB_PREFIX};
use clap::Parser;
use env_logger::TimestampPrecision;

#[derive(Parser, Debug)]
#[clap(author, version)]
struct Args {
    /// Camera device path or index, `stub://<name>` for a test pattern
    #[clap(long, default_value = "0")]
    device: String,

    /// FourCC of the pixel format to list resolutions and frame rates for.
    /// The test frame is always captured as MJPG
    #[clap(long, default_value = "MJPG")]
    format: String,
}

fn main() -> Result<()> {
    let args = Args::parse();

    env_logger::builder()
        .format_timestamp(Some(TimestampPrecision::Millis))
        .init();

    let device = device_path(&args.device);
    log::info!("Probing {}", &device);

    if !device.starts_with(STUB_PREFIX) {
        println!("{}", describe_device(&device, &args.format)?);
    }

    let mut source = open_camera(CameraConfig {
        device,
        ..Default::default()
    });
    source.open()?;
    let frame = source.read();
    source.close();

    let frame = frame?;
    println!(
        "Captured frame of {}x{} from {}",
        frame.width(),
        frame.height(),
        source.name()
    );

    Ok(())
}
