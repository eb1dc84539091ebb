//! camera_stream - serve one camera as an MJPEG stream over HTTP
//!
//! This daemon:
//! 1. Loads configuration (STREAM_CAMERA_CONFIG + env + flags)
//! 2. Opens the capture device, failing fast if none is available
//! 3. Serves `/video_feed`, `/snapshot`, `/health` until Ctrl-C
//! 4. Releases the device on the way out

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use std::sync::{mpsc, Arc, Mutex};

use stream_camera::config::StreamConfig;
use stream_camera::{DeviceSelector, FrameSource, ServerConfig, StreamServer};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Capture device: "auto", a device node such as /dev/video0, or stub://<name>.
    #[arg(long)]
    device: Option<String>,
    /// Listen address for the HTTP server.
    #[arg(long, value_name = "ADDR")]
    addr: Option<String>,
    /// Output format as a file extension (.jpg, .png, .bmp).
    #[arg(long, value_name = "EXT")]
    file_type: Option<String>,
    /// Flip frames vertically before encoding.
    #[arg(long)]
    flip: bool,
    /// Stream pacing in frames per second.
    #[arg(long)]
    fps: Option<u32>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let mut config = StreamConfig::load()?;
    if let Some(device) = args.device.as_deref() {
        config.camera.device = DeviceSelector::parse(device);
    }
    if let Some(addr) = args.addr {
        config.server_addr = addr;
    }
    if let Some(file_type) = args.file_type {
        config.camera.file_type = file_type;
    }
    if args.flip {
        config.camera.flip = true;
    }
    if let Some(fps) = args.fps {
        config.target_fps = fps;
    }
    config.validate()?;

    let source = FrameSource::open_with(&config.device_opener(), config.source_config())
        .with_context(|| format!("open capture device ({})", config.camera.device))?;
    let source = Arc::new(Mutex::new(source));

    let handle = StreamServer::new(
        ServerConfig {
            addr: config.server_addr.clone(),
            target_fps: config.target_fps,
        },
        source.clone(),
    )
    .spawn()?;
    log::info!("camera_stream listening on http://{}/", handle.addr);
    log::info!("video feed at http://{}/video_feed", handle.addr);

    let (tx, rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = tx.send(());
    })
    .context("set Ctrl-C handler")?;

    log::info!("camera_stream waiting for shutdown signal (Ctrl-C)...");
    let _ = rx.recv();
    log::info!("shutdown signal received, stopping stream server...");
    handle.stop()?;

    let mut source = source
        .lock()
        .map_err(|_| anyhow!("frame source lock poisoned"))?;
    let stats = source.stats();
    source.release();
    log::info!(
        "camera_stream stopped: {} frames encoded, {} missed",
        stats.frames_encoded,
        stats.frames_missed
    );
    Ok(())
}
