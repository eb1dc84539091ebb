//! snapshot - capture one frame and save it as `<name><file_type>`

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use stream_camera::config::StreamConfig;
use stream_camera::{DeviceSelector, FrameSource};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Capture device: "auto", a device node such as /dev/video0, or stub://<name>.
    #[arg(long)]
    device: Option<String>,
    /// Output format as a file extension (.jpg, .png, .bmp).
    #[arg(long, value_name = "EXT")]
    file_type: Option<String>,
    /// File stem for the saved photo.
    #[arg(long)]
    name: Option<String>,
    /// Flip the frame vertically before encoding.
    #[arg(long)]
    flip: bool,
    /// Directory to write the photo into.
    #[arg(long, default_value = ".")]
    out: PathBuf,
    /// Reads to attempt before giving up.
    #[arg(long, default_value_t = 10)]
    attempts: u32,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    if args.attempts == 0 {
        return Err(anyhow!("attempts must be >= 1"));
    }

    let mut config = StreamConfig::load()?;
    if let Some(device) = args.device.as_deref() {
        config.camera.device = DeviceSelector::parse(device);
    }
    if let Some(file_type) = args.file_type {
        config.camera.file_type = file_type;
    }
    if let Some(name) = args.name {
        config.camera.name = name;
    }
    if args.flip {
        config.camera.flip = true;
    }
    config.validate()?;

    let mut source = FrameSource::open_with(&config.device_opener(), config.source_config())
        .with_context(|| format!("open capture device ({})", config.camera.device))?;

    let mut photo = None;
    for attempt in 1..=args.attempts {
        if let Some(bytes) = source.get_frame()? {
            photo = Some(bytes);
            break;
        }
        log::debug!("snapshot: attempt {} returned no frame", attempt);
        std::thread::sleep(Duration::from_millis(100));
    }
    source.release();

    let bytes = photo.ok_or_else(|| {
        anyhow!(
            "no frame from {} after {} attempts",
            source.device_name(),
            args.attempts
        )
    })?;

    fs::create_dir_all(&args.out)
        .with_context(|| format!("create output directory {}", args.out.display()))?;
    let path = args
        .out
        .join(format!("{}{}", source.name(), source.format().extension()));
    fs::write(&path, &bytes).with_context(|| format!("write {}", path.display()))?;
    log::info!("snapshot: wrote {} ({} bytes)", path.display(), bytes.len());
    Ok(())
}
