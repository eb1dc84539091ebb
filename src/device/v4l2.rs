//! V4L2 capture device.
//!
//! This module provides `V4l2Device` for reading frames from local video
//! nodes (e.g. /dev/video0) through libv4l.
//!
//! The device is responsible for:
//! - Verifying the node supports video capture
//! - Applying resolution hints (and asking for RGB3) before streaming starts
//! - Converting whatever format the driver settles on into RGB24, dropping
//!   any per-row padding the driver reports through bytesperline
//!
//! The device MUST NOT:
//! - Queue frames beyond the driver's mmap ring
//! - Retry failed reads

use anyhow::{anyhow, Context, Result};
use ouroboros::self_referencing;
use std::time::Duration;

use super::normalize::{normalize_to_rgb, PixelFormat};
use super::{CaptureDevice, DeviceOptions};
use crate::frame::RawFrame;

const MMAP_BUFFERS: u32 = 4;

pub struct V4l2Device {
    path: String,
    options: DeviceOptions,
    handle: Handle,
    active_width: u32,
    active_height: u32,
    active_stride: u32,
    format: PixelFormat,
    frame_count: u64,
}

enum Handle {
    Idle(v4l::Device),
    Streaming(StreamState),
    Released,
}

#[self_referencing]
struct StreamState {
    device: v4l::Device,
    #[borrows(device)]
    #[covariant]
    stream: v4l::prelude::MmapStream<'this>,
}

impl V4l2Device {
    pub fn open(path: &str, options: DeviceOptions) -> Result<Self> {
        use v4l::video::Capture;

        let device =
            v4l::Device::with_path(path).with_context(|| format!("open v4l2 device {}", path))?;
        let caps = device
            .query_caps()
            .with_context(|| format!("query v4l2 capabilities of {}", path))?;
        if !caps
            .capabilities
            .contains(v4l::capability::Flags::VIDEO_CAPTURE)
        {
            return Err(anyhow!("{} is not a video capture device", path));
        }
        let format = device.format().context("read v4l2 format")?;
        let pixel_format = PixelFormat::from_fourcc(&format.fourcc.repr).ok_or_else(|| {
            anyhow!(
                "{} reports unsupported pixel format {}",
                path,
                format.fourcc
            )
        })?;

        log::info!(
            "V4l2Device: opened {} ({}, {}x{} {})",
            path,
            caps.card,
            format.width,
            format.height,
            format.fourcc
        );
        Ok(Self {
            path: path.to_string(),
            options,
            handle: Handle::Idle(device),
            active_width: format.width,
            active_height: format.height,
            active_stride: format.stride,
            format: pixel_format,
            frame_count: 0,
        })
    }

    fn start_streaming(&mut self) -> Result<()> {
        use v4l::buffer::Type;

        let device = match std::mem::replace(&mut self.handle, Handle::Released) {
            Handle::Idle(device) => device,
            other => {
                self.handle = other;
                return Ok(());
            }
        };
        let timeout = self.options.read_timeout_ms.map(Duration::from_millis);
        let state = StreamStateTryBuilder {
            device,
            stream_builder: |device| {
                let mut stream = v4l::prelude::MmapStream::with_buffers(
                    device,
                    Type::VideoCapture,
                    MMAP_BUFFERS,
                )
                .map_err(|err| anyhow::Error::new(err).context("create v4l2 buffer stream"))?;
                if let Some(timeout) = timeout {
                    stream.set_timeout(timeout);
                }
                Ok::<_, anyhow::Error>(stream)
            },
        }
        .try_build_or_recover();
        let state = match state {
            Ok(state) => state,
            Err((err, heads)) => {
                // Device stays idle; the next read attempts streaming again.
                self.handle = Handle::Idle(heads.device);
                return Err(err);
            }
        };
        self.handle = Handle::Streaming(state);
        log::debug!("V4l2Device: streaming from {}", self.path);
        Ok(())
    }
}

impl CaptureDevice for V4l2Device {
    fn describe(&self) -> String {
        self.path.clone()
    }

    fn request_resolution(&mut self, width: u32, height: u32) -> Result<()> {
        use v4l::video::Capture;

        let device = match &mut self.handle {
            Handle::Idle(device) => device,
            Handle::Streaming(_) => {
                return Err(anyhow!("resolution can only change before streaming"))
            }
            Handle::Released => return Err(anyhow!("{} released", self.path)),
        };

        let mut requested = device.format().context("read v4l2 format")?;
        requested.width = width;
        requested.height = height;
        requested.fourcc = v4l::FourCC::new(b"RGB3");

        let applied = match device.set_format(&requested) {
            Ok(format) => format,
            Err(err) => {
                log::warn!("V4l2Device: failed to set format on {}: {}", self.path, err);
                device
                    .format()
                    .context("read v4l2 format after set failure")?
            }
        };
        let pixel_format = PixelFormat::from_fourcc(&applied.fourcc.repr)
            .ok_or_else(|| anyhow!("driver settled on unsupported format {}", applied.fourcc))?;

        self.active_width = applied.width;
        self.active_height = applied.height;
        self.active_stride = applied.stride;
        self.format = pixel_format;
        if applied.width != width || applied.height != height {
            log::info!(
                "V4l2Device: {} adjusted {}x{} to {}x{}",
                self.path,
                width,
                height,
                applied.width,
                applied.height
            );
        }
        Ok(())
    }

    fn read(&mut self) -> Result<RawFrame> {
        use v4l::io::traits::CaptureStream;

        self.start_streaming()?;
        let (width, height, stride, format) = (
            self.active_width,
            self.active_height,
            self.active_stride,
            self.format,
        );
        let state = match &mut self.handle {
            Handle::Streaming(state) => state,
            _ => return Err(anyhow!("{} not streaming", self.path)),
        };
        let frame = state.with_stream_mut(|stream| -> Result<RawFrame> {
            let (buf, meta) = stream.next().context("capture v4l2 frame")?;
            let used = (meta.bytesused as usize).min(buf.len());
            let used = if used == 0 { buf.len() } else { used };
            normalize_to_rgb(&buf[..used], width, height, stride, format)
        })?;
        self.frame_count += 1;
        Ok(frame)
    }

    fn release(&mut self) {
        if matches!(self.handle, Handle::Released) {
            return;
        }
        // Dropping the stream unmaps the buffers before the fd closes.
        self.handle = Handle::Released;
        log::info!(
            "V4l2Device: released {} after {} frames",
            self.path,
            self.frame_count
        );
    }
}

impl Drop for V4l2Device {
    fn drop(&mut self) {
        self.release();
    }
}
