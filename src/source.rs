//! Single-camera frame source.
//!
//! `FrameSource` owns one capture device for its whole life:
//!
//! 1. `open` acquires the device and sends the fixed 300x300 resolution hint
//! 2. `get_frame` reads one frame and encodes it, or yields `None` on a miss
//! 3. `release` (or drop) hands the device back
//!
//! There is no buffering and no retry. A caller loop treats `None` as
//! "skip this tick" and calls again.

use crate::device::{CaptureDevice, DeviceOpener, DeviceSelector};
use crate::encode::{EncodeFormat, FrameEncoder};
use crate::error::CaptureError;

/// Width hint sent to the device at open. Advisory.
pub const FRAME_WIDTH: u32 = 300;
/// Height hint sent to the device at open. Advisory.
pub const FRAME_HEIGHT: u32 = 300;

pub const DEFAULT_FILE_TYPE: &str = ".jpg";
pub const DEFAULT_NAME: &str = "stream_photo";

/// Construction parameters for a `FrameSource`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FrameSourceConfig {
    /// Flip each frame top-to-bottom before encoding.
    pub flip: bool,
    /// Output format as a file extension (".jpg", ".png", ".bmp").
    pub file_type: String,
    /// Label for saved photos. Not used when reading frames.
    pub name: String,
}

impl Default for FrameSourceConfig {
    fn default() -> Self {
        Self {
            flip: false,
            file_type: DEFAULT_FILE_TYPE.to_string(),
            name: DEFAULT_NAME.to_string(),
        }
    }
}

/// Counters for a `FrameSource`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FrameSourceStats {
    pub frames_encoded: u64,
    pub frames_missed: u64,
    pub device: String,
}

pub struct FrameSource {
    device: Option<Box<dyn CaptureDevice>>,
    device_name: String,
    config: FrameSourceConfig,
    encoder: FrameEncoder,
    frames_encoded: u64,
    frames_missed: u64,
}

impl FrameSource {
    /// Open the first available capture device.
    pub fn open(config: FrameSourceConfig) -> Result<Self, CaptureError> {
        Self::open_with(&DeviceSelector::Auto, config)
    }

    /// Open a device through `opener` and apply the resolution hint.
    pub fn open_with(
        opener: &dyn DeviceOpener,
        config: FrameSourceConfig,
    ) -> Result<Self, CaptureError> {
        // Resolve the format first so a bad extension never grabs the camera.
        let format = EncodeFormat::from_extension(&config.file_type)?;
        let mut device = opener.open()?;
        let device_name = device.describe();

        if let Err(err) = device.request_resolution(FRAME_WIDTH, FRAME_HEIGHT) {
            log::warn!(
                "FrameSource: {} ignored {}x{} hint: {:#}",
                device_name,
                FRAME_WIDTH,
                FRAME_HEIGHT,
                err
            );
        }

        log::info!(
            "FrameSource: opened {} (format={:?}, flip={}, name={})",
            device_name,
            format,
            config.flip,
            config.name
        );
        Ok(Self {
            device: Some(device),
            device_name,
            config,
            encoder: FrameEncoder::new(format),
            frames_encoded: 0,
            frames_missed: 0,
        })
    }

    /// Read and encode one frame.
    ///
    /// Returns `Ok(None)` when the device fails to deliver a frame or the
    /// frame cannot be encoded. Returns `Err(DeviceClosed)` after `release`.
    pub fn get_frame(&mut self) -> Result<Option<Vec<u8>>, CaptureError> {
        let device = self.device.as_mut().ok_or(CaptureError::DeviceClosed)?;

        let mut frame = match device.read() {
            Ok(frame) => frame,
            Err(err) => {
                self.frames_missed += 1;
                log::debug!("FrameSource: no frame from {}: {:#}", self.device_name, err);
                return Ok(None);
            }
        };

        if self.config.flip {
            frame.flip_vertical();
        }

        match self.encoder.encode(&frame) {
            Ok(bytes) => {
                self.frames_encoded += 1;
                Ok(Some(bytes))
            }
            Err(err) => {
                self.frames_missed += 1;
                log::debug!("FrameSource: dropped frame from {}: {:#}", self.device_name, err);
                Ok(None)
            }
        }
    }

    /// Release the device. Safe to call more than once.
    pub fn release(&mut self) {
        if let Some(mut device) = self.device.take() {
            device.release();
            log::info!(
                "FrameSource: released {} ({} encoded, {} missed)",
                self.device_name,
                self.frames_encoded,
                self.frames_missed
            );
        }
    }

    pub fn is_open(&self) -> bool {
        self.device.is_some()
    }

    pub fn flip(&self) -> bool {
        self.config.flip
    }

    pub fn file_type(&self) -> &str {
        &self.config.file_type
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn format(&self) -> EncodeFormat {
        self.encoder.format()
    }

    pub fn device_name(&self) -> &str {
        &self.device_name
    }

    pub fn stats(&self) -> FrameSourceStats {
        FrameSourceStats {
            frames_encoded: self.frames_encoded,
            frames_missed: self.frames_missed,
            device: self.device_name.clone(),
        }
    }
}

impl Drop for FrameSource {
    fn drop(&mut self) {
        self.release();
    }
}
