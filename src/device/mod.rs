//! Capture devices.
//!
//! This module provides the seam between `FrameSource` and the hardware:
//! - `CaptureDevice`: an open camera handle that can take resolution hints,
//!   read one frame at a time, and be released
//! - `DeviceOpener`: something that can produce an open `CaptureDevice`
//! - `DeviceSelector`: the production opener (`auto`, a device path, or `stub://`)
//!
//! Backends:
//! - Synthetic test pattern (`stub://<name>`), always available
//! - USB/V4L2 devices (feature: device-v4l2)
//!
//! Devices MUST NOT:
//! - Buffer frames beyond the one being read
//! - Retry a failed read internally

mod normalize;
pub mod synthetic;
#[cfg(feature = "device-v4l2")]
pub mod v4l2;

use anyhow::Result;

use crate::error::CaptureError;
use crate::frame::RawFrame;

pub use synthetic::SyntheticDevice;
#[cfg(feature = "device-v4l2")]
pub use v4l2::V4l2Device;

const STUB_SCHEME: &str = "stub://";

/// An open camera handle.
///
/// `Send` is required so an owning `FrameSource` can move to a server thread;
/// implementations are not expected to be `Sync`.
pub trait CaptureDevice: Send {
    /// Human-readable device identifier (path or stub name).
    fn describe(&self) -> String;

    /// Request a capture resolution. Advisory: the device may clamp or ignore it.
    fn request_resolution(&mut self, width: u32, height: u32) -> Result<()>;

    /// Block until the device delivers one frame or reports failure.
    fn read(&mut self) -> Result<RawFrame>;

    /// Release the underlying handle. Must be safe to call more than once.
    fn release(&mut self);
}

/// Produces an open `CaptureDevice`.
pub trait DeviceOpener {
    fn open(&self) -> Result<Box<dyn CaptureDevice>, CaptureError>;
}

/// Which device to open.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum DeviceSelector {
    /// First device that opens successfully.
    #[default]
    Auto,
    /// A specific device node (e.g. "/dev/video0") or a `stub://` name.
    Path(String),
}

impl DeviceSelector {
    pub fn parse(value: &str) -> Self {
        let value = value.trim();
        if value.is_empty() || value.eq_ignore_ascii_case("auto") {
            DeviceSelector::Auto
        } else {
            DeviceSelector::Path(value.to_string())
        }
    }

    /// Options applied to hardware backends when they are opened.
    pub fn with_options(self, options: DeviceOptions) -> ConfiguredSelector {
        ConfiguredSelector {
            selector: self,
            options,
        }
    }
}

impl std::fmt::Display for DeviceSelector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeviceSelector::Auto => write!(f, "auto"),
            DeviceSelector::Path(path) => write!(f, "{}", path),
        }
    }
}

/// Backend options that do not change which device is picked.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DeviceOptions {
    /// Per-read timeout in milliseconds; an expired read yields no frame.
    pub read_timeout_ms: Option<u64>,
}

/// A `DeviceSelector` carrying backend options.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ConfiguredSelector {
    pub selector: DeviceSelector,
    pub options: DeviceOptions,
}

impl DeviceOpener for ConfiguredSelector {
    fn open(&self) -> Result<Box<dyn CaptureDevice>, CaptureError> {
        open_selected(&self.selector, self.options)
    }
}

impl DeviceOpener for DeviceSelector {
    fn open(&self) -> Result<Box<dyn CaptureDevice>, CaptureError> {
        open_selected(self, DeviceOptions::default())
    }
}

fn open_selected(
    selector: &DeviceSelector,
    options: DeviceOptions,
) -> Result<Box<dyn CaptureDevice>, CaptureError> {
    match selector {
        DeviceSelector::Path(path) if path.starts_with(STUB_SCHEME) => {
            Ok(Box::new(SyntheticDevice::new(path)))
        }
        DeviceSelector::Path(path) => open_hardware(path, options),
        DeviceSelector::Auto => open_first_available(options),
    }
}

#[cfg(feature = "device-v4l2")]
fn open_hardware(
    path: &str,
    options: DeviceOptions,
) -> Result<Box<dyn CaptureDevice>, CaptureError> {
    let device = V4l2Device::open(path, options)
        .map_err(|err| CaptureError::DeviceUnavailable(format!("{:#}", err)))?;
    Ok(Box::new(device))
}

#[cfg(not(feature = "device-v4l2"))]
fn open_hardware(
    path: &str,
    _options: DeviceOptions,
) -> Result<Box<dyn CaptureDevice>, CaptureError> {
    Err(CaptureError::DeviceUnavailable(format!(
        "{}: hardware capture requires the device-v4l2 feature",
        path
    )))
}

#[cfg(feature = "device-v4l2")]
fn open_first_available(options: DeviceOptions) -> Result<Box<dyn CaptureDevice>, CaptureError> {
    let mut nodes = v4l::context::enum_devices();
    nodes.sort_by_key(|node| node.index());
    if nodes.is_empty() {
        return Err(CaptureError::DeviceUnavailable(
            "no video capture devices found".to_string(),
        ));
    }
    let mut last_error = String::new();
    for node in nodes {
        let path = node.path().display().to_string();
        match V4l2Device::open(&path, options) {
            Ok(device) => return Ok(Box::new(device)),
            Err(err) => {
                log::debug!("skipping {}: {:#}", path, err);
                last_error = format!("{}: {:#}", path, err);
            }
        }
    }
    Err(CaptureError::DeviceUnavailable(last_error))
}

#[cfg(not(feature = "device-v4l2"))]
fn open_first_available(_options: DeviceOptions) -> Result<Box<dyn CaptureDevice>, CaptureError> {
    Err(CaptureError::DeviceUnavailable(
        "no capture backend compiled in; enable device-v4l2 or use a stub:// device".to_string(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_selectors() {
        assert_eq!(DeviceSelector::parse("auto"), DeviceSelector::Auto);
        assert_eq!(DeviceSelector::parse("  "), DeviceSelector::Auto);
        assert_eq!(DeviceSelector::parse("AUTO"), DeviceSelector::Auto);
        assert_eq!(
            DeviceSelector::parse("/dev/video2"),
            DeviceSelector::Path("/dev/video2".to_string())
        );
    }

    #[test]
    fn stub_selector_opens_synthetic_device() -> Result<()> {
        let selector = DeviceSelector::parse("stub://bench");
        let mut device = selector.open()?;
        assert_eq!(device.describe(), "stub://bench");
        let frame = device.read()?;
        assert!(frame.byte_len() > 0);
        Ok(())
    }

    #[cfg(not(feature = "device-v4l2"))]
    #[test]
    fn hardware_paths_need_backend() {
        let err = DeviceSelector::parse("/dev/video0").open().err();
        assert!(matches!(err, Some(CaptureError::DeviceUnavailable(_))));
        let err = DeviceSelector::Auto.open().err();
        assert!(matches!(err, Some(CaptureError::DeviceUnavailable(_))));
    }
}
