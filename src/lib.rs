//! stream-camera
//!
//! A single-camera frame source: open a capture device, read one frame on
//! demand, encode it as a compressed image, release the device on teardown.
//!
//! # Module Structure
//!
//! - `source`: `FrameSource`, the open/read/encode/release lifecycle
//! - `device`: capture device seam (synthetic `stub://`, V4L2 behind `device-v4l2`)
//! - `frame`: transient RGB24 `RawFrame`
//! - `encode`: JPEG/PNG/BMP encoding selected by file extension
//! - `config`: JSON file + environment configuration for the binaries
//! - `server`: MJPEG-over-HTTP consumer of a shared `FrameSource`

pub mod config;
pub mod device;
pub mod encode;
pub mod error;
pub mod frame;
pub mod server;
pub mod source;

pub use device::{CaptureDevice, DeviceOpener, DeviceOptions, DeviceSelector, SyntheticDevice};
#[cfg(feature = "device-v4l2")]
pub use device::V4l2Device;
pub use encode::{EncodeFormat, FrameEncoder, JPEG_QUALITY};
pub use error::CaptureError;
pub use frame::RawFrame;
pub use server::{ServerConfig, StreamHandle, StreamServer};
pub use source::{FrameSource, FrameSourceConfig, FrameSourceStats, FRAME_HEIGHT, FRAME_WIDTH};
