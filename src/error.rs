use thiserror::Error;

/// Errors surfaced by [`FrameSource`](crate::FrameSource).
///
/// A failed read is not an error: `get_frame` reports it as `Ok(None)` so a
/// polling loop can skip the tick and try again.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CaptureError {
    #[error("capture device unavailable: {0}")]
    DeviceUnavailable(String),

    #[error("capture device already released")]
    DeviceClosed,

    #[error("unsupported output format '{0}'")]
    UnsupportedFormat(String),
}
