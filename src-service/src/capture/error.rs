//! Error types for capture operations.

use thiserror::Error;

/// Error type for capture operations.
#[derive(Debug, Error)]
pub enum CaptureError {
    /// The capture device could not be opened or produced no frames
    #[error("Capture device unavailable: {0}")]
    DeviceUnavailable(String),
    /// A frame could not be read from an open device
    #[error("Frame read failed: {0}")]
    FrameRead(String),
    /// Invalid capture parameters
    #[error("Invalid parameters: {0}")]
    InvalidParameters(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
