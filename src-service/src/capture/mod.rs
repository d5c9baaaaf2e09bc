//! Capture sources for the chunk recorder.
//!
//! A [`FrameSource`] is owned exclusively by the recorder thread: it is opened
//! once at start (failure there is fatal) and then read frame by frame until
//! it ends, fails, or the recorder is stopped.

pub mod camera;
pub mod error;
pub mod pattern;
pub mod types;

pub use camera::CameraSource;
pub use error::CaptureError;
pub use pattern::TestPatternSource;
pub use types::{CaptureFormat, CapturedFrame, StopHandle, BYTES_PER_PIXEL, PIXEL_FORMAT};

/// A continuous source of video frames.
pub trait FrameSource: Send {
    /// Open the device and report the negotiated format.
    ///
    /// An error here means the device is unavailable.
    fn open(&mut self) -> Result<CaptureFormat, CaptureError>;

    /// Read the next frame.
    ///
    /// Blocks until a frame is available. `Ok(None)` means the source ended
    /// cleanly.
    fn read_frame(&mut self) -> Result<Option<CapturedFrame>, CaptureError>;

    /// Release the device. Called once when recording stops.
    fn close(&mut self) {}
}
