//! Runtime types for capture operations.

use std::sync::atomic::AtomicBool;
use std::sync::Arc;

/// Pixel layout of every captured frame.
pub const PIXEL_FORMAT: &str = "rgb24";

/// Bytes per pixel for [`PIXEL_FORMAT`].
pub const BYTES_PER_PIXEL: usize = 3;

/// A captured frame with its dimensions and pixel data.
#[derive(Clone)]
pub struct CapturedFrame {
    pub width: u32,
    pub height: u32,
    /// RGB24 pixel data
    pub data: Vec<u8>,
}

/// Negotiated properties of an opened capture device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureFormat {
    pub width: u32,
    pub height: u32,
    /// Nominal frames per second; chunk boundaries are counted in frames at this rate
    pub fps: u32,
}

impl CaptureFormat {
    /// Size in bytes of one frame in this format.
    pub fn frame_len(&self) -> usize {
        self.width as usize * self.height as usize * BYTES_PER_PIXEL
    }
}

/// Handle to stop an ongoing capture.
pub type StopHandle = Arc<AtomicBool>;
