//! Camera capture through FFmpeg.
//!
//! FFmpeg reads the platform camera input and emits raw RGB24 frames on its
//! stdout, which ffmpeg-sidecar parses into frame events.

use super::{CaptureError, CaptureFormat, CapturedFrame, FrameSource};
use crate::encoder::new_ffmpeg_command;
use ffmpeg_sidecar::child::FfmpegChild;
use ffmpeg_sidecar::command::FfmpegCommand;
use ffmpeg_sidecar::event::{FfmpegEvent, LogLevel, OutputVideoFrame};
use ffmpeg_sidecar::iter::FfmpegIterator;
use tracing::{debug, info, warn};

/// Default camera device for the current platform.
///
/// On Windows DirectShow needs a device name; "Integrated Camera" is the
/// common laptop name and can be overridden in the config.
pub fn default_device() -> &'static str {
    #[cfg(target_os = "linux")]
    {
        "/dev/video0"
    }
    #[cfg(target_os = "macos")]
    {
        "0"
    }
    #[cfg(target_os = "windows")]
    {
        "video=Integrated Camera"
    }
    #[cfg(not(any(target_os = "linux", target_os = "macos", target_os = "windows")))]
    {
        "/dev/video0"
    }
}

/// A camera read through an FFmpeg child process.
pub struct CameraSource {
    device: String,
    width: u32,
    height: u32,
    fps: u32,
    child: Option<FfmpegChild>,
    events: Option<FfmpegIterator>,
    /// First frame, consumed by `open()` to prove the device works
    pending: Option<CapturedFrame>,
    last_error: Option<String>,
}

impl CameraSource {
    pub fn new(device: impl Into<String>, width: u32, height: u32, fps: u32) -> Self {
        Self {
            device: device.into(),
            width,
            height,
            fps,
            child: None,
            events: None,
            pending: None,
            last_error: None,
        }
    }

    fn build_command(&self) -> FfmpegCommand {
        let mut command = new_ffmpeg_command();

        #[cfg(target_os = "linux")]
        command.args(["-f", "v4l2"]);
        #[cfg(target_os = "macos")]
        command.args(["-f", "avfoundation"]);
        #[cfg(target_os = "windows")]
        command.args(["-f", "dshow"]);

        command
            .args(["-framerate", &self.fps.to_string()])
            .args(["-video_size", &format!("{}x{}", self.width, self.height)])
            .input(&self.device)
            .rawvideo();
        command
    }

    /// Pull events until the next frame, remembering the last reported error.
    fn next_frame(&mut self) -> Option<OutputVideoFrame> {
        let events = self.events.as_mut()?;
        for event in events {
            match event {
                FfmpegEvent::OutputFrame(frame) => return Some(frame),
                FfmpegEvent::Error(msg) | FfmpegEvent::Log(LogLevel::Error | LogLevel::Fatal, msg) => {
                    debug!(device = %self.device, "FFmpeg: {}", msg);
                    self.last_error = Some(msg);
                }
                _ => {}
            }
        }
        None
    }
}

fn to_captured(frame: OutputVideoFrame) -> CapturedFrame {
    CapturedFrame {
        width: frame.width,
        height: frame.height,
        data: frame.data,
    }
}

impl FrameSource for CameraSource {
    fn open(&mut self) -> Result<CaptureFormat, CaptureError> {
        if self.width == 0 || self.height == 0 || self.fps == 0 {
            return Err(CaptureError::InvalidParameters(format!(
                "{}x{} @ {} fps",
                self.width, self.height, self.fps
            )));
        }

        info!(device = %self.device, "Opening camera {}x{} @ {} fps", self.width, self.height, self.fps);

        let mut child = self
            .build_command()
            .spawn()
            .map_err(|e| CaptureError::DeviceUnavailable(format!("failed to start FFmpeg: {}", e)))?;
        let events = child
            .iter()
            .map_err(|e| CaptureError::DeviceUnavailable(e.to_string()))?;
        self.child = Some(child);
        self.events = Some(events);

        // The device is only usable once a frame has come through.
        match self.next_frame() {
            Some(frame) => {
                let format = CaptureFormat {
                    width: frame.width,
                    height: frame.height,
                    fps: self.fps,
                };
                if format.width != self.width || format.height != self.height {
                    warn!(
                        "Camera negotiated {}x{} instead of {}x{}",
                        format.width, format.height, self.width, self.height
                    );
                }
                self.pending = Some(to_captured(frame));
                Ok(format)
            }
            None => {
                self.close();
                Err(CaptureError::DeviceUnavailable(
                    self.last_error
                        .take()
                        .unwrap_or_else(|| "FFmpeg exited before producing a frame".to_string()),
                ))
            }
        }
    }

    fn read_frame(&mut self) -> Result<Option<CapturedFrame>, CaptureError> {
        if let Some(frame) = self.pending.take() {
            return Ok(Some(frame));
        }
        match self.next_frame() {
            Some(frame) => Ok(Some(to_captured(frame))),
            None => match self.last_error.take() {
                Some(msg) => Err(CaptureError::FrameRead(msg)),
                None => Ok(None),
            },
        }
    }

    fn close(&mut self) {
        self.events = None;
        if let Some(mut child) = self.child.take() {
            if let Err(e) = child.kill() {
                debug!("FFmpeg capture already exited: {}", e);
            }
            if let Err(e) = child.wait() {
                warn!("Failed to reap FFmpeg capture process: {}", e);
            }
            info!(device = %self.device, "Camera closed");
        }
    }
}

impl Drop for CameraSource {
    fn drop(&mut self) {
        self.close();
    }
}
