//! Synthetic test-pattern source for running without a camera.

use super::{CaptureError, CaptureFormat, CapturedFrame, FrameSource};
use std::time::{Duration, Instant};

/// Emits flat frames whose shade steps with every frame.
pub struct TestPatternSource {
    format: CaptureFormat,
    emitted: u64,
    limit: Option<u64>,
    realtime: bool,
    next_due: Option<Instant>,
}

impl TestPatternSource {
    pub fn new(width: u32, height: u32, fps: u32) -> Self {
        Self {
            format: CaptureFormat { width, height, fps },
            emitted: 0,
            limit: None,
            realtime: false,
            next_due: None,
        }
    }

    /// End the stream cleanly after `frames` frames.
    pub fn with_frame_limit(mut self, frames: u64) -> Self {
        self.limit = Some(frames);
        self
    }

    /// Pace frames at the nominal frame rate instead of as fast as possible.
    pub fn realtime(mut self, realtime: bool) -> Self {
        self.realtime = realtime;
        self
    }

    /// Frames produced so far.
    pub fn emitted(&self) -> u64 {
        self.emitted
    }

    fn frame_interval(&self) -> Duration {
        Duration::from_secs(1) / self.format.fps.max(1)
    }
}

impl FrameSource for TestPatternSource {
    fn open(&mut self) -> Result<CaptureFormat, CaptureError> {
        let CaptureFormat { width, height, fps } = self.format;
        if width == 0 || height == 0 || fps == 0 {
            return Err(CaptureError::InvalidParameters(format!(
                "{}x{} @ {} fps",
                width, height, fps
            )));
        }
        self.next_due = Some(Instant::now());
        Ok(self.format)
    }

    fn read_frame(&mut self) -> Result<Option<CapturedFrame>, CaptureError> {
        if self.limit.is_some_and(|limit| self.emitted >= limit) {
            return Ok(None);
        }

        if self.realtime {
            let due = self.next_due.unwrap_or_else(Instant::now);
            let wait = due.saturating_duration_since(Instant::now());
            if !wait.is_zero() {
                std::thread::sleep(wait);
            }
            self.next_due = Some(due + self.frame_interval());
        }

        let shade = (self.emitted.wrapping_mul(8) % 256) as u8;
        self.emitted += 1;
        Ok(Some(CapturedFrame {
            width: self.format.width,
            height: self.format.height,
            data: vec![shade; self.format.frame_len()],
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frames_match_format() {
        let mut source = TestPatternSource::new(4, 2, 10);
        let format = source.open().unwrap();
        let frame = source.read_frame().unwrap().unwrap();
        assert_eq!(frame.width, 4);
        assert_eq!(frame.height, 2);
        assert_eq!(frame.data.len(), format.frame_len());
    }

    #[test]
    fn test_frame_limit_ends_stream() {
        let mut source = TestPatternSource::new(2, 2, 10).with_frame_limit(3);
        source.open().unwrap();
        for _ in 0..3 {
            assert!(source.read_frame().unwrap().is_some());
        }
        assert!(source.read_frame().unwrap().is_none());
        assert_eq!(source.emitted(), 3);
    }

    #[test]
    fn test_invalid_format_is_rejected() {
        let mut source = TestPatternSource::new(2, 2, 0);
        assert!(matches!(
            source.open(),
            Err(CaptureError::InvalidParameters(_))
        ));
    }

    #[test]
    fn test_realtime_paces_frames() {
        let mut source = TestPatternSource::new(2, 2, 50).realtime(true);
        source.open().unwrap();
        let start = Instant::now();
        for _ in 0..5 {
            source.read_frame().unwrap();
        }
        // Frames 1..=4 each wait one 20ms interval.
        assert!(start.elapsed() >= Duration::from_millis(75));
    }
}
