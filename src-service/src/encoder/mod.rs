//! Chunk encoding using FFmpeg via ffmpeg-sidecar.
//!
//! On Windows and macOS FFmpeg is expected next to the service binary; on
//! Linux the system-installed FFmpeg from PATH is used.

pub mod probe;

use crate::capture::{CaptureFormat, CapturedFrame, BYTES_PER_PIXEL, PIXEL_FORMAT};
use crate::error::EncoderError;
use ffmpeg_sidecar::command::FfmpegCommand;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, Command, Stdio};
use std::thread::JoinHandle;
use tracing::{debug, info, warn};

pub use probe::{DurationProbe, FfprobeDuration, NominalDuration};

/// Resolve the path to the FFmpeg binary.
fn resolve_ffmpeg_path() -> PathBuf {
    #[cfg(target_os = "linux")]
    {
        PathBuf::from("ffmpeg")
    }
    #[cfg(not(target_os = "linux"))]
    {
        // ffmpeg-sidecar looks for ffmpeg next to current_exe().
        ffmpeg_sidecar::paths::ffmpeg_path()
    }
}

/// Create a new FfmpegCommand using the resolved FFmpeg path.
pub(crate) fn new_ffmpeg_command() -> FfmpegCommand {
    FfmpegCommand::new_with_path(resolve_ffmpeg_path())
}

/// Detect the best available H.264 encoder.
fn detect_h264_encoder() -> &'static str {
    let output = Command::new(resolve_ffmpeg_path())
        .args(["-encoders", "-hide_banner"])
        .output();

    let encoders_output = match output {
        Ok(o) => String::from_utf8_lossy(&o.stdout).to_string(),
        Err(e) => {
            warn!("Failed to run ffmpeg -encoders: {}", e);
            String::new()
        }
    };

    // Software first for compatibility, then hardware encoders.
    let encoder_preferences = [
        "libx264",
        "libopenh264",
        "h264_vaapi",
        "h264_nvenc",
        "h264_amf",
        "h264_qsv",
        "h264_videotoolbox",
        "h264_v4l2m2m",
    ];

    for encoder_name in encoder_preferences {
        if encoders_output
            .lines()
            .any(|l| l.split_whitespace().any(|word| word == encoder_name))
        {
            info!("Found H.264 encoder: {}", encoder_name);
            return encoder_name;
        }
    }

    warn!("No H.264 encoder detected in ffmpeg output, trying libx264");
    "libx264"
}

/// Opens a writer for each new chunk file.
pub trait ChunkEncoder: Send + Sync {
    /// Start writing a chunk to `path` for frames of `format`.
    fn open(&self, path: &Path, format: &CaptureFormat) -> Result<Box<dyn ChunkWriter>, EncoderError>;
}

/// Receives the frames of one chunk.
pub trait ChunkWriter: Send {
    fn write_frame(&mut self, frame: &CapturedFrame) -> Result<(), EncoderError>;

    /// Flush and close the chunk file.
    fn finish(self: Box<Self>) -> Result<(), EncoderError>;
}

/// H.264/MP4 chunks encoded by an FFmpeg child per chunk.
pub struct FfmpegChunkEncoder {
    encoder: &'static str,
}

impl FfmpegChunkEncoder {
    /// Probe FFmpeg for an H.264 encoder once; every chunk reuses it.
    pub fn detect() -> Self {
        Self {
            encoder: detect_h264_encoder(),
        }
    }

    pub fn with_encoder(encoder: &'static str) -> Self {
        Self { encoder }
    }

    pub fn encoder_name(&self) -> &'static str {
        self.encoder
    }

    fn build_command(&self, path: &Path, width: u32, height: u32, fps: u32) -> FfmpegCommand {
        let mut command = new_ffmpeg_command();
        command
            .args(["-f", "rawvideo"])
            .args(["-pix_fmt", PIXEL_FORMAT])
            .args(["-s", &format!("{}x{}", width, height)])
            .args(["-r", &fps.to_string()])
            .args(["-i", "-"]);

        command.args(["-c:v", self.encoder]);
        match self.encoder {
            "libx264" => {
                command.args(["-preset", "ultrafast"]).args(["-crf", "23"]);
            }
            "libopenh264" => {
                command.args(["-b:v", "2M"]);
            }
            "h264_vaapi" => {
                command.args(["-qp", "23"]);
            }
            "h264_nvenc" | "h264_amf" => {
                command
                    .args(["-preset", "p1"])
                    .args(["-rc", "vbr"])
                    .args(["-cq", "23"]);
            }
            other => debug!("Using generic options for encoder: {}", other),
        }

        command
            .args(["-pix_fmt", "yuv420p"])
            .args(["-movflags", "+faststart"])
            // The working filename ends in `.partial`, so the muxer must be explicit.
            .args(["-f", "mp4"])
            .args(["-y"])
            .arg(path.to_string_lossy().to_string());
        command
    }
}

impl ChunkEncoder for FfmpegChunkEncoder {
    fn open(&self, path: &Path, format: &CaptureFormat) -> Result<Box<dyn ChunkWriter>, EncoderError> {
        // Even dimensions are required by yuv420p
        let width = format.width & !1;
        let height = format.height & !1;
        if width == 0 || height == 0 {
            return Err(EncoderError::InvalidDimensions {
                width: format.width,
                height: format.height,
            });
        }

        let mut command = self.build_command(path, width, height, format.fps);
        let inner_command = command.as_inner_mut();
        inner_command.stdin(Stdio::piped());
        inner_command.stdout(Stdio::null());
        inner_command.stderr(Stdio::piped());

        let mut child = inner_command
            .spawn()
            .map_err(|e| EncoderError::Spawn(e.to_string()))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| EncoderError::Spawn("no stdin pipe".to_string()))?;

        // Drain stderr so FFmpeg never blocks on a full pipe; keep the last line for errors.
        let stderr_reader = child.stderr.take().map(|stderr| {
            std::thread::spawn(move || {
                let mut last = None;
                for line in BufReader::new(stderr).lines().map_while(Result::ok) {
                    debug!("[FFmpeg] {}", line);
                    last = Some(line);
                }
                last
            })
        });

        Ok(Box::new(FfmpegChunkWriter {
            stdin: Some(stdin),
            child: Some(child),
            stderr_reader,
            width,
            height,
        }))
    }
}

struct FfmpegChunkWriter {
    stdin: Option<ChildStdin>,
    child: Option<Child>,
    stderr_reader: Option<JoinHandle<Option<String>>>,
    width: u32,
    height: u32,
}

impl ChunkWriter for FfmpegChunkWriter {
    fn write_frame(&mut self, frame: &CapturedFrame) -> Result<(), EncoderError> {
        if frame.width < self.width || frame.height < self.height {
            warn!(
                "Skipping frame: dimensions {}x{} smaller than encoder {}x{}",
                frame.width, frame.height, self.width, self.height
            );
            return Ok(());
        }

        let Some(stdin) = self.stdin.as_mut() else {
            return Ok(());
        };

        if frame.width == self.width && frame.height == self.height {
            stdin.write_all(&frame.data).map_err(EncoderError::Write)?;
        } else {
            // Crop odd edges away row by row
            let src_row_bytes = frame.width as usize * BYTES_PER_PIXEL;
            let dst_row_bytes = self.width as usize * BYTES_PER_PIXEL;
            for y in 0..self.height as usize {
                let src_start = y * src_row_bytes;
                let src_end = src_start + dst_row_bytes;
                if src_end <= frame.data.len() {
                    stdin
                        .write_all(&frame.data[src_start..src_end])
                        .map_err(EncoderError::Write)?;
                }
            }
        }
        Ok(())
    }

    fn finish(mut self: Box<Self>) -> Result<(), EncoderError> {
        // Closing stdin signals end of input
        drop(self.stdin.take());

        let Some(mut child) = self.child.take() else {
            return Ok(());
        };
        let status = child.wait()?;
        let last_line = self
            .stderr_reader
            .take()
            .and_then(|reader| reader.join().ok())
            .flatten();

        if !status.success() {
            return Err(EncoderError::Finalize(last_line.unwrap_or_else(|| {
                format!("exit code {:?}", status.code())
            })));
        }
        Ok(())
    }
}

impl Drop for FfmpegChunkWriter {
    fn drop(&mut self) {
        drop(self.stdin.take());
        if let Some(mut child) = self.child.take() {
            let _ = child.kill();
            let _ = child.wait();
        }
    }
}

/// Chunks holding the raw RGB24 frames, for hosts without FFmpeg.
///
/// The files keep the `.mp4` chunk name so naming and selection stay uniform,
/// but they are headerless `rawvideo` and will not play as MP4.
#[derive(Debug, Clone, Copy, Default)]
pub struct RawChunkEncoder;

impl ChunkEncoder for RawChunkEncoder {
    fn open(&self, path: &Path, format: &CaptureFormat) -> Result<Box<dyn ChunkWriter>, EncoderError> {
        if format.width == 0 || format.height == 0 {
            return Err(EncoderError::InvalidDimensions {
                width: format.width,
                height: format.height,
            });
        }
        let file = File::create(path)?;
        Ok(Box::new(RawChunkWriter {
            out: BufWriter::new(file),
        }))
    }
}

struct RawChunkWriter {
    out: BufWriter<File>,
}

impl ChunkWriter for RawChunkWriter {
    fn write_frame(&mut self, frame: &CapturedFrame) -> Result<(), EncoderError> {
        self.out.write_all(&frame.data).map_err(EncoderError::Write)
    }

    fn finish(self: Box<Self>) -> Result<(), EncoderError> {
        let this = *self;
        let file = this
            .out
            .into_inner()
            .map_err(|e| EncoderError::Write(e.into_error()))?;
        file.sync_all()?;
        Ok(())
    }
}

/// Ensure FFmpeg is available. Should be called once at service startup.
///
/// On Linux, falls back to ffmpeg-sidecar's auto-download when the system
/// binary is missing.
pub fn ensure_ffmpeg_blocking() -> Result<(), EncoderError> {
    let ffmpeg = resolve_ffmpeg_path();
    debug!("Resolved FFmpeg path: {}", ffmpeg.display());

    match Command::new(&ffmpeg)
        .arg("-version")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
    {
        Ok(status) if status.success() => {
            info!("FFmpeg binary verified");
            Ok(())
        }
        Ok(status) => Err(EncoderError::Unavailable(format!(
            "{} exited with status: {}",
            ffmpeg.display(),
            status
        ))),
        Err(e) => {
            warn!("FFmpeg not found at {}: {}", ffmpeg.display(), e);
            #[cfg(target_os = "linux")]
            {
                info!("Attempting FFmpeg auto-download...");
                ffmpeg_sidecar::download::auto_download()
                    .map_err(|e| EncoderError::Unavailable(format!("auto-download failed: {}", e)))
            }
            #[cfg(not(target_os = "linux"))]
            {
                Err(EncoderError::Unavailable(format!(
                    "FFmpeg not found at {}",
                    ffmpeg.display()
                )))
            }
        }
    }
}
