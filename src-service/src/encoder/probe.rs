//! Chunk duration estimation.

use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use tracing::debug;

/// Estimates the media duration of a chunk file.
///
/// `None` means unknown; probing never fails the caller.
pub trait DurationProbe: Send + Sync {
    fn duration_secs(&self, path: &Path) -> Option<f64>;
}

/// Reads the container duration with ffprobe.
#[derive(Debug, Clone, Default)]
pub struct FfprobeDuration;

fn resolve_ffprobe_path() -> PathBuf {
    #[cfg(target_os = "linux")]
    {
        PathBuf::from("ffprobe")
    }
    #[cfg(not(target_os = "linux"))]
    {
        ffmpeg_sidecar::ffprobe::ffprobe_path()
    }
}

/// Parse ffprobe's bare `format=duration` output.
fn parse_duration(output: &str) -> Option<f64> {
    output
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|secs| secs.is_finite() && *secs >= 0.0)
}

impl DurationProbe for FfprobeDuration {
    fn duration_secs(&self, path: &Path) -> Option<f64> {
        let output = Command::new(resolve_ffprobe_path())
            .args(["-v", "error"])
            .args(["-show_entries", "format=duration"])
            .args(["-of", "default=noprint_wrappers=1:nokey=1"])
            .arg(path)
            .stdin(Stdio::null())
            .stderr(Stdio::null())
            .output();

        match output {
            Ok(o) if o.status.success() => {
                let duration = parse_duration(&String::from_utf8_lossy(&o.stdout));
                if duration.is_none() {
                    debug!("ffprobe reported no duration for {}", path.display());
                }
                duration
            }
            Ok(o) => {
                debug!("ffprobe failed for {}: {:?}", path.display(), o.status.code());
                None
            }
            Err(e) => {
                debug!("ffprobe unavailable: {}", e);
                None
            }
        }
    }
}

/// Assumes every chunk has its nominal length, or reports unknown when
/// constructed with `None`.
#[derive(Debug, Clone, Copy)]
pub struct NominalDuration(pub Option<f64>);

impl DurationProbe for NominalDuration {
    fn duration_secs(&self, _path: &Path) -> Option<f64> {
        self.0
    }
}
