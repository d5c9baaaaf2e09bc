//! Error types for the recording and evidence pipeline.

use crate::capture::CaptureError;
use std::path::PathBuf;
use thiserror::Error;

/// Error type for chunk encoding.
#[derive(Debug, Error)]
pub enum EncoderError {
    #[error("FFmpeg unavailable: {0}")]
    Unavailable(String),
    #[error("Invalid dimensions: {width}x{height}")]
    InvalidDimensions { width: u32, height: u32 },
    #[error("Failed to start FFmpeg: {0}")]
    Spawn(String),
    #[error("Failed to write frame: {0}")]
    Write(#[source] std::io::Error),
    #[error("FFmpeg failed: {0}")]
    Finalize(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Error type for the chunk recorder.
#[derive(Debug, Error)]
pub enum RecorderError {
    /// The capture device could not be opened at start; the pipeline cannot run.
    #[error("Recorder cannot start: {0}")]
    Device(#[from] CaptureError),
    #[error("Invalid recorder settings: {0}")]
    InvalidSettings(String),
    #[error("Chunk directory {path}: {source}")]
    ChunkDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to spawn recorder thread: {0}")]
    Thread(#[source] std::io::Error),
    #[error("Recorder thread panicked")]
    Panicked,
}

/// Error type for evidence selection.
#[derive(Debug, Error)]
pub enum SelectorError {
    #[error("Failed to scan chunk directory {path}: {source}")]
    Scan {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Error type for bundle packaging.
#[derive(Debug, Error)]
pub enum PackageError {
    /// A selected chunk disappeared between selection and packaging.
    #[error("Selected chunk is missing: {0}")]
    MissingChunk(PathBuf),
    #[error("Failed to read chunk {path}: {source}")]
    ReadChunk {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to write archive: {0}")]
    Archive(#[from] zip::result::ZipError),
    #[error("Failed to write bundle: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to serialize metadata: {0}")]
    Metadata(#[from] serde_json::Error),
}

/// Error type for upload sinks.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("Bundle rejected: {0}")]
    Rejected(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("Failed to serialize metadata: {0}")]
    Metadata(#[from] serde_json::Error),
}

/// Error type for the trigger-to-upload pipeline.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Select(#[from] SelectorError),
    #[error(transparent)]
    Package(#[from] PackageError),
    #[error("Upload failed: {0}")]
    Submit(#[from] SinkError),
    #[error("Background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Error type for configuration files.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}
