//! The chunk recorder.
//!
//! One long-lived thread owns the capture device and rolls its output into
//! fixed-length chunk files. Chunk boundaries are counted in captured frames
//! at the nominal frame rate, so the recorder tolerates wall-clock drift.
//!
//! Each chunk is written under its `.partial` name and renamed to its final
//! name once closed. The previous chunk is always closed before the next one
//! opens, so at most one chunk is in progress at any instant and the presence
//! of a completed chunk implies every earlier chunk is complete too.

use crate::capture::{CaptureFormat, FrameSource, StopHandle};
use crate::chunks::scan_chunk_dir;
use crate::encoder::{ChunkEncoder, ChunkWriter};
use crate::error::{EncoderError, RecorderError};
use blackbox_common::naming::{chunk_file_name, chunk_path, partial_path, truncate_to_second};
use blackbox_common::{Clock, SystemClock};
use chrono::{Duration, NaiveDateTime};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

/// Static recorder parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecorderSettings {
    /// Flat directory receiving chunk files
    pub chunk_dir: PathBuf,
    /// Nominal chunk length in seconds
    pub chunk_seconds: u32,
    /// Keep only this many completed chunks; `None` keeps everything
    pub retain_chunks: Option<usize>,
}

/// Why the recording loop ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    /// A stop was requested through the handle
    Requested,
    /// The capture source ended cleanly
    SourceEnded,
    /// A frame could not be read mid-stream
    FrameReadFailed(String),
    /// A chunk could not be opened or written
    EncoderFailed(String),
}

/// Events broadcast while recording.
#[derive(Debug, Clone)]
pub enum RecorderEvent {
    ChunkOpened {
        start_time: NaiveDateTime,
        path: PathBuf,
    },
    ChunkClosed {
        start_time: NaiveDateTime,
        path: PathBuf,
        frames: u64,
        bytes: u64,
    },
    /// A chunk was deleted by the retention bound
    ChunkPruned { path: PathBuf },
    Stopped(StopReason),
}

/// Totals for one recording session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordingSummary {
    pub chunks_closed: usize,
    pub frames: u64,
    pub reason: StopReason,
}

/// A configured recorder, not yet running.
pub struct ChunkRecorder {
    settings: RecorderSettings,
    source: Box<dyn FrameSource>,
    encoder: Arc<dyn ChunkEncoder>,
    clock: Arc<dyn Clock>,
    event_tx: broadcast::Sender<RecorderEvent>,
}

impl ChunkRecorder {
    pub fn new(
        settings: RecorderSettings,
        source: Box<dyn FrameSource>,
        encoder: Arc<dyn ChunkEncoder>,
    ) -> Self {
        let (event_tx, _) = broadcast::channel(64);
        Self {
            settings,
            source,
            encoder,
            clock: Arc::new(SystemClock),
            event_tx,
        }
    }

    /// Use a different clock for chunk start times.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Subscribe to recorder events. Subscribe before `start` to see every event.
    pub fn subscribe(&self) -> broadcast::Receiver<RecorderEvent> {
        self.event_tx.subscribe()
    }

    /// Open the capture device and start the recording thread.
    ///
    /// Fails if the device cannot be opened; nothing is recorded in that case.
    pub fn start(mut self) -> Result<RecorderHandle, RecorderError> {
        let settings = self.settings.clone();
        if settings.chunk_seconds == 0 {
            return Err(RecorderError::InvalidSettings(
                "chunk_seconds must be at least 1".to_string(),
            ));
        }
        if settings.retain_chunks == Some(0) {
            return Err(RecorderError::InvalidSettings(
                "retain_chunks must keep at least one chunk".to_string(),
            ));
        }

        std::fs::create_dir_all(&settings.chunk_dir).map_err(|source| RecorderError::ChunkDir {
            path: settings.chunk_dir.clone(),
            source,
        })?;
        report_stale_partials(&settings);

        let format = self.source.open()?;
        let frames_per_chunk = (u64::from(format.fps) * u64::from(settings.chunk_seconds)).max(1);
        info!(
            dir = %settings.chunk_dir.display(),
            "Recorder started: {}x{} @ {} fps, {} frames per chunk",
            format.width, format.height, format.fps, frames_per_chunk
        );

        let stop_flag: StopHandle = Arc::new(AtomicBool::new(false));
        let event_tx = self.event_tx.clone();
        let session = RecordingSession {
            settings,
            format,
            frames_per_chunk,
            source: self.source,
            encoder: self.encoder,
            clock: self.clock,
            event_tx: self.event_tx,
            stop_flag: stop_flag.clone(),
            last_start: None,
            chunks_closed: 0,
        };

        let thread = std::thread::Builder::new()
            .name("chunk-recorder".to_string())
            .spawn(move || session.run())
            .map_err(RecorderError::Thread)?;

        Ok(RecorderHandle {
            stop_flag,
            thread: Some(thread),
            event_tx,
        })
    }
}

fn report_stale_partials(settings: &RecorderSettings) {
    match scan_chunk_dir(&settings.chunk_dir) {
        Ok(listing) => {
            for stale in &listing.in_progress {
                warn!(
                    chunk = %stale.file_name(),
                    "Found unfinished chunk from a previous run; it will not be selected"
                );
            }
        }
        Err(e) => warn!("Failed to scan chunk directory: {}", e),
    }
}

/// Handle to a running recorder.
///
/// Dropping the handle stops the recorder and waits for the open chunk to close.
pub struct RecorderHandle {
    stop_flag: StopHandle,
    thread: Option<JoinHandle<RecordingSummary>>,
    event_tx: broadcast::Sender<RecorderEvent>,
}

impl RecorderHandle {
    pub fn subscribe(&self) -> broadcast::Receiver<RecorderEvent> {
        self.event_tx.subscribe()
    }

    /// Ask the recording loop to stop after the current frame.
    pub fn request_stop(&self) {
        self.stop_flag.store(true, Ordering::SeqCst);
    }

    /// Stop recording, close the open chunk, and wait for the thread.
    pub fn stop(mut self) -> Result<RecordingSummary, RecorderError> {
        self.request_stop();
        self.wait()
    }

    /// Wait for the recording loop to end on its own.
    pub fn join(mut self) -> Result<RecordingSummary, RecorderError> {
        self.wait()
    }

    fn wait(&mut self) -> Result<RecordingSummary, RecorderError> {
        match self.thread.take() {
            Some(thread) => thread.join().map_err(|_| RecorderError::Panicked),
            None => Err(RecorderError::Panicked),
        }
    }
}

impl Drop for RecorderHandle {
    fn drop(&mut self) {
        if let Some(thread) = self.thread.take() {
            self.request_stop();
            if thread.join().is_err() {
                error!("Recorder thread panicked during shutdown");
            }
        }
    }
}

struct OpenChunk {
    start_time: NaiveDateTime,
    partial: PathBuf,
    writer: Box<dyn ChunkWriter>,
    frames: u64,
}

/// State owned by the recording thread.
struct RecordingSession {
    settings: RecorderSettings,
    format: CaptureFormat,
    frames_per_chunk: u64,
    source: Box<dyn FrameSource>,
    encoder: Arc<dyn ChunkEncoder>,
    clock: Arc<dyn Clock>,
    event_tx: broadcast::Sender<RecorderEvent>,
    stop_flag: StopHandle,
    last_start: Option<NaiveDateTime>,
    chunks_closed: usize,
}

impl RecordingSession {
    fn run(mut self) -> RecordingSummary {
        let mut current: Option<OpenChunk> = None;
        let mut frame_count = 0u64;

        let reason = loop {
            if self.stop_flag.load(Ordering::SeqCst) {
                info!("Stop requested");
                break StopReason::Requested;
            }

            let frame = match self.source.read_frame() {
                Ok(Some(frame)) => frame,
                Ok(None) => {
                    info!("Capture source ended");
                    break StopReason::SourceEnded;
                }
                Err(e) => {
                    error!("Frame read failed, stopping recorder: {}", e);
                    break StopReason::FrameReadFailed(e.to_string());
                }
            };

            if frame_count % self.frames_per_chunk == 0 {
                if let Some(chunk) = current.take() {
                    self.close_chunk(chunk);
                }
                match self.open_chunk() {
                    Ok(chunk) => current = Some(chunk),
                    Err(e) => {
                        error!("Failed to open chunk: {}", e);
                        break StopReason::EncoderFailed(e.to_string());
                    }
                }
            }

            if let Some(chunk) = current.as_mut() {
                if let Err(e) = chunk.writer.write_frame(&frame) {
                    error!("Failed to write frame: {}", e);
                    break StopReason::EncoderFailed(e.to_string());
                }
                chunk.frames += 1;
            }
            frame_count += 1;
        };

        if let Some(chunk) = current.take() {
            self.close_chunk(chunk);
        }
        self.source.close();

        info!(
            "Recorder stopped ({:?}): {} chunks, {} frames",
            reason, self.chunks_closed, frame_count
        );
        self.emit(RecorderEvent::Stopped(reason.clone()));

        RecordingSummary {
            chunks_closed: self.chunks_closed,
            frames: frame_count,
            reason,
        }
    }

    fn emit(&self, event: RecorderEvent) {
        // No subscribers is fine
        let _ = self.event_tx.send(event);
    }

    /// Pick a start second that is strictly after the previous chunk and not
    /// already taken in the directory.
    fn next_start_time(&self) -> NaiveDateTime {
        let dir = &self.settings.chunk_dir;
        let now = truncate_to_second(self.clock.now());
        let mut start = match self.last_start {
            Some(last) if now <= last => last + Duration::seconds(1),
            _ => now,
        };
        while chunk_path(dir, &start).exists() || partial_path(dir, &start).exists() {
            start += Duration::seconds(1);
        }
        if start != now {
            warn!(
                "Chunk start {} collides with an existing chunk, using {}",
                chunk_file_name(&now),
                chunk_file_name(&start)
            );
        }
        start
    }

    fn open_chunk(&mut self) -> Result<OpenChunk, EncoderError> {
        let start_time = self.next_start_time();
        let partial = partial_path(&self.settings.chunk_dir, &start_time);
        let writer = self.encoder.open(&partial, &self.format)?;
        self.last_start = Some(start_time);

        debug!(chunk = %chunk_file_name(&start_time), "Chunk opened");
        self.emit(RecorderEvent::ChunkOpened {
            start_time,
            path: partial.clone(),
        });

        Ok(OpenChunk {
            start_time,
            partial,
            writer,
            frames: 0,
        })
    }

    fn close_chunk(&mut self, chunk: OpenChunk) {
        let OpenChunk {
            start_time,
            partial,
            writer,
            frames,
        } = chunk;
        let name = chunk_file_name(&start_time);

        if let Err(e) = writer.finish() {
            error!(chunk = %name, "Failed to finalize chunk, leaving it unfinished: {}", e);
            return;
        }

        let final_path = chunk_path(&self.settings.chunk_dir, &start_time);
        if let Err(e) = std::fs::rename(&partial, &final_path) {
            error!(chunk = %name, "Failed to publish chunk: {}", e);
            return;
        }

        let bytes = std::fs::metadata(&final_path).map(|m| m.len()).unwrap_or(0);
        self.chunks_closed += 1;
        info!(chunk = %name, frames, bytes, "Chunk closed");
        self.emit(RecorderEvent::ChunkClosed {
            start_time,
            path: final_path,
            frames,
            bytes,
        });

        if let Some(keep) = self.settings.retain_chunks {
            self.prune(keep);
        }
    }

    /// Delete the oldest completed chunks beyond `keep`.
    fn prune(&self, keep: usize) {
        let listing = match scan_chunk_dir(&self.settings.chunk_dir) {
            Ok(listing) => listing,
            Err(e) => {
                warn!("Retention scan failed: {}", e);
                return;
            }
        };

        let excess = listing.completed.len().saturating_sub(keep);
        for chunk in listing.completed.into_iter().take(excess) {
            match std::fs::remove_file(&chunk.path) {
                Ok(()) => {
                    debug!(chunk = %chunk.file_name(), "Chunk pruned");
                    self.emit(RecorderEvent::ChunkPruned { path: chunk.path });
                }
                Err(e) => warn!(chunk = %chunk.file_name(), "Failed to prune chunk: {}", e),
            }
        }
    }
}
