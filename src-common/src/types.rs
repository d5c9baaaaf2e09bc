//! Shared types for chunk selection and evidence packaging.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// A chunk file in the recording directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkInfo {
    /// Moment recording of this chunk began (second precision)
    pub start_time: NaiveDateTime,
    /// Location of the chunk file
    pub path: PathBuf,
}

impl ChunkInfo {
    pub fn new(start_time: NaiveDateTime, path: impl Into<PathBuf>) -> Self {
        Self {
            start_time,
            path: path.into(),
        }
    }

    /// Filename of the chunk, or an empty string for a bare root path.
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

/// An external trigger, consumed once by the evidence selector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerEvent {
    /// When the trigger condition was recognized (sub-second precision allowed)
    pub fired_at: NaiveDateTime,
    /// The transcript or reason that fired the trigger, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

impl TriggerEvent {
    pub fn new(fired_at: NaiveDateTime) -> Self {
        Self {
            fired_at,
            text: None,
        }
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }
}

/// The chunks selected around one trigger.
///
/// Holds at most one anchor chunk (the first chunk starting at or after the
/// trigger) and the selected chunks that started before it, kept oldest first.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct EvidenceWindow {
    anchor: Option<ChunkInfo>,
    pre: Vec<ChunkInfo>,
}

impl EvidenceWindow {
    /// Build a window; `pre` may be given in any order.
    pub fn new(anchor: Option<ChunkInfo>, mut pre: Vec<ChunkInfo>) -> Self {
        pre.sort_by(|a, b| a.start_time.cmp(&b.start_time));
        Self { anchor, pre }
    }

    /// The anchor post-trigger chunk, if one was found.
    pub fn anchor(&self) -> Option<&ChunkInfo> {
        self.anchor.as_ref()
    }

    /// Selected pre-trigger chunks, oldest first.
    pub fn pre_chunks(&self) -> &[ChunkInfo] {
        &self.pre
    }

    /// Chunks in hand-off order: anchor first, then pre-trigger chunks oldest
    /// to newest.
    pub fn chunks(&self) -> impl Iterator<Item = &ChunkInfo> {
        self.anchor.iter().chain(self.pre.iter())
    }

    /// Paths in hand-off order.
    pub fn paths(&self) -> Vec<PathBuf> {
        self.chunks().map(|c| c.path.clone()).collect()
    }

    /// Chunks sorted strictly by start time.
    pub fn chronological(&self) -> Vec<&ChunkInfo> {
        let mut chunks: Vec<&ChunkInfo> = self.chunks().collect();
        chunks.sort_by(|a, b| a.start_time.cmp(&b.start_time));
        chunks
    }

    pub fn len(&self) -> usize {
        self.pre.len() + usize::from(self.anchor.is_some())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A location tag attached to an evidence bundle.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub lat: f64,
    pub lng: f64,
    /// False when the coordinates are configured or simulated rather than a live fix
    #[serde(default)]
    pub valid: bool,
}

/// Per-chunk statistics recorded in a bundle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkStat {
    /// Archive entry name
    pub name: String,
    /// Uncompressed size in bytes
    pub bytes: u64,
    /// Media duration in seconds, if it could be determined
    pub duration_secs: Option<f64>,
}

/// Aggregate statistics of a packaged bundle.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct BundleStats {
    pub file_count: usize,
    /// Sum of uncompressed chunk sizes
    pub total_bytes: u64,
    /// Size of the finished archive
    pub archive_bytes: u64,
    /// Sum of chunk durations; `None` if any chunk's duration is unknown
    pub total_duration_secs: Option<f64>,
    pub chunks: Vec<ChunkStat>,
}
