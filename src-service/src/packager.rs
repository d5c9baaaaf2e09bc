//! Evidence bundle packaging.
//!
//! The archive is assembled in memory and only becomes visible on disk
//! through an atomic rename, so a failure part-way through never leaves a
//! truncated bundle behind.

use crate::encoder::DurationProbe;
use crate::error::PackageError;
use blackbox_common::{BundleStats, ChunkStat, EvidenceWindow};
use serde_json::{json, Map, Value};
use std::fs::File;
use std::io::{self, Cursor, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

/// Default deflate level.
pub const DEFAULT_COMPRESSION_LEVEL: u32 = 6;

/// Chunk format reported when none is set.
pub const DEFAULT_CHUNK_FORMAT: &str = "mp4";

/// A packaged evidence window, ready for an upload sink.
#[derive(Debug, Clone)]
pub struct EvidenceBundle {
    /// Zip archive with one entry per chunk, in window order
    pub archive: Vec<u8>,
    /// Caller metadata merged with the bundle statistics
    pub metadata: Map<String, Value>,
    pub stats: BundleStats,
}

impl EvidenceBundle {
    /// Metadata as pretty JSON.
    pub fn metadata_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(&self.metadata)
    }

    /// Write the archive to `path` atomically.
    pub fn write_archive(&self, path: &Path) -> io::Result<()> {
        write_atomic(path, &self.archive)
    }

    /// Write the metadata document to `path` atomically.
    pub fn write_metadata(&self, path: &Path) -> Result<(), PackageError> {
        let json = self.metadata_json()?;
        write_atomic(path, json.as_bytes())?;
        Ok(())
    }
}

/// Write `bytes` to a sibling temp file, then rename it over `path`.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let tmp = temp_sibling(path);
    let result = (|| {
        let mut file = File::create(&tmp)?;
        file.write_all(bytes)?;
        file.sync_all()?;
        std::fs::rename(&tmp, path)
    })();
    if result.is_err() {
        let _ = std::fs::remove_file(&tmp);
    }
    result
}

fn temp_sibling(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".tmp");
    path.with_file_name(name)
}

/// Compresses evidence windows into zip bundles.
pub struct BundlePackager {
    compression_level: u32,
    probe: Arc<dyn DurationProbe>,
    format: String,
}

impl BundlePackager {
    pub fn new(compression_level: u32, probe: Arc<dyn DurationProbe>) -> Self {
        Self {
            compression_level: compression_level.min(9),
            probe,
            format: DEFAULT_CHUNK_FORMAT.to_string(),
        }
    }

    /// Set the chunk format recorded in the metadata (`mp4`, `rawvideo`).
    pub fn with_format(mut self, format: impl Into<String>) -> Self {
        self.format = format.into();
        self
    }

    /// Package every chunk of `window`, in hand-off order, with `metadata`.
    ///
    /// A chunk that vanished since selection fails the whole bundle.
    pub fn package(
        &self,
        window: &EvidenceWindow,
        metadata: Map<String, Value>,
    ) -> Result<EvidenceBundle, PackageError> {
        let options = SimpleFileOptions::default()
            .compression_method(CompressionMethod::Deflated)
            .compression_level(Some(i64::from(self.compression_level)));

        let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
        let mut chunks = Vec::with_capacity(window.len());

        for chunk in window.chunks() {
            let path = &chunk.path;
            let mut file = match File::open(path) {
                Ok(file) => file,
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    warn!("Selected chunk disappeared before packaging: {}", path.display());
                    return Err(PackageError::MissingChunk(path.clone()));
                }
                Err(source) => {
                    return Err(PackageError::ReadChunk {
                        path: path.clone(),
                        source,
                    })
                }
            };

            let name = chunk.file_name();
            zip.start_file(name.as_str(), options)?;
            let bytes = io::copy(&mut file, &mut zip).map_err(|source| PackageError::ReadChunk {
                path: path.clone(),
                source,
            })?;
            let duration_secs = self.probe.duration_secs(path);
            debug!(chunk = %name, bytes, ?duration_secs, "Chunk added to bundle");

            chunks.push(ChunkStat {
                name,
                bytes,
                duration_secs,
            });
        }

        let archive = zip.finish()?.into_inner();
        let stats = BundleStats {
            file_count: chunks.len(),
            total_bytes: chunks.iter().map(|c| c.bytes).sum(),
            archive_bytes: archive.len() as u64,
            total_duration_secs: chunks.iter().map(|c| c.duration_secs).sum(),
            chunks,
        };

        info!(
            files = stats.file_count,
            total_bytes = stats.total_bytes,
            archive_bytes = stats.archive_bytes,
            "Evidence bundle packaged"
        );

        let metadata = merge_metadata(metadata, &stats, &self.format);
        Ok(EvidenceBundle {
            archive,
            metadata,
            stats,
        })
    }
}

fn merge_metadata(mut metadata: Map<String, Value>, stats: &BundleStats, format: &str) -> Map<String, Value> {
    let files: Vec<&str> = stats.chunks.iter().map(|c| c.name.as_str()).collect();
    metadata.insert("file_type".into(), json!("blackbox_video"));
    metadata.insert("format".into(), json!(format));
    metadata.insert("files".into(), json!(files));
    metadata.insert("file_count".into(), json!(stats.file_count));
    metadata.insert("total_bytes".into(), json!(stats.total_bytes));
    metadata.insert("total_duration_secs".into(), json!(stats.total_duration_secs));
    metadata.insert("chunks".into(), json!(stats.chunks));
    metadata
}
