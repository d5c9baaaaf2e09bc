//! Upload sinks that receive finished evidence bundles.

use crate::error::SinkError;
use crate::packager::{write_atomic, EvidenceBundle};
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::io;
use std::path::PathBuf;
use tracing::{info, warn};

/// Suffixed names tried before an outbox gives up on a bundle name.
const MAX_NAME_SUFFIX: u32 = 999;

/// What a sink reports back for an accepted bundle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitReceipt {
    /// Sink-specific identifier of the stored bundle
    pub id: String,
    /// Where the bundle ended up, for sinks that store locally
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<PathBuf>,
}

/// Receives evidence bundles. Implementations own the bundle once submitted.
pub trait UploadSink: Send + Sync {
    /// `name` is the preferred bundle name. A sink may store the bundle under
    /// a different id, reported in the receipt, when the name is taken.
    fn submit_bundle(&self, name: &str, bundle: EvidenceBundle) -> Result<SubmitReceipt, SinkError>;
}

/// Drops bundles into a local outbox directory for another process to ship.
///
/// Each bundle lands as `<name>.zip` plus `<name>.json`. The metadata file is
/// written last, so a consumer can treat its appearance as "bundle ready".
/// A taken name gets a `-1`, `-2`, ... suffix; names are claimed with
/// `create_new`, so concurrent submissions never overwrite each other.
#[derive(Debug, Clone)]
pub struct OutboxSink {
    dir: PathBuf,
}

impl OutboxSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &std::path::Path {
        &self.dir
    }

    /// Reserve `<name>.zip`, or the first free suffixed name.
    fn claim(&self, name: &str) -> Result<(String, PathBuf), SinkError> {
        for suffix in 0..=MAX_NAME_SUFFIX {
            let candidate = match suffix {
                0 => name.to_string(),
                n => format!("{name}-{n}"),
            };
            let path = self.dir.join(format!("{candidate}.zip"));
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(_) => {
                    if suffix > 0 {
                        warn!(bundle = %name, "Bundle name taken, queueing as {}", candidate);
                    }
                    return Ok((candidate, path));
                }
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Err(SinkError::Rejected(format!("no free bundle name for {}", name)))
    }
}

impl UploadSink for OutboxSink {
    fn submit_bundle(&self, name: &str, bundle: EvidenceBundle) -> Result<SubmitReceipt, SinkError> {
        if name.is_empty() || name.contains(['/', '\\']) || name.starts_with('.') {
            return Err(SinkError::Rejected(format!("invalid bundle name: {:?}", name)));
        }
        std::fs::create_dir_all(&self.dir)?;

        let (id, archive_path) = self.claim(name)?;
        let metadata_path = self.dir.join(format!("{id}.json"));

        let written = bundle
            .metadata_json()
            .map_err(SinkError::from)
            .and_then(|json| {
                write_atomic(&archive_path, &bundle.archive)?;
                write_atomic(&metadata_path, json.as_bytes())?;
                Ok(())
            });
        if let Err(e) = written {
            let _ = std::fs::remove_file(&archive_path);
            return Err(e);
        }

        info!(
            bundle = %id,
            bytes = bundle.archive.len(),
            "Bundle queued in outbox {}",
            self.dir.display()
        );
        Ok(SubmitReceipt {
            id,
            location: Some(archive_path),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use blackbox_common::BundleStats;
    use serde_json::{json, Map};
    use tempfile::TempDir;

    fn bundle() -> EvidenceBundle {
        let mut metadata = Map::new();
        metadata.insert("file_count".into(), json!(0));
        EvidenceBundle {
            archive: b"PK fake archive".to_vec(),
            metadata,
            stats: BundleStats::default(),
        }
    }

    #[test]
    fn test_outbox_writes_archive_and_metadata() {
        let dir = TempDir::new().unwrap();
        let sink = OutboxSink::new(dir.path().join("outbox"));

        let receipt = sink.submit_bundle("20250803134115", bundle()).unwrap();
        assert_eq!(receipt.id, "20250803134115");

        let outbox = dir.path().join("outbox");
        assert_eq!(
            std::fs::read(outbox.join("20250803134115.zip")).unwrap(),
            b"PK fake archive"
        );
        let meta: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(outbox.join("20250803134115.json")).unwrap())
                .unwrap();
        assert_eq!(meta["file_count"], json!(0));
        assert_eq!(std::fs::read_dir(&outbox).unwrap().count(), 2);
    }

    #[test]
    fn test_outbox_rejects_bad_names() {
        let dir = TempDir::new().unwrap();
        let sink = OutboxSink::new(dir.path());

        assert!(matches!(sink.submit_bundle("../a", bundle()), Err(SinkError::Rejected(_))));
        assert!(matches!(sink.submit_bundle("a/b", bundle()), Err(SinkError::Rejected(_))));
        assert!(matches!(sink.submit_bundle("", bundle()), Err(SinkError::Rejected(_))));
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_outbox_suffixes_taken_names() {
        let dir = TempDir::new().unwrap();
        let sink = OutboxSink::new(dir.path());

        let first = sink.submit_bundle("20250803134115", bundle()).unwrap();
        let second = sink.submit_bundle("20250803134115", bundle()).unwrap();
        let third = sink.submit_bundle("20250803134115", bundle()).unwrap();

        assert_eq!(first.id, "20250803134115");
        assert_eq!(second.id, "20250803134115-1");
        assert_eq!(third.id, "20250803134115-2");
        for id in ["20250803134115", "20250803134115-1", "20250803134115-2"] {
            assert_eq!(std::fs::read(dir.path().join(format!("{id}.zip"))).unwrap(), b"PK fake archive");
            assert!(dir.path().join(format!("{id}.json")).exists());
        }
    }

    #[test]
    fn test_concurrent_submissions_keep_every_bundle() {
        let dir = TempDir::new().unwrap();
        let sink = std::sync::Arc::new(OutboxSink::new(dir.path()));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let sink = sink.clone();
                std::thread::spawn(move || sink.submit_bundle("20250803134115", bundle()).unwrap())
            })
            .collect();
        let mut ids: Vec<String> = handles.into_iter().map(|h| h.join().unwrap().id).collect();
        ids.sort();
        ids.dedup();

        assert_eq!(ids.len(), 8);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 16);
    }
}
