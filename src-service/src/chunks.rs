//! Listing the shared chunk directory.
//!
//! The directory listing is the only index of recorded chunks. Files whose
//! names do not parse as chunk names are ignored.

use blackbox_common::naming::{parse_chunk_file_name, parse_partial_file_name};
use blackbox_common::ChunkInfo;
use std::io;
use std::path::Path;

/// Chunks found in a directory, each list sorted by start time.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChunkListing {
    /// Closed chunks, safe to read in full
    pub completed: Vec<ChunkInfo>,
    /// Chunks still being written (`.partial`)
    pub in_progress: Vec<ChunkInfo>,
}

impl ChunkListing {
    fn push(&mut self, name: &str, path: &Path) {
        if let Some(start_time) = parse_chunk_file_name(name) {
            self.completed.push(ChunkInfo::new(start_time, path));
        } else if let Some(start_time) = parse_partial_file_name(name) {
            self.in_progress.push(ChunkInfo::new(start_time, path));
        }
    }

    fn sort(mut self) -> Self {
        self.completed.sort_by(|a, b| a.start_time.cmp(&b.start_time));
        self.in_progress.sort_by(|a, b| a.start_time.cmp(&b.start_time));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.completed.is_empty() && self.in_progress.is_empty()
    }
}

/// List `dir`. A directory that does not exist yet lists as empty.
pub fn scan_chunk_dir(dir: &Path) -> io::Result<ChunkListing> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(ChunkListing::default()),
        Err(e) => return Err(e),
    };

    let mut listing = ChunkListing::default();
    for entry in entries {
        let entry = entry?;
        if let Some(name) = entry.file_name().to_str() {
            listing.push(name, &entry.path());
        }
    }
    Ok(listing.sort())
}

/// Async variant of [`scan_chunk_dir`] for use on the Tokio runtime.
pub async fn scan_chunk_dir_async(dir: &Path) -> io::Result<ChunkListing> {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(ChunkListing::default()),
        Err(e) => return Err(e),
    };

    let mut listing = ChunkListing::default();
    while let Some(entry) = entries.next_entry().await? {
        if let Some(name) = entry.file_name().to_str() {
            listing.push(name, &entry.path());
        }
    }
    Ok(listing.sort())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn touch(dir: &Path, name: &str) {
        std::fs::write(dir.join(name), b"x").unwrap();
    }

    #[test]
    fn test_scan_classifies_and_sorts() {
        let dir = TempDir::new().unwrap();
        touch(dir.path(), "20250803134108.mp4");
        touch(dir.path(), "20250803134048.mp4");
        touch(dir.path(), "20250803134118.mp4.partial");
        touch(dir.path(), "notes.txt");
        touch(dir.path(), "20250803134058.mov");

        let listing = scan_chunk_dir(dir.path()).unwrap();
        let completed: Vec<String> = listing.completed.iter().map(ChunkInfo::file_name).collect();
        assert_eq!(completed, vec!["20250803134048.mp4", "20250803134108.mp4"]);
        assert_eq!(listing.in_progress.len(), 1);
        assert_eq!(listing.in_progress[0].file_name(), "20250803134118.mp4.partial");
    }

    #[test]
    fn test_missing_directory_is_empty() {
        let dir = TempDir::new().unwrap();
        let listing = scan_chunk_dir(&dir.path().join("never-created")).unwrap();
        assert!(listing.is_empty());
    }

    #[tokio::test]
    async fn test_async_scan_matches_sync_scan() {
        let dir = TempDir::new().unwrap();
        touch(dir.path(), "20250803134058.mp4");
        touch(dir.path(), "20250803134048.mp4");
        touch(dir.path(), "20250803134108.mp4.partial");

        let sync = scan_chunk_dir(dir.path()).unwrap();
        let async_listing = scan_chunk_dir_async(dir.path()).await.unwrap();
        assert_eq!(sync, async_listing);
    }
}
