//! Evidence window selection.
//!
//! Given the moment a trigger fired, pick the chunks that bracket it: the
//! first chunk starting at or after the trigger (the anchor) plus the most
//! recent chunks that started before it. The selector only reads the chunk
//! directory, so any number of selections may run at once alongside the
//! recorder.

use crate::chunks::{scan_chunk_dir_async, ChunkListing};
use crate::error::SelectorError;
use blackbox_common::{ChunkInfo, EvidenceWindow};
use chrono::NaiveDateTime;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

/// A trigger at least this many seconds after the newest pre-trigger chunk
/// started gets one extra pre-trigger chunk of context.
pub const GAP_THRESHOLD_SECS: i64 = 5;

/// Pre-trigger chunks kept when the gap reaches [`GAP_THRESHOLD_SECS`].
pub const PRE_CHUNKS_LONG_GAP: usize = 3;

/// Pre-trigger chunks kept when the gap is shorter than [`GAP_THRESHOLD_SECS`].
pub const PRE_CHUNKS_SHORT_GAP: usize = 2;

/// Pre-trigger chunks kept when no chunk started at or after the trigger.
pub const PRE_CHUNKS_NO_ANCHOR: usize = 4;

/// Timing of one selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SelectorSettings {
    /// Pause before the first directory read, letting the chunk open at
    /// trigger time roll over
    pub grace: Duration,
    /// Upper bound on waiting for the anchor chunk to complete
    pub completion_wait: Duration,
    /// Delay between directory reads while waiting
    pub poll_interval: Duration,
}

impl Default for SelectorSettings {
    fn default() -> Self {
        Self {
            grace: Duration::from_secs(1),
            completion_wait: Duration::from_secs(25),
            poll_interval: Duration::from_millis(250),
        }
    }
}

/// Outcome of a selection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selection {
    Found(EvidenceWindow),
    /// No completed chunk exists at all; not an error
    NoEvidence,
}

impl Selection {
    pub fn window(&self) -> Option<&EvidenceWindow> {
        match self {
            Selection::Found(window) => Some(window),
            Selection::NoEvidence => None,
        }
    }

    pub fn into_window(self) -> Option<EvidenceWindow> {
        match self {
            Selection::Found(window) => Some(window),
            Selection::NoEvidence => None,
        }
    }
}

/// Apply the selection policy to a set of completed chunks.
///
/// Returns `None` when `chunks` is empty. The result does not depend on the
/// order of `chunks`. Without an anchor the gap rule does not apply and up to
/// [`PRE_CHUNKS_NO_ANCHOR`] earlier chunks are returned instead.
pub fn select_window(chunks: &[ChunkInfo], fired_at: NaiveDateTime) -> Option<EvidenceWindow> {
    let (mut pre, mut post): (Vec<&ChunkInfo>, Vec<&ChunkInfo>) =
        chunks.iter().partition(|c| c.start_time < fired_at);
    pre.sort_by(|a, b| b.start_time.cmp(&a.start_time));
    post.sort_by(|a, b| a.start_time.cmp(&b.start_time));

    let anchor = post.first().map(|c| (*c).clone());

    let threshold = chrono::Duration::seconds(GAP_THRESHOLD_SECS);
    let wanted = match (&anchor, pre.first()) {
        (None, _) => PRE_CHUNKS_NO_ANCHOR,
        (Some(_), Some(newest)) if fired_at - newest.start_time >= threshold => PRE_CHUNKS_LONG_GAP,
        (Some(_), _) => PRE_CHUNKS_SHORT_GAP,
    };
    let selected: Vec<ChunkInfo> = pre.into_iter().take(wanted).cloned().collect();

    let window = EvidenceWindow::new(anchor, selected);
    if window.is_empty() {
        None
    } else {
        Some(window)
    }
}

/// Selects evidence from one chunk directory.
#[derive(Debug, Clone)]
pub struct EvidenceSelector {
    chunk_dir: PathBuf,
    settings: SelectorSettings,
}

impl EvidenceSelector {
    pub fn new(chunk_dir: impl Into<PathBuf>, settings: SelectorSettings) -> Self {
        Self {
            chunk_dir: chunk_dir.into(),
            settings,
        }
    }

    pub fn chunk_dir(&self) -> &Path {
        &self.chunk_dir
    }

    pub fn settings(&self) -> &SelectorSettings {
        &self.settings
    }

    /// Select the evidence window for a trigger fired at `fired_at`.
    ///
    /// Waits the grace period, then for a completed anchor chunk for at most
    /// `completion_wait`. If none appears (the recorder stopped, say) the
    /// pre-trigger chunks alone are returned. Dropping the future cancels the
    /// wait.
    pub async fn select_evidence(&self, fired_at: NaiveDateTime) -> Result<Selection, SelectorError> {
        if !self.settings.grace.is_zero() {
            tokio::time::sleep(self.settings.grace).await;
        }

        let completed = match tokio::time::timeout(
            self.settings.completion_wait,
            self.wait_for_anchor(fired_at),
        )
        .await
        {
            Ok(completed) => completed?,
            Err(_) => {
                warn!(
                    %fired_at,
                    "No completed chunk after trigger within {:?}, using earlier chunks only",
                    self.settings.completion_wait
                );
                self.scan().await?.completed
            }
        };

        Ok(self.finish(&completed, fired_at))
    }

    /// Apply the policy to the directory as it is now, without waiting.
    pub async fn select_now(&self, fired_at: NaiveDateTime) -> Result<Selection, SelectorError> {
        let listing = self.scan().await?;
        Ok(self.finish(&listing.completed, fired_at))
    }

    fn finish(&self, completed: &[ChunkInfo], fired_at: NaiveDateTime) -> Selection {
        match select_window(completed, fired_at) {
            Some(window) => {
                let anchor = window.anchor().map(ChunkInfo::file_name).unwrap_or_default();
                info!(
                    %fired_at,
                    chunks = window.len(),
                    anchor = %anchor,
                    "Evidence window selected"
                );
                Selection::Found(window)
            }
            None => {
                info!(%fired_at, "No evidence available");
                Selection::NoEvidence
            }
        }
    }

    async fn wait_for_anchor(&self, fired_at: NaiveDateTime) -> Result<Vec<ChunkInfo>, SelectorError> {
        loop {
            let listing = self.scan().await?;
            if listing.completed.iter().any(|c| c.start_time >= fired_at) {
                return Ok(listing.completed);
            }
            debug!(
                in_progress = listing.in_progress.len(),
                "Anchor chunk not complete yet"
            );
            tokio::time::sleep(self.settings.poll_interval).await;
        }
    }

    async fn scan(&self) -> Result<ChunkListing, SelectorError> {
        scan_chunk_dir_async(&self.chunk_dir)
            .await
            .map_err(|source| SelectorError::Scan {
                path: self.chunk_dir.clone(),
                source,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use blackbox_common::naming::{chunk_file_name, parse_stamp, partial_file_name};
    use proptest::prelude::*;
    use tempfile::TempDir;

    fn at(stamp: &str) -> NaiveDateTime {
        parse_stamp(stamp).unwrap()
    }

    fn chunk(stamp: &str) -> ChunkInfo {
        let t = at(stamp);
        ChunkInfo::new(t, format!("/chunks/{}", chunk_file_name(&t)))
    }

    fn names(window: &EvidenceWindow) -> Vec<String> {
        window.chunks().map(|c| c.file_name()[..14].to_string()).collect()
    }

    fn touch(dir: &Path, name: &str) {
        std::fs::write(dir.join(name), b"chunk").unwrap();
    }

    fn fast_settings(wait_ms: u64) -> SelectorSettings {
        SelectorSettings {
            grace: Duration::ZERO,
            completion_wait: Duration::from_millis(wait_ms),
            poll_interval: Duration::from_millis(10),
        }
    }

    #[test]
    fn test_concrete_scenario() {
        let chunks = vec![
            chunk("20250803134048"),
            chunk("20250803134058"),
            chunk("20250803134108"),
            chunk("20250803134118"),
        ];
        let window = select_window(&chunks, at("20250803134115")).unwrap();
        assert_eq!(
            names(&window),
            vec![
                "20250803134118",
                "20250803134048",
                "20250803134058",
                "20250803134108",
            ]
        );
    }

    #[test]
    fn test_gap_threshold_boundary() {
        let chunks = vec![
            chunk("20250803134020"),
            chunk("20250803134030"),
            chunk("20250803134040"),
            chunk("20250803134050"),
            chunk("20250803134100"),
        ];

        let exactly_five = at("20250803134055");
        let window = select_window(&chunks, exactly_five).unwrap();
        assert_eq!(window.len(), 4);
        assert_eq!(window.pre_chunks().len(), 3);

        let just_under = exactly_five - chrono::Duration::milliseconds(1);
        let window = select_window(&chunks, just_under).unwrap();
        assert_eq!(window.len(), 3);
        assert_eq!(
            names(&window),
            vec!["20250803134100", "20250803134040", "20250803134050"]
        );
    }

    #[test]
    fn test_fewer_pre_chunks_than_wanted() {
        let chunks = vec![chunk("20250803134048"), chunk("20250803134058")];
        let window = select_window(&chunks, at("20250803134105")).unwrap();
        assert_eq!(names(&window), vec!["20250803134058"]);
        assert!(window.anchor().is_some());

        let window = select_window(&chunks[..1], at("20250803134055")).unwrap();
        assert!(window.anchor().is_none());
        assert_eq!(names(&window), vec!["20250803134048"]);
    }

    #[test]
    fn test_trigger_on_chunk_start_is_anchor() {
        let chunks = vec![chunk("20250803134048"), chunk("20250803134058")];
        let window = select_window(&chunks, at("20250803134058")).unwrap();
        assert_eq!(window.anchor().unwrap().file_name(), "20250803134058.mp4");
        assert_eq!(window.pre_chunks().len(), 1);
    }

    #[test]
    fn test_only_first_post_chunk_is_taken() {
        let chunks = vec![
            chunk("20250803134048"),
            chunk("20250803134058"),
            chunk("20250803134108"),
        ];
        let window = select_window(&chunks, at("20250803134050")).unwrap();
        assert_eq!(names(&window), vec!["20250803134058", "20250803134048"]);
    }

    #[test]
    fn test_no_chunks_no_window() {
        assert!(select_window(&[], at("20250803134048")).is_none());
    }

    fn arb_chunks() -> impl Strategy<Value = (Vec<ChunkInfo>, NaiveDateTime)> {
        let base = at("20250803120000");
        (
            proptest::collection::btree_set(0i64..3600, 0..12),
            0i64..3_600_000,
        )
            .prop_map(move |(offsets, fired_ms)| {
                let chunks = offsets
                    .into_iter()
                    .map(|s| {
                        let t = base + chrono::Duration::seconds(s);
                        ChunkInfo::new(t, format!("/chunks/{}", chunk_file_name(&t)))
                    })
                    .collect();
                (chunks, base + chrono::Duration::milliseconds(fired_ms))
            })
    }

    proptest! {
        #[test]
        fn prop_selection_is_bounded((chunks, fired_at) in arb_chunks()) {
            let mut pre: Vec<&ChunkInfo> = chunks.iter().filter(|c| c.start_time < fired_at).collect();
            pre.sort_by(|a, b| b.start_time.cmp(&a.start_time));
            let first_post = chunks.iter().filter(|c| c.start_time >= fired_at).map(|c| c.start_time).min();

            match select_window(&chunks, fired_at) {
                None => prop_assert!(chunks.is_empty()),
                Some(window) => {
                    prop_assert!(window.len() <= 4);
                    prop_assert_eq!(window.anchor().map(|c| c.start_time), first_post);
                    let deepest = if first_post.is_some() { 2 } else { 3 };
                    let oldest_allowed = pre.get(deepest).or(pre.last()).map(|c| c.start_time);
                    for c in window.pre_chunks() {
                        prop_assert!(c.start_time < fired_at);
                        prop_assert!(Some(c.start_time) >= oldest_allowed);
                    }
                    if !pre.is_empty() {
                        prop_assert_eq!(window.pre_chunks().last().map(|c| c.start_time), Some(pre[0].start_time));
                    }
                }
            }
        }

        #[test]
        fn prop_selection_is_deterministic((chunks, fired_at) in arb_chunks()) {
            let mut shuffled = chunks.clone();
            shuffled.reverse();
            prop_assert_eq!(select_window(&chunks, fired_at), select_window(&shuffled, fired_at));
        }
    }

    #[tokio::test]
    async fn test_empty_directory_is_no_evidence() {
        let dir = TempDir::new().unwrap();
        let selector = EvidenceSelector::new(dir.path(), fast_settings(50));
        let selection = selector.select_evidence(at("20250803134115")).await.unwrap();
        assert_eq!(selection, Selection::NoEvidence);

        let missing = EvidenceSelector::new(dir.path().join("absent"), fast_settings(0));
        assert_eq!(
            missing.select_evidence(at("20250803134115")).await.unwrap(),
            Selection::NoEvidence
        );
    }

    #[tokio::test]
    async fn test_selection_from_directory() {
        let dir = TempDir::new().unwrap();
        for stamp in ["20250803134048", "20250803134058", "20250803134108", "20250803134118"] {
            touch(dir.path(), &format!("{stamp}.mp4"));
        }
        touch(dir.path(), "README.txt");

        let selector = EvidenceSelector::new(dir.path(), fast_settings(1000));
        let first = selector.select_evidence(at("20250803134115")).await.unwrap();
        let second = selector.select_evidence(at("20250803134115")).await.unwrap();
        assert_eq!(first, second);

        let window = first.into_window().unwrap();
        assert_eq!(
            window.paths(),
            vec![
                dir.path().join("20250803134118.mp4"),
                dir.path().join("20250803134048.mp4"),
                dir.path().join("20250803134058.mp4"),
                dir.path().join("20250803134108.mp4"),
            ]
        );
    }

    #[tokio::test]
    async fn test_in_progress_chunks_are_never_selected() {
        let dir = TempDir::new().unwrap();
        touch(dir.path(), "20250803134048.mp4");
        touch(dir.path(), &partial_file_name(&at("20250803134118")));

        let selector = EvidenceSelector::new(dir.path(), fast_settings(60));
        let window = selector
            .select_evidence(at("20250803134115"))
            .await
            .unwrap()
            .into_window()
            .unwrap();

        assert!(window.anchor().is_none());
        assert_eq!(window.paths(), vec![dir.path().join("20250803134048.mp4")]);
    }

    #[tokio::test]
    async fn test_waits_for_anchor_to_complete() {
        let dir = TempDir::new().unwrap();
        touch(dir.path(), "20250803134108.mp4");
        let partial = dir.path().join(partial_file_name(&at("20250803134118")));
        std::fs::write(&partial, b"chunk").unwrap();

        let finished = dir.path().join("20250803134118.mp4");
        let rename_to = finished.clone();
        let recorder = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            tokio::fs::rename(&partial, &rename_to).await.unwrap();
        });

        let selector = EvidenceSelector::new(dir.path(), fast_settings(5000));
        let selection = selector.select_evidence(at("20250803134115")).await.unwrap();
        recorder.await.unwrap();

        let window = selection.into_window().unwrap();
        assert_eq!(window.anchor().map(|c| c.path.clone()), Some(finished));
        assert_eq!(window.len(), 2);
    }

    #[tokio::test]
    async fn test_no_anchor_returns_up_to_four_earlier_chunks() {
        let dir = TempDir::new().unwrap();
        for stamp in [
            "20250803134038",
            "20250803134048",
            "20250803134058",
            "20250803134108",
            "20250803134118",
        ] {
            touch(dir.path(), &format!("{stamp}.mp4"));
        }
        let selector = EvidenceSelector::new(dir.path(), fast_settings(50));

        // Only 2 s after the newest chunk started, yet the gap rule is not applied
        let window = selector
            .select_evidence(at("20250803134120"))
            .await
            .unwrap()
            .into_window()
            .unwrap();
        assert!(window.anchor().is_none());
        assert_eq!(
            names(&window),
            vec![
                "20250803134048",
                "20250803134058",
                "20250803134108",
                "20250803134118",
            ]
        );
    }

    #[test]
    fn test_no_anchor_ignores_gap_threshold() {
        let chunks = vec![
            chunk("20250803134048"),
            chunk("20250803134058"),
            chunk("20250803134108"),
            chunk("20250803134118"),
        ];
        let window = select_window(&chunks, at("20250803134125")).unwrap();
        assert!(window.anchor().is_none());
        assert_eq!(window.len(), 4);
    }

    #[tokio::test]
    async fn test_selects_around_trigger_while_recording() {
        use crate::capture::TestPatternSource;
        use crate::encoder::RawChunkEncoder;
        use crate::recorder::{ChunkRecorder, RecorderEvent, RecorderSettings};
        use blackbox_common::naming::{Clock, SystemClock};
        use std::sync::Arc;

        let dir = TempDir::new().unwrap();
        let settings = RecorderSettings {
            chunk_dir: dir.path().to_path_buf(),
            chunk_seconds: 1,
            retain_chunks: None,
        };
        let source = TestPatternSource::new(4, 4, 20).realtime(true);
        let recorder = ChunkRecorder::new(settings, Box::new(source), Arc::new(RawChunkEncoder));
        let mut events = recorder.subscribe();
        let handle = recorder.start().unwrap();

        let mut closed = 0;
        while closed < 2 {
            if let RecorderEvent::ChunkClosed { .. } = events.recv().await.unwrap() {
                closed += 1;
            }
        }

        // The chunk open right now is still a .partial; the anchor has to wait for a later one
        let fired_at = SystemClock.now();
        let selector = EvidenceSelector::new(
            dir.path(),
            SelectorSettings {
                grace: Duration::ZERO,
                completion_wait: Duration::from_secs(10),
                poll_interval: Duration::from_millis(20),
            },
        );
        let selection = selector.select_evidence(fired_at).await.unwrap();
        let summary = tokio::task::spawn_blocking(move || handle.stop())
            .await
            .unwrap()
            .unwrap();

        let window = selection.into_window().unwrap();
        let anchor = window.anchor().expect("anchor completed while recording");
        assert!(anchor.start_time >= fired_at);
        assert!(!window.pre_chunks().is_empty());
        assert!(window.pre_chunks().iter().all(|c| c.start_time < fired_at));
        for path in window.paths() {
            assert_eq!(path.extension().and_then(|e| e.to_str()), Some("mp4"));
            assert!(path.exists());
        }
        assert!(summary.chunks_closed >= 3);
    }

    #[tokio::test]
    async fn test_select_now_does_not_wait() {
        let dir = TempDir::new().unwrap();
        touch(dir.path(), "20250803134048.mp4");
        let selector = EvidenceSelector::new(dir.path(), SelectorSettings::default());

        let started = std::time::Instant::now();
        let selection = selector.select_now(at("20250803134050")).await.unwrap();
        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(selection.window().map(EvidenceWindow::len), Some(1));
    }
}
