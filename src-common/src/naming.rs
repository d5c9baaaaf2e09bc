//! Chunk naming: the mapping between a chunk's start time and its filename.
//!
//! Chunks are named by their start second in a fixed-width, zero-padded
//! `YYYYMMDDhhmmss` stamp, so lexicographic filename order is chronological
//! order. A chunk that is still being written carries an extra `.partial`
//! suffix and is renamed to its final name when the recorder closes it.
//!
//! Every parser here returns `Option`: names that do not match the canonical
//! form are skipped by callers, never reported as errors.

use chrono::{Local, NaiveDate, NaiveDateTime, SubsecRound};
use std::path::{Path, PathBuf};

/// strftime pattern of a chunk stamp.
pub const CHUNK_TIME_FORMAT: &str = "%Y%m%d%H%M%S";

/// Width of a chunk stamp in characters.
pub const STAMP_LEN: usize = 14;

/// Media extension of a completed chunk.
pub const CHUNK_EXTENSION: &str = "mp4";

/// Suffix appended to a chunk that is still open.
pub const PARTIAL_SUFFIX: &str = "partial";

/// Source of wall-clock time for chunk start stamps and trigger events.
pub trait Clock: Send + Sync {
    /// Current local wall-clock time.
    fn now(&self) -> NaiveDateTime;
}

/// The host's local wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> NaiveDateTime {
        Local::now().naive_local()
    }
}

/// Drop sub-second precision; chunk start times are second-granular.
pub fn truncate_to_second(t: NaiveDateTime) -> NaiveDateTime {
    t.trunc_subsecs(0)
}

/// Format a timestamp as a chunk stamp (`20250803134048`).
///
/// Sub-second precision is discarded.
pub fn format_stamp(t: &NaiveDateTime) -> String {
    t.format(CHUNK_TIME_FORMAT).to_string()
}

/// Parse a chunk stamp back into a timestamp.
///
/// Accepts exactly fourteen ASCII digits describing a valid calendar time.
pub fn parse_stamp(s: &str) -> Option<NaiveDateTime> {
    if s.len() != STAMP_LEN || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }

    let field = |from: usize, to: usize| s[from..to].parse::<u32>().ok();
    let year = s[0..4].parse::<i32>().ok()?;
    let date = NaiveDate::from_ymd_opt(year, field(4, 6)?, field(6, 8)?)?;
    date.and_hms_opt(field(8, 10)?, field(10, 12)?, field(12, 14)?)
}

/// Filename of a completed chunk that started at `t`.
pub fn chunk_file_name(t: &NaiveDateTime) -> String {
    format!("{}.{}", format_stamp(t), CHUNK_EXTENSION)
}

/// Filename of the in-progress chunk that started at `t`.
pub fn partial_file_name(t: &NaiveDateTime) -> String {
    format!("{}.{}.{}", format_stamp(t), CHUNK_EXTENSION, PARTIAL_SUFFIX)
}

/// Start time encoded in a completed chunk filename.
///
/// In-progress (`.partial`) names and foreign files yield `None`.
pub fn parse_chunk_file_name(name: &str) -> Option<NaiveDateTime> {
    let stamp = name.strip_suffix(CHUNK_EXTENSION)?.strip_suffix('.')?;
    parse_stamp(stamp)
}

/// Start time encoded in an in-progress chunk filename.
pub fn parse_partial_file_name(name: &str) -> Option<NaiveDateTime> {
    let completed = name.strip_suffix(PARTIAL_SUFFIX)?.strip_suffix('.')?;
    parse_chunk_file_name(completed)
}

/// Path of the completed chunk starting at `t` inside `dir`.
pub fn chunk_path(dir: &Path, t: &NaiveDateTime) -> PathBuf {
    dir.join(chunk_file_name(t))
}

/// Path of the in-progress chunk starting at `t` inside `dir`.
pub fn partial_path(dir: &Path, t: &NaiveDateTime) -> PathBuf {
    dir.join(partial_file_name(t))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Duration};
    use proptest::prelude::*;

    fn at(stamp: &str) -> NaiveDateTime {
        parse_stamp(stamp).unwrap()
    }

    /// Seconds between 1970-01-01 and 2199-12-31.
    fn arb_time() -> impl Strategy<Value = NaiveDateTime> {
        (0i64..7_258_118_400).prop_map(|secs| DateTime::from_timestamp(secs, 0).unwrap().naive_utc())
    }

    #[test]
    fn test_format_is_fixed_width() {
        let t = NaiveDate::from_ymd_opt(2025, 1, 3)
            .unwrap()
            .and_hms_opt(4, 5, 6)
            .unwrap();
        assert_eq!(format_stamp(&t), "20250103040506");
        assert_eq!(chunk_file_name(&t), "20250103040506.mp4");
        assert_eq!(partial_file_name(&t), "20250103040506.mp4.partial");
    }

    #[test]
    fn test_format_drops_subseconds() {
        let t = at("20250803134115") + Duration::milliseconds(999);
        assert_eq!(format_stamp(&t), "20250803134115");
        assert_eq!(truncate_to_second(t), at("20250803134115"));
    }

    #[test]
    fn test_parse_rejects_malformed_stamps() {
        assert!(parse_stamp("").is_none());
        assert!(parse_stamp("2025080313404").is_none());
        assert!(parse_stamp("202508031340480").is_none());
        assert!(parse_stamp("2025-08-031340").is_none());
        assert!(parse_stamp("+2025080313404").is_none());
        assert!(parse_stamp("20251303134048").is_none()); // month 13
        assert!(parse_stamp("20250230134048").is_none()); // Feb 30
        assert!(parse_stamp("20250803246048").is_none()); // hour 24
        assert!(parse_stamp("20250803134060").is_none()); // second 60
    }

    #[test]
    fn test_chunk_names_are_distinguished_from_partials() {
        let t = at("20250803134048");
        assert_eq!(parse_chunk_file_name("20250803134048.mp4"), Some(t));
        assert_eq!(parse_chunk_file_name("20250803134048.mp4.partial"), None);
        assert_eq!(parse_partial_file_name("20250803134048.mp4.partial"), Some(t));
        assert_eq!(parse_partial_file_name("20250803134048.mp4"), None);
    }

    #[test]
    fn test_foreign_names_are_skipped() {
        for name in [
            "notes.txt",
            "20250803134048.mov",
            "20250803134048mp4",
            "recording_20250803134048.mp4",
            ".mp4",
            "20250803134048.MP4",
            "20250803134048.mp4.tmp",
        ] {
            assert_eq!(parse_chunk_file_name(name), None, "{name}");
        }
    }

    #[test]
    fn test_paths_join_directory() {
        let t = at("20250803134048");
        let dir = Path::new("/var/blackbox");
        assert_eq!(chunk_path(dir, &t), dir.join("20250803134048.mp4"));
        assert_eq!(partial_path(dir, &t), dir.join("20250803134048.mp4.partial"));
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(10_000))]

        #[test]
        fn prop_stamp_round_trips(t in arb_time()) {
            prop_assert_eq!(parse_stamp(&format_stamp(&t)), Some(t));
            prop_assert_eq!(parse_chunk_file_name(&chunk_file_name(&t)), Some(t));
        }
    }

    proptest! {
        #[test]
        fn prop_lexicographic_order_is_chronological(a in arb_time(), b in arb_time()) {
            prop_assume!(a != b);
            let (t1, t2) = if a < b { (a, b) } else { (b, a) };
            prop_assert!(format_stamp(&t1) < format_stamp(&t2));
            prop_assert!(chunk_file_name(&t1) < chunk_file_name(&t2));
        }
    }
}
