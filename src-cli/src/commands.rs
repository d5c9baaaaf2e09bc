//! CLI command implementations.

use crate::colors;
use crate::exit_codes::ExitCode;
use blackbox_common::naming::format_stamp;
use blackbox_common::{ChunkInfo, EvidenceWindow, Location, TriggerEvent};
use blackbox_service::chunks::scan_chunk_dir;
use blackbox_service::config::{BlackboxConfig, Codec};
use blackbox_service::encoder::{DurationProbe, FfprobeDuration, NominalDuration};
use blackbox_service::pipeline::trigger_metadata;
use blackbox_service::{BundlePackager, EvidenceSelector, Selection, SelectorSettings};
use chrono::NaiveDateTime;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Chunk listing entry for JSON output.
#[derive(Debug, Serialize)]
struct ChunkEntry {
    name: String,
    start_time: NaiveDateTime,
    bytes: u64,
    complete: bool,
}

impl ChunkEntry {
    fn new(chunk: &ChunkInfo, complete: bool) -> Self {
        Self {
            name: chunk.file_name(),
            start_time: chunk.start_time,
            bytes: std::fs::metadata(&chunk.path).map(|m| m.len()).unwrap_or(0),
            complete,
        }
    }
}

/// Evidence window entry for JSON output.
#[derive(Debug, Serialize)]
struct WindowEntry {
    role: &'static str,
    name: String,
    start_time: NaiveDateTime,
    path: PathBuf,
}

fn window_entries(window: &EvidenceWindow) -> Vec<WindowEntry> {
    let anchor = window.anchor().map(|c| ("anchor", c));
    let pre = window.pre_chunks().iter().map(|c| ("pre", c));
    anchor
        .into_iter()
        .chain(pre)
        .map(|(role, chunk)| WindowEntry {
            role,
            name: chunk.file_name(),
            start_time: chunk.start_time,
            path: chunk.path.clone(),
        })
        .collect()
}

fn print_json<T: Serialize>(value: &T) -> ExitCode {
    match serde_json::to_string_pretty(value) {
        Ok(json) => {
            println!("{}", json);
            ExitCode::Success
        }
        Err(e) => {
            eprintln!("{}", colors::error(&format!("Failed to serialize output: {}", e)));
            ExitCode::GeneralError
        }
    }
}

/// Selection timing: the configured waits with `--wait`, otherwise none.
pub fn selector_settings(config: &BlackboxConfig, wait: bool) -> Option<SelectorSettings> {
    wait.then(|| config.selector_settings())
}

/// List chunks in the directory.
pub async fn list_chunks(dir: &Path, json: bool, quiet: bool) -> ExitCode {
    let listing = match scan_chunk_dir(dir) {
        Ok(listing) => listing,
        Err(e) => {
            if !quiet {
                eprintln!(
                    "{}",
                    colors::error(&format!("Failed to read {}: {}", dir.display(), e))
                );
            }
            return ExitCode::GeneralError;
        }
    };

    let entries: Vec<ChunkEntry> = listing
        .completed
        .iter()
        .map(|c| ChunkEntry::new(c, true))
        .chain(listing.in_progress.iter().map(|c| ChunkEntry::new(c, false)))
        .collect();

    if json {
        return print_json(&entries);
    }

    if entries.is_empty() {
        if !quiet {
            println!(
                "{}",
                colors::dim(&format!("No chunks in {}.", dir.display()))
            );
        }
        return ExitCode::Success;
    }

    let name_width = entries.iter().map(|e| e.name.len()).max().unwrap_or(4).max(4);

    println!(
        "{}  {}  {}",
        colors::pad_left("NAME", name_width, colors::header),
        colors::pad_left("STARTED", 19, colors::header),
        colors::header("BYTES")
    );
    println!(
        "{}  {}  {}",
        "-".repeat(name_width),
        "-".repeat(19),
        "-".repeat(5)
    );

    for entry in &entries {
        let started = entry.start_time.format("%Y-%m-%d %H:%M:%S").to_string();
        let bytes = if entry.complete {
            colors::number(&entry.bytes.to_string())
        } else {
            colors::role("writing")
        };
        println!(
            "{}  {}  {}",
            colors::pad_left(&entry.name, name_width, colors::path),
            started,
            bytes
        );
    }

    if !quiet {
        println!();
        println!(
            "{} completed, {} in progress",
            listing.completed.len(),
            listing.in_progress.len()
        );
    }
    ExitCode::Success
}

async fn run_selection(
    dir: &Path,
    fired_at: NaiveDateTime,
    settings: Option<SelectorSettings>,
    quiet: bool,
) -> Result<Option<EvidenceWindow>, ExitCode> {
    let result = match settings {
        Some(settings) => {
            EvidenceSelector::new(dir, settings)
                .select_evidence(fired_at)
                .await
        }
        None => {
            EvidenceSelector::new(dir, SelectorSettings::default())
                .select_now(fired_at)
                .await
        }
    };
    match result {
        Ok(Selection::Found(window)) => Ok(Some(window)),
        Ok(Selection::NoEvidence) => Ok(None),
        Err(e) => {
            if !quiet {
                eprintln!("{}", colors::error(&e.to_string()));
            }
            Err(ExitCode::GeneralError)
        }
    }
}

fn report_no_evidence(dir: &Path, json: bool, quiet: bool) -> ExitCode {
    if json {
        println!(r#"{{"chunks": []}}"#);
    } else if !quiet {
        eprintln!(
            "{}",
            colors::warning(&format!("No recorded chunks in {}", dir.display()))
        );
    }
    ExitCode::NoEvidence
}

/// Show the evidence window for a trigger time.
pub async fn select(
    dir: &Path,
    fired_at: NaiveDateTime,
    settings: Option<SelectorSettings>,
    json: bool,
    quiet: bool,
) -> ExitCode {
    let window = match run_selection(dir, fired_at, settings, quiet).await {
        Ok(Some(window)) => window,
        Ok(None) => return report_no_evidence(dir, json, quiet),
        Err(code) => return code,
    };

    let entries = window_entries(&window);
    if json {
        return print_json(&serde_json::json!({ "chunks": entries }));
    }

    if !quiet {
        println!(
            "{} {}",
            colors::bold("Trigger at"),
            fired_at.format("%Y-%m-%d %H:%M:%S%.3f")
        );
        if window.anchor().is_none() {
            eprintln!(
                "{}",
                colors::warning("No chunk completed after the trigger; showing earlier chunks only")
            );
        }
    }
    for entry in entries {
        println!(
            "{}  {}",
            colors::pad_left(entry.role, 6, colors::role),
            colors::path(&entry.path.display().to_string())
        );
    }
    ExitCode::Success
}

/// Everything `bundle` needs beyond the directory.
pub struct BundleRequest {
    pub fired_at: NaiveDateTime,
    /// `None` reads the directory once without waiting
    pub settings: Option<SelectorSettings>,
    pub out: PathBuf,
    pub text: Option<String>,
    pub location: Option<(f64, f64)>,
    pub chunk_seconds: u32,
    pub compression_level: u32,
    pub codec: Codec,
}

/// Select and package evidence for a trigger time.
pub async fn bundle(dir: &Path, request: BundleRequest, json: bool, quiet: bool) -> ExitCode {
    let location = match request.location {
        Some((lat, lng)) if !(-90.0..=90.0).contains(&lat) || !(-180.0..=180.0).contains(&lng) => {
            if !quiet {
                eprintln!(
                    "{}",
                    colors::error(&format!("Invalid coordinates: {}, {}", lat, lng))
                );
            }
            return ExitCode::InvalidArguments;
        }
        Some((lat, lng)) => Some(Location {
            lat,
            lng,
            valid: false,
        }),
        None => None,
    };

    // The sidecar would land on the archive itself
    let sidecar_clash = request
        .out
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
    if sidecar_clash {
        if !quiet {
            eprintln!(
                "{}",
                colors::error(&format!(
                    "Output {} must not end in .json; the metadata is written there",
                    request.out.display()
                ))
            );
        }
        return ExitCode::InvalidArguments;
    }

    let window = match run_selection(dir, request.fired_at, request.settings, quiet).await {
        Ok(Some(window)) => window,
        Ok(None) => return report_no_evidence(dir, json, quiet),
        Err(code) => return code,
    };

    let mut trigger = TriggerEvent::new(request.fired_at);
    trigger.text = request.text;
    let metadata = trigger_metadata(&trigger, location, request.chunk_seconds);

    // Raw chunks carry no container duration
    let probe: Arc<dyn DurationProbe> = match request.codec {
        Codec::H264 => Arc::new(FfprobeDuration),
        Codec::Raw => Arc::new(NominalDuration(None)),
    };
    let packager =
        BundlePackager::new(request.compression_level, probe).with_format(request.codec.format_name());
    let out = request.out;
    let metadata_path = out.with_extension("json");

    let result = tokio::task::spawn_blocking({
        let out = out.clone();
        let metadata_path = metadata_path.clone();
        move || {
            let bundle = packager.package(&window, metadata)?;
            bundle.write_archive(&out)?;
            if let Err(e) = bundle.write_metadata(&metadata_path) {
                let _ = std::fs::remove_file(&out);
                return Err(e);
            }
            Ok::<_, blackbox_service::PackageError>(bundle.stats)
        }
    })
    .await;

    let stats = match result {
        Ok(Ok(stats)) => stats,
        Ok(Err(e)) => {
            if !quiet {
                eprintln!("{}", colors::error(&e.to_string()));
            }
            return ExitCode::GeneralError;
        }
        Err(e) => {
            if !quiet {
                eprintln!("{}", colors::error(&format!("Packaging task failed: {}", e)));
            }
            return ExitCode::GeneralError;
        }
    };

    if json {
        return print_json(&serde_json::json!({
            "bundle": format_stamp(&request.fired_at),
            "archive": out,
            "metadata": metadata_path,
            "stats": stats,
        }));
    }

    if !quiet {
        println!(
            "{}",
            colors::success(&format!(
                "Packaged {} chunks ({} bytes) into {}",
                stats.file_count,
                stats.archive_bytes,
                out.display()
            ))
        );
        for chunk in &stats.chunks {
            let duration = chunk
                .duration_secs
                .map(|d| format!("{:.1}s", d))
                .unwrap_or_else(|| "?".to_string());
            println!(
                "  {}  {}  {}",
                chunk.name,
                colors::number(&chunk.bytes.to_string()),
                colors::dim(&duration)
            );
        }
    } else {
        println!("{}", out.display());
    }
    ExitCode::Success
}

/// Show version information.
pub fn version(json: bool) {
    let version = env!("CARGO_PKG_VERSION");
    if json {
        println!(r#"{{"version": "{}"}}"#, version);
    } else {
        println!("{} {}", colors::bold("blackbox"), version);
    }
}
