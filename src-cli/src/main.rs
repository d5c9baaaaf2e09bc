//! Blackbox Command-Line Interface
//!
//! Inspect a chunk directory and assemble evidence bundles by hand, using the
//! same selection policy and packager as the recording service.

mod colors;
mod commands;
mod exit_codes;

use blackbox_common::naming::parse_stamp;
use chrono::NaiveDateTime;
use clap::{Parser, Subcommand};
use exit_codes::ExitCode;
use std::path::PathBuf;

/// Blackbox - chunk inspection and evidence CLI
#[derive(Parser, Debug)]
#[command(name = "blackbox")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Chunk directory (defaults to the configured recorder directory)
    #[arg(long, global = true, value_name = "DIR")]
    dir: Option<String>,

    /// Output in JSON format for scripting
    #[arg(long, global = true)]
    json: bool,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List recorded chunks
    Chunks,
    /// Show which chunks a trigger at the given time would select
    Select {
        #[command(flatten)]
        trigger: TriggerArgs,
    },
    /// Select and package the chunks around a trigger into a zip archive
    Bundle {
        #[command(flatten)]
        trigger: TriggerArgs,

        /// Archive to write; metadata goes next to it with a .json extension
        #[arg(short, long)]
        out: String,

        /// Trigger text recorded in the metadata
        #[arg(long)]
        text: Option<String>,

        /// Latitude for the location tag
        #[arg(long, requires = "lng", allow_hyphen_values = true)]
        lat: Option<f64>,

        /// Longitude for the location tag
        #[arg(long, requires = "lat", allow_hyphen_values = true)]
        lng: Option<f64>,
    },
    /// Show version information
    Version,
}

#[derive(Parser, Debug, Clone)]
pub struct TriggerArgs {
    /// Trigger time as YYYYMMDDhhmmss[.fff] or YYYY-MM-DDThh:mm:ss[.fff]
    #[arg(long, value_parser = parse_fired_at)]
    at: NaiveDateTime,

    /// Wait for the chunk after the trigger to complete, as the service does
    #[arg(short, long)]
    wait: bool,
}

/// Parse a trigger time in local time, with optional fractional seconds.
fn parse_fired_at(s: &str) -> Result<NaiveDateTime, String> {
    let s = s.trim();
    let (whole, frac) = match s.split_once('.') {
        Some((whole, frac)) => (whole, Some(frac)),
        None => (s, None),
    };

    if let Some(t) = parse_stamp(whole) {
        let Some(frac) = frac else {
            return Ok(t);
        };
        if frac.is_empty() || frac.len() > 9 || !frac.bytes().all(|b| b.is_ascii_digit()) {
            return Err(format!("invalid fractional seconds in '{}'", s));
        }
        let nanos: i64 = format!("{:0<9}", frac)
            .parse()
            .map_err(|_| format!("invalid fractional seconds in '{}'", s))?;
        return Ok(t + chrono::Duration::nanoseconds(nanos));
    }

    NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f")
        .map_err(|_| format!("expected YYYYMMDDhhmmss[.fff] or YYYY-MM-DDThh:mm:ss, got '{}'", s))
}

fn expand_path(path: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(path).into_owned())
}

fn main() {
    let cli = Cli::parse();

    if cli.verbose {
        tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::new("debug"))
            .with_writer(std::io::stderr)
            .init();
    }

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("{}", colors::error(&format!("Failed to create Tokio runtime: {}", e)));
            std::process::exit(ExitCode::GeneralError.as_i32());
        }
    };

    let exit_code = runtime.block_on(run(cli));
    std::process::exit(exit_code.as_i32());
}

async fn run(cli: Cli) -> ExitCode {
    let config = blackbox_service::config::load_config();
    let dir = cli
        .dir
        .as_deref()
        .map(expand_path)
        .unwrap_or_else(|| config.chunk_dir());

    match cli.command {
        Commands::Chunks => commands::list_chunks(&dir, cli.json, cli.quiet).await,
        Commands::Select { trigger } => {
            let settings = commands::selector_settings(&config, trigger.wait);
            commands::select(&dir, trigger.at, settings, cli.json, cli.quiet).await
        }
        Commands::Bundle {
            trigger,
            out,
            text,
            lat,
            lng,
        } => {
            let request = commands::BundleRequest {
                fired_at: trigger.at,
                settings: commands::selector_settings(&config, trigger.wait),
                out: expand_path(&out),
                text,
                location: lat.zip(lng),
                chunk_seconds: config.recorder.chunk_seconds,
                compression_level: config.packager.compression_level,
                codec: config.recorder.codec,
            };
            commands::bundle(&dir, request, cli.json, cli.quiet).await
        }
        Commands::Version => {
            commands::version(cli.json);
            ExitCode::Success
        }
    }
}
