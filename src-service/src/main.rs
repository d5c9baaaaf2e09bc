//! Blackbox Recording Service
//!
//! Records the camera into a rolling chunk directory and turns every trigger
//! phrase read from stdin into an evidence bundle in the outbox.

use blackbox_common::SystemClock;
use blackbox_service::capture::{camera::default_device, CameraSource, FrameSource, TestPatternSource};
use blackbox_service::config::{load_config, load_config_from, BlackboxConfig, Codec};
use blackbox_service::encoder::{
    ensure_ffmpeg_blocking, ChunkEncoder, DurationProbe, FfmpegChunkEncoder, FfprobeDuration,
    NominalDuration, RawChunkEncoder,
};
use blackbox_service::logging::init_logging;
use blackbox_service::sink::OutboxSink;
use blackbox_service::trigger::{spawn_line_trigger_source, PhraseMatcher};
use blackbox_service::{
    BundlePackager, ChunkRecorder, EvidencePipeline, EvidenceSelector, RecorderEvent, StopReason,
    TriggerOutcome,
};
use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tokio::io::BufReader;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

/// Blackbox recording service
#[derive(Parser, Debug)]
#[command(name = "blackbox-service", version, about)]
struct Args {
    /// Load configuration from this file instead of the platform config directory
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Record to this chunk directory
    #[arg(long, value_name = "DIR")]
    dir: Option<PathBuf>,

    /// Record a synthetic test pattern instead of the camera
    #[arg(long)]
    synthetic: bool,
}

fn main() -> ExitCode {
    let args = Args::parse();
    let _log_guard = init_logging();

    info!("Blackbox service starting (pid: {})...", std::process::id());

    let mut config = match &args.config {
        Some(path) => match load_config_from(path) {
            Ok(config) => config,
            Err(e) => {
                error!("{}", e);
                return ExitCode::FAILURE;
            }
        },
        None => load_config(),
    };
    if let Some(dir) = &args.dir {
        config.recorder.output_dir = Some(dir.to_string_lossy().into_owned());
    }

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("Failed to create Tokio runtime: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let code = runtime.block_on(run(config, args.synthetic));
    info!("Blackbox service stopped");
    code
}

async fn run(config: BlackboxConfig, synthetic: bool) -> ExitCode {
    let rec = &config.recorder;

    // FFmpeg drives both the camera and H.264 encoding
    if !synthetic || rec.codec == Codec::H264 {
        info!("Initializing FFmpeg...");
        match tokio::task::spawn_blocking(ensure_ffmpeg_blocking).await {
            Ok(Ok(())) => info!("FFmpeg initialized successfully"),
            Ok(Err(e)) => {
                error!("FFmpeg is required but unavailable: {}", e);
                return ExitCode::FAILURE;
            }
            Err(e) => {
                error!("FFmpeg check failed: {}", e);
                return ExitCode::FAILURE;
            }
        }
    }

    let (encoder, probe): (Arc<dyn ChunkEncoder>, Arc<dyn DurationProbe>) = match rec.codec {
        Codec::H264 => {
            let encoder = tokio::task::spawn_blocking(FfmpegChunkEncoder::detect)
                .await
                .unwrap_or_else(|_| FfmpegChunkEncoder::with_encoder("libx264"));
            info!("Encoding chunks with {}", encoder.encoder_name());
            (Arc::new(encoder), Arc::new(FfprobeDuration))
        }
        Codec::Raw => (
            Arc::new(RawChunkEncoder),
            Arc::new(NominalDuration(Some(f64::from(rec.chunk_seconds)))),
        ),
    };

    let source: Box<dyn FrameSource> = if synthetic {
        info!("Recording synthetic test pattern");
        Box::new(TestPatternSource::new(rec.width, rec.height, rec.fps).realtime(true))
    } else {
        let device = rec.device.clone().unwrap_or_else(|| default_device().to_string());
        info!("Recording camera {}", device);
        Box::new(CameraSource::new(device, rec.width, rec.height, rec.fps))
    };

    let recorder = ChunkRecorder::new(config.recorder_settings(), source, encoder);
    let mut events = recorder.subscribe();
    let handle = match tokio::task::spawn_blocking(move || recorder.start()).await {
        Ok(Ok(handle)) => handle,
        Ok(Err(e)) => {
            error!("{}", e);
            return ExitCode::FAILURE;
        }
        Err(e) => {
            error!("Recorder start failed: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let pipeline = Arc::new(EvidencePipeline::new(
        EvidenceSelector::new(config.chunk_dir(), config.selector_settings()),
        BundlePackager::new(config.packager.compression_level, probe).with_format(rec.codec.format_name()),
        config.location_provider(),
        Arc::new(OutboxSink::new(config.outbox_dir())),
        rec.chunk_seconds,
    ));

    let (trigger_tx, mut triggers) = mpsc::channel(16);
    let matcher = PhraseMatcher::new(&config.trigger.phrases);
    info!("Listening for trigger phrases on stdin: {:?}", matcher.phrases());
    spawn_line_trigger_source(
        BufReader::new(tokio::io::stdin()),
        matcher,
        Arc::new(SystemClock),
        trigger_tx,
    );

    let mut in_flight = JoinSet::new();
    let mut triggers_open = true;
    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    let recorder_failed = loop {
        tokio::select! {
            _ = &mut shutdown => break false,
            trigger = triggers.recv(), if triggers_open => match trigger {
                Some(trigger) => {
                    let pipeline = pipeline.clone();
                    in_flight.spawn(async move {
                        match pipeline.handle_trigger(&trigger).await {
                            Ok(TriggerOutcome::Submitted { receipt, .. }) => {
                                info!(bundle = %receipt.id, "Trigger handled")
                            }
                            Ok(TriggerOutcome::NoEvidence) => {
                                warn!(fired_at = %trigger.fired_at, "Trigger handled, nothing recorded yet")
                            }
                            Err(e) => error!(fired_at = %trigger.fired_at, "Evidence assembly failed: {}", e),
                        }
                    });
                }
                None => {
                    info!("Trigger input closed, recording continues");
                    triggers_open = false;
                }
            },
            Some(joined) = in_flight.join_next(), if !in_flight.is_empty() => {
                if let Err(e) = joined {
                    error!("Trigger task failed: {}", e);
                }
            }
            event = events.recv() => match event {
                Ok(RecorderEvent::ChunkClosed { path, bytes, .. }) => {
                    debug!("Chunk ready: {} ({} bytes)", path.display(), bytes)
                }
                Ok(RecorderEvent::Stopped(reason)) => {
                    warn!("Recorder stopped on its own: {:?}", reason);
                    break reason != StopReason::SourceEnded;
                }
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    debug!("Missed {} recorder events", n)
                }
                Err(broadcast::error::RecvError::Closed) => break true,
            },
        }
    };

    // Close the open chunk first; pending triggers may be waiting for it
    info!("Stopping recorder...");
    match tokio::task::spawn_blocking(move || handle.stop()).await {
        Ok(Ok(summary)) => info!(
            "Recorded {} chunks ({} frames)",
            summary.chunks_closed, summary.frames
        ),
        Ok(Err(e)) => error!("Failed to stop recorder: {}", e),
        Err(e) => error!("Failed to stop recorder: {}", e),
    }

    if !in_flight.is_empty() {
        info!("Waiting for {} pending triggers...", in_flight.len());
    }
    while let Some(joined) = in_flight.join_next().await {
        if let Err(e) = joined {
            error!("Trigger task failed: {}", e);
        }
    }

    if recorder_failed {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}

/// Resolves when the process is asked to shut down.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let (mut sigterm, mut sigint, mut sighup) = match (
            signal(SignalKind::terminate()),
            signal(SignalKind::interrupt()),
            signal(SignalKind::hangup()),
        ) {
            (Ok(term), Ok(int), Ok(hup)) => (term, int, hup),
            _ => {
                warn!("Failed to install signal handlers, falling back to Ctrl+C");
                let _ = tokio::signal::ctrl_c().await;
                return;
            }
        };

        tokio::select! {
            _ = sigterm.recv() => info!("Received SIGTERM"),
            _ = sigint.recv() => info!("Received SIGINT"),
            _ = sighup.recv() => info!("Received SIGHUP"),
        }
    }

    #[cfg(windows)]
    {
        // Windows uses Ctrl+C handler
        let (tx, rx) = tokio::sync::oneshot::channel();
        let mut tx = Some(tx);
        if let Err(e) = ctrlc::set_handler(move || {
            info!("Received Ctrl+C");
            if let Some(tx) = tx.take() {
                let _ = tx.send(());
            }
        }) {
            error!("Error setting Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
        let _ = rx.await;
    }

    #[cfg(not(any(unix, windows)))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
