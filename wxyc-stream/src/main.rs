//! WXYC stream player (wxyc-stream) - Main entry point
//!
//! Plays a live MPEG audio stream: loads configuration, starts a streaming
//! session, attaches an output sink once the stream format is known, and
//! logs engine events until Ctrl+C / SIGTERM or a fatal playback error.

use std::path::PathBuf;

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use tokio::signal;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use wxyc_common::config::TomlConfig;
use wxyc_common::{ConnectionState, EngineEvent};
use wxyc_stream::audio::output::NullOutput;
use wxyc_stream::{AudioFormat, RenderConsumer, StreamingSession};

/// Command-line arguments for wxyc-stream
#[derive(Parser, Debug)]
#[command(name = "wxyc-stream")]
#[command(about = "Streaming MPEG audio player for WXYC")]
#[command(version)]
struct Args {
    /// Stream URL (overrides the config file)
    #[arg(env = "WXYC_STREAM_URL")]
    url: Option<String>,

    /// Configuration file (default: platform config dir/wxyc/stream.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Do not reconnect after failures
    #[arg(long)]
    no_reconnect: bool,

    /// Reconnect attempts before giving up
    #[arg(long)]
    max_reconnect_attempts: Option<u32>,

    /// Buffers to queue before playback starts
    #[arg(long)]
    min_buffers: Option<usize>,

    /// Decoded buffer queue capacity
    #[arg(long)]
    queue_capacity: Option<usize>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "WXYC_LOG_LEVEL")]
    log_level: Option<String>,

    /// Decode and pace playback without opening an audio device
    #[arg(long)]
    null_output: bool,
}

/// Where rendered audio goes
enum OutputSink {
    Null(NullOutput),
    #[cfg(feature = "output")]
    Device(wxyc_stream::audio::output::CpalOutput),
}

impl OutputSink {
    fn open(render: RenderConsumer, format: AudioFormat, null_output: bool) -> Result<Self> {
        #[cfg(feature = "output")]
        if !null_output {
            let output = wxyc_stream::audio::output::CpalOutput::start(render, format)
                .context("Failed to open audio device")?;
            return Ok(OutputSink::Device(output));
        }

        #[cfg(not(feature = "output"))]
        if !null_output {
            info!("Built without the `output` feature; discarding rendered audio");
        }

        let output = NullOutput::start(render, format).context("Failed to start null output")?;
        Ok(OutputSink::Null(output))
    }

    fn stop(&mut self) {
        match self {
            OutputSink::Null(output) => output.stop(),
            #[cfg(feature = "output")]
            OutputSink::Device(output) => output.stop(),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command-line arguments
    let args = Args::parse();

    let file_config =
        TomlConfig::load_or_default(args.config.as_deref()).context("Failed to load configuration")?;

    // Initialize tracing (RUST_LOG wins over config and flags)
    let level = args
        .log_level
        .clone()
        .unwrap_or_else(|| file_config.logging.level.clone());
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!("wxyc_stream={level},wxyc_common={level}").into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let mut config = file_config.stream;
    if let Some(url) = args.url.clone() {
        config.url = url;
    }
    if args.no_reconnect {
        config.auto_reconnect = false;
    }
    if let Some(attempts) = args.max_reconnect_attempts {
        config.max_reconnect_attempts = attempts;
    }
    if let Some(min_buffers) = args.min_buffers {
        config.minimum_buffers_before_playback = min_buffers;
    }
    if let Some(capacity) = args.queue_capacity {
        config.buffer_queue_capacity = capacity;
    }

    info!("Starting WXYC stream player v{}", env!("CARGO_PKG_VERSION"));
    info!("Stream: {}", config.url);

    let (session, render) =
        StreamingSession::start(config).context("Failed to start streaming session")?;
    let mut events = session.subscribe_events();
    session.play().context("Failed to start playback")?;

    let mut render = Some(render);
    let mut sink: Option<OutputSink> = None;
    let mut sink_format: Option<AudioFormat> = None;
    let mut outcome = Ok(());

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            event = events.recv() => match event {
                Ok(event) => {
                    log_event(&event);
                    match event {
                        EngineEvent::FormatDetected { sample_rate, channels, .. } => {
                            let format = AudioFormat::new(sample_rate, channels);
                            if let Some(render) = render.take() {
                                match OutputSink::open(render, format, args.null_output) {
                                    Ok(opened) => {
                                        sink = Some(opened);
                                        sink_format = Some(format);
                                    }
                                    Err(e) => {
                                        outcome = Err(e);
                                        break;
                                    }
                                }
                            } else if sink_format != Some(format) {
                                warn!(
                                    "Stream format changed to {} Hz, {} channel(s); output stays at {:?}",
                                    sample_rate, channels, sink_format
                                );
                            }
                        }
                        EngineEvent::FatalError { kind, .. } => {
                            outcome = Err(anyhow!("Playback failed: {}", kind));
                            break;
                        }
                        _ => {}
                    }
                }
                Err(RecvError::Lagged(missed)) => warn!("Missed {} engine events", missed),
                Err(RecvError::Closed) => break,
            }
        }
    }

    if let Some(mut sink) = sink.take() {
        sink.stop();
    }
    session.shutdown().await;

    if let Err(e) = &outcome {
        error!("{:#}", e);
    }
    info!("Player shutdown complete");
    outcome
}

fn log_event(event: &EngineEvent) {
    match event {
        EngineEvent::StateChanged { new_state, .. } => match new_state {
            ConnectionState::Error(kind) => error!("State: error ({})", kind),
            state => info!("State: {}", state),
        },
        EngineEvent::FormatDetected {
            sample_rate,
            channels,
            ..
        } => info!("Format: {} Hz, {} channel(s)", sample_rate, channels),
        EngineEvent::ReconnectScheduled {
            attempt,
            delay_ms,
            cause,
            ..
        } => warn!("Reconnecting (attempt {}) in {}ms after {}", attempt, delay_ms, cause),
        EngineEvent::StallDetected { .. } => warn!("Playback stalled"),
        EngineEvent::StallRecovered {
            stall_duration_ms, ..
        } => info!("Stall recovered after {}ms", stall_duration_ms),
        EngineEvent::RecoverySucceeded { attempts, .. } => {
            info!("Recovered after {} attempt(s)", attempts)
        }
        EngineEvent::FatalError { kind, .. } => error!("Fatal: {}", kind),
    }

    if let Ok(json) = serde_json::to_string(event) {
        debug!("Event: {}", json);
    }
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}
