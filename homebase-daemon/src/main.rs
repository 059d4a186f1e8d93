// HomeBase Daemon - Base-station service
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! # HomeBase Daemon
//!
//! Runs the receive loop against a frame replay and exposes Prometheus
//! metrics, plus an offline drain for the fallback store.
//!
//! ## Usage
//!
//! ```bash
//! # Replay a capture at 10x speed
//! homebase run --config homebase.json --frames capture.csv --speed 10.0
//!
//! # Re-send records the sink refused
//! homebase drain --config homebase.json
//! ```

mod metrics;
mod replay;

use axum::{
    extract::State,
    http::StatusCode,
    response::{Html, IntoResponse},
    routing::get,
    Json, Router,
};
use clap::{Args, Parser, Subcommand};
use homebase::config::format_address;
use homebase::{
    BridgeConfig, ConfigError, FallbackStore, MessageSink, PersistenceError, RadioError,
    RadioPort, Receiver, TcpSink,
};
use metrics::encode_metrics;
use replay::{ReplayConfig, ReplayError, ReplayRadio, ReplayState};
use serde::Serialize;
use std::fs;
use std::future::IntoFuture;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tokio::net::TcpListener;
use tracing::{error, info, warn, Level};
use tracing_subscriber::EnvFilter;

/// HomeBase nRF24 base station
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", global = true)]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the receive loop and the metrics server
    Run(RunArgs),
    /// Re-send records from the fallback store
    Drain {
        /// JSON config file (defaults apply when omitted)
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}

#[derive(Args, Debug)]
struct RunArgs {
    /// JSON config file (defaults apply when omitted)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// CSV capture to replay (`offset_ms,frame_hex`)
    #[arg(short, long)]
    frames: PathBuf,

    /// Replay speed multiplier (1.0 = real-time)
    #[arg(short, long, default_value = "1.0")]
    speed: f64,

    /// Loop the replay when it reaches the end
    #[arg(short, long)]
    loop_replay: bool,

    /// Port to listen on
    #[arg(short, long, default_value = "9100")]
    port: u16,
}

/// Errors that stop the daemon.
#[derive(Debug, thiserror::Error)]
enum DaemonError {
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Replay error: {0}")]
    Replay(#[from] ReplayError),

    #[error("Radio error: {0}")]
    Radio(#[from] RadioError),

    #[error("Fallback store error: {0}")]
    Persistence(#[from] PersistenceError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Snapshot of the receive loop served on `/status`.
#[derive(Debug, Clone, Default, Serialize)]
struct LoopStatus {
    running: bool,
    channel: String,
    owner: Option<u8>,
    frames: u64,
    decode_errors: u64,
    forwarded: u64,
    fallback_writes: u64,
    lost: u64,
}

/// Application state shared across handlers.
struct AppState {
    status: Arc<Mutex<LoopStatus>>,
    replay_state: Arc<ReplayState>,
    start_time: Instant,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let level = match cli.log_level.to_lowercase().as_str() {
            "trace" => Level::TRACE,
            "debug" => Level::DEBUG,
            "info" => Level::INFO,
            "warn" => Level::WARN,
            "error" => Level::ERROR,
            _ => Level::INFO,
        };
        EnvFilter::from_default_env().add_directive(level.into())
    });

    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("HomeBase v{}", env!("CARGO_PKG_VERSION"));

    let result = match cli.command {
        Command::Run(args) => run(args).await,
        Command::Drain { config } => {
            match tokio::task::spawn_blocking(move || drain(config.as_deref())).await {
                Ok(drained) => drained.map(|_| ()),
                Err(e) => Err(e.into()),
            }
        }
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

fn load_config(path: Option<&Path>) -> Result<BridgeConfig, DaemonError> {
    match path {
        Some(path) => Ok(BridgeConfig::from_json_file(path)?),
        None => {
            info!("No config file given, using defaults");
            let config = BridgeConfig::default();
            config.validate()?;
            Ok(config)
        }
    }
}

fn log_startup(config: &BridgeConfig) {
    info!("Radio channel: {:#04x}", config.channel);
    info!(
        "Pipe addresses: {}, {}",
        format_address(&config.pipe_addresses[0]),
        format_address(&config.pipe_addresses[1])
    );
    info!("Hold timeout: {}s", config.hold_timeout_secs);
    info!("CSN pin: {}, CE pin: {}", config.csn_pin, config.ce_pin);
    info!(
        "Sink: {} (topic {})",
        config.sink_endpoint, config.sink_topic
    );
    info!("Fallback store: {}", config.fallback_store_path.display());
}

async fn run(args: RunArgs) -> Result<(), DaemonError> {
    let config = load_config(args.config.as_deref())?;
    log_startup(&config);

    let radio = ReplayRadio::from_csv(
        &args.frames,
        ReplayConfig {
            speed: args.speed,
            loop_replay: args.loop_replay,
        },
    )?;
    let replay_state = radio.state();
    let sink = TcpSink::new(
        config.sink_addr()?,
        config.sink_topic.clone(),
        config.sink_timeout(),
    );
    let receiver = Receiver::new(&config, radio, sink);

    let shutdown = Arc::new(AtomicBool::new(false));
    let status = Arc::new(Mutex::new(LoopStatus {
        running: true,
        channel: receiver.state().to_string(),
        ..Default::default()
    }));

    let mut loop_handle = {
        let shutdown = Arc::clone(&shutdown);
        let status = Arc::clone(&status);
        let replay_state = Arc::clone(&replay_state);
        tokio::task::spawn_blocking(move || {
            receive_loop(receiver, &shutdown, &status, &replay_state)
        })
    };

    let state = Arc::new(AppState {
        status: Arc::clone(&status),
        replay_state,
        start_time: Instant::now(),
    });

    // Build router
    let app = Router::new()
        .route("/", get(root_handler))
        .route("/metrics", get(metrics_handler))
        .route("/health", get(health_handler))
        .route("/status", get(status_handler))
        .with_state(state);

    // Start server
    let addr = SocketAddr::from(([0, 0, 0, 0], args.port));
    let listener = TcpListener::bind(addr).await?;
    info!("Starting server on http://{}", addr);
    info!("Metrics endpoint: http://{}/metrics", addr);
    let server = axum::serve(listener, app).into_future();

    let finished = tokio::select! {
        joined = &mut loop_handle => Some(joined),
        served = server => {
            if let Err(e) = served {
                error!("HTTP server stopped: {}", e);
            }
            None
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown requested");
            None
        }
    };

    let joined = match finished {
        Some(joined) => joined,
        None => {
            shutdown.store(true, Ordering::SeqCst);
            loop_handle.await
        }
    };

    if let Ok(mut status) = status.lock() {
        status.running = false;
    }

    match joined? {
        Ok(()) => Ok(()),
        Err(RadioError::Exhausted) => {
            info!("Replay finished");
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

/// Drive the receiver until shutdown or a radio fault.
fn receive_loop<R: RadioPort, S: MessageSink>(
    mut receiver: Receiver<R, S>,
    shutdown: &AtomicBool,
    status: &Mutex<LoopStatus>,
    replay_state: &ReplayState,
) -> Result<(), RadioError> {
    let mut previous = receiver.metrics().clone();

    while !shutdown.load(Ordering::SeqCst) {
        if receiver.run_once()?.is_none() {
            continue;
        }

        let current = receiver.metrics().clone();
        metrics::update_from_receiver(&previous, &current, receiver.state());
        metrics::update_replay_position(replay_state.position.load(Ordering::SeqCst));

        if let Ok(mut status) = status.lock() {
            status.channel = receiver.state().to_string();
            status.owner = receiver.state().owner();
            status.frames = current.frames;
            status.decode_errors = current.decode_errors;
            status.forwarded = current.forwarded;
            status.fallback_writes = current.fallback_writes;
            status.lost = current.lost;
        }
        previous = current;
    }

    info!("Receive loop stopped");
    Ok(())
}

/// Result of a drain pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct DrainReport {
    delivered: usize,
    remaining: usize,
    dropped_corrupt: usize,
}

fn drain(config_path: Option<&Path>) -> Result<DrainReport, DaemonError> {
    let config = load_config(config_path)?;
    let mut sink = TcpSink::new(
        config.sink_addr()?,
        config.sink_topic.clone(),
        config.sink_timeout(),
    );
    drain_store(
        &FallbackStore::new(config.fallback_store_path.clone()),
        &mut sink,
    )
}

/// Side file holding the records of a drain in progress
fn draining_path(store: &Path) -> PathBuf {
    let mut name = store.as_os_str().to_owned();
    name.push(".draining");
    PathBuf::from(name)
}

/// Send every stored record once; append the ones that still fail back to
/// the live store.
///
/// The live file is renamed aside first, so a running receive loop keeps
/// appending to a fresh file while the drain works. A side file left by an
/// interrupted drain is resumed instead.
fn drain_store<S: MessageSink>(
    store: &FallbackStore,
    sink: &mut S,
) -> Result<DrainReport, DaemonError> {
    let draining = FallbackStore::new(draining_path(store.path()));
    let mut report = DrainReport {
        delivered: 0,
        remaining: 0,
        dropped_corrupt: 0,
    };

    if draining.path().exists() {
        warn!("Resuming interrupted drain from {}", draining.path().display());
    } else {
        match fs::rename(store.path(), draining.path()) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!("Fallback store {} is empty", store.path().display());
                return Ok(report);
            }
            Err(e) => return Err(e.into()),
        }
    }

    // An append that opened the file just before the rename lands in the
    // side file, so reload until nothing new shows up.
    let mut seen = 0;
    loop {
        let log = draining.load()?;
        report.dropped_corrupt = log.corrupt.len();
        if log.records.len() <= seen {
            break;
        }
        let total = log.records.len();

        for record in log.records.into_iter().skip(seen) {
            match sink.send(&record) {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    warn!("Record from device {} still undeliverable: {}", record.device, e);
                    store.append(&record)?;
                    report.remaining += 1;
                }
            }
        }
        seen = total;
    }

    if report.dropped_corrupt > 0 {
        warn!(
            "Dropping {} corrupt lines from {}",
            report.dropped_corrupt,
            draining.path().display()
        );
    }
    fs::remove_file(draining.path())?;

    info!(
        "Drained {} records, {} returned to {}",
        report.delivered,
        report.remaining,
        store.path().display()
    );
    Ok(report)
}

/// Root handler - shows a simple HTML page.
async fn root_handler() -> Html<&'static str> {
    Html(
        r#"<!DOCTYPE html>
<html>
<head><title>HomeBase</title></head>
<body>
    <h1>HomeBase</h1>
    <p>nRF24 base station.</p>
    <ul>
        <li><a href="/metrics">/metrics</a> - Prometheus metrics</li>
        <li><a href="/health">/health</a> - Health check</li>
        <li><a href="/status">/status</a> - Receive loop status (JSON)</li>
    </ul>
</body>
</html>"#,
    )
}

/// Metrics handler - returns Prometheus text format.
async fn metrics_handler() -> impl IntoResponse {
    let metrics = encode_metrics();
    (
        StatusCode::OK,
        [("Content-Type", "text/plain; charset=utf-8")],
        metrics,
    )
}

/// Health check handler.
async fn health_handler() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

/// Status information response.
#[derive(Serialize)]
struct StatusResponse {
    version: String,
    uptime_secs: u64,
    receiver: LoopStatus,
    replay: ReplayStatus,
}

/// Replay status information.
#[derive(Serialize)]
struct ReplayStatus {
    position: usize,
    total_frames: usize,
    acks_written: usize,
}

/// Status handler - returns JSON status information.
async fn status_handler(State(state): State<Arc<AppState>>) -> Json<StatusResponse> {
    let receiver = state
        .status
        .lock()
        .map(|s| s.clone())
        .unwrap_or_default();

    Json(StatusResponse {
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_secs: state.start_time.elapsed().as_secs(),
        receiver,
        replay: ReplayStatus {
            position: state.replay_state.position.load(Ordering::SeqCst),
            total_frames: state.replay_state.total_frames.load(Ordering::SeqCst),
            acks_written: state.replay_state.acks_written.load(Ordering::SeqCst),
        },
    })
}
