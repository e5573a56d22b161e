//! Trailguide - Talking Trees proximity service
//!
//! Follows a device's position on a trail map and narrates the nearest
//! point of interest once the visitor is within a few meters of it.
//!
//! Module structure:
//! - `domain/` - Core types and geometry (GeoPoint, Polygon, GeoMath)
//! - `io/` - External interfaces (POI data, MQTT positions, replay, Prometheus)
//! - `services/` - Business logic (ProximityScanner, AudioPlaybackGate, Narrator)
//! - `infra/` - Infrastructure (Config, Metrics)

use clap::Parser;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{info, warn};
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::EnvFilter;
use trailguide::infra::{Config, Metrics};
use trailguide::io::{load_boundary, load_replay, run_replay, PoiFile, PoiSource};
use trailguide::services::{AudioPlaybackGate, LogAudioEngine, Narrator, ProximityScanner};

/// Trailguide - nearest-POI narration for trail maps
#[derive(Parser, Debug)]
#[command(name = "trailguide", version, about)]
struct Args {
    /// Path to TOML configuration file (default: $CONFIG_FILE or config/dev.toml)
    #[arg(short, long)]
    config: Option<String>,

    /// Replay a recorded walk (JSONL) instead of listening on MQTT
    #[arg(long)]
    replay: Option<String>,

    /// Keep tracking after the replay ends
    #[arg(long, requires = "replay")]
    hold: bool,

    /// Emit logs as JSON
    #[arg(long)]
    log_json: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Parse command line arguments using clap
    let args = Args::parse();

    // Initialize structured logging with configurable level via RUST_LOG env var
    // Default: INFO, use RUST_LOG=debug for per-scan visibility
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if args.log_json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_timer(UtcTime::rfc_3339())
            .with_target(false)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_timer(UtcTime::rfc_3339())
            .with_target(false)
            .init();
    }

    info!(
        version = env!("CARGO_PKG_VERSION"),
        build = env!("TRAILGUIDE_BUILD_ID"),
        "trailguide starting"
    );

    let config_path = Config::resolve_config_path(args.config.clone());
    let config = Config::load_from_path(&config_path);

    info!(
        config_file = %config.config_file(),
        site = %config.site_name(),
        scan_interval_secs = %config.scan_interval_secs(),
        scan_radius_m = %config.scan_radius_m(),
        pois_file = %config.pois_file(),
        boundary_file = ?config.boundary_file(),
        mqtt_enabled = %config.mqtt_enabled(),
        narration_enabled = %config.narration_enabled(),
        prometheus_port = %config.prometheus_port(),
        "config_loaded"
    );

    // Create shutdown signal
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let shutdown_tx = Arc::new(shutdown_tx);

    // Create shared components
    let metrics = Arc::new(Metrics::new());
    let gate = Arc::new(AudioPlaybackGate::new());
    let pois: Arc<dyn PoiSource> = Arc::new(PoiFile::new(config.pois_file()));

    // Early read so a broken data file shows up at startup; scans retry anyway
    match pois.pois() {
        Ok(set) => metrics.set_pois_loaded(set.len()),
        Err(e) => warn!(error = %format!("{:#}", e), "pois_unavailable_at_startup"),
    }

    let mut scanner = ProximityScanner::new(&config, pois, metrics.clone());
    if let Some(path) = config.boundary_file() {
        match load_boundary(path) {
            Ok(boundary) => scanner = scanner.with_boundary(boundary),
            Err(e) => warn!(error = %format!("{:#}", e), "boundary_unavailable"),
        }
    }

    // Create command channel (bounded for backpressure)
    let (cmd_tx, cmd_rx) = mpsc::channel(config.command_buffer());

    // A finished replay closes the channel and ends the run; otherwise
    // the scanner runs until Ctrl+C
    let replay_ends_run = args.replay.is_some() && !args.hold;
    let keepalive_tx = if replay_ends_run { None } else { Some(cmd_tx.clone()) };

    // Start position source
    if let Some(path) = &args.replay {
        let steps = load_replay(path)?;
        let replay_shutdown = shutdown_rx.clone();
        let hold = args.hold;
        tokio::spawn(async move {
            run_replay(steps, cmd_tx, hold, replay_shutdown).await;
        });
    } else if config.mqtt_enabled() {
        let mqtt_config = config.clone();
        let mqtt_metrics = metrics.clone();
        let mqtt_shutdown = shutdown_rx.clone();
        tokio::spawn(async move {
            if let Err(e) = trailguide::io::mqtt::start_mqtt_client(
                &mqtt_config,
                cmd_tx,
                mqtt_metrics,
                mqtt_shutdown,
            )
            .await
            {
                tracing::error!(error = %e, "MQTT client error");
            }
        });
    } else {
        warn!("no_position_source: enable [mqtt] or pass --replay");
    }

    // Start narrator
    let narrator_handle = if config.narration_enabled() {
        let mut narrator =
            Narrator::new(&config, gate.clone(), Arc::new(LogAudioEngine), metrics.clone());
        let state_rx = scanner.subscribe();
        let narrator_shutdown = shutdown_rx.clone();
        Some(tokio::spawn(async move {
            narrator.run(state_rx, narrator_shutdown).await;
        }))
    } else {
        None
    };

    // Start Prometheus metrics HTTP server (if port > 0)
    let prometheus_port = config.prometheus_port();
    if prometheus_port > 0 {
        let prom_metrics = metrics.clone();
        let prom_site = config.site_id().to_string();
        let prom_shutdown = shutdown_rx.clone();
        tokio::spawn(async move {
            if let Err(e) = trailguide::io::prometheus::start_metrics_server(
                prometheus_port,
                prom_metrics,
                prom_site,
                prom_shutdown,
            )
            .await
            {
                tracing::error!(error = %e, "Prometheus metrics server error");
            }
        });
    }

    // Start metrics reporter
    let metrics_clone = metrics.clone();
    let metrics_interval = config.metrics_interval_secs();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(metrics_interval));
        loop {
            interval.tick().await;
            metrics_clone.report().log();
        }
    });

    // Handle shutdown on Ctrl+C
    let shutdown_signal = shutdown_tx.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("shutdown_signal_received");
        let _ = shutdown_signal.send(true);
    });

    // Run scanner - consumes commands until shutdown or the channel closes
    scanner.run(cmd_rx, shutdown_rx).await;
    drop(keepalive_tx);

    // Stop the remaining tasks; the narrator releases playback on the way out
    let _ = shutdown_tx.send(true);
    if let Some(handle) = narrator_handle {
        let _ = handle.await;
    }

    metrics.report().log();
    info!("trailguide shutdown complete");
    Ok(())
}
