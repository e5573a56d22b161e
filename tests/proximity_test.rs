//! End-to-end tests: POI file -> scanner -> narrator -> playback gate

use std::io::Write;
use std::sync::Arc;
use std::time::Duration;
use tempfile::NamedTempFile;
use tokio::sync::{mpsc, watch};
use trailguide::domain::types::{GeoPoint, ScanSession, TrackingCommand};
use trailguide::infra::{Config, Metrics};
use trailguide::io::{load_boundary, PoiFile, PoiSource};
use trailguide::services::{AudioPlaybackGate, LogAudioEngine, Narrator, ProximityScanner};

const TRAILHEAD: GeoPoint = GeoPoint::new(44.623917, -63.920472);

fn write_temp(content: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(content.as_bytes()).unwrap();
    file.flush().unwrap();
    file
}

fn trail_pois() -> NamedTempFile {
    write_temp(
        r#"[
  {"id": "oak-1", "name": "Old Oak", "lat": 44.623917, "lng": -63.920472, "audio": "audio/old-oak.mp3"},
  {"id": "hemlock-7", "name": "Eastern Hemlock", "lat": 44.6250, "lng": -63.9190},
  {"name": "Missing coordinates"}
]"#,
    )
}

/// Let the spawned tasks drain their queues
async fn settle() {
    tokio::time::sleep(Duration::from_millis(1)).await;
}

struct Harness {
    cmd_tx: mpsc::Sender<TrackingCommand>,
    state_rx: watch::Receiver<ScanSession>,
    metrics: Arc<Metrics>,
    gate: Arc<AudioPlaybackGate>,
    shutdown_tx: watch::Sender<bool>,
    scanner_task: tokio::task::JoinHandle<()>,
    narrator_task: tokio::task::JoinHandle<()>,
}

fn spawn_pipeline(pois_path: &std::path::Path, boundary_path: Option<&std::path::Path>) -> Harness {
    let config = Config::default();
    let metrics = Arc::new(Metrics::new());
    let gate = Arc::new(AudioPlaybackGate::new());
    let pois: Arc<dyn PoiSource> = Arc::new(PoiFile::new(pois_path));

    let mut scanner = ProximityScanner::new(&config, pois, metrics.clone());
    if let Some(path) = boundary_path {
        scanner = scanner.with_boundary(load_boundary(path).unwrap());
    }
    let state_rx = scanner.subscribe();

    let (cmd_tx, cmd_rx) = mpsc::channel(config.command_buffer());
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let mut narrator =
        Narrator::new(&config, gate.clone(), Arc::new(LogAudioEngine), metrics.clone());
    let narrator_state = scanner.subscribe();
    let narrator_shutdown = shutdown_rx.clone();
    let narrator_task = tokio::spawn(async move {
        narrator.run(narrator_state, narrator_shutdown).await;
    });

    let scanner_task = tokio::spawn(async move {
        scanner.run(cmd_rx, shutdown_rx).await;
    });

    Harness { cmd_tx, state_rx, metrics, gate, shutdown_tx, scanner_task, narrator_task }
}

#[tokio::test(start_paused = true)]
async fn test_visitor_at_trailhead_hears_oak() {
    let pois_file = trail_pois();
    let h = spawn_pipeline(pois_file.path(), None);

    h.cmd_tx.send(TrackingCommand::Start).await.unwrap();
    settle().await;

    // Start scan ran before any fix
    {
        let session = h.state_rx.borrow();
        assert!(session.watching);
        assert!(session.last_result.is_none());
        assert!(session.last_checked_at.is_some());
    }
    assert_eq!(h.metrics.scans_total(), 1);

    // First fix scans right away
    h.cmd_tx.send(TrackingCommand::Position(TRAILHEAD)).await.unwrap();
    settle().await;
    {
        let session = h.state_rx.borrow();
        let hit = session.last_result.as_ref().expect("oak in range");
        assert_eq!(hit.poi.id, "oak-1");
        assert!(hit.distance_m < 0.01);
    }
    assert_eq!(h.metrics.scans_total(), 2);
    assert!(h.gate.is_locked());

    // Every 15 s the oak is reported again
    tokio::time::sleep(Duration::from_millis(15_500)).await;
    assert_eq!(h.metrics.scans_total(), 3);
    tokio::time::sleep(Duration::from_secs(15)).await;
    assert_eq!(h.metrics.scans_total(), 4);
    assert_eq!(h.state_rx.borrow().active_poi_id(), Some("oak-1"));
    assert_eq!(h.metrics.narrations_started(), 1);

    // Stop: idle session, gate released, no more ticks
    h.cmd_tx.send(TrackingCommand::Stop).await.unwrap();
    settle().await;
    assert_eq!(*h.state_rx.borrow(), ScanSession::idle());
    assert!(!h.gate.is_locked());

    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(h.metrics.scans_total(), 4);
    assert!(!h.metrics.tracking_active());

    h.shutdown_tx.send(true).unwrap();
    h.scanner_task.await.unwrap();
    h.narrator_task.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_walking_away_releases_narration() {
    let pois_file = trail_pois();
    let h = spawn_pipeline(pois_file.path(), None);

    h.cmd_tx.send(TrackingCommand::Position(TRAILHEAD)).await.unwrap();
    h.cmd_tx.send(TrackingCommand::Start).await.unwrap();
    settle().await;

    // Position sent before Start is ignored, so the start scan has no fix
    assert!(h.state_rx.borrow().last_result.is_none());

    h.cmd_tx.send(TrackingCommand::Position(TRAILHEAD)).await.unwrap();
    settle().await;
    assert!(h.gate.is_locked());

    // ~11 m north: outside 3 m, picked up on the next tick only
    h.cmd_tx.send(TrackingCommand::Position(GeoPoint::new(44.624017, -63.920472))).await.unwrap();
    settle().await;
    assert_eq!(h.state_rx.borrow().active_poi_id(), Some("oak-1"));

    tokio::time::sleep(Duration::from_secs(15)).await;
    assert!(h.state_rx.borrow().last_result.is_none());
    assert!(!h.gate.is_locked());

    // Geolocation errors keep the session and the last fix
    h.cmd_tx.send(TrackingCommand::PositionError("timeout".to_string())).await.unwrap();
    settle().await;
    assert!(h.state_rx.borrow().watching);
    assert_eq!(h.metrics.report().location_errors, 1);

    // Closing the command channel ends the scanner, and with it the narrator
    drop(h.cmd_tx);
    h.scanner_task.await.unwrap();
    h.narrator_task.await.unwrap();
    assert_eq!(h.metrics.scans_total(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_boundary_reported_with_scan() {
    let pois_file = trail_pois();
    let boundary_file = write_temp(
        "[[44.6230, -63.9215], [44.6230, -63.9195], [44.6250, -63.9195], [44.6250, -63.9215]]",
    );
    let h = spawn_pipeline(pois_file.path(), Some(boundary_file.path()));

    h.cmd_tx.send(TrackingCommand::Start).await.unwrap();
    h.cmd_tx.send(TrackingCommand::Position(TRAILHEAD)).await.unwrap();
    settle().await;

    let status = h.state_rx.borrow().last_boundary.expect("boundary checked");
    assert!(status.inside);
    assert_eq!(status.distance_m, 0.0);

    h.shutdown_tx.send(true).unwrap();
    h.scanner_task.await.unwrap();
    h.narrator_task.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_poi_file_edits_picked_up_on_next_tick() {
    let pois_file = write_temp(r#"[{"id": "far", "name": "Far Pine", "lat": 44.7, "lng": -63.9}]"#);
    let h = spawn_pipeline(pois_file.path(), None);

    h.cmd_tx.send(TrackingCommand::Start).await.unwrap();
    h.cmd_tx.send(TrackingCommand::Position(TRAILHEAD)).await.unwrap();
    settle().await;
    assert!(h.state_rx.borrow().last_result.is_none());

    // Rewrite with a POI at the trailhead; make sure the mtime moves
    std::thread::sleep(Duration::from_millis(20));
    std::fs::write(
        pois_file.path(),
        r#"[{"id": "oak-1", "name": "Old Oak", "lat": 44.623917, "lng": -63.920472}]"#,
    )
    .unwrap();
    let later = std::time::SystemTime::now() + Duration::from_secs(5);
    std::fs::File::options()
        .write(true)
        .open(pois_file.path())
        .unwrap()
        .set_modified(later)
        .unwrap();

    tokio::time::sleep(Duration::from_secs(15)).await;
    assert_eq!(h.state_rx.borrow().active_poi_id(), Some("oak-1"));

    h.shutdown_tx.send(true).unwrap();
    h.scanner_task.await.unwrap();
    h.narrator_task.await.unwrap();
}
