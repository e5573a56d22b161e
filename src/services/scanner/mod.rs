//! Proximity scanning for the Talking Trees feature
//!
//! The scanner is Idle until tracking starts, then Watching:
//! - Position updates only record the latest fix; they do not scan
//! - A fixed-interval timer drives scans against whatever fix is latest
//! - Each scan publishes a fresh `ScanSession` on a watch channel
//!
//! Decoupling scans from the position stream bounds scan cost regardless of
//! how often the geolocation source reports. All commands and ticks are
//! handled by a single task, so scans never overlap.


use crate::domain::geo::{distance_to_polygon_meters, nearest_poi_within_radius, point_in_polygon};
use crate::domain::types::{epoch_ms, BoundaryStatus, GeoPoint, Polygon, ScanSession, TrackingCommand};
use crate::infra::config::Config;
use crate::infra::metrics::Metrics;
use crate::io::poi_data::PoiSource;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, watch};
use tokio::time::{interval_at, Duration, Interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// Periodic nearest-POI scanner driven by a live position feed
pub struct ProximityScanner {
    /// Time between scans while watching
    period: Duration,
    /// Trigger radius (meters)
    radius_m: f64,
    /// POI set, read on every scan
    pois: Arc<dyn PoiSource>,
    /// Optional site outline for inside/outside reporting
    boundary: Option<Polygon>,
    /// Current session; reset when tracking stops
    session: ScanSession,
    /// Armed only while watching
    timer: Option<Interval>,
    /// Set when the start scan ran before any fix arrived
    awaiting_first_fix: bool,
    /// Publishes the session after each scan and on start/stop
    state_tx: watch::Sender<ScanSession>,
    metrics: Arc<Metrics>,
}

impl ProximityScanner {
    pub fn new(config: &Config, pois: Arc<dyn PoiSource>, metrics: Arc<Metrics>) -> Self {
        let (state_tx, _) = watch::channel(ScanSession::idle());
        Self {
            period: Duration::from_secs(config.scan_interval_secs()),
            radius_m: config.scan_radius_m(),
            pois,
            boundary: None,
            session: ScanSession::idle(),
            timer: None,
            awaiting_first_fix: false,
            state_tx,
            metrics,
        }
    }

    /// Report inside/outside and distance to this site outline on every scan
    pub fn with_boundary(mut self, boundary: Polygon) -> Self {
        self.boundary = Some(boundary);
        self
    }

    /// Receive every published session
    pub fn subscribe(&self) -> watch::Receiver<ScanSession> {
        self.state_tx.subscribe()
    }

    pub fn session(&self) -> &ScanSession {
        &self.session
    }

    pub fn is_watching(&self) -> bool {
        self.session.watching
    }

    /// Idle -> Watching: scan once now, then every period. No-op if watching.
    pub fn start_tracking(&mut self) {
        if self.session.watching {
            debug!("tracking_already_started");
            return;
        }

        self.session = ScanSession { watching: true, ..ScanSession::idle() };
        self.metrics.set_tracking_active(true);
        info!(
            period_secs = %self.period.as_secs(),
            radius_m = %self.radius_m,
            "tracking_started"
        );

        self.tick();
        self.awaiting_first_fix = self.session.last_position.is_none();

        let mut timer = interval_at(tokio::time::Instant::now() + self.period, self.period);
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        self.timer = Some(timer);
    }

    /// Watching -> Idle: cancel the timer and clear the session. No-op if idle.
    pub fn stop_tracking(&mut self) {
        if !self.session.watching {
            debug!("tracking_already_stopped");
            return;
        }

        self.timer = None;
        self.awaiting_first_fix = false;
        self.session = ScanSession::idle();
        self.metrics.set_tracking_active(false);
        self.state_tx.send_replace(self.session.clone());
        info!("tracking_stopped");
    }

    /// Record the latest fix. Only the very first fix after a position-less
    /// start triggers a scan; everything else waits for the timer.
    pub fn update_position(&mut self, position: GeoPoint) {
        if !self.session.watching {
            debug!(position = %position, "position_ignored_not_watching");
            return;
        }
        if !position.is_finite() {
            self.metrics.record_position_rejected();
            warn!(lat = %position.lat, lng = %position.lng, "position_rejected");
            return;
        }

        self.metrics.record_position();
        self.session.last_position = Some(position);

        if self.awaiting_first_fix {
            self.awaiting_first_fix = false;
            debug!(position = %position, "first_fix_scan");
            self.tick();
        }
    }

    /// Geolocation failures degrade the feature; the last fix stays in use
    pub fn position_error(&mut self, reason: &str) {
        self.metrics.record_location_error();
        warn!(reason = %reason, watching = %self.session.watching, "location_error");
    }

    /// Run one scan, logging and counting failures instead of propagating them
    pub fn tick(&mut self) {
        if let Err(e) = self.scan() {
            self.metrics.record_scan_failure();
            error!(error = %format!("{:#}", e), "scan_failed");
        }
    }

    fn scan(&mut self) -> anyhow::Result<()> {
        let start = Instant::now();
        let pois = self.pois.pois()?;
        let position = self.session.last_position;

        let result = nearest_poi_within_radius(&pois, position, self.radius_m);
        let boundary = match (&self.boundary, position) {
            (Some(polygon), Some(p)) => Some(BoundaryStatus {
                inside: point_in_polygon(p, polygon),
                distance_m: distance_to_polygon_meters(p, polygon),
            }),
            _ => None,
        };

        let previous_id = self.session.active_poi_id().map(str::to_string);
        let current_id = result.as_ref().map(|r| r.poi.id.clone());

        let latency_us = start.elapsed().as_micros() as u64;
        self.metrics.record_scan(latency_us, result.is_some());
        self.metrics.set_pois_loaded(pois.len());

        if current_id != previous_id {
            match &result {
                Some(hit) => info!(
                    poi_id = %hit.poi.id,
                    poi_name = %hit.poi.name,
                    distance_m = format!("{:.2}", hit.distance_m),
                    "poi_in_range"
                ),
                None => info!(poi_id = ?previous_id, "poi_out_of_range"),
            }
        }

        debug!(
            position = ?position,
            pois = %pois.len(),
            hit = ?current_id,
            inside_site = ?boundary.map(|b| b.inside),
            latency_us = %latency_us,
            "scan_tick"
        );

        self.session.last_result = result;
        self.session.last_boundary = boundary;
        self.session.last_checked_at = Some(epoch_ms());
        self.state_tx.send_replace(self.session.clone());
        Ok(())
    }

    /// Apply one command from the position feed or the UI
    pub fn handle_command(&mut self, command: TrackingCommand) {
        match command {
            TrackingCommand::Start => self.start_tracking(),
            TrackingCommand::Stop => self.stop_tracking(),
            TrackingCommand::Position(position) => self.update_position(position),
            TrackingCommand::PositionError(reason) => self.position_error(&reason),
        }
    }

    /// Process commands and timer ticks until shutdown or the channel closes
    pub async fn run(
        &mut self,
        mut cmd_rx: mpsc::Receiver<TrackingCommand>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        info!("scanner_started");

        loop {
            tokio::select! {
                command = cmd_rx.recv() => {
                    match command {
                        Some(c) => self.handle_command(c),
                        None => break, // Channel closed
                    }
                }
                _ = next_tick(&mut self.timer) => {
                    self.tick();
                }
                changed = shutdown.changed() => {
                    // A dropped sender also means shutdown
                    if changed.is_err() || *shutdown.borrow() {
                        info!("scanner_shutdown");
                        break;
                    }
                }
            }
        }

        self.stop_tracking();
        info!("scanner_stopped");
    }
}

/// Resolves on the next timer tick, or never while idle
async fn next_tick(timer: &mut Option<Interval>) {
    match timer {
        Some(t) => {
            t.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}
