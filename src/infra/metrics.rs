//! Lock-free metrics collection and periodic reporting
//!
//! Uses atomics for hot-path operations to avoid mutex contention.
//! All counter updates are lock-free; reporting is the only operation
//! that needs synchronization (via atomic swap).
//!
//! NOTE: All atomics use Relaxed ordering intentionally; these are statistical
//! counters only. Do NOT use these atomics for coordination or logic decisions.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::info;

/// Prometheus-style exponential bucket boundaries (microseconds)
/// Buckets: ≤100, ≤200, ≤400, ≤800, ≤1600, ≤3200, ≤6400, ≤12800, ≤25600, ≤51200, >51200
const BUCKET_BOUNDS: [u64; 10] = [100, 200, 400, 800, 1600, 3200, 6400, 12800, 25600, 51200];
const NUM_BUCKETS: usize = 11;

/// Compute bucket index for a latency value using binary search
#[inline]
fn bucket_index(latency_us: u64) -> usize {
    BUCKET_BOUNDS.partition_point(|&bound| bound < latency_us)
}

/// Update an atomic max value using compare-and-swap loop
#[inline]
fn update_atomic_max(atomic_max: &AtomicU64, new_value: u64) {
    let mut current_max = atomic_max.load(Ordering::Relaxed);
    while new_value > current_max {
        match atomic_max.compare_exchange_weak(
            current_max,
            new_value,
            Ordering::Relaxed,
            Ordering::Relaxed,
        ) {
            Ok(_) => break,
            Err(actual) => current_max = actual,
        }
    }
}

/// Read all buckets without resetting them
#[inline]
fn load_buckets(buckets: &[AtomicU64; NUM_BUCKETS]) -> [u64; NUM_BUCKETS] {
    std::array::from_fn(|i| buckets[i].load(Ordering::Relaxed))
}

/// Swap all buckets to zero and return their values
#[inline]
fn swap_buckets(buckets: &[AtomicU64; NUM_BUCKETS]) -> [u64; NUM_BUCKETS] {
    let mut result = [0u64; NUM_BUCKETS];
    for (i, bucket) in buckets.iter().enumerate() {
        result[i] = bucket.swap(0, Ordering::Relaxed);
    }
    result
}

/// Compute percentile from histogram buckets
/// Returns the upper bound of the bucket containing the percentile
fn percentile_from_buckets(buckets: &[u64; NUM_BUCKETS], percentile: f64) -> u64 {
    let total: u64 = buckets.iter().sum();
    if total == 0 {
        return 0;
    }

    let target = (total as f64 * percentile) as u64;
    let mut cumulative = 0u64;

    // Upper bounds for each bucket (last bucket uses 2x the previous bound)
    const BUCKET_UPPER_BOUNDS: [u64; NUM_BUCKETS] =
        [100, 200, 400, 800, 1600, 3200, 6400, 12800, 25600, 51200, 102400];

    for (i, &count) in buckets.iter().enumerate() {
        cumulative += count;
        if cumulative >= target {
            return BUCKET_UPPER_BOUNDS[i];
        }
    }
    BUCKET_UPPER_BOUNDS[NUM_BUCKETS - 1]
}

/// Lock-free metrics collector
///
/// All recording operations are lock-free using atomics.
/// The `report()` method atomically swaps counters to get a consistent snapshot.
pub struct Metrics {
    /// Total scans completed (monotonic)
    scans_total: AtomicU64,
    /// Scans since last report (reset on report)
    scans_since_report: AtomicU64,
    /// Scans that found a POI in range (monotonic)
    scan_hits_total: AtomicU64,
    /// Scans that failed, e.g. unreadable POI data (monotonic)
    scan_failures_total: AtomicU64,
    /// Sum of scan latencies in microseconds (reset on report)
    scan_latency_sum_us: AtomicU64,
    /// Max scan latency in microseconds (reset on report)
    scan_latency_max_us: AtomicU64,
    /// Scan latency histogram buckets (reset on report)
    scan_latency_buckets: [AtomicU64; NUM_BUCKETS],
    /// Lifetime scan latency sum for the exporter (monotonic)
    scan_latency_sum_total_us: AtomicU64,
    /// Lifetime scan latency buckets for the exporter (monotonic)
    scan_latency_buckets_total: [AtomicU64; NUM_BUCKETS],
    /// Position updates accepted (monotonic)
    positions_received: AtomicU64,
    /// Position updates rejected as malformed (monotonic)
    positions_rejected: AtomicU64,
    /// Errors reported by the geolocation source (monotonic)
    location_errors: AtomicU64,
    /// Tracking commands dropped due to channel full (monotonic)
    commands_dropped: AtomicU64,
    /// Narrations started (monotonic)
    narrations_started: AtomicU64,
    /// Narrations that failed to start (monotonic)
    narration_failures: AtomicU64,
    /// Narrations skipped because playback was already owned (monotonic)
    playback_busy: AtomicU64,
    /// 1 while tracking is active
    tracking_active: AtomicU64,
    /// Number of POIs in the last successful scan
    pois_loaded: AtomicU64,
    /// Last report time (only accessed from reporter, not atomic)
    last_report_time: parking_lot::Mutex<Instant>,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            scans_total: AtomicU64::new(0),
            scans_since_report: AtomicU64::new(0),
            scan_hits_total: AtomicU64::new(0),
            scan_failures_total: AtomicU64::new(0),
            scan_latency_sum_us: AtomicU64::new(0),
            scan_latency_max_us: AtomicU64::new(0),
            scan_latency_buckets: std::array::from_fn(|_| AtomicU64::new(0)),
            scan_latency_sum_total_us: AtomicU64::new(0),
            scan_latency_buckets_total: std::array::from_fn(|_| AtomicU64::new(0)),
            positions_received: AtomicU64::new(0),
            positions_rejected: AtomicU64::new(0),
            location_errors: AtomicU64::new(0),
            commands_dropped: AtomicU64::new(0),
            narrations_started: AtomicU64::new(0),
            narration_failures: AtomicU64::new(0),
            playback_busy: AtomicU64::new(0),
            tracking_active: AtomicU64::new(0),
            pois_loaded: AtomicU64::new(0),
            last_report_time: parking_lot::Mutex::new(Instant::now()),
        }
    }

    /// Record a completed scan with given latency (lock-free)
    #[inline]
    pub fn record_scan(&self, latency_us: u64, hit: bool) {
        self.scans_total.fetch_add(1, Ordering::Relaxed);
        self.scans_since_report.fetch_add(1, Ordering::Relaxed);
        if hit {
            self.scan_hits_total.fetch_add(1, Ordering::Relaxed);
        }
        self.scan_latency_sum_us.fetch_add(latency_us, Ordering::Relaxed);
        self.scan_latency_sum_total_us.fetch_add(latency_us, Ordering::Relaxed);

        let bucket = bucket_index(latency_us);
        self.scan_latency_buckets[bucket].fetch_add(1, Ordering::Relaxed);
        self.scan_latency_buckets_total[bucket].fetch_add(1, Ordering::Relaxed);

        update_atomic_max(&self.scan_latency_max_us, latency_us);
    }

    #[inline]
    pub fn record_scan_failure(&self) {
        self.scan_failures_total.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_position(&self) {
        self.positions_received.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_position_rejected(&self) {
        self.positions_rejected.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_location_error(&self) {
        self.location_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a tracking command dropped due to channel full (lock-free)
    #[inline]
    pub fn record_command_dropped(&self) {
        self.commands_dropped.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_narration_started(&self) {
        self.narrations_started.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_narration_failure(&self) {
        self.narration_failures.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_playback_busy(&self) {
        self.playback_busy.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn set_tracking_active(&self, active: bool) {
        self.tracking_active.store(u64::from(active), Ordering::Relaxed);
    }

    #[inline]
    pub fn set_pois_loaded(&self, count: usize) {
        self.pois_loaded.store(count as u64, Ordering::Relaxed);
    }

    #[inline]
    pub fn scans_total(&self) -> u64 {
        self.scans_total.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn scan_failures_total(&self) -> u64 {
        self.scan_failures_total.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn narrations_started(&self) -> u64 {
        self.narrations_started.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn tracking_active(&self) -> bool {
        self.tracking_active.load(Ordering::Relaxed) == 1
    }

    /// Cumulative view for scrapers; resets nothing, so it can run
    /// alongside the periodic `report()`
    pub fn snapshot(&self) -> MetricsSnapshot {
        let lat_buckets = load_buckets(&self.scan_latency_buckets_total);
        MetricsSnapshot {
            scans_total: self.scans_total.load(Ordering::Relaxed),
            scan_hits_total: self.scan_hits_total.load(Ordering::Relaxed),
            scan_failures_total: self.scan_failures_total.load(Ordering::Relaxed),
            lat_buckets,
            lat_sum_us: self.scan_latency_sum_total_us.load(Ordering::Relaxed),
            lat_p99_us: percentile_from_buckets(&lat_buckets, 0.99),
            positions_received: self.positions_received.load(Ordering::Relaxed),
            positions_rejected: self.positions_rejected.load(Ordering::Relaxed),
            location_errors: self.location_errors.load(Ordering::Relaxed),
            commands_dropped: self.commands_dropped.load(Ordering::Relaxed),
            narrations_started: self.narrations_started.load(Ordering::Relaxed),
            narration_failures: self.narration_failures.load(Ordering::Relaxed),
            playback_busy: self.playback_busy.load(Ordering::Relaxed),
            tracking_active: self.tracking_active.load(Ordering::Relaxed) == 1,
            pois_loaded: self.pois_loaded.load(Ordering::Relaxed),
        }
    }

    /// Generate a metrics report and reset periodic counters
    pub fn report(&self) -> MetricsSummary {
        let now = Instant::now();
        let elapsed_secs = {
            let mut last = self.last_report_time.lock();
            let elapsed = now.duration_since(*last).as_secs_f64();
            *last = now;
            elapsed
        };

        let scans_total = self.scans_total.load(Ordering::Relaxed);
        let scans_period = self.scans_since_report.swap(0, Ordering::Relaxed);
        let latency_sum = self.scan_latency_sum_us.swap(0, Ordering::Relaxed);
        let max_latency = self.scan_latency_max_us.swap(0, Ordering::Relaxed);
        let lat_buckets = swap_buckets(&self.scan_latency_buckets);

        let avg_latency = if scans_period > 0 { latency_sum / scans_period } else { 0 };
        let scans_per_min =
            if elapsed_secs > 0.0 { scans_period as f64 * 60.0 / elapsed_secs } else { 0.0 };

        MetricsSummary {
            scans_total,
            scans_per_min,
            scan_hits_total: self.scan_hits_total.load(Ordering::Relaxed),
            scan_failures_total: self.scan_failures_total.load(Ordering::Relaxed),
            avg_scan_latency_us: avg_latency,
            max_scan_latency_us: max_latency,
            lat_buckets,
            lat_p50_us: percentile_from_buckets(&lat_buckets, 0.50),
            lat_p99_us: percentile_from_buckets(&lat_buckets, 0.99),
            positions_received: self.positions_received.load(Ordering::Relaxed),
            positions_rejected: self.positions_rejected.load(Ordering::Relaxed),
            location_errors: self.location_errors.load(Ordering::Relaxed),
            commands_dropped: self.commands_dropped.load(Ordering::Relaxed),
            narrations_started: self.narrations_started.load(Ordering::Relaxed),
            narration_failures: self.narration_failures.load(Ordering::Relaxed),
            playback_busy: self.playback_busy.load(Ordering::Relaxed),
            tracking_active: self.tracking_active.load(Ordering::Relaxed) == 1,
            pois_loaded: self.pois_loaded.load(Ordering::Relaxed),
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Number of histogram buckets (exported for Prometheus formatting)
pub const METRICS_NUM_BUCKETS: usize = NUM_BUCKETS;

/// Exported bucket bounds for Prometheus formatting
pub const METRICS_BUCKET_BOUNDS: [u64; 10] = BUCKET_BOUNDS;

#[derive(Debug)]
pub struct MetricsSummary {
    pub scans_total: u64,
    pub scans_per_min: f64,
    pub scan_hits_total: u64,
    pub scan_failures_total: u64,
    pub avg_scan_latency_us: u64,
    pub max_scan_latency_us: u64,
    /// Scan latency histogram buckets
    /// Bounds: ≤100, ≤200, ≤400, ≤800, ≤1600, ≤3200, ≤6400, ≤12800, ≤25600, ≤51200, >51200 µs
    pub lat_buckets: [u64; NUM_BUCKETS],
    pub lat_p50_us: u64,
    pub lat_p99_us: u64,
    pub positions_received: u64,
    pub positions_rejected: u64,
    pub location_errors: u64,
    pub commands_dropped: u64,
    pub narrations_started: u64,
    pub narration_failures: u64,
    pub playback_busy: u64,
    pub tracking_active: bool,
    pub pois_loaded: u64,
}

/// Monotonic counters and lifetime histogram (Prometheus export)
#[derive(Debug, Clone)]
pub struct MetricsSnapshot {
    pub scans_total: u64,
    pub scan_hits_total: u64,
    pub scan_failures_total: u64,
    /// Per-bucket counts since startup (not cumulative across buckets)
    pub lat_buckets: [u64; NUM_BUCKETS],
    pub lat_sum_us: u64,
    pub lat_p99_us: u64,
    pub positions_received: u64,
    pub positions_rejected: u64,
    pub location_errors: u64,
    pub commands_dropped: u64,
    pub narrations_started: u64,
    pub narration_failures: u64,
    pub playback_busy: u64,
    pub tracking_active: bool,
    pub pois_loaded: u64,
}

impl MetricsSummary {
    pub fn log(&self) {
        info!(
            scans_total = %self.scans_total,
            scans_per_min = format!("{:.1}", self.scans_per_min),
            scan_hits = %self.scan_hits_total,
            scan_failures = %self.scan_failures_total,
            avg_latency_us = %self.avg_scan_latency_us,
            max_latency_us = %self.max_scan_latency_us,
            p99_us = %self.lat_p99_us,
            positions = %self.positions_received,
            positions_rejected = %self.positions_rejected,
            location_errors = %self.location_errors,
            narrations = %self.narrations_started,
            playback_busy = %self.playback_busy,
            tracking = %self.tracking_active,
            "metrics"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_new() {
        let metrics = Metrics::new();
        assert_eq!(metrics.scans_total(), 0);
        assert!(!metrics.tracking_active());
    }

    #[test]
    fn test_record_scan() {
        let metrics = Metrics::new();

        metrics.record_scan(100, false);
        assert_eq!(metrics.scans_total(), 1);
        assert_eq!(metrics.scan_latency_sum_us.load(Ordering::Relaxed), 100);

        metrics.record_scan(200, true);
        assert_eq!(metrics.scans_total(), 2);
        assert_eq!(metrics.scan_hits_total.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_report_resets_periodic_counters() {
        let metrics = Metrics::new();

        metrics.record_scan(100, true);
        metrics.record_scan(200, false);
        metrics.record_scan(300, false);
        metrics.record_scan_failure();

        let summary = metrics.report();

        assert_eq!(summary.scans_total, 3);
        assert_eq!(summary.scan_hits_total, 1);
        assert_eq!(summary.scan_failures_total, 1);
        assert_eq!(summary.avg_scan_latency_us, 200);
        assert_eq!(summary.max_scan_latency_us, 300);

        assert_eq!(metrics.scans_since_report.load(Ordering::Relaxed), 0);
        assert_eq!(metrics.scan_latency_sum_us.load(Ordering::Relaxed), 0);
        assert_eq!(metrics.scan_latency_max_us.load(Ordering::Relaxed), 0);

        // Monotonic counters survive the report
        assert_eq!(metrics.scans_total(), 3);
    }

    #[test]
    fn test_snapshot_survives_report() {
        let metrics = Metrics::new();

        metrics.record_scan(150, true);
        metrics.record_scan(5000, false);

        let first = metrics.snapshot();
        assert_eq!(first.lat_buckets.iter().sum::<u64>(), 2);
        assert_eq!(first.lat_sum_us, 5150);

        // Periodic log reset does not touch the lifetime histogram
        metrics.report();
        metrics.record_scan(50, false);

        let second = metrics.snapshot();
        assert_eq!(second.scans_total, 3);
        assert_eq!(second.lat_buckets.iter().sum::<u64>(), 3);
        assert_eq!(second.lat_buckets[0], 1);
        assert_eq!(second.lat_sum_us, 5200);
        assert_eq!(second.scan_hits_total, 1);
    }

    #[test]
    fn test_report_empty() {
        let metrics = Metrics::new();
        let summary = metrics.report();

        assert_eq!(summary.scans_total, 0);
        assert_eq!(summary.avg_scan_latency_us, 0);
        assert_eq!(summary.lat_p99_us, 0);
    }

    #[test]
    fn test_bucket_index() {
        assert_eq!(bucket_index(0), 0);
        assert_eq!(bucket_index(100), 0);
        assert_eq!(bucket_index(101), 1);
        assert_eq!(bucket_index(51200), 9);
        assert_eq!(bucket_index(51201), 10);
    }

    #[test]
    fn test_tracking_gauge() {
        let metrics = Metrics::new();
        metrics.set_tracking_active(true);
        assert!(metrics.tracking_active());
        metrics.set_tracking_active(false);
        assert!(!metrics.tracking_active());
    }

    #[test]
    fn test_concurrent_updates() {
        use std::sync::Arc;
        use std::thread;

        let metrics = Arc::new(Metrics::new());
        let mut handles = vec![];

        for _ in 0..8 {
            let m = metrics.clone();
            handles.push(thread::spawn(move || {
                for i in 0..500 {
                    m.record_scan(i as u64, i % 2 == 0);
                }
            }));
        }

        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(metrics.scans_total(), 4000);
        assert_eq!(metrics.scan_hits_total.load(Ordering::Relaxed), 2000);
    }
}
