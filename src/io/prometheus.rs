//! Prometheus metrics HTTP endpoint
//!
//! Exposes scanner and narration metrics in Prometheus text format at /metrics.
//! Uses hyper for the HTTP server.

use crate::infra::metrics::{Metrics, MetricsSnapshot, METRICS_BUCKET_BOUNDS, METRICS_NUM_BUCKETS};
use bytes::Bytes;
use http_body_util::Full;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::fmt::Write;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info};

/// Prometheus metric type
enum MetricType {
    Counter,
    Gauge,
}

impl MetricType {
    fn as_str(&self) -> &'static str {
        match self {
            MetricType::Counter => "counter",
            MetricType::Gauge => "gauge",
        }
    }
}

/// Write a simple metric (counter or gauge) with site label
fn write_metric(
    output: &mut String,
    name: &str,
    help: &str,
    typ: MetricType,
    site: &str,
    val: u64,
) {
    let _ = writeln!(output, "# HELP {name} {help}");
    let _ = writeln!(output, "# TYPE {name} {}", typ.as_str());
    let _ = writeln!(output, "{name}{{site=\"{site}\"}} {val}");
}

/// Write a histogram metric with buckets, sum, and count
fn write_histogram(
    output: &mut String,
    name: &str,
    help: &str,
    site: &str,
    buckets: &[u64; METRICS_NUM_BUCKETS],
    sum: u64,
) {
    let _ = writeln!(output, "# HELP {name} {help}");
    let _ = writeln!(output, "# TYPE {name} histogram");

    let mut cumulative = 0u64;
    for (i, &bound) in METRICS_BUCKET_BOUNDS.iter().enumerate() {
        cumulative += buckets[i];
        let _ = writeln!(output, "{name}_bucket{{site=\"{site}\",le=\"{bound}\"}} {cumulative}");
    }
    cumulative += buckets[METRICS_NUM_BUCKETS - 1];
    let _ = writeln!(output, "{name}_bucket{{site=\"{site}\",le=\"+Inf\"}} {cumulative}");

    let count: u64 = buckets.iter().sum();
    let _ = writeln!(output, "{name}_sum{{site=\"{site}\"}} {sum}");
    let _ = writeln!(output, "{name}_count{{site=\"{site}\"}} {count}");
}

/// Format metrics in Prometheus text exposition format
///
/// Reads the cumulative snapshot; the periodic log report keeps its own
/// resetting window.
fn format_prometheus_metrics(metrics: &Metrics, site_id: &str) -> String {
    let summary = metrics.snapshot();
    let mut output = String::with_capacity(4096);

    write_scan_metrics(&mut output, site_id, &summary);
    write_position_metrics(&mut output, site_id, &summary);
    write_narration_metrics(&mut output, site_id, &summary);

    output
}

fn write_scan_metrics(output: &mut String, site: &str, summary: &MetricsSnapshot) {
    write_metric(
        output,
        "trailguide_scans_total",
        "Total proximity scans run",
        MetricType::Counter,
        site,
        summary.scans_total,
    );
    write_metric(
        output,
        "trailguide_scan_hits_total",
        "Scans that found a POI in range",
        MetricType::Counter,
        site,
        summary.scan_hits_total,
    );
    write_metric(
        output,
        "trailguide_scan_failures_total",
        "Scans that failed (POI source errors)",
        MetricType::Counter,
        site,
        summary.scan_failures_total,
    );

    write_histogram(
        output,
        "trailguide_scan_latency_us",
        "Scan latency in microseconds",
        site,
        &summary.lat_buckets,
        summary.lat_sum_us,
    );
    write_metric(
        output,
        "trailguide_scan_latency_p99_us",
        "99th percentile scan latency",
        MetricType::Gauge,
        site,
        summary.lat_p99_us,
    );

    write_metric(
        output,
        "trailguide_tracking_active",
        "Whether location tracking is on (0/1)",
        MetricType::Gauge,
        site,
        summary.tracking_active as u64,
    );
    write_metric(
        output,
        "trailguide_pois_loaded",
        "POIs in the last scanned set",
        MetricType::Gauge,
        site,
        summary.pois_loaded,
    );
}

fn write_position_metrics(output: &mut String, site: &str, summary: &MetricsSnapshot) {
    write_metric(
        output,
        "trailguide_positions_received_total",
        "Position fixes accepted while tracking",
        MetricType::Counter,
        site,
        summary.positions_received,
    );
    write_metric(
        output,
        "trailguide_positions_rejected_total",
        "Position payloads or fixes rejected",
        MetricType::Counter,
        site,
        summary.positions_rejected,
    );
    write_metric(
        output,
        "trailguide_location_errors_total",
        "Geolocation errors reported by the device",
        MetricType::Counter,
        site,
        summary.location_errors,
    );
    write_metric(
        output,
        "trailguide_commands_dropped_total",
        "Tracking commands dropped due to channel full",
        MetricType::Counter,
        site,
        summary.commands_dropped,
    );
}

fn write_narration_metrics(output: &mut String, site: &str, summary: &MetricsSnapshot) {
    write_metric(
        output,
        "trailguide_narrations_started_total",
        "Narration clips started",
        MetricType::Counter,
        site,
        summary.narrations_started,
    );
    write_metric(
        output,
        "trailguide_narration_failures_total",
        "Narration clips that failed to start",
        MetricType::Counter,
        site,
        summary.narration_failures,
    );
    write_metric(
        output,
        "trailguide_playback_busy_total",
        "Narrations skipped because audio was in use",
        MetricType::Counter,
        site,
        summary.playback_busy,
    );
}

fn text_response(status: StatusCode, body: String) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from(body)));
    *response.status_mut() = status;
    response
}

/// Handle HTTP requests
async fn handle_request(
    req: Request<hyper::body::Incoming>,
    metrics: Arc<Metrics>,
    site_id: Arc<String>,
) -> Result<Response<Full<Bytes>>, Infallible> {
    match (req.method(), req.uri().path()) {
        (&Method::GET, "/metrics") => {
            let mut response =
                text_response(StatusCode::OK, format_prometheus_metrics(&metrics, &site_id));
            response.headers_mut().insert(
                hyper::header::CONTENT_TYPE,
                hyper::header::HeaderValue::from_static("text/plain; version=0.0.4; charset=utf-8"),
            );
            Ok(response)
        }
        (&Method::GET, "/health") => Ok(text_response(StatusCode::OK, "ok".to_string())),
        _ => Ok(text_response(StatusCode::NOT_FOUND, "Not Found".to_string())),
    }
}

/// Start the Prometheus metrics HTTP server
pub async fn start_metrics_server(
    port: u16,
    metrics: Arc<Metrics>,
    site_id: String,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr).await?;
    let site_id = Arc::new(site_id);

    info!(port = %port, site = %site_id, "prometheus_metrics_server_started");

    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, _addr)) => {
                        let io = TokioIo::new(stream);
                        let metrics = metrics.clone();
                        let site_id = site_id.clone();

                        tokio::spawn(async move {
                            let service = service_fn(move |req| {
                                let metrics = metrics.clone();
                                let site_id = site_id.clone();
                                async move { handle_request(req, metrics, site_id).await }
                            });

                            if let Err(e) = http1::Builder::new()
                                .serve_connection(io, service)
                                .await
                            {
                                error!(error = %e, "prometheus_http_error");
                            }
                        });
                    }
                    Err(e) => {
                        error!(error = %e, "prometheus_accept_error");
                    }
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    info!("prometheus_metrics_server_shutdown");
                    return Ok(());
                }
            }
        }
    }
}
