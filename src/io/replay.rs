//! Recorded walk replay
//!
//! Feeds a JSONL track into the scanner in place of a live device, one fix
//! per line:
//!
//! ```text
//! {"lat": 44.623917, "lng": -63.920472, "delay_ms": 5000}
//! {"error": "timeout", "delay_ms": 1000}
//! ```
//!
//! `delay_ms` is the wait before the line is sent. Blank lines and `#` comments
//! are skipped.

use crate::domain::types::{GeoPoint, TrackingCommand};
use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

/// One replayed step: wait `delay`, then send `command`
#[derive(Debug, Clone, PartialEq)]
pub struct ReplayStep {
    pub delay: Duration,
    pub command: TrackingCommand,
}

#[derive(Debug, Deserialize)]
struct ReplayLine {
    #[serde(alias = "latitude")]
    lat: Option<f64>,
    #[serde(alias = "lon", alias = "longitude")]
    lng: Option<f64>,
    error: Option<String>,
    #[serde(default)]
    delay_ms: u64,
}

/// Parse a JSONL walk. Line numbers in errors are 1-based.
pub fn parse_replay(text: &str) -> Result<Vec<ReplayStep>> {
    let mut steps = Vec::new();

    for (idx, raw) in text.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let entry: ReplayLine = serde_json::from_str(line)
            .with_context(|| format!("replay line {}: invalid json", idx + 1))?;

        let command = match (entry.error, entry.lat, entry.lng) {
            (Some(reason), _, _) => TrackingCommand::PositionError(reason),
            (None, Some(lat), Some(lng)) => TrackingCommand::Position(GeoPoint::new(lat, lng)),
            _ => bail!("replay line {}: needs lat/lng or error", idx + 1),
        };

        steps.push(ReplayStep { delay: Duration::from_millis(entry.delay_ms), command });
    }

    Ok(steps)
}

pub fn load_replay(path: impl AsRef<Path>) -> Result<Vec<ReplayStep>> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read replay file {}", path.display()))?;
    let steps = parse_replay(&text)?;
    info!(path = %path.display(), steps = %steps.len(), "replay_loaded");
    Ok(steps)
}

/// Start tracking, play the steps in real time, then stop unless `hold`
/// keeps the session watching after the last fix.
pub async fn run_replay(
    steps: Vec<ReplayStep>,
    cmd_tx: mpsc::Sender<TrackingCommand>,
    hold: bool,
    mut shutdown: watch::Receiver<bool>,
) {
    if cmd_tx.send(TrackingCommand::Start).await.is_err() {
        warn!("command_channel_closed");
        return;
    }

    let total = steps.len();
    for (i, step) in steps.into_iter().enumerate() {
        tokio::select! {
            _ = tokio::time::sleep(step.delay) => {}
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    info!(sent = %i, total = %total, "replay_interrupted");
                    return;
                }
            }
        }

        debug!(step = %i, command = %step.command.as_str(), "replay_step");
        if cmd_tx.send(step.command).await.is_err() {
            warn!("command_channel_closed");
            return;
        }
    }

    info!(steps = %total, hold = %hold, "replay_finished");
    if !hold {
        let _ = cmd_tx.send(TrackingCommand::Stop).await;
    }
}
