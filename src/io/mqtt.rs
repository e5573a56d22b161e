//! MQTT client for receiving device positions
//!
//! Two topics feed the scanner:
//! - position topic: `{"lat": 44.62, "lng": -63.92}` fixes, or
//!   `{"error": "timeout"}` when the device's geolocation fails
//! - control topic: `start` / `stop` to toggle location tracking

use crate::domain::types::{epoch_ms, GeoPoint, TrackingCommand};
use crate::infra::config::Config;
use crate::infra::metrics::Metrics;
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

pub async fn start_mqtt_client(
    config: &Config,
    cmd_tx: mpsc::Sender<TrackingCommand>,
    metrics: Arc<Metrics>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let mut mqttoptions =
        MqttOptions::new(config.mqtt_client_id(), config.mqtt_host(), config.mqtt_port());
    mqttoptions.set_keep_alive(Duration::from_secs(30));

    // Set credentials if configured
    if let (Some(username), Some(password)) = (config.mqtt_username(), config.mqtt_password()) {
        mqttoptions.set_credentials(username, password);
    }

    let (client, mut eventloop) = AsyncClient::new(mqttoptions, 100);
    client.subscribe(config.mqtt_position_topic(), QoS::AtMostOnce).await?;
    client.subscribe(config.mqtt_control_topic(), QoS::AtLeastOnce).await?;

    info!(
        position_topic = %config.mqtt_position_topic(),
        control_topic = %config.mqtt_control_topic(),
        host = %config.mqtt_host(),
        port = %config.mqtt_port(),
        "mqtt_subscribed"
    );

    // Rate-limit drop warnings to 1 per second
    let mut last_drop_warn: Option<Instant> = None;

    loop {
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    info!("mqtt_shutdown");
                    return Ok(());
                }
            }
            result = eventloop.poll() => {
                match result {
                    Ok(Event::Incoming(Packet::Publish(publish))) => {
                        let Ok(payload) = std::str::from_utf8(&publish.payload) else {
                            warn!(topic = %publish.topic, "mqtt_invalid_utf8");
                            continue;
                        };

                        let command = if publish.topic == config.mqtt_control_topic() {
                            parse_control_payload(payload)
                        } else {
                            parse_position_payload(payload)
                        };

                        let command = match command {
                            Ok(c) => c,
                            Err(reason) => {
                                metrics.record_position_rejected();
                                debug!(topic = %publish.topic, reason = %reason, "mqtt_payload_rejected");
                                continue;
                            }
                        };

                        debug!(topic = %publish.topic, command = %command.as_str(), "mqtt_command");
                        if let Err(e) = cmd_tx.try_send(command) {
                            match e {
                                TrySendError::Full(_) => {
                                    metrics.record_command_dropped();
                                    let now = Instant::now();
                                    if drop_warn_due(last_drop_warn, now) {
                                        warn!("mqtt_command_dropped: channel full");
                                        last_drop_warn = Some(now);
                                    }
                                }
                                TrySendError::Closed(_) => {
                                    warn!("command_channel_closed");
                                    return Ok(());
                                }
                            }
                        }
                    }
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        info!("mqtt_connected");
                    }
                    Ok(_) => {}
                    Err(e) => {
                        error!(error = %e, "mqtt_error");
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }
        }
    }
}

/// Parse a position topic payload into a fix or a geolocation error
pub fn parse_position_payload(payload: &str) -> Result<TrackingCommand, &'static str> {
    let value: Value = serde_json::from_str(payload).map_err(|_| "invalid json")?;
    let Value::Object(fields) = value else {
        return Err("not an object");
    };

    if let Some(error) = fields.get("error") {
        let reason = error.as_str().map(str::to_string).unwrap_or_else(|| error.to_string());
        return Ok(TrackingCommand::PositionError(reason));
    }

    let number = |keys: &[&str]| {
        keys.iter()
            .find_map(|key| fields.get(*key))
            .and_then(Value::as_f64)
            .filter(|v| v.is_finite())
    };
    let lat = number(&["lat", "latitude"]).ok_or("lat is not a number")?;
    let lng = number(&["lng", "lon", "longitude"]).ok_or("lng is not a number")?;

    // Fix age, when the device stamps it
    if let Some(fix_ms) = fields.get("ts").and_then(fix_time_ms) {
        debug!(age_ms = %epoch_ms().saturating_sub(fix_ms), "position_fix_age");
    }

    Ok(TrackingCommand::Position(GeoPoint::new(lat, lng)))
}

/// Parse a control topic payload (`start` / `stop`)
pub fn parse_control_payload(payload: &str) -> Result<TrackingCommand, &'static str> {
    match payload.trim().to_ascii_lowercase().as_str() {
        "start" => Ok(TrackingCommand::Start),
        "stop" => Ok(TrackingCommand::Stop),
        _ => Err("unknown control command"),
    }
}

/// First drop always warns, later ones at most once per second
fn drop_warn_due(last: Option<Instant>, now: Instant) -> bool {
    match last {
        Some(at) => now.saturating_duration_since(at) > Duration::from_secs(1),
        None => true,
    }
}

/// Fix timestamp as epoch ms: either a number or an RFC 3339 string
fn fix_time_ms(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => parse_iso_time(s),
        _ => None,
    }
}

/// Parse ISO 8601 timestamp to epoch milliseconds
fn parse_iso_time(time_str: &str) -> Option<u64> {
    OffsetDateTime::parse(time_str, &Rfc3339)
        .ok()
        .map(|dt| (dt.unix_timestamp_nanos() / 1_000_000) as u64)
}
