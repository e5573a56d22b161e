//! Integration tests for configuration loading

use std::io::Write;
use tempfile::NamedTempFile;
use trailguide::infra::Config;

#[test]
fn test_load_config_from_file() {
    let mut temp_file = NamedTempFile::new().unwrap();

    let config_content = r#"
[site]
id = "kejimkujik"
name = "Kejimkujik Old Growth Trail"

[scanner]
interval_secs = 10
radius_m = 5.0

[data]
pois_file = "data/keji.json"
boundary_file = "data/keji-boundary.json"

[mqtt]
enabled = true
host = "test-host"
port = 1884
position_topic = "keji/device/position"
control_topic = "keji/device/control"
username = "walker"
password = "secret"

[metrics]
interval_secs = 30
prometheus_port = 9091

[narration]
enabled = false
idle_prompt = "Keep walking."
"#;

    temp_file.write_all(config_content.as_bytes()).unwrap();
    temp_file.flush().unwrap();

    let config = Config::from_file(temp_file.path()).unwrap();

    assert_eq!(config.site_id(), "kejimkujik");
    assert_eq!(config.site_name(), "Kejimkujik Old Growth Trail");
    assert_eq!(config.scan_interval_secs(), 10);
    assert_eq!(config.scan_radius_m(), 5.0);
    assert_eq!(config.pois_file(), "data/keji.json");
    assert_eq!(config.boundary_file(), Some("data/keji-boundary.json"));
    assert!(config.mqtt_enabled());
    assert_eq!(config.mqtt_host(), "test-host");
    assert_eq!(config.mqtt_port(), 1884);
    assert_eq!(config.mqtt_position_topic(), "keji/device/position");
    assert_eq!(config.mqtt_control_topic(), "keji/device/control");
    assert_eq!(config.mqtt_username(), Some("walker"));
    assert_eq!(config.mqtt_password(), Some("secret"));
    assert_eq!(config.metrics_interval_secs(), 30);
    assert_eq!(config.prometheus_port(), 9091);
    assert!(!config.narration_enabled());
    assert_eq!(config.idle_prompt(), "Keep walking.");
    assert_eq!(config.config_file(), temp_file.path().display().to_string());
}

#[test]
fn test_load_from_path_fallback() {
    let config = Config::load_from_path("/nonexistent/config.toml");
    assert_eq!(config.scan_interval_secs(), 15);
    assert_eq!(config.scan_radius_m(), 3.0);
    assert_eq!(config.mqtt_host(), "localhost");
    assert_eq!(config.mqtt_port(), 1883);
    assert_eq!(config.config_file(), "default");
}

#[test]
fn test_invalid_scanner_values_rejected() {
    let mut temp_file = NamedTempFile::new().unwrap();
    temp_file.write_all(b"[scanner]\ninterval_secs = 0\n").unwrap();
    temp_file.flush().unwrap();

    let err = Config::from_file(temp_file.path()).unwrap_err();
    assert!(err.to_string().contains("interval_secs"), "{}", err);

    // Falls back to defaults rather than running with a zero period
    let config = Config::load_from_path(temp_file.path().to_str().unwrap());
    assert_eq!(config.scan_interval_secs(), 15);
}

#[test]
fn test_malformed_toml_falls_back() {
    let mut temp_file = NamedTempFile::new().unwrap();
    temp_file.write_all(b"[scanner\nradius_m = ").unwrap();
    temp_file.flush().unwrap();

    assert!(Config::from_file(temp_file.path()).is_err());
    let config = Config::load_from_path(temp_file.path().to_str().unwrap());
    assert_eq!(config.config_file(), "default");
}

#[test]
fn test_shipped_dev_config_loads() {
    let config = Config::from_file(concat!(env!("CARGO_MANIFEST_DIR"), "/config/dev.toml")).unwrap();
    assert_eq!(config.scan_interval_secs(), 15);
    assert_eq!(config.scan_radius_m(), 3.0);
    assert_eq!(config.pois_file(), "data/pois.json");
}
