//! Configuration loading from TOML files
//!
//! Config file is selected via:
//! 1. --config <path> command line argument
//! 2. CONFIG_FILE environment variable
//! 3. Default: config/dev.toml

use anyhow::Context;
use serde::Deserialize;
use std::env;
use std::fs;
use std::path::Path;
use tracing::warn;

#[derive(Debug, Clone, Deserialize)]
pub struct SiteConfig {
    /// Unique site identifier, used as the metrics label
    #[serde(default = "default_site_id")]
    pub id: String,
    /// Human readable site name
    #[serde(default = "default_site_name")]
    pub name: String,
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self { id: default_site_id(), name: default_site_name() }
    }
}

fn default_site_id() -> String {
    "trailguide".to_string()
}

fn default_site_name() -> String {
    "Conservation Area".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScannerConfig {
    /// Seconds between proximity scans while tracking
    #[serde(default = "default_scan_interval_secs")]
    pub interval_secs: u64,
    /// Talking Trees trigger radius (meters)
    #[serde(default = "default_scan_radius_m")]
    pub radius_m: f64,
    /// Capacity of the tracking command channel
    #[serde(default = "default_command_buffer")]
    pub command_buffer: usize,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_scan_interval_secs(),
            radius_m: default_scan_radius_m(),
            command_buffer: default_command_buffer(),
        }
    }
}

fn default_scan_interval_secs() -> u64 {
    15
}

fn default_scan_radius_m() -> f64 {
    3.0
}

fn default_command_buffer() -> usize {
    256
}

#[derive(Debug, Clone, Deserialize)]
pub struct DataConfig {
    /// JSON array of points of interest
    #[serde(default = "default_pois_file")]
    pub pois_file: String,
    /// JSON array of [lat, lng] pairs outlining the site
    #[serde(default)]
    pub boundary_file: Option<String>,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self { pois_file: default_pois_file(), boundary_file: None }
    }
}

fn default_pois_file() -> String {
    "data/pois.json".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct MqttConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_mqtt_host")]
    pub host: String,
    #[serde(default = "default_mqtt_port")]
    pub port: u16,
    #[serde(default = "default_mqtt_client_id")]
    pub client_id: String,
    /// Topic carrying {"lat","lng"} position updates
    #[serde(default = "default_position_topic")]
    pub position_topic: String,
    /// Topic carrying "start" / "stop" tracking commands
    #[serde(default = "default_control_topic")]
    pub control_topic: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            host: default_mqtt_host(),
            port: default_mqtt_port(),
            client_id: default_mqtt_client_id(),
            position_topic: default_position_topic(),
            control_topic: default_control_topic(),
            username: None,
            password: None,
        }
    }
}

fn default_mqtt_host() -> String {
    "localhost".to_string()
}

fn default_mqtt_port() -> u16 {
    1883
}

fn default_mqtt_client_id() -> String {
    "trailguide".to_string()
}

fn default_position_topic() -> String {
    "trailguide/position".to_string()
}

fn default_control_topic() -> String {
    "trailguide/control".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_metrics_interval_secs")]
    pub interval_secs: u64,
    /// Prometheus metrics HTTP port (0 to disable)
    #[serde(default = "default_prometheus_port")]
    pub prometheus_port: u16,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_metrics_interval_secs(),
            prometheus_port: default_prometheus_port(),
        }
    }
}

fn default_metrics_interval_secs() -> u64 {
    60
}

fn default_prometheus_port() -> u16 {
    9090
}

#[derive(Debug, Clone, Deserialize)]
pub struct NarrationConfig {
    #[serde(default = "default_narration_enabled")]
    pub enabled: bool,
    /// Shown while no POI is in range
    #[serde(default = "default_idle_prompt")]
    pub idle_prompt: String,
}

impl Default for NarrationConfig {
    fn default() -> Self {
        Self { enabled: default_narration_enabled(), idle_prompt: default_idle_prompt() }
    }
}

fn default_narration_enabled() -> bool {
    true
}

fn default_idle_prompt() -> String {
    "Move closer to a Talking Tree to hear its story.".to_string()
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub site: SiteConfig,
    #[serde(default)]
    pub scanner: ScannerConfig,
    #[serde(default)]
    pub data: DataConfig,
    #[serde(default)]
    pub mqtt: MqttConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub narration: NarrationConfig,
}

/// Main configuration struct used throughout the application
#[derive(Debug, Clone)]
pub struct Config {
    site_id: String,
    site_name: String,
    scan_interval_secs: u64,
    scan_radius_m: f64,
    command_buffer: usize,
    pois_file: String,
    boundary_file: Option<String>,
    mqtt_enabled: bool,
    mqtt_host: String,
    mqtt_port: u16,
    mqtt_client_id: String,
    mqtt_position_topic: String,
    mqtt_control_topic: String,
    mqtt_username: Option<String>,
    mqtt_password: Option<String>,
    metrics_interval_secs: u64,
    prometheus_port: u16,
    narration_enabled: bool,
    idle_prompt: String,
    config_file: String,
}

impl Default for Config {
    fn default() -> Self {
        Self::from_toml(TomlConfig::default(), "default".to_string())
    }
}

impl Config {
    fn from_toml(toml_config: TomlConfig, config_file: String) -> Self {
        Self {
            site_id: toml_config.site.id,
            site_name: toml_config.site.name,
            scan_interval_secs: toml_config.scanner.interval_secs,
            scan_radius_m: toml_config.scanner.radius_m,
            command_buffer: toml_config.scanner.command_buffer,
            pois_file: toml_config.data.pois_file,
            boundary_file: toml_config.data.boundary_file,
            mqtt_enabled: toml_config.mqtt.enabled,
            mqtt_host: toml_config.mqtt.host,
            mqtt_port: toml_config.mqtt.port,
            mqtt_client_id: toml_config.mqtt.client_id,
            mqtt_position_topic: toml_config.mqtt.position_topic,
            mqtt_control_topic: toml_config.mqtt.control_topic,
            mqtt_username: toml_config.mqtt.username,
            mqtt_password: toml_config.mqtt.password,
            metrics_interval_secs: toml_config.metrics.interval_secs,
            prometheus_port: toml_config.metrics.prometheus_port,
            narration_enabled: toml_config.narration.enabled,
            idle_prompt: toml_config.narration.idle_prompt,
            config_file,
        }
    }

    /// Config file path: `--config` flag, then `CONFIG_FILE`, then the dev default
    pub fn resolve_config_path(cli: Option<String>) -> String {
        pick_config_path(cli, env::var("CONFIG_FILE").ok())
    }

    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;

        let toml_config: TomlConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;

        let config = Self::from_toml(toml_config, path.display().to_string());
        config.validate()?;
        Ok(config)
    }

    /// Reject values the scanner cannot run with
    fn validate(&self) -> anyhow::Result<()> {
        if self.scan_interval_secs == 0 {
            anyhow::bail!("scanner.interval_secs must be at least 1");
        }
        if !self.scan_radius_m.is_finite() || self.scan_radius_m < 0.0 {
            anyhow::bail!("scanner.radius_m must be a non-negative number");
        }
        if self.command_buffer == 0 {
            anyhow::bail!("scanner.command_buffer must be at least 1");
        }
        if self.metrics_interval_secs == 0 {
            anyhow::bail!("metrics.interval_secs must be at least 1");
        }
        Ok(())
    }

    /// Load configuration from a path, falling back to defaults
    pub fn load_from_path(path: &str) -> Self {
        match Self::from_file(path) {
            Ok(config) => config,
            Err(e) => {
                warn!(error = %format!("{:#}", e), "config_load_failed_using_defaults");
                Self::default()
            }
        }
    }

    // Getters for all config fields
    pub fn site_id(&self) -> &str {
        &self.site_id
    }

    pub fn site_name(&self) -> &str {
        &self.site_name
    }

    pub fn scan_interval_secs(&self) -> u64 {
        self.scan_interval_secs
    }

    pub fn scan_radius_m(&self) -> f64 {
        self.scan_radius_m
    }

    pub fn command_buffer(&self) -> usize {
        self.command_buffer
    }

    pub fn pois_file(&self) -> &str {
        &self.pois_file
    }

    pub fn boundary_file(&self) -> Option<&str> {
        self.boundary_file.as_deref()
    }

    pub fn mqtt_enabled(&self) -> bool {
        self.mqtt_enabled
    }

    pub fn mqtt_host(&self) -> &str {
        &self.mqtt_host
    }

    pub fn mqtt_port(&self) -> u16 {
        self.mqtt_port
    }

    pub fn mqtt_client_id(&self) -> &str {
        &self.mqtt_client_id
    }

    pub fn mqtt_position_topic(&self) -> &str {
        &self.mqtt_position_topic
    }

    pub fn mqtt_control_topic(&self) -> &str {
        &self.mqtt_control_topic
    }

    pub fn mqtt_username(&self) -> Option<&str> {
        self.mqtt_username.as_deref()
    }

    pub fn mqtt_password(&self) -> Option<&str> {
        self.mqtt_password.as_deref()
    }

    pub fn metrics_interval_secs(&self) -> u64 {
        self.metrics_interval_secs
    }

    pub fn prometheus_port(&self) -> u16 {
        self.prometheus_port
    }

    pub fn narration_enabled(&self) -> bool {
        self.narration_enabled
    }

    pub fn idle_prompt(&self) -> &str {
        &self.idle_prompt
    }

    pub fn config_file(&self) -> &str {
        &self.config_file
    }

    /// Builder method to override the scan interval
    pub fn with_scan_interval_secs(mut self, secs: u64) -> Self {
        self.scan_interval_secs = secs;
        self
    }

    /// Builder method to override the trigger radius
    pub fn with_scan_radius_m(mut self, radius_m: f64) -> Self {
        self.scan_radius_m = radius_m;
        self
    }
}

fn pick_config_path(cli: Option<String>, env_path: Option<String>) -> String {
    cli.or(env_path).unwrap_or_else(|| "config/dev.toml".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.site_id(), "trailguide");
        assert_eq!(config.scan_interval_secs(), 15);
        assert_eq!(config.scan_radius_m(), 3.0);
        assert_eq!(config.pois_file(), "data/pois.json");
        assert_eq!(config.boundary_file(), None);
        assert!(!config.mqtt_enabled());
        assert_eq!(config.mqtt_position_topic(), "trailguide/position");
        assert!(config.narration_enabled());
        assert_eq!(config.config_file(), "default");
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let toml_config: TomlConfig = toml::from_str(
            r#"
[scanner]
radius_m = 5.0
"#,
        )
        .unwrap();
        let config = Config::from_toml(toml_config, "inline".to_string());
        assert_eq!(config.scan_radius_m(), 5.0);
        assert_eq!(config.scan_interval_secs(), 15);
        assert_eq!(config.mqtt_port(), 1883);
    }

    #[test]
    fn test_validate_rejects_zero_interval() {
        let config = Config::default().with_scan_interval_secs(0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_negative_radius() {
        let config = Config::default().with_scan_radius_m(-1.0);
        assert!(config.validate().is_err());
        let config = Config::default().with_scan_radius_m(f64::NAN);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_path_flag_wins_over_env() {
        let path = pick_config_path(
            Some("config/site.toml".to_string()),
            Some("config/env.toml".to_string()),
        );
        assert_eq!(path, "config/site.toml");
    }

    #[test]
    fn test_config_path_falls_back_to_env_then_default() {
        assert_eq!(pick_config_path(None, Some("config/env.toml".to_string())), "config/env.toml");
        assert_eq!(pick_config_path(None, None), "config/dev.toml");
    }
}
