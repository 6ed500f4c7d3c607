//! TOML config file loading, environment overrides and validation.
//!
//! Every section has defaults, so an empty (or missing) file yields a
//! working controller with the same constants the first firmware shipped.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::collections::HashSet;
use std::env;
use std::path::Path;
use std::time::Duration;

use crate::quantity::Device;

// ---------------------------------------------------------------------------
// Config file structures
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub mqtt: MqttConfig,
    pub web: WebConfig,
    pub schedule: ScheduleConfig,
    pub connectivity: ConnectivityConfig,
    pub telemetry: TelemetryConfig,
    pub calibration: Calibration,
    pub sensors: SensorChannels,
    pub actuators: ActuatorPins,
    pub automation: AutomationConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MqttConfig {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    pub keep_alive_secs: u64,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 1883,
            client_id: "agriflow-controller".into(),
            keep_alive_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WebConfig {
    pub port: u16,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self { port: 8080 }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    /// Scheduler tick; the web server is serviced between ticks.
    pub web_interval_ms: u64,
    pub automation_interval_ms: u64,
    pub publish_interval_ms: u64,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            web_interval_ms: 10,
            automation_interval_ms: 1000,
            publish_interval_ms: 5000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ConnectivityConfig {
    pub link_retry_ms: u64,
    pub broker_retry_ms: u64,
    /// Hard ceiling on one reconnection sequence before escalating.
    pub reconnect_window_ms: u64,
}

impl Default for ConnectivityConfig {
    fn default() -> Self {
        Self {
            link_retry_ms: 500,
            broker_retry_ms: 2000,
            reconnect_window_ms: 10_000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    pub topic_prefix: String,
    pub key_hex: String,
    pub iv_hex: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            topic_prefix: "topic".into(),
            key_hex: "2b7e151628aed2a6abf70305304f7e1f".into(),
            iv_hex: "000102030405060708090a0b0c0d0e0f".into(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Calibration {
    pub supply_voltage: f32,
    pub full_scale_code: u16,
    pub co2_scale: f32,
    pub co2_min_voltage: f32,
    pub co2_max_voltage: f32,
    pub light_series_ohms: f32,
}

impl Default for Calibration {
    fn default() -> Self {
        Self {
            supply_voltage: 3.3,
            full_scale_code: 4095,
            co2_scale: 1000.0,
            co2_min_voltage: 0.1,
            co2_max_voltage: 3.2,
            light_series_ohms: 10_000.0,
        }
    }
}

/// ADC channel per analog quantity. Temperature comes from the digital
/// driver and has no channel.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SensorChannels {
    pub co2: u8,
    pub light: u8,
    pub water_level: u8,
    pub soil_humidity: u8,
    /// Chance that one simulated temperature read fails.
    pub sim_dropout_prob: f32,
}

impl Default for SensorChannels {
    fn default() -> Self {
        Self {
            co2: 32,
            light: 33,
            water_level: 34,
            soil_humidity: 35,
            sim_dropout_prob: 0.02,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ActuatorPins {
    pub fan: i64,
    pub pump: i64,
    pub light: i64,
    pub active_low: bool,
}

impl Default for ActuatorPins {
    fn default() -> Self {
        Self {
            fan: 25,
            pump: 26,
            light: 27,
            active_low: false,
        }
    }
}

impl ActuatorPins {
    pub fn mapping(&self) -> Vec<(Device, u8)> {
        vec![
            (Device::Fan, self.fan as u8),
            (Device::Pump, self.pump as u8),
            (Device::Light, self.light as u8),
        ]
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AutomationConfig {
    pub enabled: bool,
}

impl Default for AutomationConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

// ---------------------------------------------------------------------------
// GPIO whitelist
// ---------------------------------------------------------------------------

/// BCM GPIO pins available on the Raspberry Pi 40-pin header for general
/// use. GPIO 0-1 are reserved for the ID EEPROM and must never be used.
const VALID_GPIO_PINS: &[i64] = &[
    2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15, 16, 17, 18, 19, 20, 21, 22, 23, 24, 25, 26, 27,
];

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

impl Config {
    /// Validate all sections. Returns `Ok(())` or an error describing every
    /// violation found (not just the first one).
    pub fn validate(&self) -> Result<()> {
        let mut errors: Vec<String> = Vec::new();

        self.validate_network(&mut errors);
        self.validate_timing(&mut errors);
        self.validate_telemetry(&mut errors);
        self.validate_calibration(&mut errors);
        self.validate_pins(&mut errors);

        if errors.is_empty() {
            Ok(())
        } else {
            bail!(
                "config validation failed ({} error{}):\n  - {}",
                errors.len(),
                if errors.len() == 1 { "" } else { "s" },
                errors.join("\n  - ")
            );
        }
    }

    fn validate_network(&self, errors: &mut Vec<String>) {
        if self.mqtt.host.trim().is_empty() {
            errors.push("mqtt.host is empty".into());
        }
        if self.mqtt.port == 0 {
            errors.push("mqtt.port must be non-zero".into());
        }
        if self.mqtt.client_id.trim().is_empty() {
            errors.push("mqtt.client_id is empty".into());
        }
        if self.mqtt.keep_alive_secs < 5 {
            errors.push(format!(
                "mqtt.keep_alive_secs must be at least 5, got {}",
                self.mqtt.keep_alive_secs
            ));
        }
        if self.web.port == 0 {
            errors.push("web.port must be non-zero".into());
        }
    }

    fn validate_timing(&self, errors: &mut Vec<String>) {
        let positive = [
            ("schedule.web_interval_ms", self.schedule.web_interval_ms),
            ("schedule.automation_interval_ms", self.schedule.automation_interval_ms),
            ("schedule.publish_interval_ms", self.schedule.publish_interval_ms),
            ("connectivity.link_retry_ms", self.connectivity.link_retry_ms),
            ("connectivity.broker_retry_ms", self.connectivity.broker_retry_ms),
            ("connectivity.reconnect_window_ms", self.connectivity.reconnect_window_ms),
        ];
        for (name, value) in positive {
            if value == 0 {
                errors.push(format!("{name} must be positive"));
            }
        }

        let c = &self.connectivity;
        for (name, retry) in [
            ("connectivity.link_retry_ms", c.link_retry_ms),
            ("connectivity.broker_retry_ms", c.broker_retry_ms),
        ] {
            if retry > 0 && retry >= c.reconnect_window_ms {
                errors.push(format!(
                    "{name} ({retry}) must be shorter than connectivity.reconnect_window_ms ({})",
                    c.reconnect_window_ms
                ));
            }
        }
    }

    fn validate_telemetry(&self, errors: &mut Vec<String>) {
        let t = &self.telemetry;
        if t.topic_prefix.is_empty() || t.topic_prefix.contains(['+', '#']) {
            errors.push(format!(
                "telemetry.topic_prefix '{}' must be non-empty and free of MQTT wildcards",
                t.topic_prefix
            ));
        }
        for (name, value) in [("telemetry.key_hex", &t.key_hex), ("telemetry.iv_hex", &t.iv_hex)] {
            match hex::decode(value) {
                Ok(bytes) if bytes.len() == 16 => {}
                Ok(bytes) => errors.push(format!(
                    "{name} must decode to 16 bytes, got {}",
                    bytes.len()
                )),
                Err(e) => errors.push(format!("{name} is not valid hex: {e}")),
            }
        }
    }

    fn validate_calibration(&self, errors: &mut Vec<String>) {
        let c = &self.calibration;
        if !(c.supply_voltage > 0.0) {
            errors.push(format!(
                "calibration.supply_voltage must be positive, got {}",
                c.supply_voltage
            ));
        }
        if c.full_scale_code == 0 {
            errors.push("calibration.full_scale_code must be non-zero".into());
        }
        if !(c.light_series_ohms > 0.0) {
            errors.push(format!(
                "calibration.light_series_ohms must be positive, got {}",
                c.light_series_ohms
            ));
        }
        if c.co2_min_voltage >= c.co2_max_voltage {
            errors.push(format!(
                "calibration.co2_min_voltage ({}) must be below co2_max_voltage ({})",
                c.co2_min_voltage, c.co2_max_voltage
            ));
        }

        let s = &self.sensors;
        if !(0.0..=1.0).contains(&s.sim_dropout_prob) {
            errors.push(format!(
                "sensors.sim_dropout_prob must be within 0..=1, got {}",
                s.sim_dropout_prob
            ));
        }
        let mut seen: HashSet<u8> = HashSet::new();
        for (name, channel) in [
            ("co2", s.co2),
            ("light", s.light),
            ("water_level", s.water_level),
            ("soil_humidity", s.soil_humidity),
        ] {
            if !seen.insert(channel) {
                errors.push(format!(
                    "sensors.{name}: channel {channel} is already used by another sensor"
                ));
            }
        }
    }

    fn validate_pins(&self, errors: &mut Vec<String>) {
        let mut seen: HashSet<i64> = HashSet::new();
        let a = &self.actuators;
        for (name, pin) in [("fan", a.fan), ("pump", a.pump), ("light", a.light)] {
            if !VALID_GPIO_PINS.contains(&pin) {
                errors.push(format!(
                    "actuators.{name}: pin {pin} is not a valid BCM GPIO pin (allowed: 2-27)"
                ));
            } else if !seen.insert(pin) {
                errors.push(format!(
                    "actuators.{name}: pin {pin} is already used by another device"
                ));
            }
        }
    }

    /// `MQTT_HOST`, `MQTT_PORT`, `WEB_PORT` and `RELAY_ACTIVE_LOW` win over
    /// the file.
    pub fn apply_env(&mut self) {
        if let Ok(host) = env::var("MQTT_HOST") {
            self.mqtt.host = host;
        }
        if let Some(port) = env::var("MQTT_PORT").ok().and_then(|s| s.parse().ok()) {
            self.mqtt.port = port;
        }
        if let Some(port) = env::var("WEB_PORT").ok().and_then(|s| s.parse().ok()) {
            self.web.port = port;
        }
        if let Ok(v) = env::var("RELAY_ACTIVE_LOW") {
            self.actuators.active_low = v == "1" || v.eq_ignore_ascii_case("true");
        }
    }
}

impl ScheduleConfig {
    pub fn web_interval(&self) -> Duration {
        Duration::from_millis(self.web_interval_ms)
    }

    pub fn automation_interval(&self) -> Duration {
        Duration::from_millis(self.automation_interval_ms)
    }

    pub fn publish_interval(&self) -> Duration {
        Duration::from_millis(self.publish_interval_ms)
    }
}

// ---------------------------------------------------------------------------
// Load
// ---------------------------------------------------------------------------

/// Read and parse a TOML config file, falling back to defaults when the file
/// does not exist. Environment overrides are applied before validation.
pub fn load(path: &str) -> Result<Config> {
    let mut config = if Path::new(path).exists() {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config: {path}"))?;
        toml::from_str(&contents).with_context(|| format!("failed to parse config: {path}"))?
    } else {
        tracing::warn!(path, "config file not found, using defaults");
        Config::default()
    };

    config.apply_env();
    config
        .validate()
        .with_context(|| format!("invalid config: {path}"))?;

    tracing::info!(
        mqtt_host = %config.mqtt.host,
        mqtt_port = config.mqtt.port,
        web_port = config.web.port,
        publish_interval_ms = config.schedule.publish_interval_ms,
        "config loaded"
    );
    Ok(config)
}

// ===========================================================================
// Tests
// ===========================================================================
