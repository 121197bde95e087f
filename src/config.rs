use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use serde_derive::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::error::ConfigError;
use crate::modbus_adc::ModbusAdcSource;
use crate::packet::FIRMWARE_VERSION;
use crate::reading_buffer::DEFAULT_BUFFER_SIZE;
use crate::sensor::{Calibration, ConfiguredSource, SimulatedSource};
use crate::signer::Secp256k1Signer;

const REQUIRED_FIELDS: [&str; 3] = ["meter_id", "oracle_url", "private_key"];

/// Agent configuration, loaded once at startup from a JSON file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    pub meter_id: String,
    /// Collector base URL, `/submit-poe` is appended
    pub oracle_url: String,
    /// Hex-encoded 32-byte secp256k1 secret
    pub private_key: String,
    /// Seconds between cycles
    #[serde(default = "default_reading_interval")]
    pub reading_interval: u64,
    #[serde(default = "default_voltage_calibration")]
    pub voltage_calibration: f64,
    #[serde(default = "default_current_calibration")]
    pub current_calibration: f64,
    #[serde(default = "default_power_factor")]
    pub default_power_factor: f64,
    #[serde(default = "default_grid_frequency")]
    pub grid_frequency: f64,
    #[serde(default = "default_manufacturer")]
    pub manufacturer: String,
    #[serde(default = "default_serial_number")]
    pub serial_number: String,
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,
    /// Seconds to back off after a failed cycle
    #[serde(default = "default_failure_cooldown")]
    pub failure_cooldown: u64,
    /// Seconds before a submission is abandoned
    #[serde(default = "default_submit_timeout")]
    pub submit_timeout: u64,
    #[serde(default = "default_firmware_version")]
    pub firmware_version: String,
    #[serde(default)]
    pub sensor: SensorConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SensorConfig {
    Modbus {
        address: String,
        #[serde(default = "default_unit_id")]
        unit_id: u8,
        #[serde(default)]
        base_register: u16,
    },
    /// Replays fixed voltage/current pairs, for bench runs without hardware
    Simulated { samples: Vec<(f64, f64)> },
}

impl Default for SensorConfig {
    fn default() -> Self {
        SensorConfig::Modbus {
            address: "127.0.0.1:502".into(),
            unit_id: default_unit_id(),
            base_register: 0,
        }
    }
}

fn default_reading_interval() -> u64 {
    300
}
fn default_voltage_calibration() -> f64 {
    Calibration::default().voltage_scale
}
fn default_current_calibration() -> f64 {
    Calibration::default().current_scale
}
fn default_power_factor() -> f64 {
    0.95
}
fn default_grid_frequency() -> f64 {
    50.0
}
fn default_manufacturer() -> String {
    "unknown".into()
}
fn default_serial_number() -> String {
    "0000".into()
}
fn default_buffer_size() -> usize {
    DEFAULT_BUFFER_SIZE
}
fn default_failure_cooldown() -> u64 {
    60
}
fn default_submit_timeout() -> u64 {
    10
}
fn default_firmware_version() -> String {
    FIRMWARE_VERSION.into()
}
fn default_unit_id() -> u8 {
    1
}

impl AgentConfig {
    /// Read, check required keys, parse, then validate.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&raw)
    }

    pub fn from_json(raw: &str) -> Result<Self, ConfigError> {
        let value: Value = serde_json::from_str(raw)?;
        let object = value
            .as_object()
            .ok_or_else(|| ConfigError::Invalid("config must be a JSON object".into()))?;
        for field in REQUIRED_FIELDS {
            if !object.contains_key(field) {
                return Err(ConfigError::MissingField(field));
            }
        }

        let cfg: Self = serde_json::from_value(value)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Apply the CLI `--interval` override and re-check.
    pub fn with_interval_override(mut self, interval: Option<u64>) -> Result<Self, ConfigError> {
        if let Some(seconds) = interval {
            self.reading_interval = seconds;
            self.validate()?;
        }
        Ok(self)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.meter_id.trim().is_empty() {
            return Err(ConfigError::Invalid("meter_id must not be empty".into()));
        }

        let url = reqwest::Url::parse(&self.oracle_url)
            .map_err(|e| ConfigError::Invalid(format!("oracle_url {}: {e}", self.oracle_url)))?;
        match url.scheme() {
            "https" => {}
            "http" => warn!(oracle_url = %self.oracle_url, "collector URL is not HTTPS"),
            other => {
                return Err(ConfigError::Invalid(format!(
                    "oracle_url scheme {other} is not supported"
                )))
            }
        }

        Secp256k1Signer::from_hex(&self.private_key)
            .map_err(|e| ConfigError::Invalid(format!("private_key: {e}")))?;

        if self.reading_interval == 0 {
            return Err(ConfigError::Invalid(
                "reading_interval must be at least 1 second".into(),
            ));
        }
        if self.submit_timeout == 0 {
            return Err(ConfigError::Invalid(
                "submit_timeout must be at least 1 second".into(),
            ));
        }
        if self.failure_cooldown == 0 {
            return Err(ConfigError::Invalid(
                "failure_cooldown must be at least 1 second".into(),
            ));
        }
        if self.buffer_size == 0 {
            return Err(ConfigError::Invalid("buffer_size must be positive".into()));
        }
        if !(0.0..=1.0).contains(&self.default_power_factor) {
            return Err(ConfigError::Invalid(format!(
                "default_power_factor {} is outside 0..1",
                self.default_power_factor
            )));
        }
        if self.grid_frequency <= 0.0 {
            return Err(ConfigError::Invalid("grid_frequency must be positive".into()));
        }
        if let SensorConfig::Modbus { address, .. } = &self.sensor {
            address.parse::<SocketAddr>().map_err(|e| {
                ConfigError::Invalid(format!("sensor address {address}: {e}"))
            })?;
        }
        Ok(())
    }

    pub fn calibration(&self) -> Calibration {
        Calibration {
            voltage_scale: self.voltage_calibration,
            current_scale: self.current_calibration,
            power_factor: self.default_power_factor,
            grid_frequency: self.grid_frequency,
        }
    }

    pub fn signer(&self) -> Result<Secp256k1Signer, ConfigError> {
        Secp256k1Signer::from_hex(&self.private_key)
            .map_err(|e| ConfigError::Invalid(format!("private_key: {e}")))
    }

    pub fn sensor_source(&self) -> Result<ConfiguredSource, ConfigError> {
        let calibration = self.calibration();
        match &self.sensor {
            SensorConfig::Modbus {
                address,
                unit_id,
                base_register,
            } => {
                let address = address.parse::<SocketAddr>().map_err(|e| {
                    ConfigError::Invalid(format!("sensor address {address}: {e}"))
                })?;
                Ok(ConfiguredSource::Modbus(ModbusAdcSource::new(
                    address,
                    *unit_id,
                    *base_register,
                    calibration,
                )))
            }
            SensorConfig::Simulated { samples } => Ok(ConfiguredSource::Simulated(
                SimulatedSource::new(samples.clone(), calibration),
            )),
        }
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.reading_interval)
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.failure_cooldown)
    }

    pub fn submit_timeout(&self) -> Duration {
        Duration::from_secs(self.submit_timeout)
    }
}
