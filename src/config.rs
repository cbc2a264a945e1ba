use std::path::Path;
use std::time::Duration;

use mac_address::MacAddress;
use serde_derive::Deserialize;
use thiserror::Error;

use crate::filter::DeviceFilter;
use crate::mqtt::DEFAULT_TOPIC;
use crate::scanner::SessionConfig;

pub const DEFAULT_SCAN_SECONDS: u64 = 240;
pub const DEFAULT_PROGRESS_SECONDS: u64 = 1;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Invalid sensor configuration: {0}")]
    Sensor(&'static str),
    #[error("Invalid scan configuration: {0}")]
    Scan(&'static str),
}

#[derive(Deserialize, Debug, Clone)]
pub struct AppConfig {
    pub mqtt: MqttConfig,
    pub sensor: SensorConfig,
    pub scan: Option<ScanConfig>,
}

#[derive(Deserialize, Debug, Clone)]
pub struct MqttConfig {
    pub host: String,
    pub port: Option<u16>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub publisher_id: Option<String>,
    pub topic: Option<String>,
    pub keep_alive_seconds: Option<u64>,
    pub timeout_seconds: Option<u64>,
}

/// Identifies the sensor either by `address` or by `name_prefix`, never both.
#[derive(Deserialize, Debug, Clone)]
pub struct SensorConfig {
    pub address: Option<MacAddress>,
    pub name_prefix: Option<String>,
    pub manufacturer_id: Option<u16>,
}

#[derive(Deserialize, Debug, Default, Clone)]
pub struct ScanConfig {
    pub duration_seconds: Option<u64>,
    pub progress_interval_seconds: Option<u64>,
}

impl AppConfig {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Ok(toml::de::from_str(&contents)?)
    }

    pub fn topic(&self) -> &str {
        self.mqtt.topic.as_deref().unwrap_or(DEFAULT_TOPIC)
    }

    pub fn session_config(&self) -> Result<SessionConfig, ConfigError> {
        let scan = self.scan.clone().unwrap_or_default();
        let duration = scan.duration_seconds.unwrap_or(DEFAULT_SCAN_SECONDS);
        let progress = scan
            .progress_interval_seconds
            .unwrap_or(DEFAULT_PROGRESS_SECONDS);

        if duration == 0 {
            return Err(ConfigError::Scan("duration_seconds must be positive"));
        }
        if progress == 0 {
            return Err(ConfigError::Scan(
                "progress_interval_seconds must be positive",
            ));
        }

        Ok(SessionConfig {
            budget: Duration::from_secs(duration),
            progress_interval: Duration::from_secs(progress),
        })
    }
}

impl SensorConfig {
    pub fn device_filter(&self) -> Result<DeviceFilter, ConfigError> {
        match (&self.address, &self.name_prefix) {
            (Some(address), None) => Ok(DeviceFilter::by_address(*address, self.manufacturer_id)),
            (None, Some(prefix)) => {
                let manufacturer_id = self.manufacturer_id.ok_or(ConfigError::Sensor(
                    "name_prefix matching requires manufacturer_id",
                ))?;
                if prefix.is_empty() {
                    return Err(ConfigError::Sensor("name_prefix must not be empty"));
                }
                Ok(DeviceFilter::by_name_prefix(prefix.clone(), manufacturer_id))
            }
            (Some(_), Some(_)) => Err(ConfigError::Sensor(
                "address and name_prefix are mutually exclusive",
            )),
            (None, None) => Err(ConfigError::Sensor(
                "one of address or name_prefix is required",
            )),
        }
    }
}
