//! Node configuration, loaded once at boot from TOML.
//!
//! Credential fields are read as plain strings and validated into a
//! `CredentialBundle` here, so a missing, empty or over-long value stops the
//! node before the connection loop ever starts.

use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

use hs_mqtt_channel::SessionConfig;
use hs_protocol::{BoundError, CredentialBundle};

/// Default cadence for telemetry publishes.
pub const DEFAULT_PUBLISH_INTERVAL_MS: u64 = 60_000;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config '{path}': {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config '{path}': {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },

    #[error("config field '{field}' is missing or empty")]
    Missing { field: &'static str },

    #[error("config field '{field}' is too long: {source}")]
    TooLong {
        field: &'static str,
        #[source]
        source: BoundError,
    },

    #[error("publish_interval_ms must be greater than zero")]
    ZeroInterval,
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Certificate blob locations.
#[derive(Debug, Clone, Deserialize)]
pub struct CertPaths {
    #[serde(default = "default_device_cert")]
    pub device_cert: PathBuf,
    #[serde(default = "default_private_key")]
    pub private_key: PathBuf,
    #[serde(default = "default_ca_cert")]
    pub ca_cert: PathBuf,
}

fn default_device_cert() -> PathBuf {
    PathBuf::from("/cert.der")
}

fn default_private_key() -> PathBuf {
    PathBuf::from("/private.der")
}

fn default_ca_cert() -> PathBuf {
    PathBuf::from("/ca.der")
}

impl Default for CertPaths {
    fn default() -> Self {
        Self {
            device_cert: default_device_cert(),
            private_key: default_private_key(),
            ca_cert: default_ca_cert(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SensorKind {
    /// Deterministic synthetic readings, for bench runs.
    #[default]
    Simulated,
    /// Linux industrial-I/O humidity/temperature device.
    Iio,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SensorConfig {
    #[serde(default)]
    pub kind: SensorKind,
    /// IIO device directory, e.g. `/sys/bus/iio/devices/iio:device0`.
    #[serde(default = "default_iio_device")]
    pub iio_device: PathBuf,
}

fn default_iio_device() -> PathBuf {
    PathBuf::from("/sys/bus/iio/devices/iio:device0")
}

impl Default for SensorConfig {
    fn default() -> Self {
        Self {
            kind: SensorKind::default(),
            iio_device: default_iio_device(),
        }
    }
}

/// Top-level configuration for the node.
#[derive(Debug, Clone, Deserialize)]
pub struct NodeConfig {
    #[serde(default)]
    pub wifi_ssid: String,
    #[serde(default)]
    pub wifi_password: String,
    /// AWS IoT Core data endpoint hostname.
    #[serde(default)]
    pub aws_iot_endpoint: String,
    /// IoT thing name; also the MQTT client identifier.
    #[serde(default)]
    pub thing_name: String,
    #[serde(default)]
    pub log_format: LogFormat,
    #[serde(default = "default_publish_interval")]
    pub publish_interval_ms: u64,
    #[serde(default)]
    pub mqtt: SessionConfig,
    #[serde(default)]
    pub certs: CertPaths,
    #[serde(default)]
    pub sensor: SensorConfig,
}

fn default_publish_interval() -> u64 {
    DEFAULT_PUBLISH_INTERVAL_MS
}

impl NodeConfig {
    /// Load config from a TOML file path.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        toml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })
    }

    /// `from_file`, reporting a failure through `tracing` before returning it.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        Self::from_file(path).inspect_err(|e| {
            tracing::error!(path = %path.display(), error = %e, "cannot load config");
        })
    }

    /// Validate the credential fields into a bundle.
    pub fn credentials(&self) -> Result<CredentialBundle, ConfigError> {
        let fields = [
            ("wifi_ssid", &self.wifi_ssid),
            ("wifi_password", &self.wifi_password),
            ("aws_iot_endpoint", &self.aws_iot_endpoint),
            ("thing_name", &self.thing_name),
        ];
        for (field, value) in fields {
            if value.trim().is_empty() {
                return Err(ConfigError::Missing { field });
            }
        }

        Ok(CredentialBundle {
            wifi_ssid: bounded("wifi_ssid", &self.wifi_ssid)?,
            wifi_password: bounded("wifi_password", &self.wifi_password)?,
            endpoint_host: bounded("aws_iot_endpoint", &self.aws_iot_endpoint)?,
            thing_name: bounded("thing_name", &self.thing_name)?,
        })
    }

    /// Full boot-time validation.
    pub fn validate(&self) -> Result<CredentialBundle, ConfigError> {
        if self.publish_interval_ms == 0 {
            return Err(ConfigError::ZeroInterval);
        }
        self.credentials()
    }
}

fn bounded<const MAX: usize>(
    field: &'static str,
    value: &str,
) -> Result<hs_protocol::BoundedString<MAX>, ConfigError> {
    hs_protocol::BoundedString::new(value).map_err(|source| ConfigError::TooLong { field, source })
}
