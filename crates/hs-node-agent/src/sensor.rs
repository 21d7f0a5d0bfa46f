//! Humidity/temperature sensor abstraction.
//!
//! `Sensor` trait with a single `read`. Impls:
//! - `IioSensor`: Linux industrial-I/O sysfs device
//! - `SimulatedSensor`: deterministic synthetic values for bench runs
//! - `MockSensor`: scripted readings (in `mock.rs`)
//!
//! A failed read never errors: the affected field is absent in the `Reading`.

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use hs_protocol::Reading;

use crate::config::{SensorConfig, SensorKind};

#[async_trait]
pub trait Sensor: Send {
    /// Take one sample.
    async fn read(&mut self) -> Reading;
}

/// Build the sensor selected in config.
pub fn from_config(config: &SensorConfig) -> Box<dyn Sensor> {
    match config.kind {
        SensorKind::Simulated => Box::new(SimulatedSensor::new()),
        SensorKind::Iio => Box::new(IioSensor::new(&config.iio_device)),
    }
}

// ── IIO ──────────────────────────────────────────────────────

const HUMIDITY_CHANNEL: &str = "in_humidityrelative_input";
const TEMPERATURE_CHANNEL: &str = "in_temp_input";

/// Sensor exposed through the Linux IIO subsystem.
///
/// Both processed channels report milli-units (milli-percent RH,
/// milli-degrees Celsius).
#[derive(Debug, Clone)]
pub struct IioSensor {
    device: PathBuf,
}

impl IioSensor {
    pub fn new(device: impl AsRef<Path>) -> Self {
        Self {
            device: device.as_ref().to_path_buf(),
        }
    }

    async fn read_channel(&self, channel: &str) -> f64 {
        let path = self.device.join(channel);
        match tokio::fs::read_to_string(&path).await {
            Ok(text) => match text.trim().parse::<f64>() {
                Ok(milli) => milli / 1000.0,
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "unparseable sensor value");
                    f64::NAN
                }
            },
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "sensor read failed");
                f64::NAN
            }
        }
    }
}

#[async_trait]
impl Sensor for IioSensor {
    async fn read(&mut self) -> Reading {
        let humidity = self.read_channel(HUMIDITY_CHANNEL).await;
        let temperature = self.read_channel(TEMPERATURE_CHANNEL).await;
        Reading::from_raw(humidity, temperature)
    }
}

// ── Simulated ────────────────────────────────────────────────

/// Slowly drifting synthetic climate, one step per read.
#[derive(Debug, Clone, Default)]
pub struct SimulatedSensor {
    step: u64,
}

impl SimulatedSensor {
    pub fn new() -> Self {
        Self::default()
    }
}

fn one_decimal(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

#[async_trait]
impl Sensor for SimulatedSensor {
    async fn read(&mut self) -> Reading {
        let t = self.step as f64;
        self.step += 1;
        Reading::new(
            one_decimal(50.0 + 8.0 * (t * 0.1).sin()),
            one_decimal(21.0 + 2.5 * (t * 0.05).sin()),
        )
    }
}
