use serde::{Deserialize, Serialize};

/// One humidity/temperature sample taken on a scheduler tick.
///
/// A field is `None` when the sensor returned no value for it (the driver's
/// not-a-number sentinel). Both fields may be absent at once.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    /// Relative humidity in percent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub humidity: Option<f64>,
    /// Temperature in degrees celsius.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
}

impl Reading {
    pub const EMPTY: Reading = Reading {
        humidity: None,
        temperature: None,
    };

    pub fn new(humidity: f64, temperature: f64) -> Self {
        Self {
            humidity: Some(humidity),
            temperature: Some(temperature),
        }
    }

    /// Build a reading from raw driver output, mapping NaN and infinities to absent.
    pub fn from_raw(humidity: f64, temperature: f64) -> Self {
        Self {
            humidity: finite(humidity),
            temperature: finite(temperature),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.humidity.is_none() && self.temperature.is_none()
    }
}

fn finite(value: f64) -> Option<f64> {
    value.is_finite().then_some(value)
}
