use serde::{Deserialize, Serialize};

use crate::telemetry::Reading;

/// Device shadow update document published by the node.
///
/// Serializes as `{"state":{"reported":{"humidity":..,"temperature":..}}}`.
/// Absent readings are omitted, so an empty reading yields an empty
/// `reported` object, which leaves the shadow's prior values untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ShadowPayload {
    pub state: ShadowState,
}

/// The `state` section of a shadow update.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ShadowState {
    #[serde(default)]
    pub reported: Reading,
}

impl ShadowPayload {
    pub fn from_reading(reading: &Reading) -> Self {
        Self {
            state: ShadowState { reported: *reading },
        }
    }

    pub fn reported(&self) -> &Reading {
        &self.state.reported
    }

    pub fn to_json(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }

    pub fn to_json_pretty(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    pub fn from_json(bytes: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(bytes)
    }
}

impl From<Reading> for ShadowPayload {
    fn from(reading: Reading) -> Self {
        Self::from_reading(&reading)
    }
}
