//! Length-bounded owned strings for device-unique identifiers.
//!
//! Credential and endpoint fields are stored on the node with a fixed
//! maximum byte length. `BoundedString<MAX>` carries that bound in the type
//! so an over-long value is rejected once, at load time.

use std::fmt;
use std::ops::Deref;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Maximum Wi-Fi SSID length in bytes (802.11).
pub const MAX_SSID_LEN: usize = 32;
/// Maximum WPA2 passphrase length in bytes.
pub const MAX_PASSWORD_LEN: usize = 64;
/// Maximum broker endpoint hostname length in bytes.
pub const MAX_ENDPOINT_LEN: usize = 128;
/// Maximum IoT thing name length in bytes.
pub const MAX_THING_NAME_LEN: usize = 128;

/// Rejected value for a bounded field.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("value is {len} bytes, maximum is {max}")]
pub struct BoundError {
    pub len: usize,
    pub max: usize,
}

/// An owned UTF-8 string guaranteed to be at most `MAX` bytes long.
#[derive(Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct BoundedString<const MAX: usize>(String);

impl<const MAX: usize> BoundedString<MAX> {
    /// Build a bounded string, rejecting values longer than `MAX` bytes.
    pub fn new(value: impl Into<String>) -> Result<Self, BoundError> {
        let value = value.into();
        if value.len() > MAX {
            return Err(BoundError {
                len: value.len(),
                max: MAX,
            });
        }
        Ok(Self(value))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl<const MAX: usize> TryFrom<String> for BoundedString<MAX> {
    type Error = BoundError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl<const MAX: usize> From<BoundedString<MAX>> for String {
    fn from(value: BoundedString<MAX>) -> Self {
        value.0
    }
}

impl<const MAX: usize> Deref for BoundedString<MAX> {
    type Target = str;

    fn deref(&self) -> &str {
        &self.0
    }
}

impl<const MAX: usize> fmt::Display for BoundedString<MAX> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl<const MAX: usize> fmt::Debug for BoundedString<MAX> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.0, f)
    }
}

pub type Ssid = BoundedString<MAX_SSID_LEN>;
pub type WifiPassword = BoundedString<MAX_PASSWORD_LEN>;
pub type EndpointHost = BoundedString<MAX_ENDPOINT_LEN>;
pub type ThingName = BoundedString<MAX_THING_NAME_LEN>;
