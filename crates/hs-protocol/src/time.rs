use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Earliest wall-clock time the node will accept as synchronized
/// (2024-01-01T00:00:00Z). Anything earlier is an unsynchronized RTC.
pub const MIN_VALID_EPOCH_SECS: i64 = 1_704_067_200;

/// Absolute wall-clock time in whole seconds since the Unix epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UnixTimestamp(pub i64);

impl UnixTimestamp {
    pub const fn from_secs(secs: i64) -> Self {
        Self(secs)
    }

    pub const fn as_secs(self) -> i64 {
        self.0
    }

    /// Whether this timestamp could have come from a network time source.
    pub const fn is_plausible(self) -> bool {
        self.0 >= MIN_VALID_EPOCH_SECS
    }

    /// Advance by a monotonic offset in milliseconds (sub-second part dropped).
    pub const fn plus_millis(self, millis: u64) -> Self {
        Self(self.0 + (millis / 1000) as i64)
    }

    pub fn to_datetime(self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(self.0, 0)
    }
}

impl std::fmt::Display for UnixTimestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.to_datetime() {
            Some(dt) => write!(f, "{}", dt.to_rfc3339()),
            None => write!(f, "@{}", self.0),
        }
    }
}
