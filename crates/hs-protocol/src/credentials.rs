//! Device-unique credentials provisioned onto each node.

use serde::{Deserialize, Serialize};

use crate::bounded::{BoundError, EndpointHost, Ssid, ThingName, WifiPassword};

/// Network and broker identity for one node.
///
/// The thing name doubles as the MQTT client identifier and selects the
/// device shadow the node reports to.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialBundle {
    pub wifi_ssid: Ssid,
    pub wifi_password: WifiPassword,
    pub endpoint_host: EndpointHost,
    pub thing_name: ThingName,
}

impl CredentialBundle {
    pub fn new(
        wifi_ssid: impl Into<String>,
        wifi_password: impl Into<String>,
        endpoint_host: impl Into<String>,
        thing_name: impl Into<String>,
    ) -> Result<Self, BoundError> {
        Ok(Self {
            wifi_ssid: Ssid::new(wifi_ssid)?,
            wifi_password: WifiPassword::new(wifi_password)?,
            endpoint_host: EndpointHost::new(endpoint_host)?,
            thing_name: ThingName::new(thing_name)?,
        })
    }
}

impl std::fmt::Debug for CredentialBundle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialBundle")
            .field("wifi_ssid", &self.wifi_ssid)
            .field("wifi_password", &"<redacted>")
            .field("endpoint_host", &self.endpoint_host)
            .field("thing_name", &self.thing_name)
            .finish()
    }
}
