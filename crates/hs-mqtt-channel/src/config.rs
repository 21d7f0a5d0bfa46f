use serde::Deserialize;

use hs_protocol::topics;

/// Session tuning, loadable from the `[mqtt]` table of the node config.
///
/// Broker host and client identifier are not part of this table: they come
/// from the credential bundle and are passed to `SessionManager::new`.
#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    /// MQTT broker port (default 8883 for TLS).
    #[serde(default = "default_port")]
    pub port: u16,
    /// Keep-alive interval in seconds.
    #[serde(default = "default_keepalive")]
    pub keepalive_secs: u16,
    /// Bound on TCP connect, TLS handshake and each socket write.
    #[serde(default = "default_io_timeout")]
    pub io_timeout_ms: u64,
    /// How long one read waits for inbound bytes before the loop moves on.
    #[serde(default = "default_read_timeout")]
    pub read_timeout_ms: u64,
    /// How long to wait for CONNACK after sending CONNECT.
    #[serde(default = "default_connack_timeout")]
    pub connack_timeout_ms: u64,
    /// Delay before a full reconnect attempt after a failed handshake or CONNECT.
    #[serde(default = "default_reconnect_delay")]
    pub reconnect_delay_ms: u64,
    /// Poll period while waiting for the network link to come up.
    #[serde(default = "default_attach_poll")]
    pub attach_poll_ms: u64,
    /// Delay between network time requests until one succeeds.
    #[serde(default = "default_time_sync_retry")]
    pub time_sync_retry_ms: u64,
    /// SNTP server (`host:port`).
    #[serde(default = "default_ntp_server")]
    pub ntp_server: String,
    /// Topic filters to subscribe to once the session is up. Unset means the
    /// thing's shadow `update/delta` and `update/rejected` topics; an empty
    /// list subscribes to nothing.
    #[serde(default)]
    pub subscribe: Option<Vec<String>>,
}

/// Largest payload accepted by `publish`, matching the node's TLS record buffers.
pub const MAX_PAYLOAD_BYTES: usize = 512;

fn default_port() -> u16 {
    8883
}

fn default_keepalive() -> u16 {
    60
}

fn default_io_timeout() -> u64 {
    10_000
}

fn default_read_timeout() -> u64 {
    50
}

fn default_connack_timeout() -> u64 {
    10_000
}

fn default_reconnect_delay() -> u64 {
    5_000
}

fn default_attach_poll() -> u64 {
    500
}

fn default_time_sync_retry() -> u64 {
    1_000
}

fn default_ntp_server() -> String {
    "pool.ntp.org:123".to_string()
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            keepalive_secs: default_keepalive(),
            io_timeout_ms: default_io_timeout(),
            read_timeout_ms: default_read_timeout(),
            connack_timeout_ms: default_connack_timeout(),
            reconnect_delay_ms: default_reconnect_delay(),
            attach_poll_ms: default_attach_poll(),
            time_sync_retry_ms: default_time_sync_retry(),
            ntp_server: default_ntp_server(),
            subscribe: None,
        }
    }
}

impl SessionConfig {
    pub fn keepalive_ms(&self) -> u64 {
        u64::from(self.keepalive_secs) * 1000
    }

    /// Topic filters for `thing` after applying the default.
    pub fn subscriptions(&self, thing: &str) -> Vec<String> {
        match &self.subscribe {
            Some(filters) => filters.clone(),
            None => vec![
                topics::shadow_update_delta(thing),
                topics::shadow_update_rejected(thing),
            ],
        }
    }
}
