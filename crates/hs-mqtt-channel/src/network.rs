//! Network attach and network time synchronization.
//!
//! `NetworkLink` is the node's radio link (join + status poll); `TimeSource`
//! answers "what time is it" once the link is up. Both are traits so the
//! reconnect state machine can be tested without a network.

use std::time::Duration;

use async_trait::async_trait;
use tokio::net::UdpSocket;
use tokio::time::Instant;

use hs_protocol::UnixTimestamp;

/// The link layer the transport runs over.
#[async_trait]
pub trait NetworkLink: Send {
    /// Start joining the network. Completion is observed via `is_attached`.
    async fn join(&mut self, ssid: &str, password: &str);

    /// Whether the link currently has a usable network attach.
    async fn is_attached(&mut self) -> bool;
}

/// Source of absolute wall-clock time.
#[async_trait]
pub trait TimeSource: Send {
    /// Request the current time. `None` when no answer was obtained.
    async fn sync(&mut self) -> Option<UnixTimestamp>;
}

// ── Host network ─────────────────────────────────────────────

/// Network link for hosts whose radio is managed by the operating system.
///
/// `join` records the requested SSID for diagnostics; the link counts as
/// attached once the broker endpoint resolves. A positive answer is reused
/// for `recheck` before resolving again.
#[derive(Debug, Clone)]
pub struct HostNetwork {
    endpoint_host: String,
    endpoint_port: u16,
    ssid: Option<String>,
    recheck: Duration,
    attached_at: Option<Instant>,
}

impl HostNetwork {
    pub fn new(endpoint_host: impl Into<String>, endpoint_port: u16) -> Self {
        Self {
            endpoint_host: endpoint_host.into(),
            endpoint_port,
            ssid: None,
            recheck: Duration::from_secs(30),
            attached_at: None,
        }
    }

    pub fn ssid(&self) -> Option<&str> {
        self.ssid.as_deref()
    }
}

#[async_trait]
impl NetworkLink for HostNetwork {
    async fn join(&mut self, ssid: &str, _password: &str) {
        tracing::info!(ssid = %ssid, "joining network");
        self.ssid = Some(ssid.to_string());
        self.attached_at = None;
    }

    async fn is_attached(&mut self) -> bool {
        if let Some(at) = self.attached_at {
            if at.elapsed() < self.recheck {
                return true;
            }
        }
        let lookup = tokio::net::lookup_host((self.endpoint_host.as_str(), self.endpoint_port));
        let resolved = match lookup.await {
            Ok(mut addrs) => addrs.next().is_some(),
            Err(e) => {
                tracing::debug!(host = %self.endpoint_host, error = %e, "endpoint not resolvable");
                false
            }
        };
        self.attached_at = resolved.then(Instant::now);
        resolved
    }
}

// ── SNTP ─────────────────────────────────────────────────────

/// Seconds between the NTP era origin (1900) and the Unix epoch.
const NTP_UNIX_OFFSET: i64 = 2_208_988_800;
const SNTP_PACKET_LEN: usize = 48;
/// LI = 0, VN = 4, Mode = 3 (client).
const SNTP_CLIENT_HEADER: u8 = 0x23;

/// Single-request SNTP client (RFC 4330).
#[derive(Debug, Clone)]
pub struct SntpTimeSource {
    server: String,
    timeout: Duration,
}

impl SntpTimeSource {
    pub fn new(server: impl Into<String>) -> Self {
        Self {
            server: server.into(),
            timeout: Duration::from_secs(2),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    async fn query(&self) -> std::io::Result<[u8; SNTP_PACKET_LEN]> {
        let socket = UdpSocket::bind("0.0.0.0:0").await?;
        socket.connect(&self.server).await?;

        let mut request = [0u8; SNTP_PACKET_LEN];
        request[0] = SNTP_CLIENT_HEADER;
        socket.send(&request).await?;

        let mut response = [0u8; SNTP_PACKET_LEN];
        let n = tokio::time::timeout(self.timeout, socket.recv(&mut response))
            .await
            .map_err(|_| std::io::Error::new(std::io::ErrorKind::TimedOut, "SNTP timeout"))??;
        if n < SNTP_PACKET_LEN {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("short SNTP response ({n} bytes)"),
            ));
        }
        Ok(response)
    }
}

#[async_trait]
impl TimeSource for SntpTimeSource {
    async fn sync(&mut self) -> Option<UnixTimestamp> {
        match self.query().await {
            Ok(response) => {
                let ts = parse_sntp_response(&response);
                if ts.is_none() {
                    tracing::warn!(server = %self.server, "SNTP response rejected");
                }
                ts
            }
            Err(e) => {
                tracing::debug!(server = %self.server, error = %e, "SNTP request failed");
                None
            }
        }
    }
}

/// Extract the transmit timestamp from an SNTP server response.
///
/// Rejects non-server modes, kiss-o'-death (stratum 0), an unset transmit
/// timestamp and implausible times.
pub fn parse_sntp_response(packet: &[u8; SNTP_PACKET_LEN]) -> Option<UnixTimestamp> {
    let mode = packet[0] & 0x07;
    let stratum = packet[1];
    if mode != 4 || stratum == 0 {
        return None;
    }

    let secs = u32::from_be_bytes([packet[40], packet[41], packet[42], packet[43]]);
    if secs == 0 {
        return None;
    }
    // RFC 4330 §3: a clear MSB means era 1, which began 2036-02-07.
    let mut ntp_secs = i64::from(secs);
    if secs & 0x8000_0000 == 0 {
        ntp_secs += 1 << 32;
    }
    let ts = UnixTimestamp::from_secs(ntp_secs - NTP_UNIX_OFFSET);
    ts.is_plausible().then_some(ts)
}
