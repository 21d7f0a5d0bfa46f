//! Session manager: the reconnect state machine.
//!
//! Drives network attach, time sync, TLS handshake and MQTT CONNECT in
//! order, one step per `poll()`. Any failure unwinds to `Disconnected` and
//! the next attempt starts over from network attach, so a TLS context is
//! never reused across attempts and certificate validity is always checked
//! against freshly synchronized time.

use std::fmt;
use std::sync::Arc;

use rumqttc::{ConnectReturnCode, Packet};

use hs_protocol::{CredentialBundle, UnixTimestamp};

use crate::clock::Clock;
use crate::codec::{self, FrameReader};
use crate::config::{MAX_PAYLOAD_BYTES, SessionConfig};
use crate::error::{PublishError, SessionError, TransportError};
use crate::handler::InboundMessage;
use crate::network::{NetworkLink, TimeSource};
use crate::tls::CertificateSet;
use crate::transport::Transport;

/// Poll granularity while waiting for CONNACK.
const CONNACK_POLL_MS: u64 = 10;
/// Size of a single transport read.
const READ_CHUNK: usize = 512;

/// Connection lifecycle phase. Exactly one, owned by the `SessionManager`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    Disconnected,
    NetworkAttaching,
    TimeSyncing,
    TlsHandshaking,
    SessionEstablishing,
    Ready,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Disconnected => "disconnected",
            Self::NetworkAttaching => "network_attaching",
            Self::TimeSyncing => "time_syncing",
            Self::TlsHandshaking => "tls_handshaking",
            Self::SessionEstablishing => "session_establishing",
            Self::Ready => "ready",
        };
        f.write_str(name)
    }
}

/// Counters for operator diagnostics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionStats {
    /// Full connection attempts started (entries into `NetworkAttaching`).
    pub attempts: u64,
    /// Sessions that reached `Ready`.
    pub established: u64,
    /// Failed attempts plus drops from `Ready`.
    pub failures: u64,
}

/// Owns the transport and the MQTT session on top of it.
pub struct SessionManager<T, N, S> {
    config: SessionConfig,
    credentials: CredentialBundle,
    certs: CertificateSet,
    transport: T,
    network: N,
    time_source: S,
    clock: Arc<dyn Clock>,

    state: ConnectionState,
    attach_requested: bool,
    /// Network time sample and the monotonic tick it was taken at.
    synced: Option<(UnixTimestamp, u64)>,
    reader: FrameReader,
    last_outbound_ms: u64,
    ping_sent_ms: Option<u64>,
    next_pkid: u16,
    stats: SessionStats,
}

impl<T, N, S> SessionManager<T, N, S>
where
    T: Transport,
    N: NetworkLink,
    S: TimeSource,
{
    pub fn new(
        config: SessionConfig,
        credentials: CredentialBundle,
        certs: CertificateSet,
        transport: T,
        network: N,
        time_source: S,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            config,
            credentials,
            certs,
            transport,
            network,
            time_source,
            clock,
            state: ConnectionState::Disconnected,
            attach_requested: false,
            synced: None,
            reader: FrameReader::new(),
            last_outbound_ms: 0,
            ping_sent_ms: None,
            next_pkid: 1,
            stats: SessionStats::default(),
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_ready(&self) -> bool {
        self.state == ConnectionState::Ready
    }

    pub fn stats(&self) -> SessionStats {
        self.stats
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn network_mut(&mut self) -> &mut N {
        &mut self.network
    }

    pub fn time_source_mut(&mut self) -> &mut S {
        &mut self.time_source
    }

    /// Ask the manager to bring the session up. It stays up (reconnecting
    /// as needed) until `shutdown`.
    pub fn request_attach(&mut self) {
        self.attach_requested = true;
    }

    /// Current wall-clock time derived from the last network time sample.
    pub fn network_time(&self) -> Option<UnixTimestamp> {
        let (ts, at) = self.synced?;
        Some(ts.plus_millis(self.clock.now_ms().saturating_sub(at)))
    }

    /// Advance the state machine by one step, or service the live session.
    ///
    /// Returns any PUBLISH messages received during this step.
    pub async fn poll(&mut self) -> Vec<InboundMessage> {
        match self.state {
            ConnectionState::Disconnected => {
                if self.attach_requested {
                    self.begin_attempt().await;
                }
                Vec::new()
            }
            ConnectionState::NetworkAttaching => {
                self.step_attach().await;
                Vec::new()
            }
            ConnectionState::TimeSyncing => {
                self.step_time_sync().await;
                Vec::new()
            }
            ConnectionState::TlsHandshaking => {
                self.step_handshake().await;
                Vec::new()
            }
            ConnectionState::SessionEstablishing => {
                self.step_establish().await;
                Vec::new()
            }
            ConnectionState::Ready => self.step_ready().await,
        }
    }

    /// Publish `payload` to `topic` at QoS 0.
    ///
    /// Fails with `NotConnected` (and touches nothing) unless `is_ready()`.
    pub async fn publish(&mut self, topic: &str, payload: &[u8]) -> Result<(), PublishError> {
        if !self.is_ready() {
            return Err(PublishError::NotConnected);
        }
        if payload.len() > MAX_PAYLOAD_BYTES {
            return Err(PublishError::PayloadTooLarge {
                len: payload.len(),
                max: MAX_PAYLOAD_BYTES,
            });
        }

        let frame = codec::encode(&codec::publish(topic, payload))
            .map_err(|e| PublishError::Encode(e.to_string()))?;
        if let Err(e) = self.send_frame(&frame).await {
            self.drop_session("publish failed", &e);
            return Err(PublishError::Transport(e));
        }
        Ok(())
    }

    /// Send DISCONNECT if a session is up, then release the transport.
    pub async fn shutdown(&mut self) {
        self.attach_requested = false;
        if self.is_ready() {
            if let Err(e) = self.send_frame(&codec::DISCONNECT).await {
                tracing::debug!(error = %e, "DISCONNECT not delivered");
            }
        }
        self.transport.close();
        self.clear_session();
        self.transition(ConnectionState::Disconnected);
    }

    // ── Phases ────────────────────────────────────────────────

    async fn begin_attempt(&mut self) {
        self.stats.attempts += 1;
        self.transition(ConnectionState::NetworkAttaching);
        tracing::info!(ssid = %self.credentials.wifi_ssid, "connecting to network");
        self.network
            .join(&self.credentials.wifi_ssid, &self.credentials.wifi_password)
            .await;
    }

    async fn step_attach(&mut self) {
        if self.network.is_attached().await {
            tracing::info!("network attached");
            self.transition(ConnectionState::TimeSyncing);
        } else {
            self.clock.sleep_ms(self.config.attach_poll_ms).await;
        }
    }

    async fn step_time_sync(&mut self) {
        if !self.network.is_attached().await {
            self.lose_network();
            return;
        }
        match self.time_source.sync().await {
            Some(ts) if ts.is_plausible() => {
                tracing::info!(time = %ts, "network time synchronized");
                self.synced = Some((ts, self.clock.now_ms()));
                self.transition(ConnectionState::TlsHandshaking);
            }
            Some(ts) => {
                tracing::warn!(time = %ts, "ignoring implausible network time");
                self.clock.sleep_ms(self.config.time_sync_retry_ms).await;
            }
            None => {
                self.clock.sleep_ms(self.config.time_sync_retry_ms).await;
            }
        }
    }

    async fn step_handshake(&mut self) {
        let Some(now) = self.network_time() else {
            // Only reachable if the sample was cleared mid-attempt.
            self.transition(ConnectionState::TimeSyncing);
            return;
        };

        self.transport.close();

        if let Err(e) = self.transport.configure_tls(&self.certs, now) {
            self.fail_attempt("TLS configuration failed", &e).await;
            return;
        }
        tracing::debug!(time = %now, "TLS context configured");

        let host = self.credentials.endpoint_host.to_string();
        if let Err(e) = self.transport.open(&host, self.config.port).await {
            self.fail_attempt("transport open failed", &e).await;
            return;
        }
        if let Err(e) = self.transport.handshake().await {
            self.fail_attempt("TLS handshake failed", &e).await;
            return;
        }

        tracing::info!(host = %host, port = self.config.port, "TLS session established");
        self.transition(ConnectionState::SessionEstablishing);
    }

    async fn step_establish(&mut self) {
        tracing::info!(client_id = %self.credentials.thing_name, "attempting MQTT connection");
        match self.connect_session().await {
            Ok(()) => {
                self.stats.established += 1;
                self.last_outbound_ms = self.clock.now_ms();
                self.ping_sent_ms = None;
                self.transition(ConnectionState::Ready);
                tracing::info!("connected");
                self.subscribe_all().await;
            }
            Err(e) => self.fail_attempt("MQTT connection failed", &e).await,
        }
    }

    async fn step_ready(&mut self) -> Vec<InboundMessage> {
        let mut inbound = Vec::new();

        if !self.network.is_attached().await {
            self.lose_network();
            return inbound;
        }

        let mut buf = [0u8; READ_CHUNK];
        match self.transport.recv(&mut buf).await {
            Ok(0) => {}
            Ok(n) => {
                self.reader.extend(&buf[..n]);
                self.ping_sent_ms = None;
                loop {
                    match self.reader.next_packet() {
                        Ok(Some(Packet::Publish(p))) => inbound.push(InboundMessage {
                            topic: p.topic.clone(),
                            payload: p.payload.to_vec(),
                        }),
                        Ok(Some(other)) => tracing::trace!(packet = ?other, "inbound packet"),
                        Ok(None) => break,
                        Err(e) => {
                            self.drop_session("inbound framing error", &e);
                            return inbound;
                        }
                    }
                }
            }
            Err(e) => {
                self.drop_session("connection lost", &e);
                return inbound;
            }
        }

        let now = self.clock.now_ms();
        let keepalive = self.config.keepalive_ms();
        if keepalive == 0 {
            return inbound;
        }
        if let Some(sent) = self.ping_sent_ms {
            if now.saturating_sub(sent) >= keepalive {
                let e = TransportError::Io("no PINGRESP within keep-alive".to_string());
                self.drop_session("keep-alive timeout", &e);
            }
        } else if now.saturating_sub(self.last_outbound_ms) >= keepalive {
            match self.send_frame(&codec::PINGREQ).await {
                Ok(()) => self.ping_sent_ms = Some(now),
                Err(e) => self.drop_session("keep-alive ping failed", &e),
            }
        }
        inbound
    }

    // ── Helpers ───────────────────────────────────────────────

    async fn connect_session(&mut self) -> Result<(), SessionError> {
        let connect = codec::encode(&codec::connect(
            &self.credentials.thing_name,
            self.config.keepalive_secs,
        ))?;
        self.send_frame(&connect).await?;

        let deadline = self
            .clock
            .now_ms()
            .saturating_add(self.config.connack_timeout_ms);
        let mut buf = [0u8; READ_CHUNK];
        loop {
            let n = self.transport.recv(&mut buf).await?;
            if n > 0 {
                self.reader.extend(&buf[..n]);
            }
            if let Some(packet) = self.reader.next_packet()? {
                return match packet {
                    Packet::ConnAck(ack) if ack.code == ConnectReturnCode::Success => Ok(()),
                    Packet::ConnAck(ack) => {
                        let (code, reason) = codec::describe_return_code(ack.code);
                        Err(SessionError::Refused { code, reason })
                    }
                    other => Err(SessionError::UnexpectedPacket(format!("{other:?}"))),
                };
            }
            if self.clock.now_ms() >= deadline {
                return Err(SessionError::ConnAckTimeout {
                    timeout_ms: self.config.connack_timeout_ms,
                });
            }
            if n == 0 {
                self.clock.sleep_ms(CONNACK_POLL_MS).await;
            }
        }
    }

    async fn subscribe_all(&mut self) {
        let filters = self.config.subscriptions(&self.credentials.thing_name);
        for filter in filters {
            let pkid = self.next_pkid;
            self.next_pkid = self.next_pkid.checked_add(1).unwrap_or(1);
            let frame = match codec::encode(&codec::subscribe(&filter, pkid)) {
                Ok(frame) => frame,
                Err(e) => {
                    tracing::warn!(filter = %filter, error = %e, "cannot encode SUBSCRIBE");
                    continue;
                }
            };
            if let Err(e) = self.send_frame(&frame).await {
                self.drop_session("subscribe failed", &e);
                return;
            }
            tracing::info!(filter = %filter, "subscribed");
        }
    }

    async fn send_frame(&mut self, frame: &[u8]) -> Result<(), TransportError> {
        let mut written = 0;
        while written < frame.len() {
            let n = self.transport.send(&frame[written..]).await?;
            if n == 0 {
                return Err(TransportError::Closed);
            }
            written += n;
        }
        self.last_outbound_ms = self.clock.now_ms();
        Ok(())
    }

    /// Abandon a connection attempt: surface the error with the transport's
    /// diagnostic, release everything, wait, then go back to `Disconnected`.
    async fn fail_attempt(&mut self, what: &str, error: &(dyn fmt::Display + Sync)) {
        self.stats.failures += 1;
        tracing::error!(
            phase = %self.state,
            error = %error,
            ssl_error = %self.transport.last_error(),
            retry_in_ms = self.config.reconnect_delay_ms,
            "{what}"
        );
        self.transport.close();
        self.clear_session();
        self.transition(ConnectionState::Disconnected);
        self.clock.sleep_ms(self.config.reconnect_delay_ms).await;
    }

    /// Drop a live session after a detected disconnect.
    fn drop_session(&mut self, what: &str, error: &dyn fmt::Display) {
        self.stats.failures += 1;
        tracing::warn!(error = %error, ssl_error = %self.transport.last_error(), "{what}");
        self.transport.close();
        self.clear_session();
        self.transition(ConnectionState::Disconnected);
    }

    fn lose_network(&mut self) {
        self.stats.failures += 1;
        tracing::warn!(phase = %self.state, "network attach lost");
        self.transport.close();
        self.clear_session();
        self.transition(ConnectionState::Disconnected);
    }

    fn clear_session(&mut self) {
        self.synced = None;
        self.reader.clear();
        self.ping_sent_ms = None;
    }

    fn transition(&mut self, to: ConnectionState) {
        if self.state != to {
            tracing::info!(from = %self.state, to = %to, "connection state");
            self.state = to;
        }
    }
}
