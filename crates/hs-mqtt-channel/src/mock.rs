//! Test doubles for running the session manager without a network.
//!
//! - `MockTransport`: scripted byte transport, optionally auto-answering CONNECT
//! - `MockNetwork`: link that is attached, detached, or attaches after N polls
//! - `MockTimeSource`: fixed network time with scripted failures
//! - `ManualClock`: monotonic time that only moves when told to (or on sleep)
//! - `MockChannel`: records publishes for scheduler tests

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;

use hs_protocol::UnixTimestamp;

use crate::channel::Channel;
use crate::clock::Clock;
use crate::error::{PublishError, TlsError, TlsResult, TransportError, TransportResult};
use crate::network::{NetworkLink, TimeSource};
use crate::tls::CertificateSet;
use crate::transport::Transport;

// ── Transport ─────────────────────────────────────────────────

#[derive(Default)]
struct Script {
    inbound: VecDeque<u8>,
    connack: Option<[u8; 4]>,
    answer_pings: bool,
    handshake_errors: VecDeque<TlsError>,
    peer_closed: bool,
}

/// Scripted transport.
///
/// Outbound frames are recorded. When a CONNACK reply is configured, every
/// CONNECT written is answered with it, across any number of reconnects,
/// and every PINGREQ with a PINGRESP.
#[derive(Default)]
pub struct MockTransport {
    script: Mutex<Script>,
    open: bool,
    configured: bool,
    configured_times: Vec<UnixTimestamp>,
    opened: Vec<String>,
    sent: Vec<Vec<u8>>,
    close_count: usize,
    last_error: String,
}

impl MockTransport {
    /// Transport that never answers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Broker accepts every CONNECT.
    pub fn accepting() -> Self {
        Self::refusing(0)
    }

    /// Broker answers every CONNECT with return code `rc`.
    pub fn refusing(rc: u8) -> Self {
        let t = Self::default();
        {
            let mut script = t.script.lock().unwrap();
            script.connack = Some([0x20, 0x02, 0x00, rc]);
            script.answer_pings = true;
        }
        t
    }

    /// Fail the next handshake with `err`. Stacks.
    pub fn with_handshake_error(self, err: TlsError) -> Self {
        self.script.lock().unwrap().handshake_errors.push_back(err);
        self
    }

    /// Change the CONNACK reply for later attempts.
    pub fn set_connack(&self, rc: Option<u8>) {
        self.script.lock().unwrap().connack = rc.map(|rc| [0x20, 0x02, 0x00, rc]);
    }

    /// Stop (or resume) answering PINGREQ, to exercise keep-alive expiry.
    pub fn set_answer_pings(&self, answer: bool) {
        self.script.lock().unwrap().answer_pings = answer;
    }

    /// Make `bytes` available to the next `recv` calls.
    pub fn queue_recv(&self, bytes: &[u8]) {
        self.script.lock().unwrap().inbound.extend(bytes);
    }

    /// Simulate the broker dropping the connection.
    pub fn close_from_peer(&self) {
        self.script.lock().unwrap().peer_closed = true;
    }

    pub fn is_open(&self) -> bool {
        self.open
    }

    /// Every timestamp passed to `configure_tls`, in order.
    pub fn configured_times(&self) -> Vec<UnixTimestamp> {
        self.configured_times.clone()
    }

    /// Every `host:port` passed to `open`, in order.
    pub fn opened_hosts(&self) -> Vec<String> {
        self.opened.clone()
    }

    /// Every frame written, in order.
    pub fn sent(&self) -> Vec<Vec<u8>> {
        self.sent.clone()
    }

    pub fn close_count(&self) -> usize {
        self.close_count
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn open(&mut self, host: &str, port: u16) -> TransportResult<()> {
        self.opened.push(format!("{host}:{port}"));
        self.script.lock().unwrap().peer_closed = false;
        self.open = true;
        Ok(())
    }

    fn configure_tls(&mut self, _certs: &CertificateSet, now: UnixTimestamp) -> TlsResult<()> {
        self.configured_times.push(now);
        if !now.is_plausible() {
            let err = TlsError::ClockInvalid(format!("{now}"));
            self.last_error = err.to_string();
            return Err(err);
        }
        self.configured = true;
        Ok(())
    }

    async fn handshake(&mut self) -> TlsResult<()> {
        if !self.open {
            return Err(TlsError::Transport(TransportError::NotOpen));
        }
        if !self.configured {
            return Err(TlsError::NotConfigured);
        }
        let scripted = self.script.lock().unwrap().handshake_errors.pop_front();
        match scripted {
            Some(err) => {
                self.last_error = err.to_string();
                Err(err)
            }
            None => Ok(()),
        }
    }

    async fn send(&mut self, bytes: &[u8]) -> TransportResult<usize> {
        if !self.open {
            return Err(TransportError::NotOpen);
        }
        let mut script = self.script.lock().unwrap();
        if script.peer_closed {
            self.last_error = TransportError::Closed.to_string();
            return Err(TransportError::Closed);
        }
        match bytes.first() {
            // CONNECT
            Some(0x10) => {
                if let Some(connack) = script.connack {
                    script.inbound.extend(connack);
                }
            }
            // PINGREQ
            Some(0xC0) if script.answer_pings => script.inbound.extend([0xD0, 0x00]),
            _ => {}
        }
        self.sent.push(bytes.to_vec());
        Ok(bytes.len())
    }

    async fn recv(&mut self, buf: &mut [u8]) -> TransportResult<usize> {
        if !self.open {
            return Err(TransportError::NotOpen);
        }
        let mut script = self.script.lock().unwrap();
        if script.peer_closed {
            self.last_error = TransportError::Closed.to_string();
            return Err(TransportError::Closed);
        }
        let n = buf.len().min(script.inbound.len());
        for (slot, byte) in buf.iter_mut().zip(script.inbound.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }

    fn last_error(&self) -> &str {
        &self.last_error
    }

    fn close(&mut self) {
        self.close_count += 1;
        self.open = false;
        self.configured = false;
        self.script.lock().unwrap().inbound.clear();
    }
}

// ── Network ───────────────────────────────────────────────────

/// Network link whose attach state is set by the test.
#[derive(Debug, Default)]
pub struct MockNetwork {
    attached: bool,
    attach_after: Option<u32>,
    polls: u32,
    joins: u32,
    last_ssid: Option<String>,
}

impl MockNetwork {
    pub fn attached() -> Self {
        Self {
            attached: true,
            ..Self::default()
        }
    }

    pub fn detached() -> Self {
        Self::default()
    }

    /// Report attached once `is_attached` has been polled `polls` times after a join.
    pub fn attaching_after(polls: u32) -> Self {
        Self {
            attach_after: Some(polls),
            ..Self::default()
        }
    }

    pub fn set_attached(&mut self, attached: bool) {
        self.attached = attached;
        self.attach_after = None;
    }

    pub fn join_count(&self) -> u32 {
        self.joins
    }

    pub fn last_ssid(&self) -> Option<&str> {
        self.last_ssid.as_deref()
    }
}

#[async_trait]
impl NetworkLink for MockNetwork {
    async fn join(&mut self, ssid: &str, _password: &str) {
        self.joins += 1;
        self.polls = 0;
        self.last_ssid = Some(ssid.to_string());
    }

    async fn is_attached(&mut self) -> bool {
        if let Some(after) = self.attach_after {
            self.polls += 1;
            if self.polls >= after {
                self.attached = true;
                self.attach_after = None;
            }
        }
        self.attached
    }
}

// ── Time source ───────────────────────────────────────────────

/// Network time source answering with a fixed timestamp.
#[derive(Debug, Default)]
pub struct MockTimeSource {
    time: Option<UnixTimestamp>,
    failures: u32,
    requests: u32,
}

impl MockTimeSource {
    pub fn fixed(time: UnixTimestamp) -> Self {
        Self {
            time: Some(time),
            ..Self::default()
        }
    }

    /// A source that never answers.
    pub fn unavailable() -> Self {
        Self::default()
    }

    /// Make the next `n` requests go unanswered.
    pub fn fail_next(&mut self, n: u32) {
        self.failures = n;
    }

    pub fn set_time(&mut self, time: Option<UnixTimestamp>) {
        self.time = time;
    }

    pub fn request_count(&self) -> u32 {
        self.requests
    }
}

#[async_trait]
impl TimeSource for MockTimeSource {
    async fn sync(&mut self) -> Option<UnixTimestamp> {
        self.requests += 1;
        if self.failures > 0 {
            self.failures -= 1;
            return None;
        }
        self.time
    }
}

// ── Clock ─────────────────────────────────────────────────────

/// Manually driven monotonic clock. `sleep_ms` advances it instantly.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicU64,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn starting_at(ms: u64) -> Self {
        Self {
            now: AtomicU64::new(ms),
        }
    }

    pub fn advance(&self, ms: u64) {
        self.now.fetch_add(ms, Ordering::SeqCst);
    }
}

#[async_trait]
impl Clock for ManualClock {
    fn now_ms(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }

    async fn sleep_ms(&self, ms: u64) {
        self.advance(ms);
    }
}

// ── Channel ───────────────────────────────────────────────────

/// A recorded publish call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedMessage {
    pub topic: String,
    pub payload: Vec<u8>,
}

/// Channel that records publishes. Starts ready.
#[derive(Debug)]
pub struct MockChannel {
    ready: bool,
    published: Vec<PublishedMessage>,
    rejected: usize,
}

impl MockChannel {
    pub fn new() -> Self {
        Self {
            ready: true,
            published: Vec::new(),
            rejected: 0,
        }
    }

    pub fn set_ready(&mut self, ready: bool) {
        self.ready = ready;
    }

    pub fn published(&self) -> &[PublishedMessage] {
        &self.published
    }

    pub fn last_published(&self) -> Option<&PublishedMessage> {
        self.published.last()
    }

    /// Publishes refused because the channel was not ready.
    pub fn rejected(&self) -> usize {
        self.rejected
    }
}

impl Default for MockChannel {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Channel for MockChannel {
    fn is_ready(&self) -> bool {
        self.ready
    }

    async fn publish(&mut self, topic: &str, payload: &[u8]) -> Result<(), PublishError> {
        if !self.ready {
            self.rejected += 1;
            return Err(PublishError::NotConnected);
        }
        self.published.push(PublishedMessage {
            topic: topic.to_string(),
            payload: payload.to_vec(),
        });
        Ok(())
    }
}
