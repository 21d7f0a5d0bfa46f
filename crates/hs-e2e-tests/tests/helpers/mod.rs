//! Shared harness for scenario tests.
//!
//! Runs the real `AppContext` loop (session manager + scheduler) against the
//! channel crate's mocks, with a manual clock so minutes of node time pass
//! instantly.

#![allow(dead_code)]

use std::sync::Arc;

use rumqttc::Packet;

use hs_mqtt_channel::codec::FrameReader;
use hs_mqtt_channel::{
    CertificateSet, ConnectionState, ManualClock, MockNetwork, MockTimeSource, MockTransport,
    SessionConfig, SessionManager,
};
use hs_node_agent::app::{AppContext, LOOP_IDLE_MS};
use hs_node_agent::mock::MockSensor;
use hs_node_agent::scheduler::TelemetryScheduler;
use hs_protocol::{CredentialBundle, Reading, UnixTimestamp};

pub const THING: &str = "humidity-temp-2";
pub const ENDPOINT: &str = "a1b2c3-ats.iot.eu-west-1.amazonaws.com";
pub const INTERVAL_MS: u64 = 60_000;
/// 2025-10-09T08:53:20Z
pub const SYNCED: UnixTimestamp = UnixTimestamp::from_secs(1_760_000_000);

pub type MockContext = AppContext<MockTransport, MockNetwork, MockTimeSource>;

/// One node wired entirely to mocks.
pub struct NodeHarness {
    pub ctx: MockContext,
    pub clock: Arc<ManualClock>,
    /// Distinct states in the order they were observed after each loop pass.
    pub trace: Vec<ConnectionState>,
}

pub struct HarnessBuilder {
    transport: MockTransport,
    network: MockNetwork,
    time_source: MockTimeSource,
    sensor: MockSensor,
    config: SessionConfig,
}

impl HarnessBuilder {
    pub fn transport(mut self, transport: MockTransport) -> Self {
        self.transport = transport;
        self
    }

    pub fn network(mut self, network: MockNetwork) -> Self {
        self.network = network;
        self
    }

    pub fn time_source(mut self, time_source: MockTimeSource) -> Self {
        self.time_source = time_source;
        self
    }

    pub fn sensor(mut self, sensor: MockSensor) -> Self {
        self.sensor = sensor;
        self
    }

    pub fn config(mut self, config: SessionConfig) -> Self {
        self.config = config;
        self
    }

    pub fn build(self) -> NodeHarness {
        let clock = Arc::new(ManualClock::new());
        let credentials = CredentialBundle::new("lab-wifi", "hunter22", ENDPOINT, THING)
            .expect("test credentials fit their bounds");
        let certs = CertificateSet {
            device_cert: b"device-cert".to_vec(),
            private_key: b"private-key".to_vec(),
            ca_cert: b"ca-cert".to_vec(),
        };

        let mut session = SessionManager::new(
            self.config,
            credentials,
            certs,
            self.transport,
            self.network,
            self.time_source,
            clock.clone(),
        );
        session.request_attach();

        let ctx = AppContext::new(
            session,
            TelemetryScheduler::new(THING, INTERVAL_MS),
            Box::new(self.sensor),
            clock.clone(),
        );
        let trace = vec![ctx.state()];
        NodeHarness { ctx, clock, trace }
    }
}

impl NodeHarness {
    /// Healthy network, accepting broker, steady sensor.
    pub fn builder() -> HarnessBuilder {
        HarnessBuilder {
            transport: MockTransport::accepting(),
            network: MockNetwork::attached(),
            time_source: MockTimeSource::fixed(SYNCED),
            sensor: MockSensor::constant(Reading::new(55.2, 21.7)),
            config: SessionConfig::default(),
        }
    }

    pub fn now_ms(&self) -> u64 {
        use hs_mqtt_channel::Clock;
        self.clock.now_ms()
    }

    pub fn state(&self) -> ConnectionState {
        self.ctx.state()
    }

    /// One loop pass, as `AppContext::run` does it.
    pub async fn step(&mut self) {
        use hs_mqtt_channel::Clock;
        self.ctx.run_once().await;
        self.clock.sleep_ms(LOOP_IDLE_MS).await;
        let state = self.ctx.state();
        if self.trace.last() != Some(&state) {
            self.trace.push(state);
        }
    }

    /// Loop until the clock has advanced by at least `ms`.
    pub async fn run_for(&mut self, ms: u64) {
        let until = self.now_ms() + ms;
        while self.now_ms() < until {
            self.step().await;
        }
    }

    /// Loop until `state` is observed, giving up after `max_steps` passes.
    pub async fn run_until(&mut self, state: ConnectionState, max_steps: usize) -> bool {
        for _ in 0..max_steps {
            if self.state() == state {
                return true;
            }
            self.step().await;
        }
        self.state() == state
    }

    pub fn transport(&self) -> &MockTransport {
        self.ctx.session().transport()
    }

    pub fn network_mut(&mut self) -> &mut MockNetwork {
        self.ctx.session_mut().network_mut()
    }

    pub fn time_source_mut(&mut self) -> &mut MockTimeSource {
        self.ctx.session_mut().time_source_mut()
    }

    /// Every PUBLISH written to the wire, as (topic, payload).
    pub fn published(&self) -> Vec<(String, Vec<u8>)> {
        let mut out = Vec::new();
        for frame in self.transport().sent() {
            let mut reader = FrameReader::new();
            reader.extend(&frame);
            if let Ok(Some(Packet::Publish(p))) = reader.next_packet() {
                out.push((p.topic.clone(), p.payload.to_vec()));
            }
        }
        out
    }

    /// Count of passes through `state` in the trace.
    pub fn entries(&self, state: ConnectionState) -> usize {
        self.trace.iter().filter(|s| **s == state).count()
    }
}
