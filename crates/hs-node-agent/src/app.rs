//! Application context and the cooperative control loop.
//!
//! Everything the node owns lives in one `AppContext`, built once at boot
//! and driven by a single loop: poll the session manager, then let the
//! telemetry scheduler fire if its interval has elapsed.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use thiserror::Error;

use hs_mqtt_channel::{
    CertificateError, CertificateSet, Clock, ConnectionState, HostNetwork, NetworkLink,
    SessionManager, SntpTimeSource, TimeSource, TlsTransport, TokioClock, Transport, log_message,
};

use crate::config::{ConfigError, NodeConfig};
use crate::scheduler::TelemetryScheduler;
use crate::sensor::{self, Sensor};

/// Idle time per loop iteration so a disconnected node does not spin.
pub const LOOP_IDLE_MS: u64 = 10;

/// Boot-time failures. The node does not start on any of these.
#[derive(Debug, Error)]
pub enum BootError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Certificate(#[from] CertificateError),
}

/// The production wiring: rustls transport, OS network, SNTP.
pub type NodeContext = AppContext<TlsTransport, HostNetwork, SntpTimeSource>;

pub struct AppContext<T, N, S> {
    session: SessionManager<T, N, S>,
    scheduler: TelemetryScheduler,
    sensor: Box<dyn Sensor>,
    clock: Arc<dyn Clock>,
}

impl<T, N, S> AppContext<T, N, S>
where
    T: Transport,
    N: NetworkLink,
    S: TimeSource,
{
    pub fn new(
        session: SessionManager<T, N, S>,
        scheduler: TelemetryScheduler,
        sensor: Box<dyn Sensor>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            session,
            scheduler,
            sensor,
            clock,
        }
    }

    pub fn session(&self) -> &SessionManager<T, N, S> {
        &self.session
    }

    pub fn session_mut(&mut self) -> &mut SessionManager<T, N, S> {
        &mut self.session
    }

    pub fn scheduler(&self) -> &TelemetryScheduler {
        &self.scheduler
    }

    pub fn state(&self) -> ConnectionState {
        self.session.state()
    }

    /// One loop iteration.
    pub async fn run_once(&mut self) {
        for msg in self.session.poll().await {
            log_message(&msg);
        }

        let now = self.clock.now_ms();
        self.scheduler
            .tick(now, self.sensor.as_mut(), &mut self.session)
            .await;
    }

    /// Run the loop until `stop` is set. The flag is checked between
    /// iterations only, so a frame is never cut off halfway.
    pub async fn run(&mut self, stop: &AtomicBool) {
        self.session.request_attach();
        while !stop.load(Ordering::SeqCst) {
            self.run_once().await;
            self.clock.sleep_ms(LOOP_IDLE_MS).await;
        }
    }

    pub async fn shutdown(&mut self) {
        self.session.shutdown().await;
        let stats = self.session.stats();
        let telemetry = self.scheduler.stats();
        tracing::info!(
            attempts = stats.attempts,
            established = stats.established,
            failures = stats.failures,
            published = telemetry.published,
            dropped = telemetry.dropped,
            "session closed"
        );
    }
}

/// Build the node from config: validate credentials, load certificates,
/// select the sensor and wire the production transport.
pub fn build(config: &NodeConfig) -> Result<NodeContext, BootError> {
    let credentials = config.validate()?;
    let certs = CertificateSet::load(
        &config.certs.device_cert,
        &config.certs.private_key,
        &config.certs.ca_cert,
    )?;

    let clock: Arc<dyn Clock> = Arc::new(TokioClock::new());
    let network = HostNetwork::new(credentials.endpoint_host.as_str(), config.mqtt.port);
    let time_source = SntpTimeSource::new(config.mqtt.ntp_server.clone());
    let scheduler = TelemetryScheduler::new(&credentials.thing_name, config.publish_interval_ms);

    tracing::info!(
        thing_name = %credentials.thing_name,
        endpoint = %credentials.endpoint_host,
        topic = %scheduler.topic(),
        interval_ms = config.publish_interval_ms,
        sensor = ?config.sensor.kind,
        "node configured"
    );

    let session = SessionManager::new(
        config.mqtt.clone(),
        credentials,
        certs,
        TlsTransport::new().with_timeouts(
            Duration::from_millis(config.mqtt.io_timeout_ms),
            Duration::from_millis(config.mqtt.read_timeout_ms),
        ),
        network,
        time_source,
        clock.clone(),
    );

    Ok(AppContext::new(
        session,
        scheduler,
        sensor::from_config(&config.sensor),
        clock,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockSensor;
    use async_trait::async_trait;
    use hs_mqtt_channel::codec::FrameReader;
    use hs_mqtt_channel::{
        ManualClock, MockNetwork, MockTimeSource, MockTransport, SessionConfig,
    };
    use hs_protocol::{CredentialBundle, Reading, UnixTimestamp};

    /// Raises `stop` while the loop is mid-iteration, as a signal would.
    struct StopOnRead {
        stop: Arc<AtomicBool>,
    }

    #[async_trait]
    impl Sensor for StopOnRead {
        async fn read(&mut self) -> Reading {
            self.stop.store(true, Ordering::SeqCst);
            Reading::new(55.2, 21.7)
        }
    }

    fn context(
        clock: Arc<ManualClock>,
        transport: MockTransport,
    ) -> AppContext<MockTransport, MockNetwork, MockTimeSource> {
        context_with_sensor(
            clock,
            transport,
            Box::new(MockSensor::constant(Reading::new(55.2, 21.7))),
        )
    }

    fn context_with_sensor(
        clock: Arc<ManualClock>,
        transport: MockTransport,
        sensor: Box<dyn Sensor>,
    ) -> AppContext<MockTransport, MockNetwork, MockTimeSource> {
        let credentials =
            CredentialBundle::new("lab", "hunter22", "broker.example", "humidity-temp-2").unwrap();
        let certs = CertificateSet {
            device_cert: vec![1],
            private_key: vec![2],
            ca_cert: vec![3],
        };
        let mut session = SessionManager::new(
            SessionConfig::default(),
            credentials,
            certs,
            transport,
            MockNetwork::attached(),
            MockTimeSource::fixed(UnixTimestamp::from_secs(1_760_000_000)),
            clock.clone(),
        );
        session.request_attach();
        AppContext::new(
            session,
            TelemetryScheduler::new("humidity-temp-2", 60_000),
            sensor,
            clock,
        )
    }

    fn publishes(ctx: &AppContext<MockTransport, MockNetwork, MockTimeSource>) -> usize {
        ctx.session()
            .transport()
            .sent()
            .iter()
            .filter(|frame| frame[0] == 0x30)
            .count()
    }

    #[tokio::test]
    async fn loop_connects_then_publishes_on_cadence() {
        let clock = Arc::new(ManualClock::new());
        let mut ctx = context(clock.clone(), MockTransport::accepting());

        for _ in 0..10 {
            ctx.run_once().await;
        }
        assert_eq!(ctx.state(), ConnectionState::Ready);
        assert_eq!(publishes(&ctx), 0);

        clock.advance(60_000);
        ctx.run_once().await;
        assert_eq!(publishes(&ctx), 1);
        assert_eq!(ctx.scheduler().stats().published, 1);
    }

    #[tokio::test]
    async fn readings_dropped_while_disconnected() {
        let clock = Arc::new(ManualClock::new());
        let mut ctx = context(clock.clone(), MockTransport::refusing(5));

        clock.advance(60_000);
        ctx.run_once().await;
        assert_ne!(ctx.state(), ConnectionState::Ready);
        assert_eq!(ctx.scheduler().stats().dropped, 1);
        assert_eq!(publishes(&ctx), 0);
    }

    #[tokio::test]
    async fn run_returns_after_iteration_that_raised_stop() {
        let clock = Arc::new(ManualClock::new());
        let stop = Arc::new(AtomicBool::new(false));
        let sensor = StopOnRead { stop: stop.clone() };
        let mut ctx = context_with_sensor(clock, MockTransport::accepting(), Box::new(sensor));

        ctx.run(&stop).await;
        // The publish of the iteration that raised the flag went out whole.
        assert_eq!(ctx.state(), ConnectionState::Ready);
        assert_eq!(ctx.scheduler().stats().published, 1);

        ctx.shutdown().await;
        let sent = ctx.session().transport().sent();
        let (last, frames) = sent.split_last().unwrap();
        assert_eq!(last, &hs_mqtt_channel::codec::DISCONNECT.to_vec());
        let publish_frames: Vec<_> = frames.iter().filter(|f| f[0] == 0x30).collect();
        assert_eq!(publish_frames.len(), 1);
        let mut reader = FrameReader::new();
        reader.extend(publish_frames[0]);
        assert!(reader.next_packet().unwrap().is_some());
        assert_eq!(reader.buffered(), 0);
    }

    #[tokio::test]
    async fn run_with_stop_already_set_does_nothing() {
        let clock = Arc::new(ManualClock::new());
        let mut ctx = context(clock, MockTransport::accepting());
        ctx.run(&AtomicBool::new(true)).await;
        assert!(ctx.session().transport().opened_hosts().is_empty());
    }

    #[tokio::test]
    async fn shutdown_disconnects() {
        let clock = Arc::new(ManualClock::new());
        let mut ctx = context(clock, MockTransport::accepting());
        for _ in 0..10 {
            ctx.run_once().await;
        }
        ctx.shutdown().await;
        assert_eq!(ctx.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn build_fails_fast_on_missing_certificates() {
        let config: NodeConfig = toml::from_str(
            r#"
wifi_ssid = "lab"
wifi_password = "hunter22"
aws_iot_endpoint = "broker.example"
thing_name = "node-1"

[certs]
device_cert = "/nonexistent/cert.der"
private_key = "/nonexistent/private.der"
ca_cert = "/nonexistent/ca.der"
"#,
        )
        .unwrap();
        assert!(matches!(build(&config), Err(BootError::Certificate(_))));
    }

    #[test]
    fn build_fails_fast_on_missing_credentials() {
        let config: NodeConfig = toml::from_str("thing_name = \"node-1\"").unwrap();
        assert!(matches!(build(&config), Err(BootError::Config(_))));
    }
}
