//! Transport session: one TCP connection wrapped in one mTLS context.
//!
//! `Transport` trait with open/configure/handshake/send/recv/close. Two impls:
//! - `TlsTransport`: tokio TCP + rustls, for the node
//! - `MockTransport`: scripted, for tests (in `mock.rs`)

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rustls::pki_types::ServerName;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tokio_rustls::client::TlsStream;

use hs_protocol::UnixTimestamp;

use crate::error::{TlsError, TlsResult, TransportError, TransportResult};
use crate::tls::{self, CertificateSet};

/// Byte channel to the broker. Owned and driven by the session manager only.
#[async_trait]
pub trait Transport: Send {
    /// Resolve `host` and connect a TCP socket to it.
    async fn open(&mut self, host: &str, port: u16) -> TransportResult<()>;

    /// Install certificates and the validity clock for the next handshake.
    fn configure_tls(&mut self, certs: &CertificateSet, now: UnixTimestamp) -> TlsResult<()>;

    /// Run the TLS handshake over the open socket.
    async fn handshake(&mut self) -> TlsResult<()>;

    /// Write `bytes`, returning how many were accepted.
    async fn send(&mut self, bytes: &[u8]) -> TransportResult<usize>;

    /// Read into `buf`. `Ok(0)` means nothing arrived within the read timeout;
    /// a closed peer is `Err(TransportError::Closed)`.
    async fn recv(&mut self, buf: &mut [u8]) -> TransportResult<usize>;

    /// Human-readable description of the most recent failure.
    fn last_error(&self) -> &str;

    /// Release socket and TLS context. Safe to call repeatedly.
    fn close(&mut self);
}

enum Link {
    Closed,
    Tcp(TcpStream),
    Tls(Box<TlsStream<TcpStream>>),
}

/// Production transport: tokio TCP + rustls client.
///
/// `connect_timeout` bounds the TCP connect, the TLS handshake and every
/// write; `read_timeout` is the longest `recv` waits for data.
pub struct TlsTransport {
    connect_timeout: Duration,
    read_timeout: Duration,
    host: Option<String>,
    tls_config: Option<Arc<rustls::ClientConfig>>,
    link: Link,
    last_error: String,
}

impl TlsTransport {
    pub fn new() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            read_timeout: Duration::from_millis(50),
            host: None,
            tls_config: None,
            link: Link::Closed,
            last_error: String::new(),
        }
    }

    pub fn with_timeouts(mut self, connect: Duration, read: Duration) -> Self {
        self.connect_timeout = connect;
        self.read_timeout = read;
        self
    }

    pub fn is_open(&self) -> bool {
        !matches!(self.link, Link::Closed)
    }

    fn timed_out(&self, what: &str) -> TransportError {
        TransportError::TimedOut(format!(
            "{what} after {}ms",
            self.connect_timeout.as_millis()
        ))
    }

    fn record<E: std::fmt::Display>(&mut self, err: E) -> E {
        self.last_error = err.to_string();
        err
    }
}

impl Default for TlsTransport {
    fn default() -> Self {
        Self::new()
    }
}

fn classify_io(e: std::io::Error) -> TransportError {
    use std::io::ErrorKind;
    match e.kind() {
        ErrorKind::UnexpectedEof
        | ErrorKind::BrokenPipe
        | ErrorKind::ConnectionReset
        | ErrorKind::ConnectionAborted => TransportError::Closed,
        _ => TransportError::Io(e.to_string()),
    }
}

/// Map a failed handshake to the side that detected the trust failure.
fn classify_handshake(e: std::io::Error) -> TlsError {
    let Some(inner) = e.get_ref().and_then(|i| i.downcast_ref::<rustls::Error>()) else {
        return TlsError::Transport(classify_io(e));
    };
    match inner {
        rustls::Error::InvalidCertificate(reason) => {
            TlsError::CertRejected(format!("server certificate: {reason:?}"))
        }
        rustls::Error::AlertReceived(alert) => {
            TlsError::PeerRejected(format!("alert from peer: {alert:?}"))
        }
        rustls::Error::NoCertificatesPresented => {
            TlsError::CertRejected("server presented no certificate".to_string())
        }
        other => TlsError::PeerRejected(other.to_string()),
    }
}

#[async_trait]
impl Transport for TlsTransport {
    async fn open(&mut self, host: &str, port: u16) -> TransportResult<()> {
        // TLS material from configure_tls survives a re-open; the socket does not.
        self.link = Link::Closed;
        self.host = None;

        let addrs = match tokio::net::lookup_host((host, port)).await {
            Ok(addrs) => addrs.collect::<Vec<_>>(),
            Err(e) => {
                let err = TransportError::NetworkUnreachable(format!("resolve {host}: {e}"));
                return Err(self.record(err));
            }
        };
        if addrs.is_empty() {
            let err = TransportError::NetworkUnreachable(format!("no addresses for {host}"));
            return Err(self.record(err));
        }

        let connect = TcpStream::connect(&addrs[..]);
        let stream = match tokio::time::timeout(self.connect_timeout, connect).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) if e.kind() == std::io::ErrorKind::NetworkUnreachable => {
                return Err(self.record(TransportError::NetworkUnreachable(e.to_string())));
            }
            Ok(Err(e)) => {
                return Err(self.record(TransportError::ConnectFailed(e.to_string())));
            }
            Err(_) => {
                let err = self.timed_out("TCP connect");
                return Err(self.record(err));
            }
        };
        if let Err(e) = stream.set_nodelay(true) {
            tracing::debug!(error = %e, "set_nodelay failed");
        }

        tracing::debug!(host, port, "TCP connected");
        self.host = Some(host.to_string());
        self.link = Link::Tcp(stream);
        Ok(())
    }

    fn configure_tls(&mut self, certs: &CertificateSet, now: UnixTimestamp) -> TlsResult<()> {
        self.tls_config = None;
        match tls::build_client_config(certs, now) {
            Ok(config) => {
                self.tls_config = Some(Arc::new(config));
                Ok(())
            }
            Err(e) => Err(self.record(e)),
        }
    }

    async fn handshake(&mut self) -> TlsResult<()> {
        let Some(config) = self.tls_config.clone() else {
            return Err(self.record(TlsError::NotConfigured));
        };
        let Some(host) = self.host.clone() else {
            return Err(self.record(TlsError::Transport(TransportError::NotOpen)));
        };
        let server_name = match ServerName::try_from(host.clone()) {
            Ok(name) => name,
            Err(e) => {
                let err = TlsError::PeerRejected(format!("server name {host}: {e}"));
                return Err(self.record(err));
            }
        };

        let tcp = match std::mem::replace(&mut self.link, Link::Closed) {
            Link::Tcp(tcp) => tcp,
            other => {
                self.link = other;
                return Err(self.record(TlsError::Transport(TransportError::NotOpen)));
            }
        };

        let connect = TlsConnector::from(config).connect(server_name, tcp);
        match tokio::time::timeout(self.connect_timeout, connect).await {
            Ok(Ok(stream)) => {
                self.link = Link::Tls(Box::new(stream));
                Ok(())
            }
            Ok(Err(e)) => Err(self.record(classify_handshake(e))),
            Err(_) => {
                let err = TlsError::Transport(self.timed_out("TLS handshake"));
                Err(self.record(err))
            }
        }
    }

    async fn send(&mut self, bytes: &[u8]) -> TransportResult<usize> {
        let limit = self.connect_timeout;
        let Link::Tls(stream) = &mut self.link else {
            return Err(self.record(TransportError::NotOpen));
        };
        let write = async {
            stream.write_all(bytes).await?;
            stream.flush().await
        };
        let result = tokio::time::timeout(limit, write).await;
        match result {
            Ok(Ok(())) => Ok(bytes.len()),
            Ok(Err(e)) => Err(self.record(classify_io(e))),
            Err(_) => {
                let err = self.timed_out("write");
                Err(self.record(err))
            }
        }
    }

    async fn recv(&mut self, buf: &mut [u8]) -> TransportResult<usize> {
        let Link::Tls(stream) = &mut self.link else {
            return Err(self.record(TransportError::NotOpen));
        };
        let result = tokio::time::timeout(self.read_timeout, stream.read(buf)).await;
        match result {
            Err(_) => Ok(0),
            Ok(Ok(0)) => Err(self.record(TransportError::Closed)),
            Ok(Ok(n)) => Ok(n),
            Ok(Err(e)) => Err(self.record(classify_io(e))),
        }
    }

    fn last_error(&self) -> &str {
        &self.last_error
    }

    fn close(&mut self) {
        if self.is_open() {
            tracing::debug!("closing transport");
        }
        self.link = Link::Closed;
        self.tls_config = None;
        self.host = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tls::test_certs::{self_signed, server_chain};
    use rustls::pki_types::{CertificateDer, PrivateKeyDer};
    use tokio::net::TcpListener;
    use tokio_rustls::TlsAcceptor;

    // 2026-06-01T00:00:00Z
    const MID_2026: UnixTimestamp = UnixTimestamp::from_secs(1_780_272_000);
    // 2030-01-01T00:00:00Z
    const START_2030: UnixTimestamp = UnixTimestamp::from_secs(1_893_456_000);

    /// Accept one TLS client on a local port with a CA-signed `localhost`
    /// leaf valid 2025..2027. Returns the port and the CA the client trusts.
    async fn broker_with_leaf_2025_2027() -> (u16, Vec<u8>) {
        let chain = server_chain((2020, 2040), (2025, 2027));
        let provider = Arc::new(rustls::crypto::ring::default_provider());
        let config = rustls::ServerConfig::builder_with_provider(provider)
            .with_safe_default_protocol_versions()
            .unwrap()
            .with_no_client_auth()
            .with_single_cert(
                vec![CertificateDer::from(chain.leaf_cert)],
                PrivateKeyDer::try_from(chain.leaf_key).unwrap(),
            )
            .unwrap();
        let acceptor = TlsAcceptor::from(Arc::new(config));

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (sock, _) = listener.accept().await.unwrap();
            if let Ok(stream) = acceptor.accept(sock).await {
                tokio::time::sleep(Duration::from_secs(1)).await;
                drop(stream);
            }
        });
        (port, chain.ca_cert)
    }

    async fn handshake_at(now: UnixTimestamp) -> TlsResult<()> {
        let (port, broker_ca) = broker_with_leaf_2025_2027().await;
        let mut certs = self_signed(2020, 2040);
        certs.ca_cert = broker_ca;

        let mut t = TlsTransport::new();
        t.configure_tls(&certs, now)?;
        t.open("localhost", port).await?;
        t.handshake().await
    }

    #[tokio::test]
    async fn handshake_succeeds_inside_server_validity() {
        assert_eq!(handshake_at(MID_2026).await, Ok(()));
    }

    #[tokio::test]
    async fn handshake_rejects_server_certificate_expired_at_synced_time() {
        let err = handshake_at(START_2030).await.unwrap_err();
        assert!(matches!(err, TlsError::CertRejected(_)), "{err}");
    }

    #[tokio::test]
    async fn silent_broker_times_out_handshake() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (sock, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(30)).await;
            drop(sock);
        });

        let mut t = TlsTransport::new()
            .with_timeouts(Duration::from_millis(200), Duration::from_millis(50));
        t.configure_tls(&self_signed(2025, 2030), MID_2026).unwrap();
        t.open("localhost", port).await.unwrap();

        let result = tokio::time::timeout(Duration::from_secs(5), t.handshake())
            .await
            .expect("handshake must give up on its own");
        assert!(
            matches!(result, Err(TlsError::Transport(TransportError::TimedOut(_)))),
            "{result:?}"
        );
        assert!(t.last_error().contains("TLS handshake"));
    }

    #[tokio::test]
    async fn send_before_open_is_not_open() {
        let mut t = TlsTransport::new();
        assert_eq!(t.send(b"x").await, Err(TransportError::NotOpen));
        assert_eq!(t.last_error(), "transport not open");
    }

    #[tokio::test]
    async fn handshake_without_config_fails() {
        let mut t = TlsTransport::new();
        assert_eq!(t.handshake().await, Err(TlsError::NotConfigured));
    }

    #[tokio::test]
    async fn open_refused_port_is_connect_failed() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let mut t = TlsTransport::new();
        let err = t.open("127.0.0.1", port).await.unwrap_err();
        assert!(matches!(err, TransportError::ConnectFailed(_)), "{err}");
        assert!(!t.last_error().is_empty());
        assert!(!t.is_open());
    }

    #[tokio::test]
    async fn open_then_close_is_idempotent() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let mut t = TlsTransport::new();
        t.open("127.0.0.1", port).await.unwrap();
        assert!(t.is_open());
        t.close();
        t.close();
        assert!(!t.is_open());
    }

    #[tokio::test]
    async fn configure_tls_records_clock_error() {
        let mut t = TlsTransport::new();
        let certs = self_signed(2025, 2030);
        let err = t
            .configure_tls(&certs, UnixTimestamp::from_secs(100))
            .unwrap_err();
        assert!(matches!(err, TlsError::ClockInvalid(_)));
        assert!(t.last_error().contains("clock invalid"));
    }

    #[tokio::test]
    async fn handshake_with_closing_peer_fails() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (sock, _) = listener.accept().await.unwrap();
            drop(sock);
        });

        let mut t = TlsTransport::new();
        let certs = self_signed(2025, 2030);
        t.configure_tls(&certs, UnixTimestamp::from_secs(1_748_736_000))
            .unwrap();
        t.open("localhost", port).await.unwrap();
        assert!(t.handshake().await.is_err());
        assert!(!t.last_error().is_empty());
    }
}
