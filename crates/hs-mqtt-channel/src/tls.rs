//! TLS configuration for mTLS connections to AWS IoT Core.
//!
//! Loads the device certificate, private key and CA certificate (DER, or PEM
//! when the blob starts with a PEM armour line) and builds a rustls client
//! configuration whose certificate-validity clock is anchored at a
//! network-synchronized timestamp rather than the node's own RTC.

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use rustls::ClientConfig;
use rustls::RootCertStore;
use rustls::pki_types::pem::PemObject;
use rustls::pki_types::{CertificateDer, PrivateKeyDer, UnixTime};
use rustls::time_provider::TimeProvider;

use hs_protocol::UnixTimestamp;

use crate::error::{CertificateError, TlsError, TlsResult};

/// The three blobs needed for a mutually-authenticated handshake.
#[derive(Clone, PartialEq, Eq)]
pub struct CertificateSet {
    pub device_cert: Vec<u8>,
    pub private_key: Vec<u8>,
    pub ca_cert: Vec<u8>,
}

impl std::fmt::Debug for CertificateSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CertificateSet")
            .field("device_cert", &format_args!("{} bytes", self.device_cert.len()))
            .field("private_key", &"<redacted>")
            .field("ca_cert", &format_args!("{} bytes", self.ca_cert.len()))
            .finish()
    }
}

impl CertificateSet {
    /// Read all three blobs from disk. Any missing or empty file is an error.
    pub fn load(
        device_cert: impl AsRef<Path>,
        private_key: impl AsRef<Path>,
        ca_cert: impl AsRef<Path>,
    ) -> Result<Self, CertificateError> {
        Ok(Self {
            device_cert: read_blob("device certificate", device_cert.as_ref())?,
            private_key: read_blob("private key", private_key.as_ref())?,
            ca_cert: read_blob("CA certificate", ca_cert.as_ref())?,
        })
    }
}

fn read_blob(what: &'static str, path: &Path) -> Result<Vec<u8>, CertificateError> {
    let bytes = std::fs::read(path).map_err(|source| CertificateError::Read {
        what,
        path: path.display().to_string(),
        source,
    })?;
    if bytes.is_empty() {
        return Err(CertificateError::Empty {
            what,
            path: path.display().to_string(),
        });
    }
    tracing::info!(what, path = %path.display(), len = bytes.len(), "loaded");
    Ok(bytes)
}

// ── Synchronized time ────────────────────────────────────────

/// rustls time provider anchored at a network time sample.
///
/// Reports `synced + elapsed-since-sample`, so validity checks during a
/// handshake use network time advanced by the monotonic clock.
#[derive(Debug)]
pub struct SyncedTime {
    synced: UnixTimestamp,
    sampled_at: Instant,
}

impl SyncedTime {
    pub fn new(synced: UnixTimestamp) -> Self {
        Self {
            synced,
            sampled_at: Instant::now(),
        }
    }
}

impl TimeProvider for SyncedTime {
    fn current_time(&self) -> Option<UnixTime> {
        let base = u64::try_from(self.synced.as_secs()).ok()?;
        Some(UnixTime::since_unix_epoch(
            Duration::from_secs(base) + self.sampled_at.elapsed(),
        ))
    }
}

// ── Parsing ──────────────────────────────────────────────────

fn is_pem(blob: &[u8]) -> bool {
    blob.trim_ascii_start().starts_with(b"-----BEGIN")
}

fn parse_certs(what: &str, blob: &[u8]) -> TlsResult<Vec<CertificateDer<'static>>> {
    if is_pem(blob) {
        let certs = CertificateDer::pem_slice_iter(blob)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| TlsError::CertRejected(format!("{what}: {e}")))?;
        if certs.is_empty() {
            return Err(TlsError::CertRejected(format!("{what}: no certificates in PEM")));
        }
        Ok(certs)
    } else {
        Ok(vec![CertificateDer::from(blob.to_vec())])
    }
}

fn parse_key(blob: &[u8]) -> TlsResult<PrivateKeyDer<'static>> {
    if is_pem(blob) {
        PrivateKeyDer::from_pem_slice(blob).map_err(|e| TlsError::KeyInvalid(e.to_string()))
    } else {
        PrivateKeyDer::try_from(blob.to_vec()).map_err(|e| TlsError::KeyInvalid(e.to_string()))
    }
}

/// Check that `cert` is inside its validity window at `now`.
pub fn check_validity(what: &str, cert: &CertificateDer<'_>, now: UnixTimestamp) -> TlsResult<()> {
    let (_, parsed) = x509_parser::parse_x509_certificate(cert.as_ref())
        .map_err(|e| TlsError::CertRejected(format!("{what}: unparseable X.509: {e}")))?;

    let validity = parsed.validity();
    let not_before = validity.not_before.timestamp();
    let not_after = validity.not_after.timestamp();

    if now.as_secs() < not_before {
        return Err(TlsError::CertRejected(format!(
            "{what} not yet valid (not_before: {}, now: {now})",
            validity.not_before
        )));
    }
    if now.as_secs() > not_after {
        return Err(TlsError::CertRejected(format!(
            "{what} expired (not_after: {}, now: {now})",
            validity.not_after
        )));
    }
    Ok(())
}

/// Build a client configuration for mutual TLS against the broker.
///
/// Fails with `ClockInvalid` when `now` is not a plausible network time,
/// `CertRejected` when the device or CA certificate is unparseable or outside
/// its validity window at `now`, and `KeyInvalid` when the key does not parse
/// or does not match the certificate.
pub fn build_client_config(certs: &CertificateSet, now: UnixTimestamp) -> TlsResult<ClientConfig> {
    if !now.is_plausible() {
        return Err(TlsError::ClockInvalid(format!(
            "{now} predates the minimum valid epoch"
        )));
    }

    let chain = parse_certs("device certificate", &certs.device_cert)?;
    check_validity("device certificate", &chain[0], now)?;

    let mut roots = RootCertStore::empty();
    for ca in parse_certs("CA certificate", &certs.ca_cert)? {
        check_validity("CA certificate", &ca, now)?;
        roots
            .add(ca)
            .map_err(|e| TlsError::CertRejected(format!("CA certificate: {e}")))?;
    }

    let key = parse_key(&certs.private_key)?;

    let provider = Arc::new(rustls::crypto::ring::default_provider());
    ClientConfig::builder_with_details(provider, Arc::new(SyncedTime::new(now)))
        .with_safe_default_protocol_versions()
        .map_err(|e| TlsError::CertRejected(format!("protocol versions: {e}")))?
        .with_root_certificates(roots)
        .with_client_auth_cert(chain, key)
        .map_err(|e| TlsError::KeyInvalid(e.to_string()))
}
