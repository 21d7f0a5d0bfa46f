//! Connectivity error types.
//!
//! Transport and TLS failures are absorbed by the session manager's
//! reconnect loop. Only `PublishError` crosses into the telemetry side.

use thiserror::Error;

/// Socket-level failures of the transport session.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("network unreachable: {0}")]
    NetworkUnreachable(String),

    #[error("connect failed: {0}")]
    ConnectFailed(String),

    #[error("connection closed by peer")]
    Closed,

    #[error("transport not open")]
    NotOpen,

    #[error("timed out: {0}")]
    TimedOut(String),

    #[error("I/O error: {0}")]
    Io(String),
}

/// Failures while configuring or negotiating the mutually-authenticated TLS link.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TlsError {
    #[error("clock invalid for certificate validation: {0}")]
    ClockInvalid(String),

    #[error("certificate rejected: {0}")]
    CertRejected(String),

    #[error("private key invalid: {0}")]
    KeyInvalid(String),

    #[error("peer rejected handshake: {0}")]
    PeerRejected(String),

    #[error("TLS context not configured")]
    NotConfigured,

    #[error("TLS transport error: {0}")]
    Transport(#[from] TransportError),
}

/// Missing or unreadable certificate material.
#[derive(Debug, Error)]
pub enum CertificateError {
    #[error("failed to read {what} '{path}': {source}")]
    Read {
        what: &'static str,
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{what} '{path}' is empty")]
    Empty { what: &'static str, path: String },
}

/// Failures establishing the MQTT session on top of an open TLS link.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("broker refused connection: rc={code} ({reason})")]
    Refused { code: u8, reason: &'static str },

    #[error("no CONNACK within {timeout_ms}ms")]
    ConnAckTimeout { timeout_ms: u64 },

    #[error("unexpected packet while waiting for CONNACK: {0}")]
    UnexpectedPacket(String),

    #[error("MQTT framing error: {0}")]
    Framing(String),

    #[error("session transport error: {0}")]
    Transport(#[from] TransportError),
}

/// Outbound publish failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PublishError {
    #[error("not connected")]
    NotConnected,

    #[error("payload is {len} bytes, maximum is {max}")]
    PayloadTooLarge { len: usize, max: usize },

    #[error("encode error: {0}")]
    Encode(String),

    #[error("publish transport error: {0}")]
    Transport(#[from] TransportError),
}

/// Convenience alias for transport results.
pub type TransportResult<T> = Result<T, TransportError>;

/// Convenience alias for TLS results.
pub type TlsResult<T> = Result<T, TlsError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn refused_reports_numeric_code() {
        let err = SessionError::Refused {
            code: 5,
            reason: "not authorized",
        };
        assert_eq!(
            err.to_string(),
            "broker refused connection: rc=5 (not authorized)"
        );
    }

    #[test]
    fn transport_error_lifts_into_tls_error() {
        let err: TlsError = TransportError::Closed.into();
        assert_eq!(err, TlsError::Transport(TransportError::Closed));
    }
}
