//! Connectivity for the HumiSense sensor node.
//!
//! - `Transport` trait with `TlsTransport` (tokio TCP + rustls mTLS)
//! - `SessionManager`, the reconnect state machine from network attach to a
//!   live MQTT session
//! - `Channel` trait for publishing (mockable in tests)
//! - `IncomingMessage` classification for logging shadow responses

pub mod channel;
pub mod clock;
pub mod codec;
pub mod config;
pub mod error;
pub mod handler;
pub mod mock;
pub mod network;
pub mod session;
pub mod tls;
pub mod transport;

// Re-exports for convenience.
pub use channel::Channel;
pub use clock::{Clock, TokioClock};
pub use config::{MAX_PAYLOAD_BYTES, SessionConfig};
pub use error::{CertificateError, PublishError, SessionError, TlsError, TransportError};
pub use handler::{InboundMessage, IncomingMessage, classify, log_message};
pub use mock::{ManualClock, MockChannel, MockNetwork, MockTimeSource, MockTransport};
pub use network::{HostNetwork, NetworkLink, SntpTimeSource, TimeSource};
pub use session::{ConnectionState, SessionManager, SessionStats};
pub use tls::CertificateSet;
pub use transport::{TlsTransport, Transport};
