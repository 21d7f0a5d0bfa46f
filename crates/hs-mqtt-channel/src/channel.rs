//! Publish-side view of the connection.
//!
//! The telemetry scheduler only needs "is there a session" and "send this".
//! `SessionManager` implements it for production, `MockChannel` for tests.

use async_trait::async_trait;

use crate::error::PublishError;
use crate::network::{NetworkLink, TimeSource};
use crate::session::SessionManager;
use crate::transport::Transport;

/// Abstraction for MQTT message publishing.
#[async_trait]
pub trait Channel: Send {
    /// Whether a publish would currently reach the broker.
    fn is_ready(&self) -> bool;

    /// Publish `payload` to `topic`. Fails with `NotConnected` unless ready.
    async fn publish(&mut self, topic: &str, payload: &[u8]) -> Result<(), PublishError>;
}

#[async_trait]
impl<T, N, S> Channel for SessionManager<T, N, S>
where
    T: Transport,
    N: NetworkLink,
    S: TimeSource,
{
    fn is_ready(&self) -> bool {
        SessionManager::is_ready(self)
    }

    async fn publish(&mut self, topic: &str, payload: &[u8]) -> Result<(), PublishError> {
        SessionManager::publish(self, topic, payload).await
    }
}
