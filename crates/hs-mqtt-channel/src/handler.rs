//! Incoming message classification.
//!
//! The node does not act on inbound messages; it classifies shadow
//! responses so they can be logged with useful fields, and logs anything
//! else as topic + payload.

use serde::Deserialize;

use hs_protocol::topics;

/// A raw PUBLISH received from the broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: Vec<u8>,
}

/// A classified incoming message.
#[derive(Debug, Clone, PartialEq)]
pub enum IncomingMessage {
    /// Desired state diverged from reported.
    ShadowDelta {
        thing: String,
        version: Option<u64>,
        state: serde_json::Value,
    },
    /// An update was applied.
    ShadowAccepted { thing: String, version: Option<u64> },
    /// An update was refused.
    ShadowRejected {
        thing: String,
        code: Option<u16>,
        message: String,
    },
    /// Before/after documents for an applied update.
    ShadowDocuments { thing: String },
    /// Unrecognized topic or payload.
    Unknown { topic: String, payload: Vec<u8> },
}

#[derive(Deserialize)]
struct DeltaBody {
    version: Option<u64>,
    #[serde(default)]
    state: serde_json::Value,
}

#[derive(Deserialize)]
struct AcceptedBody {
    version: Option<u64>,
}

#[derive(Deserialize)]
struct RejectedBody {
    code: Option<u16>,
    #[serde(default)]
    message: String,
}

/// Classify a raw inbound message by shadow topic and payload shape.
pub fn classify(msg: &InboundMessage) -> IncomingMessage {
    let unknown = || IncomingMessage::Unknown {
        topic: msg.topic.clone(),
        payload: msg.payload.clone(),
    };

    let Some(parsed) = topics::parse_shadow_topic(&msg.topic) else {
        return unknown();
    };

    match (parsed.operation.as_str(), parsed.response.as_deref()) {
        ("update", Some("delta")) => match serde_json::from_slice::<DeltaBody>(&msg.payload) {
            Ok(body) => IncomingMessage::ShadowDelta {
                thing: parsed.thing,
                version: body.version,
                state: body.state,
            },
            Err(_) => unknown(),
        },
        ("update", Some("accepted")) => {
            match serde_json::from_slice::<AcceptedBody>(&msg.payload) {
                Ok(body) => IncomingMessage::ShadowAccepted {
                    thing: parsed.thing,
                    version: body.version,
                },
                Err(_) => unknown(),
            }
        }
        (_, Some("rejected")) => match serde_json::from_slice::<RejectedBody>(&msg.payload) {
            Ok(body) => IncomingMessage::ShadowRejected {
                thing: parsed.thing,
                code: body.code,
                message: body.message,
            },
            Err(_) => unknown(),
        },
        ("update", Some("documents")) => IncomingMessage::ShadowDocuments {
            thing: parsed.thing,
        },
        _ => unknown(),
    }
}

/// Emit the operator-visible log line for an inbound message.
pub fn log_message(msg: &InboundMessage) {
    match classify(msg) {
        IncomingMessage::ShadowDelta {
            thing,
            version,
            state,
        } => {
            tracing::info!(thing = %thing, version = ?version, state = %state, "shadow delta received");
        }
        IncomingMessage::ShadowAccepted { thing, version } => {
            tracing::debug!(thing = %thing, version = ?version, "shadow update accepted");
        }
        IncomingMessage::ShadowRejected {
            thing,
            code,
            message,
        } => {
            tracing::warn!(thing = %thing, code = ?code, message = %message, "shadow update rejected");
        }
        IncomingMessage::ShadowDocuments { thing } => {
            tracing::debug!(thing = %thing, "shadow documents received");
        }
        IncomingMessage::Unknown { topic, payload } => {
            tracing::info!(
                topic = %topic,
                payload = %String::from_utf8_lossy(&payload),
                "message arrived"
            );
        }
    }
}
