//! MQTT 3.1.1 framing over a byte transport.
//!
//! Packet encoding and decoding come from rumqttc's v4 packet types; this
//! module only buffers partial reads and names the packets the node sends.

use bytes::BytesMut;
use rumqttc::mqttbytes::Error as FrameError;
use rumqttc::mqttbytes::v4;
use rumqttc::{ConnectReturnCode, Packet, QoS};

use crate::error::SessionError;

/// Upper bound for a single inbound or outbound packet. Matches the AWS IoT
/// Core message size limit, so shadow `/documents` messages still frame.
pub const MAX_PACKET_SIZE: usize = 128 * 1024;

/// Fixed two-byte PINGREQ frame.
pub const PINGREQ: [u8; 2] = [0xC0, 0x00];
/// Fixed two-byte DISCONNECT frame.
pub const DISCONNECT: [u8; 2] = [0xE0, 0x00];

/// Broker-reported CONNACK status as a numeric code and description.
pub fn describe_return_code(code: ConnectReturnCode) -> (u8, &'static str) {
    match code {
        ConnectReturnCode::Success => (0, "accepted"),
        ConnectReturnCode::RefusedProtocolVersion => (1, "unacceptable protocol version"),
        ConnectReturnCode::BadClientId => (2, "identifier rejected"),
        ConnectReturnCode::ServiceUnavailable => (3, "server unavailable"),
        ConnectReturnCode::BadUserNamePassword => (4, "bad user name or password"),
        ConnectReturnCode::NotAuthorized => (5, "not authorized"),
    }
}

pub fn connect(client_id: &str, keepalive_secs: u16) -> Packet {
    let mut connect = rumqttc::Connect::new(client_id);
    connect.keep_alive = keepalive_secs;
    connect.clean_session = true;
    Packet::Connect(connect)
}

pub fn publish(topic: &str, payload: &[u8]) -> Packet {
    Packet::Publish(rumqttc::Publish::new(topic, QoS::AtMostOnce, payload.to_vec()))
}

pub fn subscribe(filter: &str, pkid: u16) -> Packet {
    let mut subscribe = rumqttc::Subscribe::new(filter, QoS::AtMostOnce);
    subscribe.pkid = pkid;
    Packet::Subscribe(subscribe)
}

/// Serialize one packet into a fresh buffer.
///
/// Only the packets the node originates are encodable; PINGREQ and
/// DISCONNECT go out as their fixed frames.
pub fn encode(packet: &Packet) -> Result<Vec<u8>, SessionError> {
    let mut buf = BytesMut::with_capacity(128);
    let written = match packet {
        Packet::Connect(connect) => connect.write(&mut buf),
        Packet::Publish(publish) => publish.write(&mut buf),
        Packet::Subscribe(subscribe) => subscribe.write(&mut buf),
        other => {
            return Err(SessionError::Framing(format!(
                "cannot encode outbound {other:?}"
            )));
        }
    }
    .map_err(|e| SessionError::Framing(e.to_string()))?;

    if written > MAX_PACKET_SIZE {
        return Err(SessionError::Framing(format!(
            "packet is {written} bytes, maximum is {MAX_PACKET_SIZE}"
        )));
    }
    Ok(buf.to_vec())
}

/// Accumulates transport reads and yields whole packets.
#[derive(Debug, Default)]
pub struct FrameReader {
    buf: BytesMut,
}

impl FrameReader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn extend(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Next complete packet, `Ok(None)` if more bytes are needed.
    pub fn next_packet(&mut self) -> Result<Option<Packet>, SessionError> {
        if self.buf.is_empty() {
            return Ok(None);
        }
        match v4::read(&mut self.buf, MAX_PACKET_SIZE) {
            Ok(packet) => Ok(Some(packet)),
            Err(FrameError::InsufficientBytes(_)) => Ok(None),
            Err(e) => Err(SessionError::Framing(e.to_string())),
        }
    }

    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    pub fn clear(&mut self) {
        self.buf.clear();
    }
}
