//! Typed representations of the six wire packet kinds.
//!
//! Packets are immutable values created at encode/decode boundaries. PUBLISH
//! and CONNECT payloads are held inflated here; the codec deflates them on
//! the way out and inflates them on the way in.

use std::borrow::Cow;

use crate::constants::{CONNECT_FLAGS, KEEP_ALIVE_SECS, PROTOCOL_LEVEL, PROTOCOL_NAME};

/// Packet type codes (upper nibble of the header byte).
pub mod packet_type {
    /// Client connection request.
    pub const CONNECT: u8 = 1;
    /// Connection acknowledgment.
    pub const CONNACK: u8 = 2;
    /// Publish message.
    pub const PUBLISH: u8 = 3;
    /// Publish acknowledgment.
    pub const PUBACK: u8 = 4;
    /// Ping request.
    pub const PINGREQ: u8 = 12;
    /// Ping response.
    pub const PINGRESP: u8 = 13;
}

/// The reusable keep-alive ping. Carries no state, safe to share across sends.
pub const PING_REQUEST: Packet = Packet::PingReq;

/// Delivery guarantee of a PUBLISH.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum QoS {
    /// Fire and forget, no packet id.
    #[default]
    AtMostOnce = 0,
    /// Acknowledged with PUBACK.
    AtLeastOnce = 1,
    /// Accepted on the wire, acknowledged like at-least-once.
    ExactlyOnce = 2,
}

impl QoS {
    /// Parse the two QoS bits of a PUBLISH header.
    pub fn from_bits(bits: u8) -> Option<Self> {
        match bits {
            0 => Some(Self::AtMostOnce),
            1 => Some(Self::AtLeastOnce),
            2 => Some(Self::ExactlyOnce),
            _ => None,
        }
    }

    /// Whether packets at this level carry a packet id.
    #[must_use]
    pub fn has_packet_id(self) -> bool {
        self != Self::AtMostOnce
    }
}

/// Broker topics. The wire carries the numeric code as a short string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Topic {
    /// Notification delivery (`76`, `/fbns_msg`).
    Message,
    /// Client registration request (`79`, `/fbns_reg_req`).
    RegistrationRequest,
    /// Broker registration response (`80`, `/fbns_reg_resp`).
    RegistrationResponse,
    /// Any other topic. Decoded so it can be logged and ignored.
    Other(String),
}

impl Topic {
    /// Numeric topic code for the known topics.
    #[must_use]
    pub fn code(&self) -> Option<u16> {
        match self {
            Self::Message => Some(76),
            Self::RegistrationRequest => Some(79),
            Self::RegistrationResponse => Some(80),
            Self::Other(_) => None,
        }
    }

    /// Topic string as written on the wire.
    #[must_use]
    pub fn wire_name(&self) -> Cow<'_, str> {
        match self {
            Self::Other(name) => Cow::Borrowed(name.as_str()),
            known => Cow::Owned(known.code().unwrap_or_default().to_string()),
        }
    }

    /// Map a wire topic string, accepting both numeric codes and legacy names.
    #[must_use]
    pub fn from_wire(name: &str) -> Self {
        match name {
            "76" | "/fbns_msg" => Self::Message,
            "79" | "/fbns_reg_req" => Self::RegistrationRequest,
            "80" | "/fbns_reg_resp" => Self::RegistrationResponse,
            other => Self::Other(other.to_string()),
        }
    }
}

impl std::fmt::Display for Topic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.wire_name())
    }
}

/// CONNECT variable header plus the opaque connection payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectPacket {
    /// Protocol name (`MQTToT`).
    pub protocol_name: String,
    /// Protocol level.
    pub protocol_level: u8,
    /// Connect flags byte.
    pub connect_flags: u8,
    /// Keep-alive interval in seconds.
    pub keep_alive: u16,
    /// Serialized connection parameters (inflated).
    pub payload: Vec<u8>,
}

impl ConnectPacket {
    /// CONNECT with the service's fixed header values.
    #[must_use]
    pub fn with_payload(payload: Vec<u8>) -> Self {
        Self {
            protocol_name: PROTOCOL_NAME.to_string(),
            protocol_level: PROTOCOL_LEVEL,
            connect_flags: CONNECT_FLAGS,
            keep_alive: KEEP_ALIVE_SECS,
            payload,
        }
    }
}

/// CONNACK: status plus the broker-issued authentication blob.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ConnAckPacket {
    /// Acknowledge flags (bit 0 = session present).
    pub ack_flags: u8,
    /// Return code; zero means accepted.
    pub return_code: u8,
    /// Authentication blob, empty when the broker sent none.
    pub authentication: Vec<u8>,
}

impl ConnAckPacket {
    /// Whether the broker accepted the connection.
    #[must_use]
    pub fn is_accepted(&self) -> bool {
        self.return_code == 0
    }
}

/// PUBLISH carrying a JSON payload on one of the broker topics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishPacket {
    /// Destination topic.
    pub topic: Topic,
    /// Delivery guarantee.
    pub qos: QoS,
    /// Duplicate delivery flag.
    pub dup: bool,
    /// Retain flag.
    pub retain: bool,
    /// Packet id, present iff `qos` requires acknowledgment.
    pub packet_id: Option<u16>,
    /// JSON payload (inflated).
    pub payload: Vec<u8>,
}

impl PublishPacket {
    /// Build a PUBLISH. `packet_id` is dropped for at-most-once delivery.
    #[must_use]
    pub fn new(topic: Topic, qos: QoS, packet_id: u16, payload: Vec<u8>) -> Self {
        Self {
            topic,
            qos,
            dup: false,
            retain: false,
            packet_id: qos.has_packet_id().then_some(packet_id),
            payload,
        }
    }

    /// Header flags nibble: dup, qos, retain.
    #[must_use]
    pub fn flags(&self) -> u8 {
        (u8::from(self.dup) << 3) | ((self.qos as u8) << 1) | u8::from(self.retain)
    }
}

/// A decoded packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
    /// Client connection request.
    Connect(ConnectPacket),
    /// Connection acknowledgment.
    ConnAck(ConnAckPacket),
    /// Publish.
    Publish(PublishPacket),
    /// Publish acknowledgment.
    PubAck {
        /// Id of the acknowledged PUBLISH.
        packet_id: u16,
    },
    /// Ping request.
    PingReq,
    /// Ping response.
    PingResp,
}

impl Packet {
    /// Packet type code.
    #[must_use]
    pub fn packet_type(&self) -> u8 {
        match self {
            Self::Connect(_) => packet_type::CONNECT,
            Self::ConnAck(_) => packet_type::CONNACK,
            Self::Publish(_) => packet_type::PUBLISH,
            Self::PubAck { .. } => packet_type::PUBACK,
            Self::PingReq => packet_type::PINGREQ,
            Self::PingResp => packet_type::PINGRESP,
        }
    }

    /// First header byte: type in the upper nibble, flags in the lower.
    #[must_use]
    pub fn header_byte(&self) -> u8 {
        let flags = match self {
            Self::Publish(publish) => publish.flags(),
            _ => 0,
        };
        (self.packet_type() << 4) | flags
    }

    /// PUBACK answering `publish`, if it needs one.
    #[must_use]
    pub fn ack_for(publish: &PublishPacket) -> Option<Self> {
        publish.packet_id.map(|packet_id| Self::PubAck { packet_id })
    }

    /// Short name for logging.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Connect(_) => "CONNECT",
            Self::ConnAck(_) => "CONNACK",
            Self::Publish(_) => "PUBLISH",
            Self::PubAck { .. } => "PUBACK",
            Self::PingReq => "PINGREQ",
            Self::PingResp => "PINGRESP",
        }
    }
}
