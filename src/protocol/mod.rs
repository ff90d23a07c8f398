//! Broker wire protocol.
//!
//! A compact subset of MQTT 3.1: CONNECT/CONNACK, PUBLISH/PUBACK and
//! PINGREQ/PINGRESP. PUBLISH and CONNECT payloads are zlib-compressed on the
//! wire; the CONNECT payload is a Thrift compact struct.
//!
//! - [`packet`]: typed packets
//! - [`codec`]: framing, remaining-length varints, stream reader
//! - [`compression`]: zlib deflate/inflate
//! - [`thrift`] and [`connect_payload`]: the CONNECT payload

pub mod codec;
pub mod compression;
pub mod connect_payload;
pub mod packet;
pub mod thrift;

pub use codec::{decode, encode, PacketReader};
pub use connect_payload::ConnectParams;
pub use packet::{ConnAckPacket, ConnectPacket, Packet, PublishPacket, QoS, Topic, PING_REQUEST};
