//! Wire framing for push packets.
//!
//! Every packet is a header byte (type in the upper nibble, flags in the
//! lower), a base-128 remaining length of at most four bytes, and a body.
//! Length-prefixed strings and packet ids are big-endian `u16`.
//!
//! [`encode`] and [`decode`] work on complete in-memory frames.
//! [`PacketReader`] buffers an async stream and yields one packet at a time;
//! bytes it has read but not yet decoded stay in its buffer, so a read can be
//! cancelled between packets or mid-frame without losing stream alignment.

use bytes::{Buf, BufMut, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt};

use super::compression::{deflate, inflate};
use super::packet::{packet_type, ConnAckPacket, ConnectPacket, Packet, PublishPacket, QoS, Topic};
use crate::error::PushError;

/// Largest value a four-byte remaining length can carry.
pub const MAX_REMAINING_LENGTH: usize = 268_435_455;

/// Maximum number of remaining-length bytes.
const MAX_LENGTH_BYTES: usize = 4;

/// Encode a packet into a complete frame.
///
/// # Errors
///
/// Returns `PushError::MalformedPacket` if a string field exceeds `u16`
/// length, a PUBLISH requiring a packet id has none, the body exceeds
/// [`MAX_REMAINING_LENGTH`], or payload compression fails.
pub fn encode(packet: &Packet) -> Result<Vec<u8>, PushError> {
    let body = encode_body(packet)?;
    let mut frame = BytesMut::with_capacity(body.len() + 1 + MAX_LENGTH_BYTES);
    frame.put_u8(packet.header_byte());
    encode_remaining_length(body.len(), &mut frame)?;
    frame.put_slice(&body);
    Ok(frame.to_vec())
}

/// Append `len` as a base-128 remaining length.
///
/// # Errors
///
/// Returns `PushError::MalformedPacket` if `len` exceeds [`MAX_REMAINING_LENGTH`].
pub fn encode_remaining_length(mut len: usize, out: &mut BytesMut) -> Result<(), PushError> {
    if len > MAX_REMAINING_LENGTH {
        return Err(PushError::malformed(format!(
            "remaining length {len} exceeds {MAX_REMAINING_LENGTH}"
        )));
    }
    loop {
        let mut byte = (len % 128) as u8;
        len /= 128;
        if len > 0 {
            byte |= 0x80;
        }
        out.put_u8(byte);
        if len == 0 {
            return Ok(());
        }
    }
}

/// Parse a remaining length at the start of `buf`.
///
/// Returns `Ok(None)` if `buf` ends mid-length, otherwise the value and the
/// number of bytes it occupied.
///
/// # Errors
///
/// Returns `PushError::MalformedPacket` if the encoding runs past four bytes.
pub fn decode_remaining_length(buf: &[u8]) -> Result<Option<(usize, usize)>, PushError> {
    let mut length = LengthDecoder::default();
    for (i, &byte) in buf.iter().enumerate() {
        if let Some(value) = length.push(byte)? {
            return Ok(Some((value, i + 1)));
        }
    }
    Ok(None)
}

/// Decode one complete frame.
///
/// # Errors
///
/// Returns `PushError::MalformedPacket` if the declared remaining length does
/// not match the bytes available, or the body does not decode.
pub fn decode(frame: &[u8]) -> Result<Packet, PushError> {
    let (&header, rest) = frame
        .split_first()
        .ok_or_else(|| PushError::malformed("empty frame"))?;
    let (len, consumed) = decode_remaining_length(rest)?
        .ok_or_else(|| PushError::malformed("frame ends inside remaining length"))?;
    let body = &rest[consumed..];
    if body.len() != len {
        return Err(PushError::malformed(format!(
            "remaining length {len} does not match {} available bytes",
            body.len()
        )));
    }
    decode_body(header, body)
}

/// Bytes requested from the stream per read.
const READ_CHUNK: usize = 4096;

/// Buffered packet reader over an async byte stream.
///
/// Cancelling [`read_packet`](Self::read_packet) never drops data: every
/// byte read off the stream is kept until a complete frame is decoded from
/// it. [`into_parts`](Self::into_parts) hands back the stream together with
/// any partial frame so a later reader can pick up where this one stopped.
#[derive(Debug)]
pub struct PacketReader<R> {
    reader: R,
    buf: BytesMut,
}

impl<R> PacketReader<R> {
    /// Wrap `reader` with an empty buffer.
    #[must_use]
    pub fn new(reader: R) -> Self {
        Self::with_buffered(reader, BytesMut::new())
    }

    /// Wrap `reader`, decoding `buffered` before anything read from it.
    #[must_use]
    pub fn with_buffered(reader: R, buffered: BytesMut) -> Self {
        Self {
            reader,
            buf: buffered,
        }
    }

    /// Whether any bytes are buffered that no packet has consumed yet.
    #[must_use]
    pub fn has_partial(&self) -> bool {
        !self.buf.is_empty()
    }

    /// Mutable access to the wrapped stream, e.g. to write on a duplex.
    pub fn get_mut(&mut self) -> &mut R {
        &mut self.reader
    }

    /// Return the stream and the bytes read from it but not yet decoded.
    #[must_use]
    pub fn into_parts(self) -> (R, BytesMut) {
        (self.reader, self.buf)
    }

    /// Split one complete frame off the buffer, if there is one.
    fn next_buffered(&mut self) -> Result<Option<Packet>, PushError> {
        if self.buf.is_empty() {
            return Ok(None);
        }
        let Some((len, consumed)) = decode_remaining_length(&self.buf[1..])? else {
            return Ok(None);
        };
        let total = 1 + consumed + len;
        if self.buf.len() < total {
            self.buf.reserve((total - self.buf.len()).min(READ_CHUNK));
            return Ok(None);
        }
        let frame = self.buf.split_to(total);
        decode_body(frame[0], &frame[1 + consumed..]).map(Some)
    }
}

impl<R: AsyncRead + Unpin> PacketReader<R> {
    /// Read the next packet.
    ///
    /// Cancel safe: if the future is dropped before completing, no packet
    /// has been consumed and the buffered bytes are kept.
    ///
    /// # Errors
    ///
    /// Returns `PushError::TransientIo` if the stream fails or closes between
    /// packets, and `PushError::MalformedPacket` if it closes mid-packet or
    /// the packet does not decode.
    pub async fn read_packet(&mut self) -> Result<Packet, PushError> {
        loop {
            if let Some(packet) = self.next_buffered()? {
                return Ok(packet);
            }
            if self.buf.capacity() == self.buf.len() {
                self.buf.reserve(READ_CHUNK);
            }
            if self.reader.read_buf(&mut self.buf).await? == 0 {
                return Err(if self.has_partial() {
                    PushError::malformed("stream ended mid-packet")
                } else {
                    PushError::TransientIo("connection closed".into())
                });
            }
        }
    }
}

/// Incremental remaining-length parser.
#[derive(Debug, Default)]
struct LengthDecoder {
    value: usize,
    shift: u32,
    count: usize,
}

impl LengthDecoder {
    fn push(&mut self, byte: u8) -> Result<Option<usize>, PushError> {
        self.value |= usize::from(byte & 0x7F) << self.shift;
        self.shift += 7;
        self.count += 1;
        if byte & 0x80 == 0 {
            Ok(Some(self.value))
        } else if self.count == MAX_LENGTH_BYTES {
            Err(PushError::malformed("remaining length longer than 4 bytes"))
        } else {
            Ok(None)
        }
    }
}

fn encode_body(packet: &Packet) -> Result<BytesMut, PushError> {
    let mut body = BytesMut::new();
    match packet {
        Packet::Connect(connect) => {
            put_string(&mut body, &connect.protocol_name)?;
            body.put_u8(connect.protocol_level);
            body.put_u8(connect.connect_flags);
            body.put_u16(connect.keep_alive);
            body.put_slice(&deflate(&connect.payload)?);
        }
        Packet::ConnAck(ack) => {
            body.put_u8(ack.ack_flags);
            body.put_u8(ack.return_code);
            if !ack.authentication.is_empty() {
                put_bytes(&mut body, &ack.authentication)?;
            }
        }
        Packet::Publish(publish) => {
            put_string(&mut body, &publish.topic.wire_name())?;
            if publish.qos.has_packet_id() {
                let id = publish
                    .packet_id
                    .ok_or_else(|| PushError::malformed("PUBLISH with QoS > 0 has no packet id"))?;
                body.put_u16(id);
            }
            body.put_slice(&deflate(&publish.payload)?);
        }
        Packet::PubAck { packet_id } => body.put_u16(*packet_id),
        Packet::PingReq | Packet::PingResp => {}
    }
    Ok(body)
}

fn decode_body(header: u8, mut body: &[u8]) -> Result<Packet, PushError> {
    let flags = header & 0x0F;
    match header >> 4 {
        packet_type::CONNECT => {
            let protocol_name = take_string(&mut body, "protocol name")?;
            let protocol_level = take_u8(&mut body, "protocol level")?;
            let connect_flags = take_u8(&mut body, "connect flags")?;
            let keep_alive = take_u16(&mut body, "keep-alive")?;
            Ok(Packet::Connect(ConnectPacket {
                protocol_name,
                protocol_level,
                connect_flags,
                keep_alive,
                payload: inflate(body)?,
            }))
        }
        packet_type::CONNACK => {
            let ack_flags = take_u8(&mut body, "ack flags")?;
            let return_code = take_u8(&mut body, "return code")?;
            let authentication = if body.has_remaining() {
                take_bytes(&mut body, "authentication")?
            } else {
                Vec::new()
            };
            expect_consumed(body, "CONNACK")?;
            Ok(Packet::ConnAck(ConnAckPacket {
                ack_flags,
                return_code,
                authentication,
            }))
        }
        packet_type::PUBLISH => {
            let qos = QoS::from_bits((flags >> 1) & 0x03)
                .ok_or_else(|| PushError::malformed("PUBLISH with QoS 3"))?;
            let topic = Topic::from_wire(&take_string(&mut body, "topic")?);
            let packet_id = if qos.has_packet_id() {
                Some(take_u16(&mut body, "packet id")?)
            } else {
                None
            };
            Ok(Packet::Publish(PublishPacket {
                topic,
                qos,
                dup: flags & 0x08 != 0,
                retain: flags & 0x01 != 0,
                packet_id,
                payload: inflate(body)?,
            }))
        }
        packet_type::PUBACK => {
            let packet_id = take_u16(&mut body, "packet id")?;
            expect_consumed(body, "PUBACK")?;
            Ok(Packet::PubAck { packet_id })
        }
        packet_type::PINGREQ => {
            expect_consumed(body, "PINGREQ")?;
            Ok(Packet::PingReq)
        }
        packet_type::PINGRESP => {
            expect_consumed(body, "PINGRESP")?;
            Ok(Packet::PingResp)
        }
        other => Err(PushError::malformed(format!("unknown packet type {other}"))),
    }
}

fn put_string(out: &mut BytesMut, value: &str) -> Result<(), PushError> {
    put_bytes(out, value.as_bytes())
}

fn put_bytes(out: &mut BytesMut, value: &[u8]) -> Result<(), PushError> {
    let len = u16::try_from(value.len())
        .map_err(|e| PushError::malformed(format!("field of {} bytes: {e}", value.len())))?;
    out.put_u16(len);
    out.put_slice(value);
    Ok(())
}

fn take_u8(buf: &mut &[u8], what: &str) -> Result<u8, PushError> {
    if buf.remaining() < 1 {
        return Err(PushError::malformed(format!("truncated {what}")));
    }
    Ok(buf.get_u8())
}

fn take_u16(buf: &mut &[u8], what: &str) -> Result<u16, PushError> {
    if buf.remaining() < 2 {
        return Err(PushError::malformed(format!("truncated {what}")));
    }
    Ok(buf.get_u16())
}

fn take_bytes(buf: &mut &[u8], what: &str) -> Result<Vec<u8>, PushError> {
    let len = usize::from(take_u16(buf, what)?);
    if buf.remaining() < len {
        return Err(PushError::malformed(format!("truncated {what}")));
    }
    let value = buf[..len].to_vec();
    buf.advance(len);
    Ok(value)
}

fn take_string(buf: &mut &[u8], what: &str) -> Result<String, PushError> {
    String::from_utf8(take_bytes(buf, what)?)
        .map_err(|e| PushError::malformed(format!("{what} is not UTF-8: {e}")))
}

fn expect_consumed(buf: &[u8], kind: &str) -> Result<(), PushError> {
    if buf.is_empty() {
        Ok(())
    } else {
        Err(PushError::malformed(format!(
            "{kind} has {} unexpected trailing bytes",
            buf.len()
        )))
    }
}
