// Tests for reading framed packets off a byte stream.
//
// The broker side writes frames in arbitrary chunk sizes; the reader must
// reassemble them regardless of where the chunk boundaries fall.

use std::time::Duration;

use fbns_push::protocol::{encode, ConnAckPacket, Packet, PacketReader, PublishPacket, QoS, Topic};
use fbns_push::PushError;
use tokio::io::AsyncWriteExt;

fn sample_frames() -> (Vec<Packet>, Vec<u8>) {
    let packets = vec![
        Packet::ConnAck(ConnAckPacket {
            ack_flags: 0,
            return_code: 0,
            authentication: br#"{"ck":1,"cs":"pw"}"#.to_vec(),
        }),
        Packet::Publish(PublishPacket::new(
            Topic::RegistrationResponse,
            QoS::AtMostOnce,
            0,
            br#"{"token":"T"}"#.to_vec(),
        )),
        Packet::Publish(PublishPacket::new(
            Topic::Message,
            QoS::AtLeastOnce,
            9,
            "x".repeat(300).into_bytes(),
        )),
        Packet::PingResp,
    ];
    let mut bytes = Vec::new();
    for packet in &packets {
        bytes.extend(encode(packet).expect("encode"));
    }
    (packets, bytes)
}

#[tokio::test]
async fn test_frames_split_across_small_writes() {
    let (expected, bytes) = sample_frames();
    let (client, mut broker) = tokio::io::duplex(8);
    let mut reader = PacketReader::new(client);

    let writer = tokio::spawn(async move {
        for chunk in bytes.chunks(3) {
            broker.write_all(chunk).await.expect("write");
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    });

    for packet in expected {
        assert_eq!(reader.read_packet().await.expect("read"), packet);
    }
    writer.await.expect("writer");
}

#[tokio::test]
async fn test_clean_close_between_frames_is_transient() {
    let (_, bytes) = sample_frames();
    let (client, mut broker) = tokio::io::duplex(4096);
    let mut reader = PacketReader::new(client);
    broker.write_all(&bytes).await.expect("write");
    drop(broker);

    for _ in 0..4 {
        reader.read_packet().await.expect("read");
    }
    let err = reader.read_packet().await.expect_err("closed");
    assert!(matches!(err, PushError::TransientIo(_)));
    assert!(err.triggers_reconnect());
}

#[tokio::test]
async fn test_close_inside_frame_is_malformed() {
    let (_, bytes) = sample_frames();
    let (client, mut broker) = tokio::io::duplex(4096);
    let mut reader = PacketReader::new(client);
    // drop the length byte of the trailing PINGRESP
    broker.write_all(&bytes[..bytes.len() - 1]).await.expect("write");
    drop(broker);

    for _ in 0..3 {
        reader.read_packet().await.expect("read");
    }
    let err = reader.read_packet().await.expect_err("truncated");
    assert!(matches!(err, PushError::MalformedPacket(_)));
}

#[tokio::test]
async fn test_cancelled_reads_lose_nothing() {
    let (expected, bytes) = sample_frames();
    let (client, mut broker) = tokio::io::duplex(8);
    let mut reader = PacketReader::new(client);

    let writer = tokio::spawn(async move {
        for chunk in bytes.chunks(5) {
            broker.write_all(chunk).await.expect("write");
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    });

    let mut received = Vec::new();
    while received.len() < expected.len() {
        // time out often enough that most reads are cancelled mid-frame
        let attempt = tokio::time::timeout(Duration::from_millis(1), reader.read_packet()).await;
        if let Ok(packet) = attempt {
            received.push(packet.expect("read"));
        }
    }
    assert_eq!(received, expected);
    writer.await.expect("writer");
}

#[tokio::test]
async fn test_reader_handed_over_mid_frame() {
    let (expected, bytes) = sample_frames();
    let (client, mut broker) = tokio::io::duplex(4096);
    let mut first = PacketReader::new(client);

    // first frame plus a few bytes of the second
    let split = encode(&expected[0]).expect("encode").len() + 4;
    broker.write_all(&bytes[..split]).await.expect("write");
    assert_eq!(first.read_packet().await.expect("first"), expected[0]);
    let _ = tokio::time::timeout(Duration::from_millis(10), first.read_packet()).await;
    assert!(first.has_partial());

    let (client, pending) = first.into_parts();
    let mut second = PacketReader::with_buffered(client, pending);
    broker.write_all(&bytes[split..]).await.expect("write");
    for packet in &expected[1..] {
        assert_eq!(&second.read_packet().await.expect("read"), packet);
    }
}
