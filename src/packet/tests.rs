//! Packet serialization and deserialization tests.
use super::codec::Codec;
use super::{Flow, Packet};
use crate::config::CodecConfig;
use crate::error::Error;
use bytes::Bytes;

fn codec() -> Codec {
    Codec::new(&CodecConfig::default())
}

fn packet_roundtrip_test(packet: Packet) {
    let codec = codec();
    let frame = codec.encode(&packet).expect("encode should succeed");
    let mut decoder = codec.decoder();
    let decoded = decoder.decode(&frame).expect("decode should succeed");
    assert_eq!(decoded, vec![packet]);
    assert_eq!(decoder.buffered(), 0, "decode should consume the frame");
}

#[test]
fn test_heartbeat_roundtrip_is_byte_exact() {
    let codec = codec();
    let frame = codec
        .encode(&Packet::new_heartbeat(100))
        .expect("encode should succeed");

    // 4-byte length == 4, then the 4-byte value, all big-endian.
    assert_eq!(frame.as_ref(), &[0, 0, 0, 4, 0, 0, 0, 100]);

    let mut decoder = codec.decoder();
    let decoded = decoder.decode(&frame).expect("decode should succeed");
    assert_eq!(decoded, vec![Packet::Heartbeat { value: 100 }]);
}

#[test]
fn test_message_roundtrip() {
    packet_roundtrip_test(Packet::new_message(
        "msg-42",
        Flow::Request,
        true,
        Bytes::from_static(b"hello world"),
    ));
}

#[test]
fn test_command_roundtrip() {
    packet_roundtrip_test(Packet::new_command(
        "cmd-7",
        Flow::Response,
        false,
        Bytes::from_static(b"login"),
    ));
}

#[test]
fn test_empty_body_roundtrip() {
    packet_roundtrip_test(Packet::new_message("m", Flow::Request, false, Bytes::new()));
}

#[test]
fn test_frame_split_across_reads() {
    let codec = codec();
    let packet = Packet::new_message(
        "split-msg",
        Flow::Request,
        true,
        Bytes::from_static(b"partial delivery"),
    );
    let frame = codec.encode(&packet).expect("encode should succeed");

    // Split inside the length prefix, then inside the payload.
    // 在长度前缀内部切一刀，再在载荷内部切一刀。
    let mut decoder = codec.decoder();
    assert!(
        decoder
            .decode(&frame[..2])
            .expect("partial prefix is not an error")
            .is_empty()
    );
    assert!(
        decoder
            .decode(&frame[2..10])
            .expect("partial payload is not an error")
            .is_empty()
    );
    let decoded = decoder
        .decode(&frame[10..])
        .expect("final chunk completes the frame");
    assert_eq!(decoded, vec![packet]);
}

#[test]
fn test_multiple_frames_in_one_read() {
    let codec = codec();
    let first = Packet::new_heartbeat(7);
    let second = Packet::new_message("a", Flow::Request, false, Bytes::from_static(b"x"));

    let mut wire = Vec::new();
    wire.extend_from_slice(&codec.encode(&first).expect("encode"));
    wire.extend_from_slice(&codec.encode(&second).expect("encode"));

    let mut decoder = codec.decoder();
    let decoded = decoder.decode(&wire).expect("decode should succeed");
    assert_eq!(decoded, vec![first, second]);
}

#[test]
fn test_undersized_length_is_rejected() {
    let codec = codec();
    let mut decoder = codec.decoder();
    // Declared length 3 is below the minimum payload of 4 bytes.
    let result = decoder.decode(&[0, 0, 0, 3, 1, 2, 3]);
    assert!(matches!(result, Err(Error::InvalidFrame)));
}

#[test]
fn test_oversized_length_is_rejected() {
    let codec = Codec::new(&CodecConfig {
        max_frame_size: 16,
    });
    let mut decoder = codec.decoder();
    let result = decoder.decode(&[0, 0, 1, 0]);
    assert!(matches!(result, Err(Error::FrameTooLarge { .. })));
}

#[test]
fn test_truncated_stream_is_detected_at_eof() {
    let codec = codec();
    let mut decoder = codec.decoder();
    decoder
        .decode(&[0, 0, 0, 10, 1, 2])
        .expect("incomplete frame is buffered");
    assert!(matches!(decoder.finish(), Err(Error::InvalidFrame)));
}

#[test]
fn test_empty_id_is_rejected_on_encode() {
    let codec = codec();
    let packet = Packet::new_message("", Flow::Request, true, Bytes::from_static(b"body"));
    assert!(matches!(codec.encode(&packet), Err(Error::InvalidPacket)));
}

#[test]
fn test_garbage_envelope_is_rejected() {
    let codec = codec();
    let mut decoder = codec.decoder();
    // Length 6, unknown kind byte 0xFF.
    let result = decoder.decode(&[0, 0, 0, 6, 0xFF, 0, 0, 0, 1, b'x']);
    assert!(matches!(result, Err(Error::InvalidFrame)));
}
