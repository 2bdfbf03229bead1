//! Property-based tests using proptest
//!
//! These tests validate codec and framing invariants across a wide range of
//! randomly generated messages and byte strings.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use bytes::BytesMut;
use proptest::prelude::*;
use serde_json::{Map, Value};
use tokio_util::codec::Decoder;
use torpedo_msg::core::codec::{frame_body, HEADER_SIZE};
use torpedo_msg::{pack_frame, Codec, FrameCodec, SerializationFormat, PACKET_SIZE_LIMIT};

fn arb_message() -> impl Strategy<Value = Value> {
    let leaf = prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        any::<i64>().prop_map(Value::from),
        any::<u64>().prop_map(Value::from),
        (-1_000_000i32..1_000_000).prop_map(|n| Value::from(f64::from(n) + 0.5)),
        ".{0,24}".prop_map(Value::String),
    ];
    leaf.prop_recursive(4, 64, 8, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..8).prop_map(Value::Array),
            prop::collection::btree_map(".{0,12}", inner, 0..8)
                .prop_map(|m| Value::Object(m.into_iter().collect::<Map<_, _>>())),
        ]
    })
}

fn arb_format() -> impl Strategy<Value = SerializationFormat> {
    prop_oneof![
        Just(SerializationFormat::MessagePack),
        Just(SerializationFormat::Json),
    ]
}

// Property: decode(encode(m)) == m for every representable message
proptest! {
    #[test]
    fn prop_message_roundtrip(msg in arb_message(), format in arb_format()) {
        let codec = Codec::new(format);
        let body = codec.encode(&msg).expect("encode should not fail");
        let decoded = codec.decode(&body).expect("decode should not fail");
        prop_assert_eq!(decoded, msg);
    }
}

// Property: a frame is exactly the 4-byte length plus the body
proptest! {
    #[test]
    fn prop_frame_length_prefix(body in prop::collection::vec(any::<u8>(), 0..4096)) {
        let frame = frame_body(&body).expect("small bodies always frame");
        prop_assert_eq!(frame.len(), HEADER_SIZE + body.len());
        prop_assert_eq!(&frame[..HEADER_SIZE], &(body.len() as u32).to_be_bytes()[..]);
        prop_assert_eq!(&frame[HEADER_SIZE..], &body[..]);
    }
}

// Property: a stream of frames split at arbitrary points decodes to the same messages
proptest! {
    #[test]
    fn prop_stream_reassembly(
        msgs in prop::collection::vec(arb_message(), 1..6),
        chunk in 1usize..64,
    ) {
        let codec = Codec::default();
        let mut wire = Vec::new();
        for msg in &msgs {
            wire.extend_from_slice(&pack_frame(&codec, msg).unwrap());
        }

        let mut decoder = FrameCodec;
        let mut buf = BytesMut::new();
        let mut decoded = Vec::new();
        for piece in wire.chunks(chunk) {
            buf.extend_from_slice(piece);
            while let Some(body) = decoder.decode(&mut buf).unwrap() {
                decoded.push(codec.decode(&body).unwrap());
            }
        }

        prop_assert!(buf.is_empty());
        prop_assert_eq!(decoded, msgs);
    }
}

// Property: any header announcing a body at or beyond the limit is rejected
proptest! {
    #[test]
    fn prop_oversize_header_rejected(len in (PACKET_SIZE_LIMIT as u32)..=u32::MAX) {
        let mut buf = BytesMut::from(&len.to_be_bytes()[..]);
        prop_assert!(FrameCodec.decode(&mut buf).is_err());
    }
}

// Property: arbitrary bytes never panic the decoder
proptest! {
    #[test]
    fn prop_decoder_never_panics(data in prop::collection::vec(any::<u8>(), 0..2048)) {
        let mut buf = BytesMut::from(&data[..]);
        let _ = FrameCodec.decode(&mut buf);
        let _ = Codec::default().decode(&data);
        let _ = Codec::new(SerializationFormat::Json).decode(&data);
    }
}
