// Codec properties

use proptest::prelude::*;

use kevinbot_mc::protocol::frame::{FrameParser, InboundFrame, encode_response};
use kevinbot_mc::protocol::{CodecError, StatusCode, TransactionValue};

fn sized_unsigned() -> impl Strategy<Value = (u64, u8)> {
    prop_oneof![
        (0u64..=0xFF).prop_map(|v| (v, 1u8)),
        (0u64..=0xFFFF).prop_map(|v| (v, 2u8)),
        (0u64..=0xFFFF_FFFF).prop_map(|v| (v, 4u8)),
    ]
}

proptest! {
    #[test]
    fn test_unsigned_round_trip((value, size) in sized_unsigned()) {
        let encoded = TransactionValue::unsigned(value as i64, size).unwrap();
        let (tag, payload) = encoded.encode().unwrap();
        prop_assert_eq!(payload.len(), size as usize);
        let decoded = TransactionValue::decode(tag, &payload).unwrap();
        prop_assert_eq!(decoded.as_unsigned(), Some(value));
    }

    #[test]
    fn test_unsigned_out_of_range_rejected(size in prop_oneof![Just(1u8), Just(2u8), Just(4u8)], excess in 0u64..1000) {
        let too_big = (1u64 << (8 * size as u32)) + excess;
        prop_assert!(TransactionValue::unsigned(too_big as i64, size).is_err());
    }

    #[test]
    fn test_negative_unsigned_rejected(value in i64::MIN..0) {
        let result = TransactionValue::unsigned(value, 4);
        prop_assert!(
            matches!(result, Err(CodecError::NegativeUnsigned { .. })),
            "negative value {} accepted",
            value
        );
    }

    #[test]
    fn test_float_round_trip(value in any::<f32>().prop_filter("finite", |v| v.is_finite())) {
        let (tag, payload) = TransactionValue::Float(value).encode().unwrap();
        let decoded = TransactionValue::decode(tag, &payload).unwrap();
        prop_assert_eq!(decoded.as_f32(), Some(value));
    }

    #[test]
    fn test_parser_recovers_after_garbage(
        garbage in proptest::collection::vec(0x03u8..=0xFF, 0..32),
        uid in any::<u16>(),
        target in -100.0f32..100.0,
    ) {
        let frame = encode_response(StatusCode::Ok, 0x0005, &TransactionValue::Float(target), uid).unwrap();
        let mut parser = FrameParser::new();
        parser.extend(&garbage);
        parser.extend(&frame);

        let frames = parser.drain_frames();
        prop_assert_eq!(frames.len(), 1);
        match &frames[0] {
            InboundFrame::Response(response) => {
                prop_assert_eq!(response.uid, uid);
                prop_assert_eq!(response.control_word, 0x0005);
            }
            other => prop_assert!(false, "unexpected frame {:?}", other),
        }
        prop_assert_eq!(parser.buffered(), 0);
    }
}

#[test]
fn test_invalid_unsigned_size_rejected() {
    for size in [0u8, 3, 5, 8] {
        assert!(matches!(
            TransactionValue::unsigned(1, size),
            Err(CodecError::InvalidUnsignedSize { .. })
        ));
    }
}
