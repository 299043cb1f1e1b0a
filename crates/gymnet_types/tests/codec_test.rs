//! Integration tests for the envelope codec
//!
//! Checks the public codec surface as the framework uses it: the example observation and
//! action envelopes under both wire formats, the rejection paths a peer can trigger, and
//! round trips of arbitrary value trees.

use gymnet_types::prelude::*;
use proptest::prelude::*;

fn example_request() -> Request {
    let observation = Value::dict_from([(
        "example_obskey",
        Value::from_values((0..10).map(f64::from)),
    )])
    .unwrap();
    Request::new(1, observation, Value::from_values([1.0]))
}

fn example_reply() -> Reply {
    Reply::new(Value::dict_from([("example_action", Value::from_values([0.5, -0.5]))]).unwrap())
}

fn duplicate_key_reply() -> Reply {
    Reply::new(Value::Dict(vec![
        DictItem::new("example_action", Value::scalar(1.0)),
        DictItem::new("example_action", Value::scalar(2.0)),
    ]))
}

#[cfg(test)]
mod wire_format_tests {
    use super::*;

    #[test]
    fn test_default_codec_is_pickle() {
        assert_eq!(EnvelopeCodec::default().wire_format(), WireFormat::Pickle);
    }

    #[test]
    fn test_example_envelopes_under_both_formats() {
        for format in [WireFormat::Pickle, WireFormat::Bincode] {
            let codec = EnvelopeCodec::new(CodecConfig::new(format));

            let request = example_request();
            let decoded = codec
                .decode_request(&codec.encode_request(&request).unwrap())
                .unwrap();
            assert_eq!(decoded.id, 1);
            assert_eq!(decoded.observation().get("example_obskey").map(Value::len), Some(10));
            assert_eq!(decoded.reward().as_box(), Some(&[1.0][..]));

            let reply = example_reply();
            let decoded = codec.decode_reply(&codec.encode_reply(&reply).unwrap()).unwrap();
            assert_eq!(decoded, reply, "{:?}", format);
        }
    }

    #[test]
    fn test_empty_step_fields_survive_encoding() {
        let codec = EnvelopeCodec::default();
        let request = Request::new(3, Value::empty_dict(), Value::empty_box());
        let decoded = codec
            .decode_request(&codec.encode_request(&request).unwrap())
            .unwrap();
        assert!(decoded.observation().is_dict() && decoded.observation().is_empty());
        assert!(decoded.reward().is_box() && decoded.reward().is_empty());
    }
}

#[cfg(test)]
mod rejection_tests {
    use super::*;

    #[test]
    fn test_duplicate_keys_never_encode() {
        let codec = EnvelopeCodec::default();
        assert!(matches!(
            codec.encode_reply(&duplicate_key_reply()),
            Err(CodecError::InvalidValue(ValueError::DuplicateKey(_)))
        ));
    }

    #[test]
    fn test_peer_sent_duplicate_keys_fail_decoding() {
        let bytes =
            serde_pickle::to_vec(&duplicate_key_reply(), serde_pickle::SerOptions::new()).unwrap();
        assert!(matches!(
            EnvelopeCodec::default().decode_reply(&bytes),
            Err(CodecError::InvalidValue(ValueError::DuplicateKey(_)))
        ));
    }

    #[test]
    fn test_bincode_rejects_trailing_bytes() {
        let codec = EnvelopeCodec::new(CodecConfig::new(WireFormat::Bincode));
        let mut bytes = codec.encode_reply(&example_reply()).unwrap();
        bytes.push(0);
        assert!(matches!(
            codec.decode_reply(&bytes),
            Err(CodecError::TrailingBytes(1))
        ));
    }

    #[test]
    fn test_garbage_is_a_deserialization_error() {
        let codec = EnvelopeCodec::default();
        assert!(matches!(
            codec.decode_reply(b"not a pickle"),
            Err(CodecError::DeserializationError(_))
        ));
    }
}

#[cfg(test)]
mod depth_limit_tests {
    use super::*;

    const HOSTILE_LEVELS: usize = 200_000;

    fn chain(depth: usize) -> Value {
        let mut value = Value::empty_box();
        for _ in 1..depth {
            value = Value::Dict(vec![DictItem::new("", value)]);
        }
        value
    }

    #[test]
    fn test_deep_bincode_reply_is_rejected() {
        // Each level is Dict, one entry, empty key; the innermost value is an empty box.
        let mut bytes = [1u8, 1, 0].repeat(HOSTILE_LEVELS);
        bytes.extend_from_slice(&[0, 0]);

        let codec = EnvelopeCodec::new(CodecConfig::new(WireFormat::Bincode));
        assert!(matches!(
            codec.decode_reply(&bytes),
            Err(CodecError::TooDeep { max_depth: 128 })
        ));
    }

    #[test]
    fn test_deep_pickle_lists_are_rejected() {
        let mut bytes = vec![0x80, 3];
        bytes.extend(std::iter::repeat(b']').take(HOSTILE_LEVELS));
        bytes.extend(std::iter::repeat(b'a').take(HOSTILE_LEVELS - 1));
        bytes.push(b'.');

        assert!(matches!(
            EnvelopeCodec::default().decode_reply(&bytes),
            Err(CodecError::TooDeep { .. })
        ));
    }

    #[test]
    fn test_deep_tree_never_reaches_the_wire() {
        let reply = Reply::new(chain(5_000));
        for format in [WireFormat::Pickle, WireFormat::Bincode] {
            assert!(matches!(
                EnvelopeCodec::new(CodecConfig::new(format)).encode_reply(&reply),
                Err(CodecError::TooDeep { max_depth: 128 })
            ));
        }
    }

    #[test]
    fn test_configured_limit_applies_to_decoding() {
        let reply = Reply::new(chain(10));
        let roomy = EnvelopeCodec::new(CodecConfig::new(WireFormat::Bincode).with_max_depth(10));
        let strict = EnvelopeCodec::new(CodecConfig::new(WireFormat::Bincode).with_max_depth(9));

        let bytes = roomy.encode_reply(&reply).unwrap();
        assert_eq!(roomy.decode_reply(&bytes).unwrap(), reply);
        assert!(matches!(
            strict.decode_reply(&bytes),
            Err(CodecError::TooDeep { max_depth: 9 })
        ));
    }
}

#[cfg(test)]
mod round_trip_props {
    use super::*;

    /// Deepest generated tree; codecs under test are configured with exactly this limit.
    const TREE_LEVELS: u32 = 6;

    fn number() -> impl Strategy<Value = f64> {
        prop::num::f64::NORMAL
            | prop::num::f64::SUBNORMAL
            | prop::num::f64::ZERO
            | prop::num::f64::INFINITE
    }

    fn value_tree() -> impl Strategy<Value = Value> {
        let leaf = prop::collection::vec(number(), 0..6).prop_map(Value::Box);
        leaf.prop_recursive(TREE_LEVELS - 1, 64, 4, |inner| {
            prop::collection::btree_map("[a-z_]{0,8}", inner, 0..4).prop_map(|entries| {
                Value::Dict(
                    entries
                        .into_iter()
                        .map(|(key, value)| DictItem::new(key, value))
                        .collect(),
                )
            })
        })
    }

    fn codec(format: WireFormat) -> EnvelopeCodec {
        EnvelopeCodec::new(CodecConfig::new(format).with_max_depth(TREE_LEVELS as usize))
    }

    proptest! {
        #[test]
        fn prop_request_round_trips(
            id in any::<i64>(),
            observation in value_tree(),
            reward in value_tree(),
        ) {
            let request = Request::new(id, observation, reward);
            for format in [WireFormat::Pickle, WireFormat::Bincode] {
                let codec = codec(format);
                let bytes = codec.encode_request(&request).unwrap();
                prop_assert_eq!(&codec.decode_request(&bytes).unwrap(), &request);
            }
        }

        #[test]
        fn prop_reply_round_trips(action in value_tree()) {
            let reply = Reply::new(action);
            for format in [WireFormat::Pickle, WireFormat::Bincode] {
                let codec = codec(format);
                let bytes = codec.encode_reply(&reply).unwrap();
                prop_assert_eq!(&codec.decode_reply(&bytes).unwrap(), &reply);
            }
        }
    }
}
