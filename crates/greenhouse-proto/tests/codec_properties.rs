//! Property-based tests for the line codec.
//!
//! These verify the round-trip law for every encodable (non-error) message
//! and that decoding arbitrary text never panics and never yields a message
//! containing a line break.

use greenhouse_proto::{
    ANY, ActuatorDescriptor, ActuatorSet, ErrorKind, Message, SensorReading, decode, encode,
};
use proptest::prelude::*;

/// Free-text tokens without grammar delimiters (unit symbols included).
fn token() -> impl Strategy<Value = String> {
    "[a-zA-Z0-9_ %°µ/.-]{0,12}"
}

fn id() -> impl Strategy<Value = i32> {
    prop_oneof![Just(ANY), 0..10_000i32, any::<i32>()]
}

fn actuator_set() -> impl Strategy<Value = ActuatorSet> {
    prop::collection::vec((token(), any::<i32>()), 0..8).prop_map(|entries| {
        entries.into_iter().map(|(kind, id)| ActuatorDescriptor::new(kind, id)).collect()
    })
}

fn reading() -> impl Strategy<Value = SensorReading> {
    let value = prop_oneof![
        -1000.0..1000.0f64,
        any::<f64>().prop_filter("finite", |v| v.is_finite()),
        (-100i32..100).prop_map(f64::from),
    ];
    (token(), value, token()).prop_map(|(kind, value, unit)| SensorReading::new(kind, value, unit))
}

fn encodable_message() -> impl Strategy<Value = Message> {
    prop_oneof![
        (any::<i32>(), actuator_set())
            .prop_map(|(node_id, actuators)| Message::NodeAnnounce { node_id, actuators }),
        Just(Message::PanelAnnounce),
        (any::<i32>(), prop::collection::vec(reading(), 1..6))
            .prop_map(|(node_id, readings)| Message::SensorData { node_id, readings }),
        (id(), id(), any::<bool>()).prop_map(|(node_id, actuator_id, is_on)| {
            Message::ActuatorState { node_id, actuator_id, is_on }
        }),
        any::<i32>().prop_map(|node_id| Message::NodeOffline { node_id }),
    ]
}

#[test]
fn prop_encode_decode_roundtrip() {
    proptest!(|(message in encodable_message())| {
        let line = encode(&message).expect("encodable message");

        // PROPERTY: the line is a single line
        prop_assert!(!line.contains('\n'));
        prop_assert!(!line.contains('\r'));

        // PROPERTY: decode is the left inverse of encode
        prop_assert_eq!(decode(&line), message);
    });
}

#[test]
fn prop_actuator_order_is_canonical() {
    proptest!(|(set in actuator_set(), node_id in any::<i32>())| {
        let mut reversed: Vec<_> = set.iter().cloned().collect();
        reversed.reverse();
        let shuffled: ActuatorSet = reversed.into_iter().collect();

        let a = encode(&Message::NodeAnnounce { node_id, actuators: set }).unwrap();
        let b = encode(&Message::NodeAnnounce { node_id, actuators: shuffled }).unwrap();

        // PROPERTY: insertion order never changes the encoding
        prop_assert_eq!(a, b);
    });
}

#[test]
fn prop_decode_never_panics() {
    proptest!(|(line in ".{0,64}")| {
        // PROPERTY: decode always yields a message
        let _ = decode(&line);
    });
}

#[test]
fn prop_garbage_after_prefix_is_invalid_not_unknown() {
    proptest!(|(suffix in "[a-z]{1,8}")| {
        for prefix in ["type=sensor:", "sensors:", "offline:"] {
            let message = decode(&format!("{prefix}{suffix}"));
            let is_invalid = matches!(message, Message::Error { kind: ErrorKind::Invalid, .. });

            // PROPERTY: a matched prefix never degrades to an unknown message
            prop_assert!(is_invalid, "{}{} decoded to {:?}", prefix, suffix, message);
        }
    });
}
