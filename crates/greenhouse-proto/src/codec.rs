//! Single-line text encoding of [`Message`].
//!
//! ```text
//! node-announce   = "type=sensor:" node-id [";" type "=" actuator-id *("," type "=" actuator-id)]
//! panel-announce  = "type=control"
//! sensor-data     = "sensors:" node-id ";" reading *(";" reading)
//! reading         = type "," float "," unit
//! offline         = "offline:" node-id
//! actuator-state  = "actuator:" (node-id | "*") ";" (actuator-id | "*") "," ("on" | "off")
//! error           = ("E_unknown" | "E_invalid") ":" detail
//! ```
//!
//! Decoding dispatches on the fixed prefix; anything after a matched prefix
//! that does not parse is an `Invalid` error, a line with no known prefix is
//! `Unknown`. Decoding never panics and never returns "nothing".
//!
//! # Invariants
//!
//! `decode(&encode(m)?) == m` for every encodable message except
//! [`Message::Error`], whose detail has line breaks replaced on encode.

use crate::{
    errors::{DecodeError, EncodeError},
    message::{
        ANY, ActuatorDescriptor, ActuatorId, ActuatorSet, ErrorKind, Message, NodeId,
        SensorReading,
    },
};

/// Prefix of a node announcement.
pub const NODE_ANNOUNCE_PREFIX: &str = "type=sensor:";
/// The complete panel announcement line.
pub const PANEL_ANNOUNCE: &str = "type=control";
/// Prefix of a sensor-data line.
pub const SENSOR_DATA_PREFIX: &str = "sensors:";
/// Prefix of a node-offline line.
pub const NODE_OFFLINE_PREFIX: &str = "offline:";
/// Prefix of an actuator command/report line.
pub const ACTUATOR_STATE_PREFIX: &str = "actuator:";
/// Prefix of an `Unknown` error line.
pub const ERROR_UNKNOWN_PREFIX: &str = "E_unknown:";
/// Prefix of an `Invalid` error line.
pub const ERROR_INVALID_PREFIX: &str = "E_invalid:";

/// Longest line, in bytes and without the newline, a reader accepts.
///
/// Encoded error details are cut to fit; other messages are not checked here.
pub const MAX_LINE_LEN: usize = 64 * 1024;

const WILDCARD: &str = "*";
const LINE_BREAKS: [char; 2] = ['\n', '\r'];

/// Encode a message as one line, without the trailing newline.
pub fn encode(message: &Message) -> Result<String, EncodeError> {
    match message {
        Message::NodeAnnounce { node_id, actuators } => encode_node_announce(*node_id, actuators),
        Message::PanelAnnounce => Ok(PANEL_ANNOUNCE.to_string()),
        Message::SensorData { node_id, readings } => encode_sensor_data(*node_id, readings),
        Message::ActuatorState { node_id, actuator_id, is_on } => Ok(format!(
            "{ACTUATOR_STATE_PREFIX}{};{},{}",
            encode_target(*node_id),
            encode_target(*actuator_id),
            if *is_on { "on" } else { "off" }
        )),
        Message::NodeOffline { node_id } => Ok(format!("{NODE_OFFLINE_PREFIX}{node_id}")),
        Message::Error { kind, detail } => {
            let prefix = match kind {
                ErrorKind::Unknown => ERROR_UNKNOWN_PREFIX,
                ErrorKind::Invalid => ERROR_INVALID_PREFIX,
            };
            let detail = detail.replace(LINE_BREAKS, " ");
            Ok(format!("{prefix}{}", truncate(&detail, MAX_LINE_LEN - prefix.len())))
        },
    }
}

/// Decode one line. Failures come back as [`Message::Error`].
pub fn decode(line: &str) -> Message {
    try_decode(line).unwrap_or_else(Message::from)
}

/// Decode one line, keeping the typed failure.
///
/// A single trailing `\r` is ignored so CRLF peers interoperate.
pub fn try_decode(line: &str) -> Result<Message, DecodeError> {
    let line = line.strip_suffix('\r').unwrap_or(line);

    if let Some(rest) = line.strip_prefix(NODE_ANNOUNCE_PREFIX) {
        decode_node_announce(rest)
    } else if let Some(rest) = line.strip_prefix(PANEL_ANNOUNCE) {
        if rest.is_empty() {
            Ok(Message::PanelAnnounce)
        } else {
            Err(DecodeError::TrailingData(rest.to_string()))
        }
    } else if let Some(rest) = line.strip_prefix(SENSOR_DATA_PREFIX) {
        decode_sensor_data(rest)
    } else if let Some(rest) = line.strip_prefix(NODE_OFFLINE_PREFIX) {
        Ok(Message::NodeOffline { node_id: parse_node_id(rest)? })
    } else if let Some(rest) = line.strip_prefix(ACTUATOR_STATE_PREFIX) {
        decode_actuator_state(rest)
    } else if let Some(detail) = line.strip_prefix(ERROR_UNKNOWN_PREFIX) {
        Ok(Message::Error { kind: ErrorKind::Unknown, detail: detail.to_string() })
    } else if let Some(detail) = line.strip_prefix(ERROR_INVALID_PREFIX) {
        Ok(Message::Error { kind: ErrorKind::Invalid, detail: detail.to_string() })
    } else {
        Err(DecodeError::UnknownMessage(line.to_string()))
    }
}

impl Message {
    /// Encode this message as one line. See [`encode`].
    pub fn encode(&self) -> Result<String, EncodeError> {
        encode(self)
    }

    /// Decode one line. See [`decode`].
    pub fn decode(line: &str) -> Self {
        decode(line)
    }
}

fn encode_node_announce(node_id: NodeId, actuators: &ActuatorSet) -> Result<String, EncodeError> {
    let mut line = format!("{NODE_ANNOUNCE_PREFIX}{node_id}");
    for (i, actuator) in actuators.iter().enumerate() {
        check_token("actuator type", &actuator.kind, &[',', ';', '='])?;
        line.push(if i == 0 { ';' } else { ',' });
        line.push_str(&actuator.kind);
        line.push('=');
        line.push_str(&actuator.id.to_string());
    }
    Ok(line)
}

fn encode_sensor_data(node_id: NodeId, readings: &[SensorReading]) -> Result<String, EncodeError> {
    if readings.is_empty() {
        return Err(EncodeError::EmptyReadings);
    }

    let mut line = format!("{SENSOR_DATA_PREFIX}{node_id}");
    for reading in readings {
        check_token("sensor type", &reading.kind, &[',', ';'])?;
        check_token("sensor unit", &reading.unit, &[',', ';'])?;
        if !reading.value.is_finite() {
            return Err(EncodeError::NonFiniteValue(reading.value.to_string()));
        }
        line.push_str(&format!(";{},{},{}", reading.kind, reading.value, reading.unit));
    }
    Ok(line)
}

fn encode_target(id: i32) -> String {
    if id == ANY { WILDCARD.to_string() } else { id.to_string() }
}

fn check_token(field: &'static str, value: &str, reserved: &[char]) -> Result<(), EncodeError> {
    if value.contains(reserved) || value.contains(LINE_BREAKS) {
        return Err(EncodeError::ReservedCharacter { field, value: value.to_string() });
    }
    Ok(())
}

fn decode_node_announce(rest: &str) -> Result<Message, DecodeError> {
    let (id_part, actuator_part) = match rest.split_once(';') {
        Some((id, actuators)) => (id, Some(actuators)),
        None => (rest, None),
    };

    let node_id = parse_node_id(id_part)?;
    let mut actuators = ActuatorSet::new();

    if let Some(list) = actuator_part {
        for entry in list.split(',') {
            let actuator = decode_actuator(entry)?;
            let id = actuator.id;
            if !actuators.insert(actuator) {
                return Err(DecodeError::DuplicateActuator(id));
            }
        }
    }

    Ok(Message::NodeAnnounce { node_id, actuators })
}

fn decode_actuator(entry: &str) -> Result<ActuatorDescriptor, DecodeError> {
    let mut parts = entry.split('=');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(kind), Some(id), None) if is_token(kind) => {
            let id = id.parse().map_err(|_| DecodeError::InvalidActuatorId(id.to_string()))?;
            Ok(ActuatorDescriptor::new(kind, id))
        },
        _ => Err(DecodeError::InvalidActuator(entry.to_string())),
    }
}

fn decode_sensor_data(rest: &str) -> Result<Message, DecodeError> {
    let (id_part, readings_part) = rest.split_once(';').ok_or(DecodeError::MissingReadings)?;
    let node_id = parse_node_id(id_part)?;

    if readings_part.is_empty() {
        return Err(DecodeError::MissingReadings);
    }

    let readings = readings_part.split(';').map(decode_reading).collect::<Result<Vec<_>, _>>()?;

    Ok(Message::SensorData { node_id, readings })
}

fn decode_reading(entry: &str) -> Result<SensorReading, DecodeError> {
    let mut parts = entry.split(',');
    match (parts.next(), parts.next(), parts.next(), parts.next()) {
        (Some(kind), Some(value), Some(unit), None) if is_token(kind) && is_token(unit) => {
            let parsed = value
                .parse::<f64>()
                .ok()
                .filter(|v| v.is_finite())
                .ok_or_else(|| DecodeError::InvalidValue(value.to_string()))?;
            Ok(SensorReading::new(kind, parsed, unit))
        },
        _ => Err(DecodeError::InvalidReading(entry.to_string())),
    }
}

fn decode_actuator_state(rest: &str) -> Result<Message, DecodeError> {
    let (node_part, tail) = rest
        .split_once(';')
        .ok_or_else(|| DecodeError::MissingSeparator { separator: ';', line: rest.to_string() })?;
    let (actuator_part, state) = tail
        .split_once(',')
        .ok_or_else(|| DecodeError::MissingSeparator { separator: ',', line: rest.to_string() })?;

    let node_id = if node_part == WILDCARD { ANY } else { parse_node_id(node_part)? };
    let actuator_id: ActuatorId = if actuator_part == WILDCARD {
        ANY
    } else {
        actuator_part
            .parse()
            .map_err(|_| DecodeError::InvalidActuatorId(actuator_part.to_string()))?
    };
    let is_on = match state {
        "on" => true,
        "off" => false,
        other => return Err(DecodeError::InvalidState(other.to_string())),
    };

    Ok(Message::ActuatorState { node_id, actuator_id, is_on })
}

/// Free-text fields must survive re-encoding.
/// Longest prefix of `s` that fits in `max` bytes without splitting a char.
fn truncate(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

fn is_token(s: &str) -> bool {
    !s.contains(';') && !s.contains(LINE_BREAKS)
}

fn parse_node_id(s: &str) -> Result<NodeId, DecodeError> {
    s.parse().map_err(|_| DecodeError::InvalidNodeId(s.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(node_id: NodeId, actuators: &[(&str, ActuatorId)]) -> Message {
        Message::NodeAnnounce {
            node_id,
            actuators: actuators.iter().map(|(k, id)| ActuatorDescriptor::new(*k, *id)).collect(),
        }
    }

    fn assert_invalid(line: &str) {
        match decode(line) {
            Message::Error { kind: ErrorKind::Invalid, .. } => {},
            other => panic!("`{line}` should be invalid, got {other:?}"),
        }
    }

    #[test]
    fn empty_node_announce() {
        assert_eq!(encode(&node(44, &[])).unwrap(), "type=sensor:44");
        assert_eq!(decode("type=sensor:44"), node(44, &[]));
    }

    #[test]
    fn node_announce_sorts_actuators_by_id() {
        assert_eq!(
            encode(&node(667, &[("temperature", 13), ("fan", 12)])).unwrap(),
            "type=sensor:667;fan=12,temperature=13"
        );

        let mut actuators = ActuatorSet::new();
        for (kind, id) in [("temperature", 13), ("temperature", 14), ("fan", 15)] {
            actuators.insert(ActuatorDescriptor::new(kind, id));
        }
        let mut message = Message::NodeAnnounce { node_id: 667, actuators: actuators.clone() };
        assert_eq!(
            encode(&message).unwrap(),
            "type=sensor:667;temperature=13,temperature=14,fan=15"
        );

        actuators.insert(ActuatorDescriptor::new("temperature", 2));
        message = Message::NodeAnnounce { node_id: 667, actuators };
        insta::assert_snapshot!(
            encode(&message).unwrap(),
            @"type=sensor:667;temperature=2,temperature=13,temperature=14,fan=15"
        );
    }

    #[test]
    fn decoded_actuators_come_back_sorted() {
        let message = decode("type=sensor:667;temperature=2,temperature=13,temperature=15,fan=14");
        let Message::NodeAnnounce { node_id, actuators } = message else {
            panic!("expected node announce");
        };
        assert_eq!(node_id, 667);
        let decoded: Vec<_> = actuators.iter().map(|a| (a.kind.as_str(), a.id)).collect();
        assert_eq!(
            decoded,
            vec![("temperature", 2), ("temperature", 13), ("fan", 14), ("temperature", 15)]
        );
    }

    #[test]
    fn invalid_node_ids() {
        assert_invalid("sensors:");
        assert_invalid("sensors:dddd;temperature,12,C");
        assert_invalid("type=sensor:ddd");
        assert_invalid("type=sensor:ddd;temperature=2,temperature=13,temperature=15,fan=14");
        assert_invalid("type=sensor:;temperature=2");
        assert_invalid("offline:*");
    }

    #[test]
    fn malformed_actuator_lists() {
        assert_invalid("type=sensor:1;");
        assert_invalid("type=sensor:1;fan");
        assert_invalid("type=sensor:1;fan=1=2");
        assert_invalid("type=sensor:1;fan=x");
        assert_invalid("type=sensor:1;fan;x=1");
        assert_eq!(
            try_decode("type=sensor:1;fan=1,heater=1"),
            Err(DecodeError::DuplicateActuator(1))
        );
    }

    #[test]
    fn sensor_data_needs_readings() {
        assert_eq!(try_decode("sensors:12"), Err(DecodeError::MissingReadings));
        assert_eq!(try_decode("sensors:12;"), Err(DecodeError::MissingReadings));
    }

    #[test]
    fn invalid_sensor_readings() {
        assert_invalid("sensors:12;temperature,27");
        assert_invalid("sensors:12;temperature,C");
        assert_invalid("sensors:12;24,C");
        assert_invalid("sensors:12;temperature,ddd,C");
        assert_invalid("sensors:12;24");
        assert_invalid("sensors:12;temperature,27,C;humidity,78");
        assert_invalid("sensors:12;temperature,27,C,extra");
        assert_invalid("sensors:12;temp\rerature,27,C");
        assert_invalid("sensors:12;temperature,NaN,C");
        assert_invalid("sensors:12;temperature,inf,C");
    }

    #[test]
    fn multiple_sensor_readings() {
        assert_eq!(
            decode("sensors:12;temperature,27,C;humidity,80,%;temperature,24.5,C"),
            Message::SensorData {
                node_id: 12,
                readings: vec![
                    SensorReading::new("temperature", 27.0, "C"),
                    SensorReading::new("humidity", 80.0, "%"),
                    SensorReading::new("temperature", 24.5, "C"),
                ],
            }
        );
    }

    #[test]
    fn unit_is_forwarded_byte_for_byte() {
        let message = Message::SensorData {
            node_id: 3,
            readings: vec![SensorReading::new("temperature", 21.5, "°C")],
        };
        let line = encode(&message).unwrap();
        assert_eq!(line, "sensors:3;temperature,21.5,°C");
        assert_eq!(decode(&line), message);
    }

    #[test]
    fn wildcard_actuator_state() {
        let message = decode("actuator:*;*,on");
        assert_eq!(message, Message::actuator_state(ANY, ANY, true));
        assert!(message.is_any_node());
        assert!(message.is_any_actuator());

        assert_eq!(encode(&Message::actuator_state(ANY, 7, false)).unwrap(), "actuator:*;7,off");
        assert_eq!(decode("actuator:4;*,off"), Message::actuator_state(4, ANY, false));
    }

    #[test]
    fn malformed_actuator_state() {
        assert_invalid("actuator:4");
        assert_invalid("actuator:4;5");
        assert_invalid("actuator:4;5,maybe");
        assert_invalid("actuator:x;5,on");
        assert_invalid("actuator:4;y,on");
    }

    #[test]
    fn panel_announce_is_exact() {
        assert_eq!(decode("type=control"), Message::PanelAnnounce);
        assert_invalid("type=controller");
    }

    #[test]
    fn unknown_prefix() {
        assert!(matches!(decode("hello"), Message::Error { kind: ErrorKind::Unknown, .. }));
        assert!(matches!(decode(""), Message::Error { kind: ErrorKind::Unknown, .. }));
    }

    #[test]
    fn crlf_is_tolerated() {
        assert_eq!(decode("offline:9\r"), Message::NodeOffline { node_id: 9 });
    }

    #[test]
    fn error_lines() {
        let message = Message::invalid("bad\nline");
        let line = encode(&message).unwrap();
        assert_eq!(line, "E_invalid:bad line");
        assert_eq!(decode(&line), Message::invalid("bad line"));
        assert_eq!(
            decode("E_unknown:what"),
            Message::Error { kind: ErrorKind::Unknown, detail: "what".to_string() }
        );
    }

    #[test]
    fn long_error_detail_is_cut_to_one_line() {
        let detail = "é".repeat(MAX_LINE_LEN);
        let line = encode(&Message::invalid(detail)).unwrap();

        assert!(line.len() <= MAX_LINE_LEN);
        assert!(line.starts_with(ERROR_INVALID_PREFIX));
        assert!(matches!(decode(&line), Message::Error { kind: ErrorKind::Invalid, .. }));
    }

    #[test]
    fn encode_rejects_unrepresentable_values() {
        assert_eq!(
            encode(&Message::SensorData { node_id: 1, readings: vec![] }),
            Err(EncodeError::EmptyReadings)
        );
        assert!(matches!(
            encode(&node(1, &[("fan,heater", 1)])),
            Err(EncodeError::ReservedCharacter { field: "actuator type", .. })
        ));
        assert!(matches!(
            encode(&Message::SensorData {
                node_id: 1,
                readings: vec![SensorReading::new("t", 1.0, "a;b")],
            }),
            Err(EncodeError::ReservedCharacter { field: "sensor unit", .. })
        ));
        assert!(matches!(
            encode(&Message::SensorData {
                node_id: 1,
                readings: vec![SensorReading::new("t", f64::NAN, "C")],
            }),
            Err(EncodeError::NonFiniteValue(_))
        ));
    }
}
