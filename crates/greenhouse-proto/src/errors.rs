//! Codec error types.
//!
//! Decoding never fails from the caller's point of view ([`crate::decode`]
//! folds every [`DecodeError`] into a [`Message::Error`]), but the typed error
//! is kept so tests and tooling can tell failure causes apart.

use thiserror::Error;

use crate::message::{ActuatorId, ErrorKind, Message};

/// Why a line could not be decoded.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// No known message prefix matched.
    #[error("unknown message: `{0}`")]
    UnknownMessage(String),

    /// A node id field is not an integer.
    #[error("invalid node id: `{0}`")]
    InvalidNodeId(String),

    /// An actuator id field is not an integer.
    #[error("invalid actuator id: `{0}`")]
    InvalidActuatorId(String),

    /// An actuator entry is not `type=id`.
    #[error("invalid actuator entry: `{0}`")]
    InvalidActuator(String),

    /// The same actuator id was announced twice.
    #[error("duplicate actuator id: {0}")]
    DuplicateActuator(ActuatorId),

    /// A sensor-data line carries no readings.
    #[error("sensor data without readings")]
    MissingReadings,

    /// A reading is not `type,value,unit`.
    #[error("invalid sensor reading: `{0}`")]
    InvalidReading(String),

    /// A reading value is not a finite decimal number.
    #[error("invalid sensor value: `{0}`")]
    InvalidValue(String),

    /// A required field separator is missing.
    #[error("missing `{separator}` in `{line}`")]
    MissingSeparator {
        /// Separator that was expected.
        separator: char,
        /// Offending line.
        line: String,
    },

    /// An actuator state is neither `on` nor `off`.
    #[error("invalid actuator state: `{0}`")]
    InvalidState(String),

    /// Unexpected text after a message that carries no payload.
    #[error("unexpected trailing data: `{0}`")]
    TrailingData(String),

    /// The line exceeded the reader's limit and was discarded.
    #[error("line longer than {0} bytes")]
    LineTooLong(usize),
}

impl DecodeError {
    /// Wire error class this failure is reported as.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::UnknownMessage(_) => ErrorKind::Unknown,
            _ => ErrorKind::Invalid,
        }
    }
}

impl From<DecodeError> for Message {
    fn from(err: DecodeError) -> Self {
        Self::Error { kind: err.kind(), detail: err.to_string() }
    }
}

/// Why a message could not be put on the wire.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EncodeError {
    /// `SensorData` must carry at least one reading.
    #[error("sensor data without readings")]
    EmptyReadings,

    /// A free-text token contains a grammar delimiter or a line break.
    #[error("{field} `{value}` contains a reserved character")]
    ReservedCharacter {
        /// Which field was rejected.
        field: &'static str,
        /// The rejected value.
        value: String,
    },

    /// Sensor values must be finite to be decodable.
    #[error("sensor value {0} is not finite")]
    NonFiniteValue(String),
}
