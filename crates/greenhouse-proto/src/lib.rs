//! Greenhouse wire protocol.
//!
//! Nodes (simulated sensor/actuator devices) and panels (control
//! applications) talk to the broker over a line-oriented text protocol: one
//! message per newline-terminated UTF-8 line. This crate holds the message
//! model and the codec; it performs no I/O.
//!
//! # Components
//!
//! - [`Message`]: closed set of protocol messages
//! - [`encode`] / [`decode`]: line codec (decode never fails, it yields
//!   [`Message::Error`] instead)
//! - [`ActuatorSet`]: a node's actuators, kept in canonical (ascending id)
//!   order

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod codec;
pub mod errors;
pub mod message;

pub use codec::{MAX_LINE_LEN, decode, encode, try_decode};
pub use errors::{DecodeError, EncodeError};
pub use message::{
    ANY, ActuatorDescriptor, ActuatorId, ActuatorSet, ErrorKind, Message, MessageKind, NodeId,
    SensorReading,
};

/// Default TCP port of the broker.
pub const DEFAULT_PORT: u16 = 1212;
