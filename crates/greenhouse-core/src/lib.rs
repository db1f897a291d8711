//! Greenhouse connection layer.
//!
//! Turns any async byte stream into a line channel carrying
//! [`greenhouse_proto::Message`] values. The broker and both client roles
//! build on this; none of them touch raw bytes.
//!
//! # Components
//!
//! - [`Connection`]: wraps one stream, split into [`LineReader`] and
//!   [`ConnectionWriter`]
//! - [`ConnectionError`]: write-side failures

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod connection;
mod error;

pub use connection::{Connection, ConnectionWriter, LineReader};
pub use error::ConnectionError;
