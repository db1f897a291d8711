//! Error types for greenhouse connections.
//!
//! Only the write side reports errors: the read side turns EOF and I/O
//! failures into "closed" so a receive loop never has to match on them.

use std::io;

use greenhouse_proto::EncodeError;
use thiserror::Error;

/// Errors that can occur while sending on a connection.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConnectionError {
    /// The message cannot be represented as a protocol line.
    #[error("encode error: {0}")]
    Encode(#[from] EncodeError),

    /// A raw line contained a line break.
    #[error("line contains a line break")]
    EmbeddedNewline,

    /// The connection has been shut down locally or by the peer.
    #[error("connection closed")]
    Closed,

    /// Underlying transport error
    #[error("transport error: {0}")]
    Transport(String),
}

impl ConnectionError {
    /// Returns true if the connection is unusable after this error.
    ///
    /// Encoding problems concern one message only; the connection itself
    /// stays healthy.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Closed | Self::Transport(_))
    }
}

/// Convert `io::Error` to `ConnectionError` (for transport errors)
impl From<io::Error> for ConnectionError {
    fn from(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::BrokenPipe
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::NotConnected => Self::Closed,
            _ => Self::Transport(err.to_string()),
        }
    }
}

/// Boundary conversion for callers that work in `io::Result`.
impl From<ConnectionError> for io::Error {
    fn from(err: ConnectionError) -> Self {
        let kind = match &err {
            ConnectionError::Encode(_) | ConnectionError::EmbeddedNewline => {
                io::ErrorKind::InvalidInput
            },
            ConnectionError::Closed => io::ErrorKind::NotConnected,
            ConnectionError::Transport(_) => io::ErrorKind::Other,
        };
        Self::new(kind, err.to_string())
    }
}
