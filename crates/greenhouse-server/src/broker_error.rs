//! Broker error types.
//!
//! These report runtime bookkeeping mistakes (events for connections the
//! broker never saw). Protocol violations by peers are not errors here: the
//! broker answers them with `Error` replies or `Close` actions.

use thiserror::Error;

use crate::registry::ConnectionId;

/// Errors that can occur while processing broker events.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BrokerError {
    /// Event for a connection the broker does not track.
    ///
    /// Happens if the runtime delivers a message after the broker asked it to
    /// close the connection, or never reported the accept.
    #[error("connection not found: {0}")]
    ConnectionNotFound(ConnectionId),

    /// The runtime reported the same connection id twice.
    ///
    /// Connection ids must be unique. Indicates a runtime bug.
    #[error("connection already exists: {0}")]
    ConnectionAlreadyExists(ConnectionId),
}
