//! Client error types.

use std::time::Duration;

use greenhouse_core::ConnectionError;
use thiserror::Error;

/// Errors that can occur in node and panel clients.
#[derive(Debug, Error)]
pub enum ClientError {
    /// TCP connect failed.
    #[error("connection to {address} failed: {reason}")]
    Connect {
        /// Address that was dialled
        address: String,
        /// Underlying I/O error
        reason: String,
    },

    /// TCP connect did not complete in time.
    #[error("connection to {address} timed out after {timeout:?}")]
    Timeout {
        /// Address that was dialled
        address: String,
        /// Configured connect timeout
        timeout: Duration,
    },

    /// Sending on an established connection failed.
    #[error("connection error: {0}")]
    Connection(#[from] ConnectionError),

    /// The client was shut down or lost its connection.
    #[error("client is closed")]
    Closed,
}
