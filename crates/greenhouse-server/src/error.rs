//! Server error types.

use thiserror::Error;

/// Errors that can occur in the server runtime.
#[derive(Error, Debug)]
pub enum ServerError {
    /// Configuration error (invalid or unavailable bind address).
    ///
    /// Fatal: prevents server startup. Fix configuration and restart.
    #[error("configuration error: {0}")]
    Config(String),

    /// Transport/network error.
    ///
    /// Per-connection I/O failures never surface here; they only close the
    /// affected connection.
    #[error("transport error: {0}")]
    Transport(String),
}

impl From<std::io::Error> for ServerError {
    fn from(err: std::io::Error) -> Self {
        Self::Transport(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_errors_become_transport_errors() {
        let err = ServerError::from(std::io::Error::other("accept failed"));

        assert!(matches!(&err, ServerError::Transport(reason) if reason == "accept failed"));
        assert_eq!(err.to_string(), "transport error: accept failed");
    }
}
