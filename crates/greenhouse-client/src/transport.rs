//! TCP transport for both client roles.
//!
//! Provides [`open`], which dials the broker and hands back a line
//! [`Connection`]. Protocol logic stays in the node and panel clients.

use std::{
    sync::atomic::{AtomicBool, Ordering},
    time::Duration,
};

use greenhouse_core::Connection;
use greenhouse_proto::DEFAULT_PORT;
use tokio::{net::TcpStream, time::timeout};

use crate::error::ClientError;

/// Where and how to reach the broker.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Broker address (e.g., "127.0.0.1:1212")
    pub server_address: String,
    /// Upper bound on the TCP connect
    pub connect_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::local(DEFAULT_PORT)
    }
}

impl ClientConfig {
    /// Broker on the loopback interface.
    pub fn local(port: u16) -> Self {
        Self {
            server_address: format!("127.0.0.1:{port}"),
            connect_timeout: Duration::from_secs(5),
        }
    }
}

/// Connect to the broker.
pub async fn open(config: &ClientConfig) -> Result<Connection, ClientError> {
    let address = &config.server_address;

    let stream = timeout(config.connect_timeout, TcpStream::connect(address))
        .await
        .map_err(|_| ClientError::Timeout {
            address: address.clone(),
            timeout: config.connect_timeout,
        })?
        .map_err(|e| ClientError::Connect { address: address.clone(), reason: e.to_string() })?;

    if let Err(e) = stream.set_nodelay(true) {
        tracing::debug!(error = %e, "failed to set TCP_NODELAY");
    }

    tracing::debug!(%address, "connected to broker");

    let (read, write) = stream.into_split();
    Ok(Connection::from_parts(read, write))
}

/// Latch guaranteeing the owner hears about a closed connection once.
#[derive(Debug, Default)]
pub(crate) struct CloseLatch(AtomicBool);

impl CloseLatch {
    /// Set the latch. Returns `true` only for the first caller.
    pub(crate) fn trip(&self) -> bool {
        !self.0.swap(true, Ordering::AcqRel)
    }

    pub(crate) fn is_tripped(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}
