//! Greenhouse broker server.
//!
//! Relays between sensor/actuator nodes and control panels over TCP.
//!
//! # Architecture
//!
//! [`Broker`] is a pure state machine: it consumes [`BrokerEvent`]s and
//! returns [`BrokerAction`]s, with no I/O. [`Server`] is the Tokio runtime
//! that owns the sockets and executes those actions.
//!
//! ```text
//!  accept ──> per-connection read task ──> lock(Hub) ──> Broker::process_event
//!                                                               │
//!                                   Send/Close enqueued <───────┘
//!                                           │
//!                     per-connection Outbox writer task ──> socket
//! ```
//!
//! The hub lock is held while the broker runs and while its actions are
//! enqueued, never across a socket write.
//!
//! # Components
//!
//! - [`Broker`]: action-based broker (pure logic, no I/O)
//! - [`ConnectionRegistry`]: announced nodes and panels
//! - [`Server`]: production runtime that executes broker actions

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod broker_error;
mod driver;
mod error;
mod outbox;
mod registry;

use std::{
    collections::HashMap,
    future::Future,
    net::SocketAddr,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

pub use broker_error::BrokerError;
pub use driver::{Broker, BrokerAction, BrokerConfig, BrokerEvent, LogLevel, SessionRole};
pub use error::ServerError;
use greenhouse_core::Connection;
use greenhouse_proto::DEFAULT_PORT;
pub use outbox::DEFAULT_OUTBOX_CAPACITY;
use outbox::{Outbox, OutboxState};
pub use registry::{ConnectionId, ConnectionRegistry, NodeEntry};
use tokio::{
    net::{TcpListener, TcpStream},
    sync::{Mutex, watch},
    task::JoinSet,
};

/// Server configuration for the production runtime.
#[derive(Debug, Clone)]
pub struct ServerRuntimeConfig {
    /// Address to bind to (e.g., "0.0.0.0:1212")
    pub bind_address: String,
    /// Broker configuration (limits)
    pub broker: BrokerConfig,
    /// Messages queued per connection before a peer that stopped reading is
    /// disconnected
    pub outbox_capacity: usize,
}

impl Default for ServerRuntimeConfig {
    fn default() -> Self {
        Self {
            bind_address: format!("0.0.0.0:{DEFAULT_PORT}"),
            broker: BrokerConfig::default(),
            outbox_capacity: DEFAULT_OUTBOX_CAPACITY,
        }
    }
}

/// Broker plus the outboxes its actions are executed against.
struct Hub {
    broker: Broker,
    outboxes: HashMap<ConnectionId, Outbox>,
}

impl Hub {
    /// Run one event through the broker and enqueue the resulting actions.
    ///
    /// Returns `false` if `conn` must stop reading (closed by the broker).
    fn process(&mut self, conn: ConnectionId, event: BrokerEvent) -> bool {
        let actions = match self.broker.process_event(event) {
            Ok(actions) => actions,
            Err(e) => {
                tracing::warn!(conn, error = %e, "broker rejected event");
                return false;
            },
        };

        let mut open = true;
        for action in actions {
            match action {
                BrokerAction::Send { conn: to, message } => match self.outboxes.get(&to) {
                    Some(outbox) => outbox.push(message),
                    None => tracing::debug!(conn = to, "send to unknown connection dropped"),
                },
                BrokerAction::Close { conn: to, reason } => {
                    tracing::debug!(conn = to, %reason, "closing connection");
                    if let Some(outbox) = self.outboxes.get(&to) {
                        outbox.close();
                    }
                    if to == conn {
                        open = false;
                    }
                },
                BrokerAction::Log { level, message } => match level {
                    LogLevel::Debug => tracing::debug!("{}", message),
                    LogLevel::Info => tracing::info!("{}", message),
                    LogLevel::Warn => tracing::warn!("{}", message),
                },
            }
        }

        open
    }
}

/// State shared by the accept loop and every connection task.
struct Shared {
    hub: Mutex<Hub>,
    next_conn: AtomicU64,
    outbox_capacity: usize,
}

/// Production greenhouse broker.
///
/// Wraps [`Broker`] with a Tokio TCP listener.
pub struct Server {
    listener: TcpListener,
    config: ServerRuntimeConfig,
}

impl Server {
    /// Create and bind a new server.
    pub async fn bind(config: ServerRuntimeConfig) -> Result<Self, ServerError> {
        let listener = TcpListener::bind(&config.bind_address).await.map_err(|e| {
            ServerError::Config(format!("failed to bind {}: {e}", config.bind_address))
        })?;

        Ok(Self { listener, config })
    }

    /// Local address the server is bound to.
    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        Ok(self.listener.local_addr()?)
    }

    /// Run the server until the process ends.
    pub async fn run(self) -> Result<(), ServerError> {
        self.run_until(std::future::pending()).await
    }

    /// Run the server until `shutdown` completes.
    ///
    /// On shutdown the listener stops accepting, every connection is closed
    /// (nodes are reported offline to panels that are still connected at that
    /// point) and this returns once all connection tasks have finished.
    pub async fn run_until<F>(self, shutdown: F) -> Result<(), ServerError>
    where
        F: Future<Output = ()>,
    {
        tracing::info!("Server starting on {}", self.local_addr()?);

        let shared = Arc::new(Shared {
            hub: Mutex::new(Hub {
                broker: Broker::new(self.config.broker.clone()),
                outboxes: HashMap::new(),
            }),
            next_conn: AtomicU64::new(1),
            outbox_capacity: self.config.outbox_capacity,
        });
        let (stop_tx, stop_rx) = watch::channel(false);
        let mut tasks = JoinSet::new();

        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                () = &mut shutdown => {
                    tracing::info!("Server shutting down");
                    break;
                },
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let conn = shared.next_conn.fetch_add(1, Ordering::Relaxed);
                        tracing::debug!(conn, %peer, "accepted connection");
                        tasks.spawn(handle_connection(
                            conn,
                            stream,
                            Arc::clone(&shared),
                            stop_rx.clone(),
                        ));
                    },
                    Err(e) => {
                        tracing::error!("Accept error: {}", e);
                    },
                },
                Some(_) = tasks.join_next(), if !tasks.is_empty() => {},
            }
        }

        let _ = stop_tx.send(true);
        while tasks.join_next().await.is_some() {}

        Ok(())
    }
}

/// Drive one TCP connection: read loop in this task, writes in its outbox.
async fn handle_connection(
    conn: ConnectionId,
    stream: TcpStream,
    shared: Arc<Shared>,
    mut stop: watch::Receiver<bool>,
) {
    if let Err(e) = stream.set_nodelay(true) {
        tracing::debug!(conn, error = %e, "failed to set TCP_NODELAY");
    }

    let (read, write) = stream.into_split();
    let (mut reader, writer) = Connection::from_parts(read, write).into_split();
    let (outbox, writer_task) = Outbox::spawn(conn, writer, shared.outbox_capacity);
    let mut outbox_state = outbox.state();

    let accepted = {
        let mut hub = shared.hub.lock().await;
        hub.outboxes.insert(conn, outbox);
        hub.process(conn, BrokerEvent::ConnectionAccepted { conn })
    };

    let reason = if accepted {
        loop {
            let received = tokio::select! {
                received = reader.receive() => received,
                _ = stop.changed() => break "server shutting down",
                Ok(_) = outbox_state.wait_for(|state| *state != OutboxState::Open) => {
                    break "closed by broker";
                },
            };

            let Some(message) = received else {
                break "peer closed";
            };

            let mut hub = shared.hub.lock().await;
            if !hub.process(conn, BrokerEvent::MessageReceived { conn, message }) {
                break "closed by broker";
            }
        }
    } else {
        "refused"
    };

    {
        let mut hub = shared.hub.lock().await;
        hub.process(conn, BrokerEvent::ConnectionClosed { conn, reason: reason.to_string() });
        if let Some(outbox) = hub.outboxes.remove(&conn) {
            outbox.close();
        }
    }

    // Queued replies (e.g. a rejection) are flushed before the socket drops
    if let Err(e) = writer_task.await {
        tracing::warn!(conn, error = %e, "writer task failed");
    }
    drop(reader);

    tracing::debug!(conn, reason, "connection finished");
}
