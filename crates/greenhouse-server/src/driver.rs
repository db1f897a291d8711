//! Broker driver.
//!
//! Pure state machine deciding what the server does with each connection.
//! The runtime feeds it [`BrokerEvent`]s and executes the returned
//! [`BrokerAction`]s; the broker itself never touches a socket.
//!
//! Every connection starts [`SessionRole::Unclassified`]. Its first message
//! decides its role for the rest of its life:
//!
//! ```text
//!                  NodeAnnounce                 PanelAnnounce
//!   Node(id) <────────────────── Unclassified ──────────────────> Panel
//!      │                              │                            │
//!      │ reports -> all panels        │ anything else              │ commands -> node(s)
//!      │                              v                            │
//!      │                        E_invalid + Close                  │
//!      └──────────── ConnectionClosed: NodeOffline ─────────────────┘
//! ```
//!
//! A node id announced again on another connection moves to that connection;
//! the older one gets `E_invalid` and is closed.

use std::collections::HashMap;

use greenhouse_proto::{ANY, ActuatorSet, Message, NodeId};

use crate::{
    broker_error::BrokerError,
    registry::{ConnectionId, ConnectionRegistry},
};

/// Broker configuration
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    /// Maximum concurrent connections, classified or not
    pub max_connections: usize,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self { max_connections: 10_000 }
    }
}

/// Events that the broker processes.
///
/// These are produced by the runtime that owns the sockets.
#[derive(Debug, Clone, PartialEq)]
pub enum BrokerEvent {
    /// A new connection was accepted
    ConnectionAccepted {
        /// Unique connection ID assigned by the runtime
        conn: ConnectionId,
    },

    /// A line was received and decoded (possibly into `Message::Error`)
    MessageReceived {
        /// Connection that sent the line
        conn: ConnectionId,
        /// The decoded message
        message: Message,
    },

    /// A connection was closed (by peer, error, or a `Close` action)
    ConnectionClosed {
        /// Connection that was closed
        conn: ConnectionId,
        /// Reason for closure
        reason: String,
    },
}

/// Actions that the broker produces.
///
/// Actions for one connection must be executed in the order given.
#[derive(Debug, Clone, PartialEq)]
pub enum BrokerAction {
    /// Send a message to a connection
    Send {
        /// Target connection
        conn: ConnectionId,
        /// Message to send
        message: Message,
    },

    /// Close a connection after everything queued for it has been written
    Close {
        /// Connection to close
        conn: ConnectionId,
        /// Reason for closure
        reason: String,
    },

    /// Log a message
    Log {
        /// Log level
        level: LogLevel,
        /// Message to log
        message: String,
    },
}

/// Log levels for broker actions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    /// Per-message traffic
    Debug,
    /// Lifecycle
    Info,
    /// Protocol violations
    Warn,
}

/// What a connection turned out to be.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionRole {
    /// No message received yet
    Unclassified,
    /// Announced as a node with this id
    Node(NodeId),
    /// Announced as a panel
    Panel,
}

/// Action-based broker.
///
/// Owns connection roles and the node/panel registry.
#[derive(Debug, Default)]
pub struct Broker {
    /// Role of every live connection
    sessions: HashMap<ConnectionId, SessionRole>,
    /// Announced nodes and panels
    registry: ConnectionRegistry,
    config: BrokerConfig,
}

impl Broker {
    /// Create a new broker.
    pub fn new(config: BrokerConfig) -> Self {
        Self { sessions: HashMap::new(), registry: ConnectionRegistry::new(), config }
    }

    /// Process an event and return actions to execute.
    pub fn process_event(&mut self, event: BrokerEvent) -> Result<Vec<BrokerAction>, BrokerError> {
        match event {
            BrokerEvent::ConnectionAccepted { conn } => self.handle_connection_accepted(conn),
            BrokerEvent::MessageReceived { conn, message } => {
                self.handle_message_received(conn, message)
            },
            BrokerEvent::ConnectionClosed { conn, reason } => {
                Ok(self.handle_connection_closed(conn, &reason))
            },
        }
    }

    /// Role of a live connection. `None` if unknown or already closed.
    pub fn role(&self, conn: ConnectionId) -> Option<SessionRole> {
        self.sessions.get(&conn).copied()
    }

    /// Number of live connections.
    pub fn connection_count(&self) -> usize {
        self.sessions.len()
    }

    /// Read access to the node/panel registry.
    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    fn handle_connection_accepted(
        &mut self,
        conn: ConnectionId,
    ) -> Result<Vec<BrokerAction>, BrokerError> {
        if self.sessions.contains_key(&conn) {
            return Err(BrokerError::ConnectionAlreadyExists(conn));
        }

        if self.sessions.len() >= self.config.max_connections {
            return Ok(vec![
                log(LogLevel::Warn, format!("connection {conn} refused: max connections reached")),
                BrokerAction::Close { conn, reason: "max connections exceeded".to_string() },
            ]);
        }

        self.sessions.insert(conn, SessionRole::Unclassified);

        Ok(vec![log(LogLevel::Debug, format!("connection {conn} accepted"))])
    }

    fn handle_message_received(
        &mut self,
        conn: ConnectionId,
        message: Message,
    ) -> Result<Vec<BrokerAction>, BrokerError> {
        let role = self.role(conn).ok_or(BrokerError::ConnectionNotFound(conn))?;

        let actions = match role {
            SessionRole::Unclassified => self.classify(conn, message),
            SessionRole::Node(node_id) => self.handle_node_message(conn, node_id, message),
            SessionRole::Panel => self.handle_panel_message(conn, message),
        };

        Ok(actions)
    }

    /// First message on a connection: must be an announce.
    fn classify(&mut self, conn: ConnectionId, message: Message) -> Vec<BrokerAction> {
        match message {
            Message::NodeAnnounce { node_id, .. } if node_id == ANY => {
                self.reject(conn, "node id -1 is reserved for wildcards".to_string())
            },
            Message::NodeAnnounce { node_id, actuators } => {
                self.register_node(conn, node_id, actuators)
            },
            Message::PanelAnnounce => self.register_panel(conn),
            other => self.reject(conn, format!("expected announce, got {}", other.kind())),
        }
    }

    fn register_node(
        &mut self,
        conn: ConnectionId,
        node_id: NodeId,
        actuators: ActuatorSet,
    ) -> Vec<BrokerAction> {
        let mut actions = Vec::new();

        self.sessions.insert(conn, SessionRole::Node(node_id));
        if let Some(previous) = self.registry.register_node(node_id, conn, actuators.clone()) {
            // Superseded connection no longer speaks for the node
            self.sessions.remove(&previous);
            let reason = format!("node {node_id} re-announced by connection {conn}");
            actions.push(log(LogLevel::Warn, format!("{reason}, closing {previous}")));
            actions.push(BrokerAction::Send {
                conn: previous,
                message: Message::invalid(reason.clone()),
            });
            actions.push(BrokerAction::Close { conn: previous, reason });
        }

        let count = actuators.len();
        actions.push(log(
            LogLevel::Info,
            format!("node {node_id} registered on connection {conn} with {count} actuators"),
        ));

        let announce = Message::NodeAnnounce { node_id, actuators };
        actions.extend(self.to_panels(&announce));
        actions
    }

    fn register_panel(&mut self, conn: ConnectionId) -> Vec<BrokerAction> {
        self.sessions.insert(conn, SessionRole::Panel);
        self.registry.add_panel(conn);

        let mut actions = vec![log(
            LogLevel::Info,
            format!(
                "panel registered on connection {conn}, replaying {} nodes",
                self.registry.node_count()
            ),
        )];

        // Replay goes to this panel only, before any later broadcast
        for (node_id, entry) in self.registry.nodes() {
            actions.push(BrokerAction::Send {
                conn,
                message: Message::NodeAnnounce { node_id, actuators: entry.actuators.clone() },
            });
        }

        actions
    }

    fn reject(&mut self, conn: ConnectionId, reason: String) -> Vec<BrokerAction> {
        self.sessions.remove(&conn);

        vec![
            log(LogLevel::Warn, format!("rejecting connection {conn}: {reason}")),
            BrokerAction::Send { conn, message: Message::invalid(reason.clone()) },
            BrokerAction::Close { conn, reason },
        ]
    }

    fn handle_node_message(
        &mut self,
        conn: ConnectionId,
        node_id: NodeId,
        message: Message,
    ) -> Vec<BrokerAction> {
        match message {
            Message::SensorData { .. } | Message::ActuatorState { .. } => {
                let mut actions = vec![log(
                    LogLevel::Debug,
                    format!("relaying {} from node {node_id}", message.kind()),
                )];
                actions.extend(self.to_panels(&message));
                actions
            },
            error @ Message::Error { .. } => echo(conn, error),
            other => unexpected(conn, "node", &other),
        }
    }

    fn handle_panel_message(&mut self, conn: ConnectionId, message: Message) -> Vec<BrokerAction> {
        match message {
            Message::ActuatorState { .. } if message.is_any_node() => {
                let targets: Vec<_> = self.registry.node_connections().collect();
                let mut actions = vec![log(
                    LogLevel::Debug,
                    format!("panel {conn} command to all {} nodes", targets.len()),
                )];
                actions.extend(
                    targets
                        .into_iter()
                        .map(|target| BrokerAction::Send {
                            conn: target,
                            message: message.clone(),
                        }),
                );
                actions
            },
            Message::ActuatorState { node_id, .. } => match self.registry.node(node_id) {
                Some(entry) => vec![
                    log(LogLevel::Debug, format!("panel {conn} command to node {node_id}")),
                    BrokerAction::Send { conn: entry.conn, message },
                ],
                None => vec![log(
                    LogLevel::Debug,
                    format!("dropping command from panel {conn} for unknown node {node_id}"),
                )],
            },
            error @ Message::Error { .. } => echo(conn, error),
            other => unexpected(conn, "panel", &other),
        }
    }

    fn handle_connection_closed(&mut self, conn: ConnectionId, reason: &str) -> Vec<BrokerAction> {
        let Some(role) = self.sessions.remove(&conn) else {
            // Already rejected or refused
            return vec![log(LogLevel::Debug, format!("connection {conn} closed: {reason}"))];
        };

        match role {
            SessionRole::Unclassified => {
                let detail = format!("unclassified connection {conn} closed: {reason}");
                vec![log(LogLevel::Debug, detail)]
            },
            SessionRole::Panel => {
                self.registry.remove_panel(conn);
                vec![log(LogLevel::Info, format!("panel on connection {conn} closed: {reason}"))]
            },
            SessionRole::Node(node_id) => {
                if !self.registry.unregister_node(node_id, conn) {
                    return vec![log(
                        LogLevel::Info,
                        format!("superseded node {node_id} on connection {conn} closed: {reason}"),
                    )];
                }

                let mut actions = vec![log(
                    LogLevel::Info,
                    format!("node {node_id} on connection {conn} offline: {reason}"),
                )];
                actions.extend(self.to_panels(&Message::NodeOffline { node_id }));
                actions
            },
        }
    }

    fn to_panels(&self, message: &Message) -> Vec<BrokerAction> {
        self.registry
            .panels()
            .map(|conn| BrokerAction::Send { conn, message: message.clone() })
            .collect()
    }
}

fn log(level: LogLevel, message: String) -> BrokerAction {
    BrokerAction::Log { level, message }
}

/// Undecodable line: the decoder's error goes back to the sender.
fn echo(conn: ConnectionId, error: Message) -> Vec<BrokerAction> {
    vec![
        log(LogLevel::Warn, format!("connection {conn} sent an undecodable line: {error:?}")),
        BrokerAction::Send { conn, message: error },
    ]
}

fn unexpected(conn: ConnectionId, role: &str, message: &Message) -> Vec<BrokerAction> {
    let detail = format!("unexpected {} from {role}", message.kind());
    vec![
        log(LogLevel::Warn, format!("connection {conn}: {detail}")),
        BrokerAction::Send { conn, message: Message::invalid(detail) },
    ]
}
