//! Control-panel client.
//!
//! Announces itself as a panel, keeps a [`Topology`] current and forwards
//! every broker message to a [`PanelListener`]. Commands go out through
//! [`PanelClient::send_actuator_command`].

use std::sync::Arc;

use greenhouse_core::{ConnectionWriter, LineReader};
use greenhouse_proto::{ActuatorId, ActuatorSet, ErrorKind, Message, NodeId, SensorReading};
use tokio::{
    sync::{RwLock, mpsc, watch},
    task::JoinHandle,
};

use crate::{
    error::ClientError,
    topology::Topology,
    transport::{ClientConfig, CloseLatch, open},
};

/// Receives what the broker tells a panel.
///
/// Called from the panel's receive task, in arrival order. The topology has
/// already been updated when a callback runs.
pub trait PanelListener: Send + Sync + 'static {
    /// A node announced itself (or was replayed on connect).
    fn node_added(&self, node_id: NodeId, actuators: &ActuatorSet);

    /// A node disconnected.
    fn node_removed(&self, node_id: NodeId);

    /// A node reported sensor readings.
    fn sensor_data(&self, node_id: NodeId, readings: &[SensorReading]);

    /// A node reported an actuator state.
    fn actuator_state_changed(&self, node_id: NodeId, actuator_id: ActuatorId, is_on: bool);

    /// The broker rejected something this panel sent.
    fn server_error(&self, kind: ErrorKind, detail: &str) {
        tracing::warn!(%kind, detail, "broker reported an error");
    }

    /// The connection is gone. Called at most once, never after a local
    /// [`PanelClient::shutdown`].
    fn communication_closed(&self);
}

/// [`PanelListener`] callbacks as values.
#[derive(Debug, Clone, PartialEq)]
pub enum PanelEvent {
    /// See [`PanelListener::node_added`]
    NodeAdded {
        /// Node id
        node_id: NodeId,
        /// Announced actuators
        actuators: ActuatorSet,
    },
    /// See [`PanelListener::node_removed`]
    NodeRemoved {
        /// Node id
        node_id: NodeId,
    },
    /// See [`PanelListener::sensor_data`]
    SensorData {
        /// Node id
        node_id: NodeId,
        /// Reported readings
        readings: Vec<SensorReading>,
    },
    /// See [`PanelListener::actuator_state_changed`]
    ActuatorStateChanged {
        /// Node id (may be the wildcard)
        node_id: NodeId,
        /// Actuator id (may be the wildcard)
        actuator_id: ActuatorId,
        /// Reported state
        is_on: bool,
    },
    /// See [`PanelListener::server_error`]
    ServerError {
        /// Error category
        kind: ErrorKind,
        /// Broker's explanation
        detail: String,
    },
    /// See [`PanelListener::communication_closed`]
    CommunicationClosed,
}

/// Lets an application consume panel callbacks as a stream.
impl PanelListener for mpsc::UnboundedSender<PanelEvent> {
    fn node_added(&self, node_id: NodeId, actuators: &ActuatorSet) {
        let _ = self.send(PanelEvent::NodeAdded { node_id, actuators: actuators.clone() });
    }

    fn node_removed(&self, node_id: NodeId) {
        let _ = self.send(PanelEvent::NodeRemoved { node_id });
    }

    fn sensor_data(&self, node_id: NodeId, readings: &[SensorReading]) {
        let _ = self.send(PanelEvent::SensorData { node_id, readings: readings.to_vec() });
    }

    fn actuator_state_changed(&self, node_id: NodeId, actuator_id: ActuatorId, is_on: bool) {
        let _ = self.send(PanelEvent::ActuatorStateChanged { node_id, actuator_id, is_on });
    }

    fn server_error(&self, kind: ErrorKind, detail: &str) {
        let _ = self.send(PanelEvent::ServerError { kind, detail: detail.to_string() });
    }

    fn communication_closed(&self) {
        let _ = self.send(PanelEvent::CommunicationClosed);
    }
}

/// State shared between the client handle and its receive task.
struct Session<L> {
    listener: Arc<L>,
    topology: RwLock<Topology>,
    latch: CloseLatch,
    stop: watch::Sender<bool>,
}

impl<L: PanelListener> Session<L> {
    /// Forget every node and report the close to the listener, once.
    async fn closed(&self, why: &str) {
        let _ = self.stop.send(true);
        if self.latch.trip() {
            tracing::info!(why, "panel connection closed");
            self.topology.write().await.clear();
            self.listener.communication_closed();
        }
    }
}

/// Connected control panel.
pub struct PanelClient<L: PanelListener> {
    writer: ConnectionWriter,
    session: Arc<Session<L>>,
    receiver: JoinHandle<()>,
}

impl<L: PanelListener> PanelClient<L> {
    /// Connect, announce as a panel and start dispatching to `listener`.
    pub async fn connect(config: &ClientConfig, listener: Arc<L>) -> Result<Self, ClientError> {
        let (reader, writer) = open(config).await?.into_split();
        writer.send(&Message::PanelAnnounce).await?;

        tracing::info!("panel announced");

        let (stop, stopped) = watch::channel(false);
        let session = Arc::new(Session {
            listener,
            topology: RwLock::new(Topology::new()),
            latch: CloseLatch::default(),
            stop,
        });
        let receiver = tokio::spawn(receive(reader, Arc::clone(&session), stopped));

        Ok(Self { writer, session, receiver })
    }

    /// Ask the broker to switch an actuator. Either id may be the wildcard.
    ///
    /// A command that cannot be written closes the connection.
    pub async fn send_actuator_command(
        &self,
        node_id: NodeId,
        actuator_id: ActuatorId,
        is_on: bool,
    ) -> Result<(), ClientError> {
        if self.session.latch.is_tripped() {
            return Err(ClientError::Closed);
        }

        let command = Message::ActuatorState { node_id, actuator_id, is_on };
        if let Err(e) = self.writer.send(&command).await {
            tracing::warn!(node_id, actuator_id, error = %e, "command not sent, closing");
            self.writer.shutdown().await;
            self.session.closed("command could not be sent").await;
            return Err(e.into());
        }

        tracing::debug!(node_id, actuator_id, is_on, "command sent");
        Ok(())
    }

    /// Snapshot of the known nodes. Empty once the connection is lost.
    pub async fn topology(&self) -> Topology {
        self.session.topology.read().await.clone()
    }

    /// Whether the connection is still up.
    pub fn is_connected(&self) -> bool {
        !self.session.latch.is_tripped()
    }

    /// Stop receiving and close the socket.
    ///
    /// The listener is not told about this close.
    pub async fn shutdown(self) {
        self.session.latch.trip();
        let _ = self.session.stop.send(true);
        self.writer.shutdown().await;

        if let Err(e) = self.receiver.await {
            tracing::warn!(error = %e, "panel receive task failed");
        }
        tracing::info!("panel client shut down");
    }
}

async fn receive<L: PanelListener>(
    mut reader: LineReader,
    session: Arc<Session<L>>,
    mut stopped: watch::Receiver<bool>,
) {
    loop {
        let received = tokio::select! {
            received = reader.receive() => received,
            _ = stopped.changed() => return,
        };

        let Some(message) = received else {
            break;
        };

        session.topology.write().await.apply(&message);
        dispatch(session.listener.as_ref(), message);
    }

    session.closed("closed by broker").await;
}

fn dispatch<L: PanelListener>(listener: &L, message: Message) {
    match message {
        Message::NodeAnnounce { node_id, actuators } => listener.node_added(node_id, &actuators),
        Message::NodeOffline { node_id } => listener.node_removed(node_id),
        Message::SensorData { node_id, readings } => listener.sensor_data(node_id, &readings),
        Message::ActuatorState { node_id, actuator_id, is_on } => {
            listener.actuator_state_changed(node_id, actuator_id, is_on);
        },
        Message::Error { kind, detail } => listener.server_error(kind, &detail),
        Message::PanelAnnounce => tracing::debug!("ignoring unexpected panel announce"),
    }
}
